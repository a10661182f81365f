//! The `Math` library.

use crate::diagnostics::codes;
use crate::value::Value;

use super::{expect_args, number_arg, Library, LibraryError, LibraryResult};

#[derive(Default)]
pub struct MathLibrary;

impl MathLibrary {
    pub fn new() -> Self {
        Self
    }
}

const FUNCTIONS: &[&str] = &["sqrt", "abs", "floor", "ceil"];

impl Library for MathLibrary {
    fn name(&self) -> &'static str {
        "Math"
    }

    fn functions(&self) -> &'static [&'static str] {
        FUNCTIONS
    }

    fn call(&mut self, function: &str, args: Vec<Value>) -> LibraryResult<Value> {
        expect_args(function, &args, 1, 1)?;
        let x = number_arg(function, &args, 0)?;
        let result = match function {
            "sqrt" if x < 0.0 => {
                return Err(LibraryError::new(
                    codes::INVALID_CONVERSION,
                    format!("cannot take the square root of {}", args[0]),
                ))
            }
            "sqrt" => x.sqrt(),
            "abs" => x.abs(),
            "floor" => x.floor(),
            "ceil" => x.ceil(),
            _ => {
                return Err(LibraryError::new(
                    codes::UNKNOWN_PROPERTY,
                    format!("Math has no function '{}'", function),
                ))
            }
        };
        Ok(Value::Number(result))
    }
}
