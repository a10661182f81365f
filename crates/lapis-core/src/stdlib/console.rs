//! The `Console` library: line-oriented input and output.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::rc::Rc;

use tracing::warn;

use crate::diagnostics::codes;
use crate::value::Value;

use super::{expect_args, Library, LibraryError, LibraryResult};

/// Where console input comes from and output goes to.
pub trait ConsoleIo {
    /// Write one line of program output.
    fn write_line(&mut self, line: &str);

    /// Show `prompt` and read one line without its terminator. `None` at end
    /// of input.
    fn read_line(&mut self, prompt: Option<&str>) -> Option<String>;
}

/// The process's stdin and stdout.
pub struct StdConsole;

impl ConsoleIo for StdConsole {
    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }

    fn read_line(&mut self, prompt: Option<&str>) -> Option<String> {
        if let Some(prompt) = prompt {
            show_prompt(&mut std::io::stdout(), prompt)?;
        }
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Some(line)
            }
        }
    }
}

/// Write `prompt` without a newline and flush it. A prompt the user cannot
/// see is treated like the end of input.
fn show_prompt(out: &mut impl Write, prompt: &str) -> Option<()> {
    match out.write_all(prompt.as_bytes()).and_then(|_| out.flush()) {
        Ok(()) => Some(()),
        Err(e) => {
            warn!(error = %e, "failed to show console prompt");
            None
        }
    }
}

/// In-memory console. Clones share the same buffers, so a caller can keep
/// one handle and give another to the interpreter.
#[derive(Clone, Default)]
pub struct CapturedConsole {
    output: Rc<RefCell<Vec<String>>>,
    input: Rc<RefCell<VecDeque<String>>>,
}

impl CapturedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue lines to be returned by `read_line`.
    pub fn with_input<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input
            .borrow_mut()
            .extend(lines.into_iter().map(Into::into));
        self
    }

    /// Everything written so far, one line per `write_line`.
    pub fn output(&self) -> String {
        self.output
            .borrow()
            .iter()
            .map(|line| format!("{}\n", line))
            .collect()
    }
}

impl ConsoleIo for CapturedConsole {
    fn write_line(&mut self, line: &str) {
        self.output.borrow_mut().push(line.to_string());
    }

    fn read_line(&mut self, _prompt: Option<&str>) -> Option<String> {
        self.input.borrow_mut().pop_front()
    }
}

/// The `Console` library.
pub struct ConsoleLibrary {
    io: Box<dyn ConsoleIo>,
}

impl ConsoleLibrary {
    pub fn new(io: Box<dyn ConsoleIo>) -> Self {
        Self { io }
    }

    fn prompt(&mut self, name: &str, args: &[Value]) -> LibraryResult<Option<String>> {
        expect_args(name, args, 0, 1)?;
        let prompt = args.first().map(Value::to_string);
        Ok(self.io.read_line(prompt.as_deref()))
    }
}

const FUNCTIONS: &[&str] = &["print", "input", "number", "error"];

impl Library for ConsoleLibrary {
    fn name(&self) -> &'static str {
        "Console"
    }

    fn functions(&self) -> &'static [&'static str] {
        FUNCTIONS
    }

    fn call(&mut self, function: &str, args: Vec<Value>) -> LibraryResult<Value> {
        match function {
            "print" => {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.io.write_line(&line);
                Ok(Value::Null)
            }
            "input" => Ok(self
                .prompt("input", &args)?
                .map(Value::from)
                .unwrap_or(Value::Null)),
            "number" => match self.prompt("number", &args)? {
                None => Ok(Value::Null),
                Some(line) => line.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                    LibraryError::new(
                        codes::INVALID_CONVERSION,
                        format!("expected a number but read '{}'", line.trim()),
                    )
                }),
            },
            "error" => {
                expect_args("error", &args, 1, 1)?;
                Err(LibraryError::new(codes::USER_ERROR, args[0].to_string()))
            }
            _ => Err(LibraryError::new(
                codes::UNKNOWN_PROPERTY,
                format!("Console has no function '{}'", function),
            )),
        }
    }
}
