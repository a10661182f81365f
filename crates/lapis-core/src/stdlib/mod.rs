//! Built-in libraries: the `Console`, `File` and `Math` globals and the
//! foreign-call bridge boundary.

pub mod console;
pub mod external;
pub mod files;
pub mod math;

use rustc_hash::FxHashMap;

use crate::diagnostics::{codes, Diagnostic, ErrorClass};
use crate::span::Span;
use crate::value::Value;

pub use console::{CapturedConsole, ConsoleIo, ConsoleLibrary, StdConsole};
pub use external::{BridgeError, ForeignBridge, ProcessBridge};
pub use files::FileLibrary;
pub use math::MathLibrary;

/// Result type for library function calls.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// Error type for library operations.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryError {
    pub message: String,
    pub code: &'static str,
}

impl LibraryError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convert into a diagnostic located at the call site.
    pub fn into_diagnostic(self, span: Span) -> Diagnostic {
        let class = if self.code.starts_with("E3") {
            ErrorClass::Type
        } else {
            ErrorClass::Runtime
        };
        Diagnostic::error(class, self.code, self.message)
            .with_span(span)
            .build()
    }
}

/// A library of native functions exposed as a global object.
///
/// `call` takes `&mut self` so libraries can keep state, such as the console
/// holding its input and output handles.
pub trait Library {
    /// The global name, e.g. `Console`.
    fn name(&self) -> &'static str;

    /// Names of the callable functions.
    fn functions(&self) -> &'static [&'static str];

    /// Call a function in the library.
    fn call(&mut self, function: &str, args: Vec<Value>) -> LibraryResult<Value>;
}

/// Registry of available libraries.
#[derive(Default)]
pub struct LibraryRegistry {
    libraries: FxHashMap<&'static str, Box<dyn Library>>,
}

impl LibraryRegistry {
    /// Create a new registry with built-in libraries.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(ConsoleLibrary::new(Box::new(StdConsole))));
        registry.register(Box::new(FileLibrary::new()));
        registry.register(Box::new(MathLibrary::new()));
        registry
    }

    /// Register a library, replacing any library with the same name.
    pub fn register(&mut self, library: Box<dyn Library>) {
        self.libraries.insert(library.name(), library);
    }

    /// Get the names of all registered libraries, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.libraries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Resolve `library.function` to the function's static name.
    pub fn function(&self, library: &str, function: &str) -> Option<&'static str> {
        self.libraries
            .get(library)?
            .functions()
            .iter()
            .copied()
            .find(|name| *name == function)
    }

    pub fn call(&mut self, library: &str, function: &str, args: Vec<Value>) -> LibraryResult<Value> {
        match self.libraries.get_mut(library) {
            Some(lib) => lib.call(function, args),
            None => Err(LibraryError::new(
                codes::UNKNOWN_PROPERTY,
                format!("unknown library '{}'", library),
            )),
        }
    }
}

/// Check the argument count of `name` against `min..=max`.
pub(crate) fn expect_args(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> LibraryResult<()> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = match (min, max) {
        (min, max) if min == max => plural(min),
        (min, usize::MAX) => format!("at least {}", plural(min)),
        (min, max) => format!("{} to {} arguments", min, max),
    };
    Err(LibraryError::new(
        codes::ARITY_MISMATCH,
        format!("{}() expects {} but got {}", name, expected, args.len()),
    ))
}

fn plural(count: usize) -> String {
    if count == 1 {
        "1 argument".to_string()
    } else {
        format!("{} arguments", count)
    }
}

pub(crate) fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> LibraryResult<&'a str> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        other => Err(argument_type(name, index, "string", other)),
    }
}

pub(crate) fn number_arg(name: &str, args: &[Value], index: usize) -> LibraryResult<f64> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        other => Err(argument_type(name, index, "number", other)),
    }
}

/// A number argument with no fractional part.
pub(crate) fn integer_arg(name: &str, args: &[Value], index: usize) -> LibraryResult<i64> {
    let arg = args.get(index);
    arg.and_then(Value::as_integer)
        .ok_or_else(|| argument_type(name, index, "integer", arg))
}

fn argument_type(name: &str, index: usize, expected: &str, found: Option<&Value>) -> LibraryError {
    let found = found.map(Value::type_name).unwrap_or("nothing");
    LibraryError::new(
        codes::BINARY_TYPE_MISMATCH,
        format!(
            "{}() expects a {} as argument {} but got {}",
            name,
            expected,
            index + 1,
            found
        ),
    )
}
