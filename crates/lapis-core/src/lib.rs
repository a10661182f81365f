//! Lapis Core Library
//!
//! This crate provides the core of the Lapis scripting language: lexing,
//! parsing, evaluation, module loading and diagnostics.
//!
//! ```no_run
//! use lapis_core::Interpreter;
//!
//! let mut interpreter = Interpreter::new();
//! let value = interpreter.run_source("var x = 2; x * 21;", "<example>")?;
//! assert_eq!(value.to_string(), "42");
//! # Ok::<(), lapis_core::Diagnostic>(())
//! ```

pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod interpreter;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod span;
mod stack;
pub mod stdlib;
pub mod value;

pub use ast::Program;
pub use config::{ColorMode, ConfigError, InterpreterConfig};
pub use diagnostics::{Diagnostic, DiagnosticSeverity, Diagnostics, DiagnosticsOutput, ErrorClass};
pub use interpreter::Interpreter;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{parse_source, Parser};
pub use span::Span;
pub use stdlib::{CapturedConsole, ConsoleIo, ForeignBridge, Library};
pub use value::Value;
