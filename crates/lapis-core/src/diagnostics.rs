//! Diagnostic types for error reporting.

use std::fmt;

use miette::{GraphicalReportHandler, GraphicalTheme, LabeledSpan, NamedSource};
use serde::{Deserialize, Serialize};

use crate::span::Span;

/// Stable diagnostic codes.
pub mod codes {
    // Lexer
    pub const UNEXPECTED_CHARACTER: &str = "E100";
    pub const UNTERMINATED_STRING: &str = "E101";
    pub const UNTERMINATED_TEMPLATE: &str = "E102";
    pub const UNTERMINATED_COMMENT: &str = "E103";

    // Parser
    pub const UNEXPECTED_TOKEN: &str = "E200";
    pub const EXPECTED_TOKEN: &str = "E201";
    pub const EXPECTED_EXPRESSION: &str = "E202";
    pub const INVALID_ASSIGNMENT_TARGET: &str = "E203";
    pub const INVALID_POSTFIX_TARGET: &str = "E204";
    pub const VARIADIC_NOT_LAST: &str = "E205";
    pub const INVALID_DICTIONARY_KEY: &str = "E206";

    // Type
    pub const BINARY_TYPE_MISMATCH: &str = "E300";
    pub const UNARY_TYPE_MISMATCH: &str = "E301";
    pub const NOT_CALLABLE: &str = "E302";
    pub const ARITY_MISMATCH: &str = "E303";
    pub const NOT_INDEXABLE: &str = "E304";
    pub const UNKNOWN_PROPERTY: &str = "E305";

    // Runtime
    pub const UNDEFINED_VARIABLE: &str = "E400";
    pub const DIVISION_BY_ZERO: &str = "E401";
    pub const INDEX_OUT_OF_BOUNDS: &str = "E402";
    pub const USER_ERROR: &str = "E403";
    pub const STACK_OVERFLOW: &str = "E404";
    pub const NOT_ITERABLE: &str = "E405";
    pub const INVALID_CONVERSION: &str = "E406";
    pub const IO_FAILURE: &str = "E407";
    pub const FOREIGN_CALL: &str = "E408";

    // Import
    pub const MODULE_NOT_FOUND: &str = "E500";
    pub const SYMBOL_NOT_FOUND: &str = "E501";
    pub const SYMBOL_NOT_PUBLIC: &str = "E502";
    pub const CIRCULAR_IMPORT: &str = "E503";

    // Access
    pub const LOOP_CONTROL_OUTSIDE_LOOP: &str = "E600";

    // Warnings
    pub const UNREACHABLE_CODE: &str = "W001";
}

/// The family an error belongs to. Only runtime and type errors can be
/// caught by a running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Lexer,
    Parser,
    Runtime,
    Type,
    Import,
    Access,
}

impl ErrorClass {
    pub fn is_catchable(self) -> bool {
        matches!(self, ErrorClass::Runtime | ErrorClass::Type)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Lexer => "LexError",
            ErrorClass::Parser => "ParseError",
            ErrorClass::Runtime => "RuntimeError",
            ErrorClass::Type => "TypeError",
            ErrorClass::Import => "ImportError",
            ErrorClass::Access => "AccessError",
        };
        f.write_str(name)
    }
}

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// A message attached to a secondary span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A diagnostic message with source location.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {class}: {message}")]
pub struct Diagnostic {
    /// Error family
    pub class: ErrorClass,
    /// Severity of the diagnostic
    pub severity: DiagnosticSeverity,
    /// Error code (e.g., "E300")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Source file path
    pub file: String,
    /// Primary source span
    pub span: Span,
    /// Messages attached to sub-spans, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// Optional help text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(
        class: ErrorClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> DiagnosticBuilder {
        DiagnosticBuilder::new(class, DiagnosticSeverity::Error, code.into(), message.into())
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(
            ErrorClass::Parser,
            DiagnosticSeverity::Warning,
            code.into(),
            message.into(),
        )
    }

    pub fn lexer(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Lexer, code, message)
    }

    pub fn parser(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Parser, code, message)
    }

    pub fn runtime(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Runtime, code, message)
    }

    pub fn type_error(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Type, code, message)
    }

    pub fn import(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Import, code, message)
    }

    pub fn access(code: impl Into<String>, message: impl Into<String>) -> DiagnosticBuilder {
        Self::error(ErrorClass::Access, code, message)
    }

    pub fn is_catchable(&self) -> bool {
        self.severity == DiagnosticSeverity::Error && self.class.is_catchable()
    }

    /// Attach a file path unless one is already recorded.
    pub fn in_file(mut self, file: &str) -> Self {
        if self.file.is_empty() {
            self.file = file.to_string();
        }
        self
    }

    /// Render the diagnostic as a code frame with caret underlines.
    pub fn render(&self, source: &str, color: bool) -> String {
        let theme = if color {
            GraphicalTheme::unicode()
        } else {
            GraphicalTheme::unicode_nocolor()
        };
        let handler = GraphicalReportHandler::new_themed(theme).with_width(100);
        let report = Report {
            diagnostic: self,
            source: NamedSource::new(self.display_file(), source.to_string()),
        };
        let mut out = String::new();
        if handler.render_report(&mut out, &report).is_err() {
            return format!(
                "{}\n  --> {}:{}:{}\n",
                self,
                self.display_file(),
                self.span.start.line,
                self.span.start.column
            );
        }
        out
    }

    fn display_file(&self) -> &str {
        if self.file.is_empty() {
            "<input>"
        } else {
            &self.file
        }
    }
}

/// Adapter exposing a [`Diagnostic`] and its source text to miette.
struct Report<'a> {
    diagnostic: &'a Diagnostic,
    source: NamedSource<String>,
}

impl fmt::Debug for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.diagnostic, f)
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.diagnostic.class, self.diagnostic.message)
    }
}

impl std::error::Error for Report<'_> {}

impl miette::Diagnostic for Report<'_> {
    fn code<'b>(&'b self) -> Option<Box<dyn fmt::Display + 'b>> {
        Some(Box::new(&self.diagnostic.code))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.diagnostic.severity {
            DiagnosticSeverity::Error => miette::Severity::Error,
            DiagnosticSeverity::Warning => miette::Severity::Warning,
        })
    }

    fn help<'b>(&'b self) -> Option<Box<dyn fmt::Display + 'b>> {
        self.diagnostic
            .help
            .as_ref()
            .map(|help| Box::new(help) as Box<dyn fmt::Display + 'b>)
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let primary_is_labeled = self
            .diagnostic
            .labels
            .iter()
            .any(|label| label.span == self.diagnostic.span);
        let primary = (!primary_is_labeled)
            .then(|| LabeledSpan::new_primary_with_span(None, self.diagnostic.span));
        let labels = self
            .diagnostic
            .labels
            .iter()
            .map(|label| LabeledSpan::new_with_span(Some(label.message.clone()), label.span));
        Some(Box::new(primary.into_iter().chain(labels)))
    }
}

/// Builder for constructing diagnostics.
pub struct DiagnosticBuilder {
    class: ErrorClass,
    severity: DiagnosticSeverity,
    code: String,
    message: String,
    file: Option<String>,
    span: Option<Span>,
    labels: Vec<Label>,
    help: Option<String>,
}

impl DiagnosticBuilder {
    pub fn new(
        class: ErrorClass,
        severity: DiagnosticSeverity,
        code: String,
        message: String,
    ) -> Self {
        Self {
            class,
            severity,
            code,
            message,
            file: None,
            span: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        Diagnostic {
            class: self.class,
            severity: self.severity,
            code: self.code,
            message: self.message,
            file: self.file.unwrap_or_default(),
            span: self.span.unwrap_or_default(),
            labels: self.labels,
            help: self.help,
        }
    }
}

/// Collection of diagnostics.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
        }
    }
}

/// JSON output format for diagnostics.
#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosticsOutput {
    pub version: String,
    pub status: String,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub summary: DiagnosticsSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub total_errors: usize,
    pub total_warnings: usize,
}

impl DiagnosticsOutput {
    pub fn from_diagnostics(diagnostics: &Diagnostics) -> Self {
        let errors: Vec<_> = diagnostics.errors().cloned().collect();
        let warnings: Vec<_> = diagnostics.warnings().cloned().collect();

        Self {
            version: "1.0".to_string(),
            status: if errors.is_empty() { "ok" } else { "error" }.to_string(),
            summary: DiagnosticsSummary {
                total_errors: errors.len(),
                total_warnings: warnings.len(),
            },
            errors,
            warnings,
        }
    }
}
