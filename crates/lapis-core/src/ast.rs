//! Abstract Syntax Tree for Lapis.

use std::fmt;
use std::rc::Rc;

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// A complete Lapis program (one source file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Top-level statements in source order
    pub statements: Vec<Statement>,
    /// Source span
    pub span: Span,
}

/// A block of statements: the body of any compound statement.
pub type Block = Vec<Statement>;

/// Declaration visibility. Only meaningful for top-level declarations,
/// where it decides whether another file may import the symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// A statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    /// `var name = value;`
    Var(VarDeclaration),
    /// `func name(params) ... end`
    Function(Rc<FunctionDeclaration>),
    /// `class Name ... end`
    Class(ClassDeclaration),
    /// `package "path" use a, b;`
    Import(ImportStatement),
    If(IfStatement),
    While(WhileStatement),
    ForIn(ForInStatement),
    Switch(SwitchStatement),
    Try(TryStatement),
    Return {
        value: Option<Expression>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    /// Expression evaluated for its side effects
    Expression(Expression),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Var(decl) => decl.span,
            Statement::Function(decl) => decl.span,
            Statement::Class(decl) => decl.span,
            Statement::Import(import) => import.span,
            Statement::If(stmt) => stmt.span,
            Statement::While(stmt) => stmt.span,
            Statement::ForIn(stmt) => stmt.span,
            Statement::Switch(stmt) => stmt.span,
            Statement::Try(stmt) => stmt.span,
            Statement::Return { span, .. } => *span,
            Statement::Break { span } => *span,
            Statement::Continue { span } => *span,
            Statement::Expression(expr) => expr.span(),
        }
    }

    /// Whether control never reaches the statement that follows this one.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Statement::Return { .. } | Statement::Break { .. } | Statement::Continue { .. }
        )
    }
}

/// A variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDeclaration {
    pub visibility: Visibility,
    pub name: Identifier,
    /// Initializer; a declaration without one binds `null`
    pub initializer: Option<Expression>,
    pub span: Span,
}

/// A function or method declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub visibility: Visibility,
    pub name: Identifier,
    /// Parameter names in order, including the variadic collector
    pub params: Vec<Identifier>,
    /// Whether the last parameter collects the remaining arguments
    pub variadic: bool,
    pub body: Block,
    pub span: Span,
}

impl FunctionDeclaration {
    /// Parameters bound positionally.
    pub fn fixed_params(&self) -> &[Identifier] {
        if self.variadic {
            &self.params[..self.params.len() - 1]
        } else {
            &self.params
        }
    }
}

/// A class declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDeclaration {
    pub visibility: Visibility,
    pub name: Identifier,
    pub methods: Vec<Rc<FunctionDeclaration>>,
    pub span: Span,
}

/// An import directive: `package "<path>" [use a, b];`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStatement {
    pub path: StringLiteral,
    /// Requested symbols; empty imports every public symbol
    pub names: Vec<Identifier>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfStatement {
    pub condition: Expression,
    pub then_branch: Block,
    pub elif_branches: Vec<ElifBranch>,
    pub else_branch: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElifBranch {
    pub condition: Expression,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileStatement {
    pub condition: Expression,
    pub body: Block,
    pub span: Span,
}

/// `for item in iterable ... end`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForInStatement {
    pub binding: Identifier,
    pub iterable: Expression,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStatement {
    pub subject: Expression,
    pub cases: Vec<CaseClause>,
    pub default: Option<Block>,
    pub span: Span,
}

/// `case a, b, c: ...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseClause {
    pub values: Vec<Expression>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryStatement {
    pub body: Block,
    pub catch: Option<CatchClause>,
    pub finally: Option<Block>,
    pub span: Span,
}

/// `catch(e) ...` or a bare `catch ...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub binding: Option<Identifier>,
    pub body: Block,
    pub span: Span,
}

/// An expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    /// Identifier reference
    Identifier(Identifier),
    /// Number literal
    Number(NumberLiteral),
    /// String literal
    String(StringLiteral),
    /// Boolean literal
    Boolean(BooleanLiteral),
    Null {
        span: Span,
    },
    This {
        span: Span,
    },
    /// Template string: `` `text {expr} text` ``
    Template {
        segments: Vec<TemplateSegment>,
        span: Span,
    },
    /// Array literal: `[a, b]`
    Array {
        elements: Vec<Expression>,
        span: Span,
    },
    /// Dictionary literal: `{key: value}`
    Dictionary {
        entries: Vec<DictionaryEntry>,
        span: Span,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        span: Span,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
        span: Span,
    },
    /// `target++` / `target--`
    Postfix {
        op: PostfixOperator,
        target: Box<Target>,
        span: Span,
    },
    Assign {
        target: Box<Target>,
        value: Box<Expression>,
        span: Span,
    },
    /// Function call: `f(a, b)`
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
        span: Span,
    },
    /// Property access: `a.b`
    Property {
        object: Box<Expression>,
        name: Identifier,
        span: Span,
    },
    /// Index access: `a[i]`
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Identifier(id) => id.span,
            Expression::Number(n) => n.span,
            Expression::String(s) => s.span,
            Expression::Boolean(b) => b.span,
            Expression::Null { span }
            | Expression::This { span }
            | Expression::Template { span, .. }
            | Expression::Array { span, .. }
            | Expression::Dictionary { span, .. }
            | Expression::Binary { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Postfix { span, .. }
            | Expression::Assign { span, .. }
            | Expression::Call { span, .. }
            | Expression::Property { span, .. }
            | Expression::Index { span, .. } => *span,
        }
    }

    /// Reinterpret the expression as something that can be assigned to.
    pub fn into_target(self) -> Result<Target, Expression> {
        match self {
            Expression::Identifier(id) => Ok(Target::Identifier(id)),
            Expression::Property {
                object, name, span, ..
            } => Ok(Target::Property { object, name, span }),
            Expression::Index {
                object, index, span,
            } => Ok(Target::Index {
                object,
                index,
                span,
            }),
            other => Err(other),
        }
    }
}

/// The left-hand side of an assignment or the operand of `++`/`--`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Target {
    Identifier(Identifier),
    Property {
        object: Box<Expression>,
        name: Identifier,
        span: Span,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        span: Span,
    },
}

impl Target {
    pub fn span(&self) -> Span {
        match self {
            Target::Identifier(id) => id.span,
            Target::Property { span, .. } | Target::Index { span, .. } => *span,
        }
    }
}

/// One piece of a template string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemplateSegment {
    Text(String),
    Expression(Expression),
}

/// A `key: value` pair in a dictionary literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: DictionaryKey,
    pub value: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DictionaryKey {
    /// Bare identifier, used verbatim as the key
    Name(Identifier),
    String(StringLiteral),
    /// Number literal, keyed by its printed form
    Number(NumberLiteral),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "**",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Negate,
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "!",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostfixOperator {
    Increment,
    Decrement,
}

impl fmt::Display for PostfixOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostfixOperator::Increment => "++",
            PostfixOperator::Decrement => "--",
        })
    }
}

/// An identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

impl Identifier {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// A string literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringLiteral {
    pub value: String,
    pub span: Span,
}

impl StringLiteral {
    pub fn new(value: impl Into<String>, span: Span) -> Self {
        Self {
            value: value.into(),
            span,
        }
    }
}

/// A number literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberLiteral {
    pub value: f64,
    pub span: Span,
}

impl NumberLiteral {
    pub fn new(value: f64, span: Span) -> Self {
        Self { value, span }
    }
}

/// A boolean literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BooleanLiteral {
    pub value: bool,
    pub span: Span,
}

impl BooleanLiteral {
    pub fn new(value: bool, span: Span) -> Self {
        Self { value, span }
    }
}
