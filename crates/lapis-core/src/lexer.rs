//! Lexer for the Lapis language.
//!
//! Uses the `logos` crate for efficient tokenization. Strings, template
//! strings and nested block comments are scanned by callbacks so that an
//! unterminated literal can be reported at its opening delimiter.

use logos::Logos;
use serde::Serialize;

use crate::diagnostics::{codes, Diagnostic};
use crate::span::{LineIndex, Position, Span};

/// Why the raw lexer rejected a piece of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexErrorKind {
    #[default]
    UnexpectedCharacter,
    UnterminatedString,
    UnterminatedTemplate,
    UnterminatedComment,
}

/// Token kinds for the Lapis language.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    // Keywords
    #[token("package")]
    Package,
    #[token("use")]
    Use,
    #[token("var")]
    Var,
    #[token("func")]
    Func,
    #[token("class")]
    Class,
    #[token("this")]
    This,
    #[token("public")]
    Public,
    #[token("private")]
    Private,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("end")]
    End,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("=")]
    Assign,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    // Literals
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    #[token("\"", |lex| quoted(lex, b'"'))]
    #[token("'", |lex| quoted(lex, b'\''))]
    String,

    #[token("`", template)]
    Template,

    // Comments
    #[regex(r"//[^\n]*")]
    LineComment,

    #[token("/*", block_comment)]
    BlockComment,

    // End of file
    Eof,
}

impl TokenKind {
    pub fn is_trivia(&self) -> bool {
        matches!(self, TokenKind::LineComment | TokenKind::BlockComment)
    }

    /// How the token is named in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Package => "'package'",
            TokenKind::Use => "'use'",
            TokenKind::Var => "'var'",
            TokenKind::Func => "'func'",
            TokenKind::Class => "'class'",
            TokenKind::This => "'this'",
            TokenKind::Public => "'public'",
            TokenKind::Private => "'private'",
            TokenKind::If => "'if'",
            TokenKind::Elif => "'elif'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::For => "'for'",
            TokenKind::In => "'in'",
            TokenKind::Switch => "'switch'",
            TokenKind::Case => "'case'",
            TokenKind::Default => "'default'",
            TokenKind::Try => "'try'",
            TokenKind::Catch => "'catch'",
            TokenKind::Finally => "'finally'",
            TokenKind::Return => "'return'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::End => "'end'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::Null => "'null'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::StarStar => "'**'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::PlusPlus => "'++'",
            TokenKind::MinusMinus => "'--'",
            TokenKind::Assign => "'='",
            TokenKind::EqualEqual => "'=='",
            TokenKind::BangEqual => "'!='",
            TokenKind::Less => "'<'",
            TokenKind::LessEqual => "'<='",
            TokenKind::Greater => "'>'",
            TokenKind::GreaterEqual => "'>='",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::Bang => "'!'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Colon => "':'",
            TokenKind::Dot => "'.'",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Template => "template string",
            TokenKind::LineComment | TokenKind::BlockComment => "comment",
            TokenKind::Eof => "end of input",
        }
    }
}

/// Scan the body of a quoted string; the opening quote is already consumed.
fn quoted(lex: &mut logos::Lexer<TokenKind>, quote: u8) -> Result<(), LexErrorKind> {
    let rest = lex.remainder().as_bytes();
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            b'\\' => i += 2,
            c if c == quote => {
                lex.bump(i + 1);
                return Ok(());
            }
            _ => i += 1,
        }
    }
    lex.bump(rest.len());
    Err(LexErrorKind::UnterminatedString)
}

/// Scan a template string up to its closing backtick. Braces inside an
/// embedded expression are balanced and quoted strings inside it are skipped.
fn template(lex: &mut logos::Lexer<TokenKind>) -> Result<(), LexErrorKind> {
    let rest = lex.remainder().as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < rest.len() {
        let c = rest[i];
        if depth == 0 {
            match c {
                b'\\' => i += 2,
                b'`' => {
                    lex.bump(i + 1);
                    return Ok(());
                }
                b'{' => {
                    depth = 1;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }
        match c {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            b'"' | b'\'' => {
                let mut j = i + 1;
                while j < rest.len() && rest[j] != c {
                    j += if rest[j] == b'\\' { 2 } else { 1 };
                }
                if j >= rest.len() {
                    break;
                }
                i = j;
            }
            _ => {}
        }
        i += 1;
    }
    lex.bump(rest.len());
    Err(LexErrorKind::UnterminatedTemplate)
}

/// Skip a block comment, honouring nested `/* ... */` pairs.
fn block_comment(lex: &mut logos::Lexer<TokenKind>) -> Result<(), LexErrorKind> {
    let rest = lex.remainder().as_bytes();
    let mut depth = 1usize;
    let mut i = 0;
    while i < rest.len() {
        match (rest[i], rest.get(i + 1)) {
            (b'/', Some(b'*')) => {
                depth += 1;
                i += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    lex.bump(i);
                    return Ok(());
                }
            }
            _ => i += 1,
        }
    }
    lex.bump(rest.len());
    Err(LexErrorKind::UnterminatedComment)
}

/// One segment of a template string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text with escapes already resolved.
    Text(String),
    /// Raw source of an embedded `{expression}` and where it starts.
    Expr { source: String, origin: Position },
}

/// A token with its kind, text, and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
    /// Segments of a template string; empty for every other kind.
    pub parts: Vec<TemplatePart>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
            parts: Vec::new(),
        }
    }

    pub fn template(text: impl Into<String>, span: Span, parts: Vec<TemplatePart>) -> Self {
        Self {
            kind: TokenKind::Template,
            text: text.into(),
            span,
            parts,
        }
    }
}

/// Lexer for the Lapis language.
pub struct Lexer<'a> {
    source: &'a str,
    inner: logos::Lexer<'a, TokenKind>,
    lines: LineIndex,
    origin: Option<Position>,
    file: String,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            lines: LineIndex::new(source),
            origin: None,
            file: String::new(),
            finished: false,
        }
    }

    /// Record the file name attached to lexer diagnostics.
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Lex a fragment cut out of a larger file, reporting positions in the
    /// coordinates of that file.
    pub fn with_origin(mut self, origin: Position) -> Self {
        self.origin = Some(origin);
        self
    }

    fn position(&self, offset: usize) -> Position {
        let position = self.lines.position(offset);
        match self.origin {
            Some(origin) => position.relative_to(origin),
            None => position,
        }
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.position(start), self.position(end))
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token, Diagnostic> {
        loop {
            if self.finished {
                let end = self.source.len();
                return Ok(Token::new(TokenKind::Eof, "", self.span(end, end)));
            }

            match self.inner.next() {
                Some(Ok(kind)) if kind.is_trivia() => continue,
                Some(Ok(TokenKind::Template)) => {
                    let range = self.inner.span();
                    let text = self.inner.slice();
                    let parts = self.template_parts(range.start + 1, &text[1..text.len() - 1]);
                    return Ok(Token::template(text, self.span(range.start, range.end), parts));
                }
                Some(Ok(kind)) => {
                    let range = self.inner.span();
                    return Ok(Token::new(
                        kind,
                        self.inner.slice(),
                        self.span(range.start, range.end),
                    ));
                }
                Some(Err(kind)) => return Err(self.error(kind)),
                None => self.finished = true,
            }
        }
    }

    /// Tokenize the entire source.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn error(&self, kind: LexErrorKind) -> Diagnostic {
        let range = self.inner.span();
        let start = range.start;
        let builder = match kind {
            LexErrorKind::UnexpectedCharacter => {
                let text = self.inner.slice();
                let builder = Diagnostic::lexer(
                    codes::UNEXPECTED_CHARACTER,
                    format!("unexpected character '{}'", text),
                )
                .with_span(self.span(start, range.end));
                match text {
                    "&" => builder.with_help("use '&&' for logical and"),
                    "|" => builder.with_help("use '||' for logical or"),
                    _ => builder,
                }
            }
            LexErrorKind::UnterminatedString => {
                let quote = &self.source[start..start + 1];
                Diagnostic::lexer(codes::UNTERMINATED_STRING, "unterminated string literal")
                    .with_span(self.span(start, start + 1))
                    .with_help(format!("add a closing {} to end the string", quote))
            }
            LexErrorKind::UnterminatedTemplate => Diagnostic::lexer(
                codes::UNTERMINATED_TEMPLATE,
                "unterminated template string",
            )
            .with_span(self.span(start, start + 1))
            .with_help("add a closing ` and make sure every '{' is matched by '}'"),
            LexErrorKind::UnterminatedComment => {
                Diagnostic::lexer(codes::UNTERMINATED_COMMENT, "unterminated block comment")
                    .with_span(self.span(start, start + 2))
                    .with_help("block comments nest, so every '/*' needs its own '*/'")
            }
        };
        builder.with_file(self.file.clone()).build()
    }

    /// Split the body of a template string into text and embedded
    /// expression segments. `base` is the byte offset of `body` in the
    /// source.
    fn template_parts(&self, base: usize, body: &str) -> Vec<TemplatePart> {
        let bytes = body.as_bytes();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = body.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => push_escape(&mut text, escaped, true),
                    None => text.push('\\'),
                },
                '{' => {
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let start = i + 1;
                    let end = embedded_end(bytes, start);
                    parts.push(TemplatePart::Expr {
                        source: body[start..end].to_string(),
                        origin: self.position(base + start),
                    });
                    while let Some(&(j, _)) = chars.peek() {
                        if j > end {
                            break;
                        }
                        chars.next();
                    }
                }
                _ => text.push(c),
            }
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        parts
    }
}

/// Index of the `}` closing an embedded expression that starts at `start`.
fn embedded_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Append the character an escape sequence stands for. Unknown escapes keep
/// their backslash.
pub fn push_escape(out: &mut String, escaped: char, in_template: bool) {
    match escaped {
        'n' => out.push('\n'),
        't' => out.push('\t'),
        'r' => out.push('\r'),
        '\\' => out.push('\\'),
        '"' => out.push('"'),
        '\'' => out.push('\''),
        '`' | '{' | '}' if in_template => out.push(escaped),
        other => {
            out.push('\\');
            out.push(other);
        }
    }
}

/// Tokenize a complete source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorClass;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords() {
        let source = "package use var func class this public private if elif else while for in \
                      switch case default try catch finally return break continue end true false null";
        let kinds = kinds(source);
        assert_eq!(kinds.len(), 28);
        assert_eq!(kinds[0], TokenKind::Package);
        assert_eq!(kinds[13], TokenKind::In);
        assert_eq!(kinds[23], TokenKind::End);
        assert_eq!(kinds[27], TokenKind::Eof);
        assert!(!kinds.contains(&TokenKind::Identifier));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            kinds("variable ending"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_operators_use_longest_match() {
        assert_eq!(
            kinds("** * ++ + -- - == = != ! <= < >= > && ||"),
            vec![
                TokenKind::StarStar,
                TokenKind::Star,
                TokenKind::PlusPlus,
                TokenKind::Plus,
                TokenKind::MinusMinus,
                TokenKind::Minus,
                TokenKind::EqualEqual,
                TokenKind::Assign,
                TokenKind::BangEqual,
                TokenKind::Bang,
                TokenKind::LessEqual,
                TokenKind::Less,
                TokenKind::GreaterEqual,
                TokenKind::Greater,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 3.14 7.").unwrap();
        assert_eq!(tokens[0].text, "42");
        assert_eq!(tokens[1].text, "3.14");
        assert_eq!(tokens[2].text, "7");
        assert_eq!(tokens[3].kind, TokenKind::Dot);
    }

    #[test]
    fn test_string_literals_allow_opposite_quote() {
        let tokens = tokenize(r#"'say "hi"' "it's" "a\"b""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, r#"'say "hi"'"#);
        assert_eq!(tokens[1].text, r#""it's""#);
        assert_eq!(tokens[2].text, r#""a\"b""#);
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "var // line comment\n/* outer /* inner */ still outer */ x";
        assert_eq!(
            kinds(source),
            vec![TokenKind::Var, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_nested_comment() {
        let err = tokenize("x /* a /* b */").unwrap_err();
        assert_eq!(err.class, ErrorClass::Lexer);
        assert_eq!(err.code, codes::UNTERMINATED_COMMENT);
        assert_eq!(err.span.start.offset, 2);
        assert_eq!(err.span.end.offset, 4);
    }

    #[test]
    fn test_unterminated_string_points_at_opening_quote() {
        let err = tokenize("var s = \"abc;\n").unwrap_err();
        assert_eq!(err.code, codes::UNTERMINATED_STRING);
        assert_eq!(err.span.start.line, 1);
        assert_eq!(err.span.start.column, 9);
        assert_eq!(err.span.len(), 1);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a & b").unwrap_err();
        assert_eq!(err.code, codes::UNEXPECTED_CHARACTER);
        assert_eq!(err.span.start.column, 3);
        assert_eq!(err.help.as_deref(), Some("use '&&' for logical and"));
    }

    #[test]
    fn test_positions_across_lines() {
        let tokens = tokenize("var a;\n  a = 1;").unwrap();
        let a = &tokens[3];
        assert_eq!(a.text, "a");
        assert_eq!(a.span.start.line, 2);
        assert_eq!(a.span.start.column, 3);
        assert_eq!(a.span.start.offset, 9);
    }

    #[test]
    fn test_template_parts() {
        let tokens = tokenize("`Result: {(2+5)*2}!`").unwrap();
        let token = &tokens[0];
        assert_eq!(token.kind, TokenKind::Template);
        assert_eq!(token.parts.len(), 3);
        assert_eq!(token.parts[0], TemplatePart::Text("Result: ".to_string()));
        match &token.parts[1] {
            TemplatePart::Expr { source, origin } => {
                assert_eq!(source, "(2+5)*2");
                assert_eq!(origin.offset, 10);
                assert_eq!(origin.column, 11);
            }
            other => panic!("expected embedded expression, got {:?}", other),
        }
        assert_eq!(token.parts[2], TemplatePart::Text("!".to_string()));
    }

    #[test]
    fn test_template_nested_braces_and_escapes() {
        let tokens = tokenize(r#"`a \{b\} {d.get("}", {x: 1})} \``"#).unwrap();
        let parts = &tokens[0].parts;
        assert_eq!(parts[0], TemplatePart::Text("a {b} ".to_string()));
        match &parts[1] {
            TemplatePart::Expr { source, .. } => assert_eq!(source, r#"d.get("}", {x: 1})"#),
            other => panic!("expected embedded expression, got {:?}", other),
        }
        assert_eq!(parts[2], TemplatePart::Text(" `".to_string()));
    }

    #[test]
    fn test_unterminated_template() {
        let err = tokenize("`abc {x").unwrap_err();
        assert_eq!(err.code, codes::UNTERMINATED_TEMPLATE);
        assert_eq!(err.span.start.offset, 0);
    }

    #[test]
    fn test_fragment_positions_follow_origin() {
        let origin = Position::new(4, 12, 80);
        let tokens = Lexer::new("a + b").with_origin(origin).tokenize().unwrap();
        assert_eq!(tokens[2].span.start, Position::new(4, 16, 84));
    }
}
