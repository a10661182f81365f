//! Parser for the Lapis language.
//!
//! Statements are block structured (`<keyword> ... end`) and terminated by
//! `;`. Binary expressions use precedence climbing. Parsing stops at the
//! first error.

use std::rc::Rc;

use crate::ast::*;
use crate::diagnostics::{codes, Diagnostic, DiagnosticBuilder, Diagnostics};
use crate::lexer::{push_escape, Lexer, TemplatePart, Token, TokenKind};
use crate::span::Span;
use crate::stack;

/// Binding power of the binary operators, loosest first.
const OR: u8 = 1;
const AND: u8 = 2;
const EQUALITY: u8 = 3;
const RELATIONAL: u8 = 4;
const ADDITIVE: u8 = 5;
const MULTIPLICATIVE: u8 = 6;
const POWER: u8 = 7;

fn binary_operator(kind: TokenKind) -> Option<(BinaryOperator, u8)> {
    let entry = match kind {
        TokenKind::OrOr => (BinaryOperator::Or, OR),
        TokenKind::AndAnd => (BinaryOperator::And, AND),
        TokenKind::EqualEqual => (BinaryOperator::Equal, EQUALITY),
        TokenKind::BangEqual => (BinaryOperator::NotEqual, EQUALITY),
        TokenKind::Less => (BinaryOperator::Less, RELATIONAL),
        TokenKind::LessEqual => (BinaryOperator::LessEqual, RELATIONAL),
        TokenKind::Greater => (BinaryOperator::Greater, RELATIONAL),
        TokenKind::GreaterEqual => (BinaryOperator::GreaterEqual, RELATIONAL),
        TokenKind::Plus => (BinaryOperator::Add, ADDITIVE),
        TokenKind::Minus => (BinaryOperator::Subtract, ADDITIVE),
        TokenKind::Star => (BinaryOperator::Multiply, MULTIPLICATIVE),
        TokenKind::Slash => (BinaryOperator::Divide, MULTIPLICATIVE),
        TokenKind::Percent => (BinaryOperator::Modulo, MULTIPLICATIVE),
        TokenKind::StarStar => (BinaryOperator::Power, POWER),
        _ => return None,
    };
    Some(entry)
}

/// Parser for the Lapis language.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    warnings: Diagnostics,
    file_path: String,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>, file_path: impl Into<String>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, "", Span::new(span.end, span.end)));
        }
        Self {
            tokens,
            pos: 0,
            warnings: Diagnostics::new(),
            file_path: file_path.into(),
        }
    }

    /// Parse the entire program.
    pub fn parse(self) -> Result<Program, Diagnostic> {
        self.parse_with_warnings().map(|(program, _)| program)
    }

    /// Parse the entire program, also returning non-fatal warnings such as
    /// unreachable statements.
    pub fn parse_with_warnings(mut self) -> Result<(Program, Diagnostics), Diagnostic> {
        let start_span = self.current_span();
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        self.check_reachability(&statements);
        let program = Program {
            statements,
            span: start_span.merge(&self.current_span()),
        };
        Ok((program, self.warnings))
    }

    fn parse_statement(&mut self) -> Result<Statement, Diagnostic> {
        match self.current().kind {
            TokenKind::Public | TokenKind::Private => {
                let modifier = self.advance();
                let visibility = if modifier.kind == TokenKind::Public {
                    Visibility::Public
                } else {
                    Visibility::Private
                };
                self.parse_declaration(visibility, Some(&modifier))
            }
            TokenKind::Var | TokenKind::Func | TokenKind::Class => {
                self.parse_declaration(Visibility::Private, None)
            }
            TokenKind::Package => self.parse_import().map(Statement::Import),
            TokenKind::If => self.parse_if().map(Statement::If),
            TokenKind::While => self.parse_while().map(Statement::While),
            TokenKind::For => self.parse_for().map(Statement::ForIn),
            TokenKind::Switch => self.parse_switch().map(Statement::Switch),
            TokenKind::Try => self.parse_try().map(Statement::Try),
            TokenKind::Return => {
                let keyword = self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_semicolon()?;
                Ok(Statement::Return {
                    value,
                    span: keyword.span.merge(&self.previous_span()),
                })
            }
            TokenKind::Break => {
                let keyword = self.advance();
                self.expect_semicolon()?;
                Ok(Statement::Break { span: keyword.span })
            }
            TokenKind::Continue => {
                let keyword = self.advance();
                self.expect_semicolon()?;
                Ok(Statement::Continue { span: keyword.span })
            }
            TokenKind::Elif
            | TokenKind::Else
            | TokenKind::End
            | TokenKind::Case
            | TokenKind::Default
            | TokenKind::Catch
            | TokenKind::Finally => {
                let token = self.current();
                Err(self
                    .error(
                        codes::UNEXPECTED_TOKEN,
                        format!("unexpected {}", token.kind.describe()),
                        token.span,
                    )
                    .with_help(format!(
                        "{} is only valid inside a matching block",
                        token.kind.describe()
                    ))
                    .build())
            }
            _ => {
                let expression = self.parse_expression()?;
                self.expect_semicolon()?;
                Ok(Statement::Expression(expression))
            }
        }
    }

    fn parse_declaration(
        &mut self,
        visibility: Visibility,
        modifier: Option<&Token>,
    ) -> Result<Statement, Diagnostic> {
        let start = modifier.map(|m| m.span).unwrap_or_else(|| self.current_span());
        match self.current().kind {
            TokenKind::Var => self.parse_var(visibility, start).map(Statement::Var),
            TokenKind::Func => self
                .parse_function(visibility, start)
                .map(|decl| Statement::Function(Rc::new(decl))),
            TokenKind::Class => self.parse_class(visibility, start).map(Statement::Class),
            _ => {
                let token = self.current();
                let modifier = modifier.map(|m| m.text.as_str()).unwrap_or("visibility");
                Err(self
                    .error(
                        codes::UNEXPECTED_TOKEN,
                        format!(
                            "expected 'var', 'func' or 'class' after '{}', found {}",
                            modifier,
                            token.kind.describe()
                        ),
                        token.span,
                    )
                    .with_help("visibility modifiers only apply to declarations")
                    .build())
            }
        }
    }

    fn parse_var(&mut self, visibility: Visibility, start: Span) -> Result<VarDeclaration, Diagnostic> {
        self.expect(TokenKind::Var)?;
        let name = self.parse_identifier()?;
        let initializer = if self.check(TokenKind::Assign) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon()?;
        Ok(VarDeclaration {
            visibility,
            name,
            initializer,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_function(
        &mut self,
        visibility: Visibility,
        start: Span,
    ) -> Result<FunctionDeclaration, Diagnostic> {
        let keyword = self.expect(TokenKind::Func)?;
        let name = self.parse_identifier()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        let mut variadic = false;
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.parse_identifier()?;
                if variadic {
                    let collector = &params[params.len() - 1];
                    return Err(self.variadic_not_last(collector));
                }
                params.push(param);
                if self.check(TokenKind::StarStar) {
                    self.advance();
                    variadic = true;
                }
                if !self.check(TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block(&[TokenKind::End], "func", keyword.span)?;
        self.expect(TokenKind::End)?;
        Ok(FunctionDeclaration {
            visibility,
            name,
            params,
            variadic,
            body,
            span: start.merge(&self.previous_span()),
        })
    }

    fn variadic_not_last(&self, collector: &Identifier) -> Diagnostic {
        self.error(
            codes::VARIADIC_NOT_LAST,
            format!(
                "variadic parameter '{}' must be the last parameter",
                collector.name
            ),
            collector.span,
        )
        .with_help("move the '**' parameter to the end of the parameter list")
        .build()
    }

    fn parse_class(
        &mut self,
        visibility: Visibility,
        start: Span,
    ) -> Result<ClassDeclaration, Diagnostic> {
        let keyword = self.expect(TokenKind::Class)?;
        let name = self.parse_identifier()?;
        if self.check(TokenKind::LParen) {
            self.advance();
            self.expect(TokenKind::RParen)?;
        }

        let mut methods = Vec::new();
        while !self.check(TokenKind::End) {
            if self.is_at_end() {
                return Err(self.unclosed("class", keyword.span));
            }
            if !self.check(TokenKind::Func) {
                let token = self.current();
                return Err(self
                    .error(
                        codes::UNEXPECTED_TOKEN,
                        format!(
                            "expected a method declaration in class '{}', found {}",
                            name.name,
                            token.kind.describe()
                        ),
                        token.span,
                    )
                    .with_help("class bodies may only contain 'func' declarations")
                    .build());
            }
            let method_start = self.current_span();
            methods.push(Rc::new(
                self.parse_function(Visibility::Private, method_start)?,
            ));
        }
        self.expect(TokenKind::End)?;

        Ok(ClassDeclaration {
            visibility,
            name,
            methods,
            span: start.merge(&self.previous_span()),
        })
    }

    /// Parse an import directive.
    fn parse_import(&mut self) -> Result<ImportStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::Package)?;
        let path = self.parse_string_literal()?;
        let mut names = Vec::new();
        if self.check(TokenKind::Use) {
            self.advance();
            names.push(self.parse_identifier()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                names.push(self.parse_identifier()?);
            }
        }
        self.expect_semicolon()?;
        Ok(ImportStatement {
            path,
            names,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    fn parse_if(&mut self) -> Result<IfStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::If)?;
        let condition = self.parse_condition("if")?;
        let branch_end = [TokenKind::Elif, TokenKind::Else, TokenKind::End];
        let then_branch = self.parse_block(&branch_end, "if", keyword.span)?;

        let mut elif_branches = Vec::new();
        while self.check(TokenKind::Elif) {
            let elif = self.advance();
            let condition = self.parse_condition("elif")?;
            let body = self.parse_block(&branch_end, "if", keyword.span)?;
            elif_branches.push(ElifBranch {
                condition,
                body,
                span: elif.span.merge(&self.previous_span()),
            });
        }

        let else_branch = if self.check(TokenKind::Else) {
            self.advance();
            Some(self.parse_block(&[TokenKind::End], "if", keyword.span)?)
        } else {
            None
        };
        self.expect(TokenKind::End)?;

        Ok(IfStatement {
            condition,
            then_branch,
            elif_branches,
            else_branch,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    fn parse_while(&mut self) -> Result<WhileStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::While)?;
        let condition = self.parse_condition("while")?;
        let body = self.parse_block(&[TokenKind::End], "while", keyword.span)?;
        self.expect(TokenKind::End)?;
        Ok(WhileStatement {
            condition,
            body,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    fn parse_for(&mut self) -> Result<ForInStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::For)?;
        let binding = self.parse_identifier()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block(&[TokenKind::End], "for", keyword.span)?;
        self.expect(TokenKind::End)?;
        Ok(ForInStatement {
            binding,
            iterable,
            body,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    fn parse_switch(&mut self) -> Result<SwitchStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::Switch)?;
        let subject = self.parse_condition("switch")?;
        let clause_end = [TokenKind::Case, TokenKind::Default, TokenKind::End];

        let mut cases = Vec::new();
        let mut default = None;
        loop {
            match self.current().kind {
                TokenKind::Case => {
                    let case = self.advance();
                    let mut values = vec![self.parse_expression()?];
                    while self.check(TokenKind::Comma) {
                        self.advance();
                        values.push(self.parse_expression()?);
                    }
                    self.expect(TokenKind::Colon)?;
                    let body = self.parse_block(&clause_end, "switch", keyword.span)?;
                    cases.push(CaseClause {
                        values,
                        body,
                        span: case.span.merge(&self.previous_span()),
                    });
                }
                TokenKind::Default => {
                    let token = self.advance();
                    if default.is_some() {
                        return Err(self
                            .error(
                                codes::UNEXPECTED_TOKEN,
                                "switch has more than one 'default' clause",
                                token.span,
                            )
                            .with_label(keyword.span, "in this switch")
                            .build());
                    }
                    self.expect(TokenKind::Colon)?;
                    default = Some(self.parse_block(&clause_end, "switch", keyword.span)?);
                }
                TokenKind::End => break,
                TokenKind::Eof => return Err(self.unclosed("switch", keyword.span)),
                _ => {
                    let token = self.current();
                    return Err(self
                        .error(
                            codes::EXPECTED_TOKEN,
                            format!(
                                "expected 'case', 'default' or 'end', found {}",
                                token.kind.describe()
                            ),
                            token.span,
                        )
                        .with_help("statements inside a switch belong to a 'case' clause")
                        .build());
                }
            }
        }
        self.expect(TokenKind::End)?;

        Ok(SwitchStatement {
            subject,
            cases,
            default,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    fn parse_try(&mut self) -> Result<TryStatement, Diagnostic> {
        let keyword = self.expect(TokenKind::Try)?;
        let body = self.parse_block(
            &[TokenKind::Catch, TokenKind::Finally, TokenKind::End],
            "try",
            keyword.span,
        )?;

        let catch = if self.check(TokenKind::Catch) {
            let catch = self.advance();
            let binding = if self.check(TokenKind::LParen) {
                self.advance();
                let binding = self.parse_identifier()?;
                self.expect(TokenKind::RParen)?;
                Some(binding)
            } else {
                None
            };
            let body = self.parse_block(&[TokenKind::Finally, TokenKind::End], "try", keyword.span)?;
            Some(CatchClause {
                binding,
                body,
                span: catch.span.merge(&self.previous_span()),
            })
        } else {
            None
        };

        let finally = if self.check(TokenKind::Finally) {
            self.advance();
            Some(self.parse_block(&[TokenKind::End], "try", keyword.span)?)
        } else {
            None
        };
        self.expect(TokenKind::End)?;

        Ok(TryStatement {
            body,
            catch,
            finally,
            span: keyword.span.merge(&self.previous_span()),
        })
    }

    /// Parse statements until one of `terminators` is current. The
    /// terminator itself is left for the caller.
    fn parse_block(
        &mut self,
        terminators: &[TokenKind],
        construct: &str,
        opened_at: Span,
    ) -> Result<Block, Diagnostic> {
        let mut statements = Vec::new();
        while !terminators.contains(&self.current().kind) {
            if self.is_at_end() {
                return Err(self.unclosed(construct, opened_at));
            }
            statements.push(stack::guarded(|| self.parse_statement())?);
        }
        self.check_reachability(&statements);
        Ok(statements)
    }

    fn parse_condition(&mut self, construct: &str) -> Result<Expression, Diagnostic> {
        if !self.check(TokenKind::LParen) {
            let token = self.current();
            return Err(self
                .error(
                    codes::EXPECTED_TOKEN,
                    format!("expected '(' after '{}', found {}", construct, token.kind.describe()),
                    token.span,
                )
                .with_help(format!(
                    "the condition of '{}' must be wrapped in parentheses",
                    construct
                ))
                .build());
        }
        self.advance();
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(condition)
    }

    /// Warn about statements that follow a `return`, `break` or `continue`
    /// in the same block.
    fn check_reachability(&mut self, statements: &[Statement]) {
        let Some(index) = statements.iter().position(Statement::is_terminator) else {
            return;
        };
        if let Some(next) = statements.get(index + 1) {
            self.warnings.push(
                Diagnostic::warning(codes::UNREACHABLE_CODE, "unreachable statement")
                    .with_file(&self.file_path)
                    .with_span(next.span())
                    .with_label(statements[index].span(), "control leaves the block here")
                    .build(),
            );
        }
    }

    /// Parse an expression.
    pub fn parse_expression(&mut self) -> Result<Expression, Diagnostic> {
        stack::guarded(|| self.parse_assignment())
    }

    fn parse_assignment(&mut self) -> Result<Expression, Diagnostic> {
        let expr = self.parse_binary(OR)?;
        if !self.check(TokenKind::Assign) {
            return Ok(expr);
        }
        let assign = self.advance();
        let value = self.parse_expression()?;
        let target = expr.into_target().map_err(|expr| {
            self.error(
                codes::INVALID_ASSIGNMENT_TARGET,
                "invalid assignment target",
                expr.span(),
            )
            .with_label(assign.span, "assigned here")
            .with_help("only variables, properties and index expressions can be assigned to")
            .build()
        })?;
        let span = target.span().merge(&value.span());
        Ok(Expression::Assign {
            target: Box::new(target),
            value: Box::new(value),
            span,
        })
    }

    /// Precedence climbing over the binary operators.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, Diagnostic> {
        let mut left = self.parse_unary()?;
        while let Some((op, precedence)) = binary_operator(self.current().kind) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let next = if op == BinaryOperator::Power {
                precedence
            } else {
                precedence + 1
            };
            let right = stack::guarded(|| self.parse_binary(next))?;
            let span = left.span().merge(&right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, Diagnostic> {
        let op = match self.current().kind {
            TokenKind::Minus => UnaryOperator::Negate,
            TokenKind::Bang => UnaryOperator::Not,
            _ => return self.parse_postfix(),
        };
        let token = self.advance();
        let operand = stack::guarded(|| self.parse_unary())?;
        let span = token.span.merge(&operand.span());
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    /// Parse `target++` / `target--`.
    fn parse_postfix(&mut self) -> Result<Expression, Diagnostic> {
        let expr = self.parse_call()?;
        let op = match self.current().kind {
            TokenKind::PlusPlus => PostfixOperator::Increment,
            TokenKind::MinusMinus => PostfixOperator::Decrement,
            _ => return Ok(expr),
        };
        let token = self.advance();
        let target = expr.into_target().map_err(|expr| {
            self.error(
                codes::INVALID_POSTFIX_TARGET,
                format!("'{}' cannot be applied to this expression", op),
                expr.span(),
            )
            .with_label(token.span, "operator here")
            .with_help(format!(
                "'{}' applies to a variable, property or index expression",
                op
            ))
            .build()
        })?;
        let span = target.span().merge(&token.span);
        Ok(Expression::Postfix {
            op,
            target: Box::new(target),
            span,
        })
    }

    /// Parse calls, property access and indexing.
    fn parse_call(&mut self) -> Result<Expression, Diagnostic> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(TokenKind::Dot) {
                self.advance();
                let name = self.parse_identifier()?;
                let span = expr.span().merge(&name.span);
                expr = Expression::Property {
                    object: Box::new(expr),
                    name,
                    span,
                };
            } else if self.check(TokenKind::LParen) {
                self.advance();
                let arguments = self.parse_list_items(TokenKind::RParen)?;
                let end_span = self.current_span();
                self.expect(TokenKind::RParen)?;
                let span = expr.span().merge(&end_span);
                expr = Expression::Call {
                    callee: Box::new(expr),
                    arguments,
                    span,
                };
            } else if self.check(TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expression()?;
                let end_span = self.current_span();
                self.expect(TokenKind::RBracket)?;
                let span = expr.span().merge(&end_span);
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse a primary expression.
    fn parse_primary(&mut self) -> Result<Expression, Diagnostic> {
        let (kind, span) = (self.current().kind, self.current_span());
        match kind {
            TokenKind::Identifier => Ok(Expression::Identifier(self.parse_identifier()?)),
            TokenKind::Number => Ok(Expression::Number(self.parse_number_literal()?)),
            TokenKind::String => Ok(Expression::String(self.parse_string_literal()?)),
            TokenKind::Template => {
                let token = self.advance();
                self.parse_template(token)
            }
            TokenKind::True | TokenKind::False => {
                let value = kind == TokenKind::True;
                self.advance();
                Ok(Expression::Boolean(BooleanLiteral::new(value, span)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Null { span })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expression::This { span })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_list_items(TokenKind::RBracket)?;
                let end_span = self.current_span();
                self.expect(TokenKind::RBracket)?;
                Ok(Expression::Array {
                    elements,
                    span: span.merge(&end_span),
                })
            }
            TokenKind::LBrace => self.parse_dictionary(),
            _ => Err(self
                .error(
                    codes::EXPECTED_EXPRESSION,
                    format!("expected expression, found {}", kind.describe()),
                    span,
                )
                .build()),
        }
    }

    /// Comma-separated expressions up to `close`, allowing a trailing comma.
    fn parse_list_items(&mut self, close: TokenKind) -> Result<Vec<Expression>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expression()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(items)
    }

    fn parse_dictionary(&mut self) -> Result<Expression, Diagnostic> {
        let start_span = self.expect(TokenKind::LBrace)?.span;
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let (kind, span) = (self.current().kind, self.current_span());
            let key = match kind {
                TokenKind::Identifier => DictionaryKey::Name(self.parse_identifier()?),
                TokenKind::String => DictionaryKey::String(self.parse_string_literal()?),
                TokenKind::Number => DictionaryKey::Number(self.parse_number_literal()?),
                _ => {
                    return Err(self
                        .error(
                            codes::INVALID_DICTIONARY_KEY,
                            format!("invalid dictionary key: {}", kind.describe()),
                            span,
                        )
                        .with_help("dictionary keys are names, strings or numbers")
                        .build())
                }
            };
            let key_span = self.previous_span();
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expression()?;
            let span = key_span.merge(&value.span());
            entries.push(DictionaryEntry { key, value, span });
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        let end_span = self.current_span();
        self.expect(TokenKind::RBrace)?;
        Ok(Expression::Dictionary {
            entries,
            span: start_span.merge(&end_span),
        })
    }

    /// Parse the embedded expressions of a template string. Each `{...}` is
    /// lexed and parsed on its own, with positions in this file.
    fn parse_template(&self, token: Token) -> Result<Expression, Diagnostic> {
        let mut segments = Vec::new();
        for part in token.parts {
            match part {
                TemplatePart::Text(text) => segments.push(TemplateSegment::Text(text)),
                TemplatePart::Expr { source, origin } => {
                    let tokens = Lexer::new(&source)
                        .with_file(self.file_path.clone())
                        .with_origin(origin)
                        .tokenize()?;
                    let mut parser = Parser::new(tokens, self.file_path.clone());
                    if parser.is_at_end() {
                        return Err(self
                            .error(
                                codes::EXPECTED_EXPRESSION,
                                "empty placeholder in template string",
                                Span::new(origin, origin),
                            )
                            .with_label(token.span, "in this template")
                            .with_help("put an expression between '{' and '}', or escape the brace as '\\{'")
                            .build());
                    }
                    let expression = parser.parse_expression()?;
                    if !parser.is_at_end() {
                        let extra = parser.current();
                        return Err(self
                            .error(
                                codes::UNEXPECTED_TOKEN,
                                format!(
                                    "unexpected {} in template placeholder",
                                    extra.kind.describe()
                                ),
                                extra.span,
                            )
                            .with_help("a placeholder holds exactly one expression")
                            .build());
                    }
                    segments.push(TemplateSegment::Expression(expression));
                }
            }
        }
        Ok(Expression::Template {
            segments,
            span: token.span,
        })
    }

    /// Parse an identifier.
    fn parse_identifier(&mut self) -> Result<Identifier, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            let token = self.advance();
            Ok(Identifier::new(token.text, token.span))
        } else {
            let token = self.current();
            let builder = self.error(
                codes::EXPECTED_TOKEN,
                format!("expected identifier, found {}", token.kind.describe()),
                token.span,
            );
            let builder = if token.kind.describe().starts_with('\'')
                && token.text.chars().all(|c| c.is_ascii_alphabetic())
            {
                builder.with_help(format!("'{}' is a reserved word", token.text))
            } else {
                builder
            };
            Err(builder.build())
        }
    }

    /// Parse a string literal.
    fn parse_string_literal(&mut self) -> Result<StringLiteral, Diagnostic> {
        if self.check(TokenKind::String) {
            let token = self.advance();
            Ok(StringLiteral::new(unescape_string(&token.text), token.span))
        } else {
            let token = self.current();
            Err(self
                .error(
                    codes::EXPECTED_TOKEN,
                    format!("expected string, found {}", token.kind.describe()),
                    token.span,
                )
                .build())
        }
    }

    /// Parse a number literal.
    fn parse_number_literal(&mut self) -> Result<NumberLiteral, Diagnostic> {
        let token = self.expect(TokenKind::Number)?;
        let value: f64 = token.text.parse().unwrap_or(0.0);
        Ok(NumberLiteral::new(value, token.span))
    }

    // Helper methods

    fn error(&self, code: &str, message: impl Into<String>, span: Span) -> DiagnosticBuilder {
        Diagnostic::parser(code, message)
            .with_file(&self.file_path)
            .with_span(span)
    }

    fn unclosed(&self, construct: &str, opened_at: Span) -> Diagnostic {
        let token = self.current();
        self.error(
            codes::EXPECTED_TOKEN,
            format!(
                "expected 'end' to close '{}', found {}",
                construct,
                token.kind.describe()
            ),
            token.span,
        )
        .with_label(opened_at, format!("'{}' opened here", construct))
        .with_help("every compound statement is closed with 'end'")
        .build()
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.tokens[self.tokens.len() - 1])
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn previous_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.pos += 1;
            return self.tokens[self.pos - 1].clone();
        }
        self.current().clone()
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.current();
            Err(self
                .error(
                    codes::EXPECTED_TOKEN,
                    format!("expected {}, found {}", kind.describe(), token.kind.describe()),
                    token.span,
                )
                .build())
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), Diagnostic> {
        if self.check(TokenKind::Semicolon) {
            self.advance();
            return Ok(());
        }
        let token = self.current();
        Err(self
            .error(
                codes::EXPECTED_TOKEN,
                format!("expected ';', found {}", token.kind.describe()),
                token.span,
            )
            .with_label(self.previous_span(), "statement ends here")
            .with_help("statements are terminated with ';'")
            .build())
    }
}

/// Unescape a quoted string literal.
fn unescape_string(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some(next) => push_escape(&mut result, next, false),
            None => result.push('\\'),
        }
    }

    result
}

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Token>, file_path: impl Into<String>) -> Result<Program, Diagnostic> {
    Parser::new(tokens, file_path).parse()
}

/// Lex and parse a source text.
pub fn parse_source(source: &str, file_path: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).with_file(file_path).tokenize()?;
    parse(tokens, file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticSeverity, ErrorClass};

    fn parse_ok(source: &str) -> Program {
        match parse_source(source, "test.lapis") {
            Ok(program) => program,
            Err(diag) => panic!("unexpected parse error: {}", diag),
        }
    }

    fn parse_err(source: &str) -> Diagnostic {
        match parse_source(source, "test.lapis") {
            Ok(program) => panic!("expected a parse error, got {:?}", program),
            Err(diag) => diag,
        }
    }

    fn expression(source: &str) -> Expression {
        let program = parse_ok(&format!("{};", source));
        match program.statements.into_iter().next() {
            Some(Statement::Expression(expr)) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    /// Render an expression with explicit grouping.
    fn sexpr(expr: &Expression) -> String {
        match expr {
            Expression::Identifier(id) => id.name.clone(),
            Expression::Number(n) => n.value.to_string(),
            Expression::Binary {
                op, left, right, ..
            } => format!("({} {} {})", op, sexpr(left), sexpr(right)),
            Expression::Unary { op, operand, .. } => format!("({}{})", op, sexpr(operand)),
            Expression::Postfix { op, .. } => format!("(postfix {})", op),
            Expression::Call {
                callee, arguments, ..
            } => format!("{}({})", sexpr(callee), arguments.len()),
            Expression::Property { object, name, .. } => {
                format!("{}.{}", sexpr(object), name.name)
            }
            Expression::Assign { value, .. } => format!("(= {})", sexpr(value)),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(sexpr(&expression("1 + 2 * 3")), "(+ 1 (* 2 3))");
        assert_eq!(sexpr(&expression("(1 + 2) * 3")), "(* (+ 1 2) 3)");
        assert_eq!(sexpr(&expression("1 - 2 - 3")), "(- (- 1 2) 3)");
    }

    #[test]
    fn test_power_is_right_associative_and_below_unary() {
        assert_eq!(sexpr(&expression("2 ** 3 ** 2")), "(** 2 (** 3 2))");
        assert_eq!(sexpr(&expression("-2 ** 2")), "(** (-2) 2)");
        assert_eq!(sexpr(&expression("2 * 3 ** 2")), "(* 2 (** 3 2))");
    }

    #[test]
    fn test_logical_precedence() {
        assert_eq!(
            sexpr(&expression("a || b && c == d < e + f")),
            "(|| a (&& b (== c (< d (+ e f)))))"
        );
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = expression("a = b = 3");
        assert_eq!(sexpr(&expr), "(= (= 3))");
    }

    #[test]
    fn test_calls_and_properties_chain() {
        assert_eq!(sexpr(&expression("Console.print(a, b)")), "Console.print(2)");
        assert_eq!(sexpr(&expression("-a.length()")), "(-a.length(0))");
    }

    #[test]
    fn test_postfix_targets() {
        assert!(matches!(
            expression("i++"),
            Expression::Postfix {
                op: PostfixOperator::Increment,
                ..
            }
        ));
        assert!(matches!(expression("a[0]--"), Expression::Postfix { .. }));
        assert!(matches!(expression("p.count++"), Expression::Postfix { .. }));

        let err = parse_err("f()++;");
        assert_eq!(err.code, codes::INVALID_POSTFIX_TARGET);
        assert_eq!(err.class, ErrorClass::Parser);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("1 + 2 = 3;");
        assert_eq!(err.code, codes::INVALID_ASSIGNMENT_TARGET);
        assert_eq!(err.span.start.column, 1);
    }

    #[test]
    fn test_declarations_and_visibility() {
        let program = parse_ok("public var a = 1; var b; private func f() end public class C end");
        match &program.statements[0] {
            Statement::Var(decl) => {
                assert_eq!(decl.visibility, Visibility::Public);
                assert!(decl.initializer.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1] {
            Statement::Var(decl) => {
                assert_eq!(decl.visibility, Visibility::Private);
                assert!(decl.initializer.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&program.statements[2], Statement::Function(f) if f.visibility == Visibility::Private));
        assert!(matches!(&program.statements[3], Statement::Class(c) if c.visibility == Visibility::Public));
    }

    #[test]
    fn test_modifier_requires_declaration() {
        let err = parse_err("public x = 1;");
        assert_eq!(err.code, codes::UNEXPECTED_TOKEN);
        assert!(err.message.contains("after 'public'"));
    }

    #[test]
    fn test_variadic_parameters() {
        let program = parse_ok("func greet_all(greeting, names**) end");
        match &program.statements[0] {
            Statement::Function(decl) => {
                assert!(decl.variadic);
                assert_eq!(decl.params.len(), 2);
                assert_eq!(decl.fixed_params().len(), 1);
                assert_eq!(decl.params[1].name, "names");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_err("func f(items**, last) end");
        assert_eq!(err.code, codes::VARIADIC_NOT_LAST);
        assert!(err.message.contains("'items'"));
    }

    #[test]
    fn test_class_with_methods() {
        let program = parse_ok(
            "class Point()\n  func init(x, y) this.x = x; this.y = y; end\n  func sum() return this.x + this.y; end\nend",
        );
        match &program.statements[0] {
            Statement::Class(class) => {
                assert_eq!(class.name.name, "Point");
                let names: Vec<_> = class.methods.iter().map(|m| m.name.name.as_str()).collect();
                assert_eq!(names, vec!["init", "sum"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_err("class A var x = 1; end");
        assert_eq!(err.code, codes::UNEXPECTED_TOKEN);
    }

    #[test]
    fn test_if_elif_else() {
        let program = parse_ok(
            "if (a) x = 1; elif (b) x = 2; elif (c) x = 3; else x = 4; end",
        );
        match &program.statements[0] {
            Statement::If(stmt) => {
                assert_eq!(stmt.then_branch.len(), 1);
                assert_eq!(stmt.elif_branches.len(), 2);
                assert!(stmt.else_branch.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_condition_needs_parentheses() {
        let err = parse_err("while x < 3 x++; end");
        assert_eq!(err.code, codes::EXPECTED_TOKEN);
        assert!(err.help.unwrap().contains("parentheses"));
    }

    #[test]
    fn test_switch_cases() {
        let program = parse_ok(
            "switch (n) case 1: a(); case 3, 4, 5: b(); break; default: c(); end",
        );
        match &program.statements[0] {
            Statement::Switch(stmt) => {
                assert_eq!(stmt.cases.len(), 2);
                assert_eq!(stmt.cases[1].values.len(), 3);
                assert_eq!(stmt.cases[1].body.len(), 2);
                assert!(stmt.default.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_err("switch (n) default: a(); default: b(); end");
        assert!(err.message.contains("more than one 'default'"));
    }

    #[test]
    fn test_try_forms() {
        let program = parse_ok(
            "try a(); catch(e) b(e); finally c(); end try a(); catch b(); end try a(); finally c(); end",
        );
        match &program.statements[0] {
            Statement::Try(stmt) => {
                let catch = stmt.catch.as_ref().unwrap();
                assert_eq!(catch.binding.as_ref().unwrap().name, "e");
                assert!(stmt.finally.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[1] {
            Statement::Try(stmt) => assert!(stmt.catch.as_ref().unwrap().binding.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        match &program.statements[2] {
            Statement::Try(stmt) => {
                assert!(stmt.catch.is_none());
                assert!(stmt.finally.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_directive() {
        let program = parse_ok("package \"./math.lapis\" use add, sub; package \"util.lapis\";");
        match &program.statements[0] {
            Statement::Import(import) => {
                assert_eq!(import.path.value, "./math.lapis");
                let names: Vec<_> = import.names.iter().map(|n| n.name.as_str()).collect();
                assert_eq!(names, vec!["add", "sub"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&program.statements[1], Statement::Import(i) if i.names.is_empty()));
    }

    #[test]
    fn test_for_in_and_loop_control() {
        let program = parse_ok("for item in [1, 2, 3] if (item) continue; end break; end");
        match &program.statements[0] {
            Statement::ForIn(stmt) => {
                assert_eq!(stmt.binding.name, "item");
                assert_eq!(stmt.body.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_break_outside_loop_parses() {
        parse_ok("if (false) break; end");
    }

    #[test]
    fn test_dictionary_literal_keys() {
        let expr = expression("{name: \"Ada\", \"full name\": 1, 2: true,}");
        match expr {
            Expression::Dictionary { entries, .. } => {
                assert_eq!(entries.len(), 3);
                assert!(matches!(&entries[0].key, DictionaryKey::Name(id) if id.name == "name"));
                assert!(matches!(&entries[1].key, DictionaryKey::String(s) if s.value == "full name"));
                assert!(matches!(&entries[2].key, DictionaryKey::Number(n) if n.value == 2.0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = parse_err("var d = {[1]: 2};");
        assert_eq!(err.code, codes::INVALID_DICTIONARY_KEY);
    }

    #[test]
    fn test_string_escapes() {
        match expression(r#""a\tb\n\"q\" \x""#) {
            Expression::String(s) => assert_eq!(s.value, "a\tb\n\"q\" \\x"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_template_expressions_are_parsed() {
        match expression("`Result: {(2+5)*2}`") {
            Expression::Template { segments, .. } => {
                assert_eq!(segments.len(), 2);
                assert!(matches!(&segments[0], TemplateSegment::Text(t) if t == "Result: "));
                match &segments[1] {
                    TemplateSegment::Expression(expr) => {
                        assert_eq!(sexpr(expr), "(* (+ 2 5) 2)");
                        assert_eq!(expr.span().start.column, 12);
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_template_errors_point_into_template() {
        let err = parse_err("var s = `value: {1 +}`;");
        assert_eq!(err.code, codes::EXPECTED_EXPRESSION);
        assert_eq!(err.span.start.column, 21);

        let err = parse_err("var s = `value: {}`;");
        assert_eq!(err.code, codes::EXPECTED_EXPRESSION);

        let err = parse_err("var s = `{a b}`;");
        assert_eq!(err.code, codes::UNEXPECTED_TOKEN);
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_err("var a = 1\nvar b = 2;");
        assert_eq!(err.code, codes::EXPECTED_TOKEN);
        assert_eq!(err.message, "expected ';', found 'var'");
        assert_eq!(err.span.start.line, 2);
        assert_eq!(err.labels[0].span.start.line, 1);
        assert_eq!(err.file, "test.lapis");
    }

    #[test]
    fn test_unclosed_block_points_at_opener() {
        let err = parse_err("func f()\n  return 1;\n");
        assert!(err.message.contains("expected 'end' to close 'func'"));
        assert_eq!(err.labels[0].span.start.line, 1);
    }

    #[test]
    fn test_stray_end() {
        let err = parse_err("end");
        assert_eq!(err.code, codes::UNEXPECTED_TOKEN);
    }

    #[test]
    fn test_unreachable_statement_warning() {
        let tokens = Lexer::new("func f() return 1; Console.print(2); end")
            .tokenize()
            .unwrap();
        let (_, warnings) = Parser::new(tokens, "test.lapis")
            .parse_with_warnings()
            .unwrap();
        let warnings: Vec<_> = warnings.iter().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(warnings[0].code, codes::UNREACHABLE_CODE);
    }

    #[test]
    fn test_deep_nesting_on_an_ordinary_thread() {
        let source = format!("var x = {}1{};", "(".repeat(3000), ")".repeat(3000));
        let program = parse_ok(&source);
        assert_eq!(program.statements.len(), 1);

        let blocks = format!("{}{}", "if (true) ".repeat(1000), "end ".repeat(1000));
        assert_eq!(parse_ok(&blocks).statements.len(), 1);
    }

    #[test]
    fn test_lex_errors_surface_through_parse_source() {
        let err = parse_err("var s = 'open;");
        assert_eq!(err.class, ErrorClass::Lexer);
        assert_eq!(err.file, "test.lapis");
    }
}
