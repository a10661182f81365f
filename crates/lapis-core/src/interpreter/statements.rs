//! Statement execution.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::diagnostics::{codes, Diagnostic};
use crate::environment::Env;
use crate::stack;
use crate::value::{Class, Function, Value};

use super::{Flow, Interpreter};

impl Interpreter {
    /// Execute the top level of a file in `env`.
    pub(crate) fn execute_program(
        &mut self,
        program: &Program,
        env: &Env,
    ) -> Result<Value, Diagnostic> {
        let mut last = Value::Null;
        for statement in &program.statements {
            if let Statement::Expression(expression) = statement {
                last = self.evaluate(expression, env)?;
                continue;
            }
            last = Value::Null;
            match self.execute(statement, env)? {
                Flow::Normal => {}
                flow => return flow.into_value(),
            }
        }
        Ok(last)
    }

    /// Execute statements in `env` itself, stopping at the first flow that
    /// is not `Normal`.
    pub(crate) fn execute_statements(
        &mut self,
        statements: &[Statement],
        env: &Env,
    ) -> Result<Flow, Diagnostic> {
        for statement in statements {
            match self.execute(statement, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Execute a block in a new child scope of `env`.
    fn execute_block(&mut self, block: &[Statement], env: &Env) -> Result<Flow, Diagnostic> {
        let scope = self.envs.child(env);
        self.execute_statements(block, &scope)
    }

    pub(crate) fn execute(&mut self, statement: &Statement, env: &Env) -> Result<Flow, Diagnostic> {
        stack::guarded(|| self.execute_statement(statement, env))
    }

    fn execute_statement(&mut self, statement: &Statement, env: &Env) -> Result<Flow, Diagnostic> {
        match statement {
            Statement::Var(var) => {
                let value = match &var.initializer {
                    Some(initializer) => self.evaluate(initializer, env)?,
                    None => Value::Null,
                };
                self.envs.define(env, &var.name.name, value, var.visibility);
                Ok(Flow::Normal)
            }
            Statement::Function(declaration) => {
                let function = self.make_function(declaration, env);
                self.envs.define(
                    env,
                    &declaration.name.name,
                    Value::Function(function),
                    declaration.visibility,
                );
                Ok(Flow::Normal)
            }
            Statement::Class(class) => {
                let methods: FxHashMap<String, Rc<Function>> = class
                    .methods
                    .iter()
                    .map(|method| (method.name.name.clone(), self.make_function(method, env)))
                    .collect();
                let value = Value::Class(Rc::new(Class {
                    name: class.name.name.clone(),
                    methods,
                }));
                self.envs.define(env, &class.name.name, value, class.visibility);
                Ok(Flow::Normal)
            }
            Statement::Import(import) => {
                self.import(import, env)?;
                Ok(Flow::Normal)
            }
            Statement::If(statement) => self.execute_if(statement, env),
            Statement::While(statement) => self.execute_while(statement, env),
            Statement::ForIn(statement) => self.execute_for(statement, env),
            Statement::Switch(statement) => self.execute_switch(statement, env),
            Statement::Try(statement) => self.execute_try(statement, env),
            Statement::Return { value, .. } => {
                let value = match value {
                    Some(expression) => self.evaluate(expression, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Statement::Break { span } => Ok(Flow::Break(*span)),
            Statement::Continue { span } => Ok(Flow::Continue(*span)),
            Statement::Expression(expression) => {
                self.evaluate(expression, env)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn make_function(&self, declaration: &Rc<FunctionDeclaration>, env: &Env) -> Rc<Function> {
        Rc::new(Function {
            declaration: declaration.clone(),
            closure: env.clone(),
            file: self.current_file.clone(),
        })
    }

    fn execute_if(&mut self, statement: &IfStatement, env: &Env) -> Result<Flow, Diagnostic> {
        if self.evaluate(&statement.condition, env)?.is_truthy() {
            return self.execute_block(&statement.then_branch, env);
        }
        for branch in &statement.elif_branches {
            if self.evaluate(&branch.condition, env)?.is_truthy() {
                return self.execute_block(&branch.body, env);
            }
        }
        match &statement.else_branch {
            Some(block) => self.execute_block(block, env),
            None => Ok(Flow::Normal),
        }
    }

    fn execute_while(&mut self, statement: &WhileStatement, env: &Env) -> Result<Flow, Diagnostic> {
        while self.evaluate(&statement.condition, env)?.is_truthy() {
            match self.execute_block(&statement.body, env)? {
                Flow::Break(_) => break,
                Flow::Normal | Flow::Continue(_) => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Iterate a snapshot of the iterable taken on entry: array elements,
    /// dictionary keys or string characters.
    fn execute_for(&mut self, statement: &ForInStatement, env: &Env) -> Result<Flow, Diagnostic> {
        let iterable = self.evaluate(&statement.iterable, env)?;
        let items: Vec<Value> = match &iterable {
            Value::Array(items) => items.borrow().clone(),
            Value::Dictionary(dict) => dict.borrow().keys().map(Value::from).collect(),
            Value::String(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            other => {
                return Err(Diagnostic::runtime(
                    codes::NOT_ITERABLE,
                    format!("cannot iterate over a value of type {}", other.type_name()),
                )
                .with_span(statement.iterable.span())
                .with_help("for loops iterate over arrays, dictionaries and strings")
                .build())
            }
        };

        for item in items {
            let scope = self.envs.child(env);
            self.envs
                .define(&scope, &statement.binding.name, item, Visibility::Private);
            match self.execute_statements(&statement.body, &scope)? {
                Flow::Break(_) => break,
                Flow::Normal | Flow::Continue(_) => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run the first case with a value equal to the subject. Cases never
    /// fall through; `break` just ends the case.
    fn execute_switch(&mut self, statement: &SwitchStatement, env: &Env) -> Result<Flow, Diagnostic> {
        let subject = self.evaluate(&statement.subject, env)?;
        let mut body = None;
        'cases: for case in &statement.cases {
            for value in &case.values {
                if self.evaluate(value, env)? == subject {
                    body = Some(&case.body);
                    break 'cases;
                }
            }
        }
        let Some(body) = body.or(statement.default.as_ref()) else {
            return Ok(Flow::Normal);
        };
        match self.execute_block(body, env)? {
            Flow::Break(_) => Ok(Flow::Normal),
            flow => Ok(flow),
        }
    }

    fn execute_try(&mut self, statement: &TryStatement, env: &Env) -> Result<Flow, Diagnostic> {
        let outcome = match (self.execute_block(&statement.body, env), &statement.catch) {
            (Err(error), Some(catch)) if error.is_catchable() => {
                let scope = self.envs.child(env);
                if let Some(binding) = &catch.binding {
                    self.envs.define(
                        &scope,
                        &binding.name,
                        Value::from(error.message),
                        Visibility::Private,
                    );
                }
                self.execute_statements(&catch.body, &scope)
            }
            (outcome, _) => outcome,
        };
        if let Some(finally) = &statement.finally {
            match self.execute_block(finally, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }
}
