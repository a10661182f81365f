//! Expression evaluation: operators, calls, property and index access.

use std::rc::Rc;

use crate::ast::*;
use crate::diagnostics::{codes, Diagnostic};
use crate::environment::Env;
use crate::span::Span;
use crate::stack;
use crate::value::{format_number, Dictionary, NativeFunction, Value};

use super::methods::Method;
use super::operators::{self, OperandSpans};
use super::{describe, Interpreter};

impl Interpreter {
    pub(crate) fn evaluate(&mut self, expression: &Expression, env: &Env) -> Result<Value, Diagnostic> {
        stack::guarded(|| self.evaluate_expression(expression, env))
    }

    fn evaluate_expression(&mut self, expression: &Expression, env: &Env) -> Result<Value, Diagnostic> {
        match expression {
            Expression::Identifier(identifier) => self.lookup(identifier, env),
            Expression::Number(literal) => Ok(Value::Number(literal.value)),
            Expression::String(literal) => Ok(Value::from(literal.value.as_str())),
            Expression::Boolean(literal) => Ok(Value::Boolean(literal.value)),
            Expression::Null { .. } => Ok(Value::Null),
            Expression::This { span } => self.envs.lookup(env, "this").ok_or_else(|| {
                Diagnostic::runtime(codes::UNDEFINED_VARIABLE, "'this' used outside of a method")
                    .with_span(*span)
                    .build()
            }),
            Expression::Template { segments, .. } => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        TemplateSegment::Text(text) => out.push_str(text),
                        TemplateSegment::Expression(expression) => {
                            let value = self.evaluate(expression, env)?;
                            out.push_str(&value.to_string());
                        }
                    }
                }
                Ok(Value::from(out))
            }
            Expression::Array { elements, .. } => {
                let items = elements
                    .iter()
                    .map(|element| self.evaluate(element, env))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(items))
            }
            Expression::Dictionary { entries, .. } => {
                let mut dictionary = Dictionary::new();
                for entry in entries {
                    let key = match &entry.key {
                        DictionaryKey::Name(identifier) => identifier.name.clone(),
                        DictionaryKey::String(literal) => literal.value.clone(),
                        DictionaryKey::Number(literal) => format_number(literal.value),
                    };
                    let value = self.evaluate(&entry.value, env)?;
                    dictionary.insert(key, value);
                }
                Ok(Value::dictionary(dictionary))
            }
            Expression::Binary {
                op,
                left,
                right,
                span,
            } => self.evaluate_binary(*op, left, right, *span, env),
            Expression::Unary { op, operand, span } => {
                let value = self.evaluate(operand, env)?;
                operators::unary(*op, &value, *span, operand.span())
            }
            Expression::Postfix { op, target, span } => self.evaluate_postfix(*op, target, *span, env),
            Expression::Assign { target, value, .. } => {
                let place = self.resolve_place(target, env)?;
                let value = self.evaluate(value, env)?;
                self.store(&place, value.clone(), env)?;
                Ok(value)
            }
            Expression::Call {
                callee,
                arguments,
                span,
            } => self.evaluate_call(callee, arguments, *span, env),
            Expression::Property { object, name, .. } => {
                let object = self.evaluate(object, env)?;
                self.get_property(&object, name)
            }
            Expression::Index {
                object,
                index,
                span,
            } => {
                let object_value = self.evaluate(object, env)?;
                let index_value = self.evaluate(index, env)?;
                get_index(&object_value, &index_value, *span, index.span())
            }
        }
    }

    fn lookup(&self, identifier: &Identifier, env: &Env) -> Result<Value, Diagnostic> {
        self.envs.lookup(env, &identifier.name).ok_or_else(|| {
            Diagnostic::runtime(
                codes::UNDEFINED_VARIABLE,
                format!("undefined variable '{}'", identifier.name),
            )
            .with_span(identifier.span)
            .with_help(format!("declare it first with 'var {} = ...;'", identifier.name))
            .build()
        })
    }

    fn evaluate_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
        span: Span,
        env: &Env,
    ) -> Result<Value, Diagnostic> {
        let left_value = self.evaluate(left, env)?;
        match op {
            BinaryOperator::And if !left_value.is_truthy() => return Ok(left_value),
            BinaryOperator::Or if left_value.is_truthy() => return Ok(left_value),
            BinaryOperator::And | BinaryOperator::Or => return self.evaluate(right, env),
            _ => {}
        }
        let right_value = self.evaluate(right, env)?;
        operators::binary(
            op,
            &left_value,
            &right_value,
            OperandSpans {
                expression: span,
                left: left.span(),
                right: right.span(),
            },
        )
    }

    fn evaluate_postfix(
        &mut self,
        op: PostfixOperator,
        target: &Target,
        span: Span,
        env: &Env,
    ) -> Result<Value, Diagnostic> {
        let place = self.resolve_place(target, env)?;
        let current = self.load(&place, env)?;
        let Value::Number(n) = current else {
            return Err(Diagnostic::type_error(
                codes::UNARY_TYPE_MISMATCH,
                format!("'{}' needs a number but found {}", op, current.type_name()),
            )
            .with_span(span)
            .with_label(target.span(), format!("this is a {}", current.type_name()))
            .build());
        };
        let updated = match op {
            PostfixOperator::Increment => n + 1.0,
            PostfixOperator::Decrement => n - 1.0,
        };
        self.store(&place, Value::Number(updated), env)?;
        Ok(current)
    }

    fn evaluate_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        span: Span,
        env: &Env,
    ) -> Result<Value, Diagnostic> {
        if let Expression::Property { object, name, .. } = callee {
            let receiver = self.evaluate(object, env)?;
            let args = self.evaluate_arguments(arguments, env)?;
            return self.call_property(&receiver, name, args, span);
        }
        let function = self.evaluate(callee, env)?;
        let args = self.evaluate_arguments(arguments, env)?;
        self.call_value(&function, args, span)
    }

    fn evaluate_arguments(&mut self, arguments: &[Expression], env: &Env) -> Result<Vec<Value>, Diagnostic> {
        arguments
            .iter()
            .map(|argument| self.evaluate(argument, env))
            .collect()
    }

    /// `receiver.name(args)`.
    fn call_property(
        &mut self,
        receiver: &Value,
        name: &Identifier,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        match receiver {
            Value::Instance(instance) => {
                let field = instance.fields.borrow().get(&name.name).cloned();
                if let Some(field) = field {
                    return self.call_value(&field, args, span);
                }
                match instance.class.methods.get(&name.name) {
                    Some(method) => {
                        let bound = self.bind_method(method, receiver.clone());
                        self.call_value(&Value::Function(bound), args, span)
                    }
                    None => Err(unknown_property(receiver, name)),
                }
            }
            Value::Dictionary(dict) => {
                if let Some(method) = Method::lookup(receiver, &name.name) {
                    return self.call_method(receiver, method, args, span);
                }
                let stored = dict.borrow().get(&name.name).cloned();
                match stored {
                    Some(function) => self.call_value(&function, args, span),
                    None => Err(unknown_property(receiver, name)),
                }
            }
            Value::Library(library) => match self.library_function(library, &name.name) {
                Some(function) => self.call_value(&function, args, span),
                None => Err(unknown_property(receiver, name)),
            },
            _ => match Method::lookup(receiver, &name.name) {
                Some(method) => self.call_method(receiver, method, args, span),
                None => Err(unknown_property(receiver, name)),
            },
        }
    }

    /// `object.name` outside a call.
    fn get_property(&mut self, object: &Value, name: &Identifier) -> Result<Value, Diagnostic> {
        match object {
            Value::Instance(instance) => {
                if let Some(field) = instance.fields.borrow().get(&name.name) {
                    return Ok(field.clone());
                }
                Ok(match instance.class.methods.get(&name.name) {
                    Some(method) => Value::Function(self.bind_method(method, object.clone())),
                    None => Value::Null,
                })
            }
            // built-in methods shadow keys, as they do in calls
            Value::Dictionary(dict) => Ok(match bound_method(object, &name.name) {
                Some(method) => method,
                None => dict.borrow().get(&name.name).cloned().unwrap_or(Value::Null),
            }),
            Value::Library(library) => self
                .library_function(library, &name.name)
                .ok_or_else(|| unknown_property(object, name)),
            _ => bound_method(object, &name.name).ok_or_else(|| unknown_property(object, name)),
        }
    }

    fn resolve_place(&mut self, target: &Target, env: &Env) -> Result<Place, Diagnostic> {
        Ok(match target {
            Target::Identifier(identifier) => Place::Variable(identifier.clone()),
            Target::Property { object, name, .. } => Place::Property {
                object: self.evaluate(object, env)?,
                name: name.clone(),
            },
            Target::Index {
                object,
                index,
                span,
            } => Place::Index {
                object: self.evaluate(object, env)?,
                index: self.evaluate(index, env)?,
                span: *span,
                index_span: index.span(),
            },
        })
    }

    fn load(&mut self, place: &Place, env: &Env) -> Result<Value, Diagnostic> {
        match place {
            Place::Variable(identifier) => self.lookup(identifier, env),
            Place::Property { object, name } => self.get_property(object, name),
            Place::Index {
                object,
                index,
                span,
                index_span,
            } => get_index(object, index, *span, *index_span),
        }
    }

    fn store(&mut self, place: &Place, value: Value, env: &Env) -> Result<(), Diagnostic> {
        match place {
            Place::Variable(identifier) => {
                if self.envs.assign(env, &identifier.name, value) {
                    Ok(())
                } else {
                    Err(Diagnostic::runtime(
                        codes::UNDEFINED_VARIABLE,
                        format!("cannot assign to undefined variable '{}'", identifier.name),
                    )
                    .with_span(identifier.span)
                    .with_help(format!("declare it first with 'var {} = ...;'", identifier.name))
                    .build())
                }
            }
            Place::Property { object, name } => set_property(object, name, value),
            Place::Index {
                object,
                index,
                span,
                index_span,
            } => set_index(object, index, value, *span, *index_span),
        }
    }
}

/// An assignable location with its object and index already evaluated, so
/// compound updates like `a[f()]++` evaluate each operand once.
enum Place {
    Variable(Identifier),
    Property { object: Value, name: Identifier },
    Index {
        object: Value,
        index: Value,
        span: Span,
        index_span: Span,
    },
}

fn bound_method(receiver: &Value, name: &str) -> Option<Value> {
    Method::lookup(receiver, name).map(|method| {
        Value::Native(Rc::new(NativeFunction::Method {
            receiver: receiver.clone(),
            method,
        }))
    })
}

fn unknown_property(object: &Value, name: &Identifier) -> Diagnostic {
    let message = match object {
        Value::Null => format!("cannot read property '{}' of null", name.name),
        Value::Library(library) => format!("module '{}' has no function '{}'", library, name.name),
        Value::Instance(instance) => {
            format!("'{}' instance has no method '{}'", instance.class.name, name.name)
        }
        other => format!("{} has no property '{}'", other.type_name(), name.name),
    };
    Diagnostic::type_error(codes::UNKNOWN_PROPERTY, message)
        .with_span(name.span)
        .build()
}

fn set_property(object: &Value, name: &Identifier, value: Value) -> Result<(), Diagnostic> {
    let previous = match object {
        Value::Instance(instance) => instance.fields.borrow_mut().insert(name.name.clone(), value),
        Value::Dictionary(dict) => dict.borrow_mut().insert(name.name.clone(), value),
        other => {
            return Err(Diagnostic::type_error(
                codes::UNKNOWN_PROPERTY,
                format!("cannot set property '{}' on {}", name.name, describe(other)),
            )
            .with_span(name.span)
            .with_help("only instances and dictionaries have assignable properties")
            .build())
        }
    };
    drop(previous);
    Ok(())
}

/// The index as a position in a sequence of `len` items.
fn position(index: &Value, len: usize, what: &str, index_span: Span) -> Result<usize, Diagnostic> {
    let Some(i) = index.as_integer() else {
        return Err(Diagnostic::type_error(
            codes::NOT_INDEXABLE,
            format!("{} index must be an integer, got {}", what, describe_index(index)),
        )
        .with_span(index_span)
        .build());
    };
    if i < 0 || i as usize >= len {
        return Err(Diagnostic::runtime(
            codes::INDEX_OUT_OF_BOUNDS,
            format!(
                "index {} is out of bounds for {} of length {}",
                i,
                if what == "array" { "an array" } else { "a string" },
                len
            ),
        )
        .with_span(index_span)
        .with_help(format!("valid indices are 0 to {}", len.saturating_sub(1)))
        .build());
    }
    Ok(i as usize)
}

fn describe_index(index: &Value) -> String {
    match index {
        Value::Number(n) => format_number(*n),
        other => other.type_name().to_string(),
    }
}

fn dictionary_key(index: &Value, index_span: Span) -> Result<String, Diagnostic> {
    index.as_key().ok_or_else(|| {
        Diagnostic::type_error(
            codes::NOT_INDEXABLE,
            format!("dictionary keys must be strings or numbers, got {}", index.type_name()),
        )
        .with_span(index_span)
        .build()
    })
}

fn not_indexable(object: &Value, span: Span) -> Diagnostic {
    Diagnostic::type_error(
        codes::NOT_INDEXABLE,
        format!("cannot index {}", describe(object)),
    )
    .with_span(span)
    .with_help("only arrays, dictionaries and strings can be indexed")
    .build()
}

fn get_index(object: &Value, index: &Value, span: Span, index_span: Span) -> Result<Value, Diagnostic> {
    match object {
        Value::Array(items) => {
            let items = items.borrow();
            let i = position(index, items.len(), "array", index_span)?;
            Ok(items[i].clone())
        }
        Value::Dictionary(dict) => {
            let key = dictionary_key(index, index_span)?;
            Ok(dict.borrow().get(&key).cloned().unwrap_or(Value::Null))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = position(index, chars.len(), "string", index_span)?;
            Ok(Value::from(chars[i].to_string()))
        }
        other => Err(not_indexable(other, span)),
    }
}

fn set_index(
    object: &Value,
    index: &Value,
    value: Value,
    span: Span,
    index_span: Span,
) -> Result<(), Diagnostic> {
    let previous = match object {
        Value::Array(items) => {
            let len = items.borrow().len();
            let i = position(index, len, "array", index_span)?;
            Some(std::mem::replace(&mut items.borrow_mut()[i], value))
        }
        Value::Dictionary(dict) => {
            let key = dictionary_key(index, index_span)?;
            dict.borrow_mut().insert(key, value)
        }
        Value::String(_) => {
            return Err(Diagnostic::type_error(
                codes::NOT_INDEXABLE,
                "strings cannot be modified by index",
            )
            .with_span(span)
            .with_help("build a new string with '+' or replace() instead")
            .build())
        }
        other => return Err(not_indexable(other, span)),
    };
    drop(previous);
    Ok(())
}
