//! Binary and unary operators on already-evaluated operands.
//!
//! `&&` and `||` short-circuit, so the evaluator handles them before their
//! right operand exists; everything else lands here.

use std::cmp::Ordering;

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::diagnostics::{codes, Diagnostic};
use crate::span::Span;
use crate::value::Value;

/// Source locations of a binary expression and its operands.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OperandSpans {
    pub expression: Span,
    pub left: Span,
    pub right: Span,
}

pub(crate) fn binary(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
    spans: OperandSpans,
) -> Result<Value, Diagnostic> {
    use BinaryOperator::*;

    match op {
        Equal => return Ok(Value::Boolean(left == right)),
        NotEqual => return Ok(Value::Boolean(left != right)),
        Add => {
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                return Ok(Value::from(format!("{}{}", left, right)));
            }
        }
        Less | LessEqual | Greater | GreaterEqual => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(op, left, right, spans)),
            };
            // NaN compares false against everything
            let result = ordering.is_some_and(|ordering| match op {
                Less => ordering == Ordering::Less,
                LessEqual => ordering != Ordering::Greater,
                Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            });
            return Ok(Value::Boolean(result));
        }
        _ => {}
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(mismatch(op, left, right, spans));
    };
    let (a, b) = (*a, *b);
    let result = match op {
        Add => a + b,
        Subtract => a - b,
        Multiply => a * b,
        Divide | Modulo if b == 0.0 => {
            return Err(Diagnostic::runtime(codes::DIVISION_BY_ZERO, "division by zero")
                .with_span(spans.expression)
                .with_label(spans.right, "this evaluates to 0")
                .build())
        }
        Divide => a / b,
        Modulo => a % b,
        Power => a.powf(b),
        // logical and comparison operators returned above
        _ => return Err(mismatch(op, left, right, spans)),
    };
    Ok(Value::Number(result))
}

fn mismatch(op: BinaryOperator, left: &Value, right: &Value, spans: OperandSpans) -> Diagnostic {
    let (left_type, right_type) = (left.type_name(), right.type_name());
    let message = match op {
        BinaryOperator::Add => format!("cannot add {} and {}", left_type, right_type),
        BinaryOperator::Less
        | BinaryOperator::LessEqual
        | BinaryOperator::Greater
        | BinaryOperator::GreaterEqual => {
            format!("cannot compare {} with {} using '{}'", left_type, right_type, op)
        }
        _ => format!(
            "cannot apply '{}' to {} and {}",
            op, left_type, right_type
        ),
    };
    let help = match op {
        BinaryOperator::Add => "'+' adds two numbers, or concatenates when either side is a string",
        BinaryOperator::Less
        | BinaryOperator::LessEqual
        | BinaryOperator::Greater
        | BinaryOperator::GreaterEqual => "comparisons need two numbers or two strings",
        _ => "arithmetic operators need two numbers",
    };
    Diagnostic::type_error(codes::BINARY_TYPE_MISMATCH, message)
        .with_span(spans.expression)
        .with_label(spans.left, format!("this is a {}", left_type))
        .with_label(spans.right, format!("this is a {}", right_type))
        .with_help(help)
        .build()
}

pub(crate) fn unary(
    op: UnaryOperator,
    operand: &Value,
    span: Span,
    operand_span: Span,
) -> Result<Value, Diagnostic> {
    match (op, operand) {
        (UnaryOperator::Not, value) => Ok(Value::Boolean(!value.is_truthy())),
        (UnaryOperator::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOperator::Negate, other) => Err(Diagnostic::type_error(
            codes::UNARY_TYPE_MISMATCH,
            format!("cannot negate a {}", other.type_name()),
        )
        .with_span(span)
        .with_label(operand_span, format!("this is a {}", other.type_name()))
        .build()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorClass;

    fn spans() -> OperandSpans {
        OperandSpans {
            expression: Span::default(),
            left: Span::default(),
            right: Span::default(),
        }
    }

    fn eval(op: BinaryOperator, left: impl Into<Value>, right: impl Into<Value>) -> Value {
        binary(op, &left.into(), &right.into(), spans()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(BinaryOperator::Add, 1.0, 2.0), Value::Number(3.0));
        assert_eq!(eval(BinaryOperator::Subtract, 1.0, 2.0), Value::Number(-1.0));
        assert_eq!(eval(BinaryOperator::Multiply, 3.0, 4.0), Value::Number(12.0));
        assert_eq!(eval(BinaryOperator::Divide, 7.0, 2.0), Value::Number(3.5));
        assert_eq!(eval(BinaryOperator::Power, 2.0, 10.0), Value::Number(1024.0));
        assert_eq!(eval(BinaryOperator::Modulo, -7.0, 3.0), Value::Number(-1.0));
    }

    #[test]
    fn test_plus_concatenates_with_any_string() {
        assert_eq!(eval(BinaryOperator::Add, "1", 1.0), Value::from("11"));
        assert_eq!(eval(BinaryOperator::Add, 2.5, "x"), Value::from("2.5x"));
        assert_eq!(
            eval(BinaryOperator::Add, "v=", Value::array(vec![Value::Null])),
            Value::from("v=[null]")
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval(BinaryOperator::Less, 1.0, 2.0), Value::Boolean(true));
        assert_eq!(eval(BinaryOperator::GreaterEqual, 2.0, 2.0), Value::Boolean(true));
        assert_eq!(eval(BinaryOperator::Greater, "b", "a"), Value::Boolean(true));
        assert_eq!(eval(BinaryOperator::LessEqual, f64::NAN, 1.0), Value::Boolean(false));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Value::array(vec![1.0.into()]);
        let b = Value::array(vec![1.0.into()]);
        assert_eq!(eval(BinaryOperator::Equal, a, b), Value::Boolean(true));
        assert_eq!(eval(BinaryOperator::NotEqual, 1.0, "1"), Value::Boolean(true));
        assert_eq!(eval(BinaryOperator::Equal, Value::Null, Value::Null), Value::Boolean(true));
    }

    #[test]
    fn test_mismatch_labels_both_operands() {
        let err = binary(
            BinaryOperator::Less,
            &Value::Number(1.0),
            &Value::from("a"),
            spans(),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::BINARY_TYPE_MISMATCH);
        assert_eq!(err.class, ErrorClass::Type);
        assert_eq!(err.message, "cannot compare number with string using '<'");
        let labels: Vec<_> = err.labels.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(labels, vec!["this is a number", "this is a string"]);

        let err = binary(BinaryOperator::Add, &Value::Null, &Value::Boolean(true), spans())
            .unwrap_err();
        assert_eq!(err.message, "cannot add null and boolean");
    }

    #[test]
    fn test_division_by_zero() {
        for op in [BinaryOperator::Divide, BinaryOperator::Modulo] {
            let err = binary(op, &Value::Number(1.0), &Value::Number(0.0), spans()).unwrap_err();
            assert_eq!(err.code, codes::DIVISION_BY_ZERO);
            assert!(err.is_catchable());
        }
    }

    #[test]
    fn test_unary() {
        let span = Span::default();
        assert_eq!(
            unary(UnaryOperator::Negate, &Value::Number(2.0), span, span).unwrap(),
            Value::Number(-2.0)
        );
        assert_eq!(
            unary(UnaryOperator::Not, &Value::from(""), span, span).unwrap(),
            Value::Boolean(true)
        );
        let err = unary(UnaryOperator::Negate, &Value::from("x"), span, span).unwrap_err();
        assert_eq!(err.code, codes::UNARY_TYPE_MISMATCH);
        assert_eq!(err.message, "cannot negate a string");
    }
}
