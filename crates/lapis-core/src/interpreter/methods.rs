//! Built-in methods of strings, numbers, booleans, arrays and dictionaries.
//!
//! A method is found by receiver category and name through [`Method::lookup`].
//! Methods that take callbacks (`map`, `filter`, `reduce`, `sort`) work on a
//! snapshot of the array taken before the first callback runs; `sort` writes
//! its result back over whatever the callbacks left in the receiver.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::diagnostics::{codes, Diagnostic};
use crate::span::Span;
use crate::stdlib::{expect_args, integer_arg, string_arg, LibraryError, LibraryResult};
use crate::value::{format_number, ArrayRef, DictionaryRef, Value};

use super::Interpreter;

/// A built-in method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Length,
    ToString,
    ToInt,
    ToFloat,
    ToBool,
    // strings
    Split,
    Replace,
    Contains,
    Format,
    // arrays
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Slice,
    Concat,
    Join,
    IndexOf,
    Includes,
    Reverse,
    Sort,
    Map,
    Filter,
    Reduce,
    // dictionaries
    Keys,
    Values,
    Has,
    Get,
    Remove,
    Clear,
}

const STRING_METHODS: &[Method] = &[
    Method::Length,
    Method::Split,
    Method::Replace,
    Method::Contains,
    Method::ToInt,
    Method::ToFloat,
    Method::ToBool,
    Method::ToString,
    Method::Format,
];

const NUMBER_METHODS: &[Method] = &[
    Method::ToString,
    Method::ToInt,
    Method::ToFloat,
    Method::ToBool,
];

const BOOLEAN_METHODS: &[Method] = &[Method::ToString, Method::ToInt, Method::ToFloat];

const ARRAY_METHODS: &[Method] = &[
    Method::Length,
    Method::Push,
    Method::Pop,
    Method::Shift,
    Method::Unshift,
    Method::Splice,
    Method::Slice,
    Method::Concat,
    Method::Join,
    Method::IndexOf,
    Method::Includes,
    Method::Reverse,
    Method::Sort,
    Method::Map,
    Method::Filter,
    Method::Reduce,
];

const DICTIONARY_METHODS: &[Method] = &[
    Method::Length,
    Method::Keys,
    Method::Values,
    Method::Has,
    Method::Get,
    Method::Remove,
    Method::Clear,
];

impl Method {
    /// Find the built-in method `name` for the receiver's category.
    pub fn lookup(receiver: &Value, name: &str) -> Option<Method> {
        let table = match receiver {
            Value::String(_) => STRING_METHODS,
            Value::Number(_) => NUMBER_METHODS,
            Value::Boolean(_) => BOOLEAN_METHODS,
            Value::Array(_) => ARRAY_METHODS,
            Value::Dictionary(_) => DICTIONARY_METHODS,
            _ => return None,
        };
        table.iter().copied().find(|method| method.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Length => "length",
            Method::ToString => "toString",
            Method::ToInt => "toInt",
            Method::ToFloat => "toFloat",
            Method::ToBool => "toBool",
            Method::Split => "split",
            Method::Replace => "replace",
            Method::Contains => "contains",
            Method::Format => "format",
            Method::Push => "push",
            Method::Pop => "pop",
            Method::Shift => "shift",
            Method::Unshift => "unshift",
            Method::Splice => "splice",
            Method::Slice => "slice",
            Method::Concat => "concat",
            Method::Join => "join",
            Method::IndexOf => "indexOf",
            Method::Includes => "includes",
            Method::Reverse => "reverse",
            Method::Sort => "sort",
            Method::Map => "map",
            Method::Filter => "filter",
            Method::Reduce => "reduce",
            Method::Keys => "keys",
            Method::Values => "values",
            Method::Has => "has",
            Method::Get => "get",
            Method::Remove => "remove",
            Method::Clear => "clear",
        }
    }
}

impl Interpreter {
    /// Invoke a built-in method on `receiver`.
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        method: Method,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        let fail = |error: LibraryError| error.into_diagnostic(span);
        match receiver {
            Value::String(s) => string_method(s, method, &args).map_err(fail),
            Value::Number(n) => number_method(*n, method, &args).map_err(fail),
            Value::Boolean(b) => boolean_method(*b, method, &args).map_err(fail),
            Value::Array(items) => self.array_method(items, method, args, span),
            Value::Dictionary(dict) => dictionary_method(dict, method, &args).map_err(fail),
            other => Err(fail(unknown_method(other, method))),
        }
    }

    fn array_method(
        &mut self,
        items: &ArrayRef,
        method: Method,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, Diagnostic> {
        let name = method.name();
        let fail = |error: LibraryError| error.into_diagnostic(span);
        match method {
            Method::Map | Method::Filter => {
                expect_args(name, &args, 1, 1).map_err(fail)?;
                let snapshot = items.borrow().clone();
                let mut results = Vec::with_capacity(snapshot.len());
                for item in snapshot {
                    let result = self.call_value(&args[0], vec![item.clone()], span)?;
                    if method == Method::Map {
                        results.push(result);
                    } else if result.is_truthy() {
                        results.push(item);
                    }
                }
                Ok(Value::array(results))
            }
            Method::Reduce => {
                expect_args(name, &args, 1, 2).map_err(fail)?;
                let snapshot = items.borrow().clone();
                let mut elements = snapshot.into_iter();
                let mut accumulator = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => elements.next().ok_or_else(|| {
                        fail(LibraryError::new(
                            codes::ARITY_MISMATCH,
                            "reduce() of an empty array needs an initial value",
                        ))
                    })?,
                };
                for item in elements {
                    accumulator = self.call_value(&args[0], vec![accumulator, item], span)?;
                }
                Ok(accumulator)
            }
            Method::Sort => {
                expect_args(name, &args, 0, 1).map_err(fail)?;
                let snapshot = items.borrow().clone();
                let sorted = match args.first() {
                    None => merge_sort(snapshot, &mut |a: &Value, b: &Value| {
                        Ok(a.to_string().cmp(&b.to_string()))
                    })?,
                    Some(comparator) => merge_sort(snapshot, &mut |a: &Value, b: &Value| {
                        self.compare_with(comparator, a, b, span)
                    })?,
                };
                let previous = std::mem::replace(&mut *items.borrow_mut(), sorted);
                drop(previous);
                Ok(Value::Array(items.clone()))
            }
            _ => array_method(items, method, args).map_err(fail),
        }
    }

    fn compare_with(
        &mut self,
        comparator: &Value,
        a: &Value,
        b: &Value,
        span: Span,
    ) -> Result<Ordering, Diagnostic> {
        match self.call_value(comparator, vec![a.clone(), b.clone()], span)? {
            Value::Number(n) if n < 0.0 => Ok(Ordering::Less),
            Value::Number(n) if n > 0.0 => Ok(Ordering::Greater),
            Value::Number(_) => Ok(Ordering::Equal),
            other => Err(Diagnostic::type_error(
                codes::BINARY_TYPE_MISMATCH,
                format!(
                    "sort() comparator must return a number but returned {}",
                    other.type_name()
                ),
            )
            .with_span(span)
            .build()),
        }
    }
}

/// Stable merge sort that tolerates inconsistent comparators and stops at
/// the first comparator error.
fn merge_sort<F>(mut items: Vec<Value>, compare: &mut F) -> Result<Vec<Value>, Diagnostic>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, Diagnostic>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(a), Some(b)) => compare(a, b)? != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn array_method(items: &ArrayRef, method: Method, args: Vec<Value>) -> LibraryResult<Value> {
    let name = method.name();
    match method {
        Method::Length => {
            expect_args(name, &args, 0, 0)?;
            Ok(length(items.borrow().len()))
        }
        Method::Push => {
            expect_args(name, &args, 1, usize::MAX)?;
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(length(items.len()))
        }
        Method::Pop => {
            expect_args(name, &args, 0, 0)?;
            let popped = items.borrow_mut().pop();
            Ok(popped.unwrap_or(Value::Null))
        }
        Method::Shift => {
            expect_args(name, &args, 0, 0)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(items.remove(0))
            }
        }
        Method::Unshift => {
            expect_args(name, &args, 1, usize::MAX)?;
            let mut items = items.borrow_mut();
            items.splice(0..0, args);
            Ok(length(items.len()))
        }
        Method::Splice => {
            expect_args(name, &args, 1, usize::MAX)?;
            let start = integer_arg(name, &args, 0)?;
            let delete = if args.len() > 1 {
                Some(integer_arg(name, &args, 1)?)
            } else {
                None
            };
            let inserted: Vec<Value> = args.into_iter().skip(2).collect();

            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let start = clamp_index(start, len);
            let delete = delete.map_or(len - start, |count| count.clamp(0, len - start));
            let range = start as usize..(start + delete) as usize;
            let removed: Vec<Value> = items.splice(range, inserted).collect();
            Ok(Value::array(removed))
        }
        Method::Slice => {
            expect_args(name, &args, 0, 2)?;
            let items = items.borrow();
            let len = items.len() as i64;
            let start = match args.first() {
                Some(_) => clamp_index(integer_arg(name, &args, 0)?, len),
                None => 0,
            };
            let end = match args.get(1) {
                Some(_) => clamp_index(integer_arg(name, &args, 1)?, len),
                None => len,
            };
            let slice = if start < end {
                items[start as usize..end as usize].to_vec()
            } else {
                Vec::new()
            };
            Ok(Value::array(slice))
        }
        Method::Concat => {
            let mut result = items.borrow().clone();
            for arg in args {
                match arg {
                    Value::Array(other) => result.extend(other.borrow().iter().cloned()),
                    other => result.push(other),
                }
            }
            Ok(Value::array(result))
        }
        Method::Join => {
            expect_args(name, &args, 0, 1)?;
            let separator = match args.first() {
                Some(_) => string_arg(name, &args, 0)?,
                None => ",",
            };
            let joined = items
                .borrow()
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(separator);
            Ok(Value::from(joined))
        }
        Method::IndexOf | Method::Includes => {
            expect_args(name, &args, 1, 2)?;
            let items = items.borrow();
            let from = match args.get(1) {
                Some(_) => clamp_index(integer_arg(name, &args, 1)?, items.len() as i64) as usize,
                None => 0,
            };
            let position = items
                .iter()
                .skip(from)
                .position(|item| *item == args[0])
                .map(|offset| offset + from);
            Ok(if method == Method::IndexOf {
                Value::Number(position.map_or(-1.0, |i| i as f64))
            } else {
                Value::Boolean(position.is_some())
            })
        }
        Method::Reverse => {
            expect_args(name, &args, 0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::Array(items.clone()))
        }
        other => Err(unknown_method(&Value::Array(items.clone()), other)),
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`.
fn clamp_index(index: i64, len: i64) -> i64 {
    if index < 0 {
        (len + index).max(0)
    } else {
        index.min(len)
    }
}

fn length(len: usize) -> Value {
    Value::Number(len as f64)
}

fn string_method(s: &std::rc::Rc<str>, method: Method, args: &[Value]) -> LibraryResult<Value> {
    let name = method.name();
    match method {
        Method::Format => return format_string(s, args),
        Method::Split | Method::Contains => expect_args(name, args, 1, 1)?,
        Method::Replace => expect_args(name, args, 2, 2)?,
        _ => expect_args(name, args, 0, 0)?,
    }
    match method {
        Method::Length => Ok(length(s.chars().count())),
        Method::Split => {
            let separator = string_arg(name, args, 0)?;
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(separator).map(Value::from).collect()
            };
            Ok(Value::array(parts))
        }
        Method::Replace => {
            let from = string_arg(name, args, 0)?;
            let to = string_arg(name, args, 1)?;
            Ok(Value::from(s.replace(from, to)))
        }
        Method::Contains => Ok(Value::Boolean(s.contains(string_arg(name, args, 0)?))),
        Method::ToInt => parse_number(s).map(|n| Value::Number(n.trunc())),
        Method::ToFloat => parse_number(s).map(Value::Number),
        Method::ToBool => match s.trim() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(conversion_error(s, "a boolean")),
        },
        Method::ToString => Ok(Value::String(s.clone())),
        other => Err(unknown_method(&Value::String(s.clone()), other)),
    }
}

fn parse_number(s: &str) -> LibraryResult<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| conversion_error(s, "a number"))
}

fn conversion_error(s: &str, target: &str) -> LibraryError {
    LibraryError::new(
        codes::INVALID_CONVERSION,
        format!("cannot convert '{}' to {}", s, target),
    )
}

fn placeholder_pattern() -> LibraryResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}"))
        .as_ref()
        .map_err(|e| LibraryError::new(codes::INVALID_CONVERSION, e.to_string()))
}

/// `"{name} is {age}".format({name: "Ada", age: 36})`, or with the values
/// given as key/value argument pairs.
fn format_string(template: &str, args: &[Value]) -> LibraryResult<Value> {
    let values: FxHashMap<String, String> = match args {
        [Value::Dictionary(dict)] => dict
            .borrow()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        pairs if pairs.len() % 2 == 0 => pairs
            .chunks(2)
            .map(|pair| match &pair[0] {
                Value::String(key) => Ok((key.to_string(), pair[1].to_string())),
                other => Err(LibraryError::new(
                    codes::BINARY_TYPE_MISMATCH,
                    format!("format() keys must be strings, not {}", other.type_name()),
                )),
            })
            .collect::<LibraryResult<_>>()?,
        _ => {
            return Err(LibraryError::new(
                codes::ARITY_MISMATCH,
                "format() expects a dictionary or key/value pairs",
            ))
        }
    };

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for captures in placeholder_pattern()?.captures_iter(template) {
        let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = values.get(key.as_str()).ok_or_else(|| {
            LibraryError::new(
                codes::INVALID_CONVERSION,
                format!("format() has no value for placeholder '{}'", whole.as_str()),
            )
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(Value::from(out))
}

fn number_method(n: f64, method: Method, args: &[Value]) -> LibraryResult<Value> {
    expect_args(method.name(), args, 0, 0)?;
    match method {
        Method::ToString => Ok(Value::from(format_number(n))),
        Method::ToInt => Ok(Value::Number(n.trunc())),
        Method::ToFloat => Ok(Value::Number(n)),
        Method::ToBool => Ok(Value::Boolean(n != 0.0)),
        other => Err(unknown_method(&Value::Number(n), other)),
    }
}

fn boolean_method(b: bool, method: Method, args: &[Value]) -> LibraryResult<Value> {
    expect_args(method.name(), args, 0, 0)?;
    let as_number = if b { 1.0 } else { 0.0 };
    match method {
        Method::ToString => Ok(Value::from(if b { "true" } else { "false" })),
        Method::ToInt | Method::ToFloat => Ok(Value::Number(as_number)),
        other => Err(unknown_method(&Value::Boolean(b), other)),
    }
}

fn dictionary_method(dict: &DictionaryRef, method: Method, args: &[Value]) -> LibraryResult<Value> {
    let name = method.name();
    match method {
        Method::Has | Method::Remove => expect_args(name, args, 1, 1)?,
        Method::Get => expect_args(name, args, 1, 2)?,
        _ => expect_args(name, args, 0, 0)?,
    }
    match method {
        Method::Length => Ok(length(dict.borrow().len())),
        Method::Keys => Ok(Value::array(dict.borrow().keys().map(Value::from).collect())),
        Method::Values => Ok(Value::array(dict.borrow().values().cloned().collect())),
        Method::Has => Ok(Value::Boolean(dict.borrow().contains_key(&key_arg(name, args)?))),
        Method::Get => {
            let key = key_arg(name, args)?;
            let found = dict.borrow().get(&key).cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        Method::Remove => {
            let key = key_arg(name, args)?;
            let removed = dict.borrow_mut().remove(&key);
            Ok(removed.unwrap_or(Value::Null))
        }
        Method::Clear => {
            let entries = dict.borrow_mut().take_all();
            drop(entries);
            Ok(Value::Null)
        }
        other => Err(unknown_method(&Value::Dictionary(dict.clone()), other)),
    }
}

fn key_arg(name: &str, args: &[Value]) -> LibraryResult<String> {
    args.first().and_then(Value::as_key).ok_or_else(|| {
        LibraryError::new(
            codes::BINARY_TYPE_MISMATCH,
            format!("{}() expects a string key", name),
        )
    })
}

fn unknown_method(receiver: &Value, method: Method) -> LibraryError {
    LibraryError::new(
        codes::UNKNOWN_PROPERTY,
        format!("{} has no method '{}'", receiver.type_name(), method.name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dictionary;

    fn numbers(values: &[f64]) -> ArrayRef {
        match Value::array(values.iter().map(|n| Value::Number(*n)).collect()) {
            Value::Array(items) => items,
            _ => unreachable!(),
        }
    }

    fn call(items: &ArrayRef, method: Method, args: Vec<Value>) -> Value {
        array_method(items, method, args).unwrap()
    }

    #[test]
    fn test_lookup_by_receiver_category() {
        assert_eq!(Method::lookup(&Value::from("x"), "split"), Some(Method::Split));
        assert_eq!(Method::lookup(&Value::Number(1.0), "split"), None);
        assert_eq!(Method::lookup(&Value::array(vec![]), "length"), Some(Method::Length));
        assert_eq!(Method::lookup(&Value::Boolean(true), "toBool"), None);
        assert_eq!(Method::lookup(&Value::Null, "toString"), None);
        assert_eq!(
            Method::lookup(&Value::dictionary(Dictionary::new()), "keys"),
            Some(Method::Keys)
        );
    }

    #[test]
    fn test_splice_replaces_and_returns_removed() {
        let items = numbers(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let removed = call(
            &items,
            Method::Splice,
            vec![1.0.into(), 2.0.into(), 9.0.into(), 9.0.into()],
        );
        assert_eq!(removed.to_string(), "[2, 3]");
        assert_eq!(Value::Array(items).to_string(), "[1, 9, 9, 4, 5]");
    }

    #[test]
    fn test_splice_clamps_and_accepts_negative_start() {
        let items = numbers(&[1.0, 2.0, 3.0]);
        let removed = call(&items, Method::Splice, vec![(-1.0).into()]);
        assert_eq!(removed.to_string(), "[3]");
        let removed = call(&items, Method::Splice, vec![10.0.into(), 5.0.into(), 7.0.into()]);
        assert_eq!(removed.to_string(), "[]");
        assert_eq!(Value::Array(items).to_string(), "[1, 2, 7]");
    }

    #[test]
    fn test_push_pop_shift_unshift() {
        let items = numbers(&[]);
        assert_eq!(call(&items, Method::Pop, vec![]), Value::Null);
        assert_eq!(call(&items, Method::Push, vec![1.0.into(), 2.0.into()]), Value::Number(2.0));
        assert_eq!(call(&items, Method::Unshift, vec![0.0.into()]), Value::Number(3.0));
        assert_eq!(call(&items, Method::Shift, vec![]), Value::Number(0.0));
        assert_eq!(call(&items, Method::Pop, vec![]), Value::Number(2.0));
        assert_eq!(Value::Array(items).to_string(), "[1]");
    }

    #[test]
    fn test_slice_join_index_of() {
        let items = numbers(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(call(&items, Method::Slice, vec![1.0.into(), (-1.0).into()]).to_string(), "[2, 3]");
        assert_eq!(call(&items, Method::Slice, vec![]).to_string(), "[1, 2, 3, 4]");
        assert_eq!(call(&items, Method::Join, vec!["-".into()]), Value::from("1-2-3-4"));
        assert_eq!(call(&items, Method::Join, vec![]), Value::from("1,2,3,4"));
        assert_eq!(call(&items, Method::IndexOf, vec![3.0.into()]), Value::Number(2.0));
        assert_eq!(call(&items, Method::IndexOf, vec![1.0.into(), 1.0.into()]), Value::Number(-1.0));
        assert_eq!(call(&items, Method::Includes, vec![4.0.into()]), Value::Boolean(true));
    }

    #[test]
    fn test_concat_flattens_one_level() {
        let items = numbers(&[1.0]);
        let nested = Value::array(vec![2.0.into(), Value::array(vec![3.0.into()])]);
        let result = call(&items, Method::Concat, vec![nested, "x".into()]);
        assert_eq!(result.to_string(), "[1, 2, [3], x]");
        assert_eq!(Value::Array(items).to_string(), "[1]");
    }

    #[test]
    fn test_slice_rejects_fractional_bounds() {
        let items = numbers(&[1.0, 2.0]);
        let err = array_method(&items, Method::Slice, vec![0.5.into()]).unwrap_err();
        assert_eq!(err.code, codes::BINARY_TYPE_MISMATCH);
    }

    #[test]
    fn test_string_methods() {
        let s: std::rc::Rc<str> = "a,b,,c".into();
        let split = string_method(&s, Method::Split, &[",".into()]).unwrap();
        assert_eq!(split.to_string(), "[a, b, , c]");
        let replaced = string_method(&s, Method::Replace, &[",".into(), ";".into()]).unwrap();
        assert_eq!(replaced, Value::from("a;b;;c"));

        let n: std::rc::Rc<str> = " 42.7 ".into();
        assert_eq!(string_method(&n, Method::ToInt, &[]).unwrap(), Value::Number(42.0));
        assert_eq!(string_method(&n, Method::ToFloat, &[]).unwrap(), Value::Number(42.7));
        let err = string_method(&s, Method::ToFloat, &[]).unwrap_err();
        assert_eq!(err.message, "cannot convert 'a,b,,c' to a number");
    }

    #[test]
    fn test_format_placeholders() {
        let mut dict = Dictionary::new();
        dict.insert("name", "Ada".into());
        dict.insert("age", 36.0.into());
        let formatted = format_string("{name} is {age}.", &[Value::dictionary(dict)]).unwrap();
        assert_eq!(formatted, Value::from("Ada is 36."));

        let formatted = format_string("{a}{b}", &["a".into(), 1.0.into(), "b".into(), true.into()]);
        assert_eq!(formatted.unwrap(), Value::from("1true"));

        let err = format_string("hi {who}", &["name".into(), "x".into()]).unwrap_err();
        assert_eq!(err.code, codes::INVALID_CONVERSION);
        assert_eq!(err.message, "format() has no value for placeholder '{who}'");
    }

    #[test]
    fn test_number_and_boolean_conversions() {
        assert_eq!(number_method(3.9, Method::ToInt, &[]).unwrap(), Value::Number(3.0));
        assert_eq!(number_method(0.0, Method::ToBool, &[]).unwrap(), Value::Boolean(false));
        assert_eq!(number_method(2.0, Method::ToString, &[]).unwrap(), Value::from("2"));
        assert_eq!(boolean_method(true, Method::ToInt, &[]).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_dictionary_methods() {
        let mut dict = Dictionary::new();
        dict.insert("a", 1.0.into());
        dict.insert("1", "one".into());
        let dict = match Value::dictionary(dict) {
            Value::Dictionary(dict) => dict,
            _ => unreachable!(),
        };
        let keys = dictionary_method(&dict, Method::Keys, &[]).unwrap();
        assert_eq!(keys.to_string(), "[a, 1]");
        assert_eq!(dictionary_method(&dict, Method::Has, &[1.0.into()]).unwrap(), Value::Boolean(true));
        assert_eq!(
            dictionary_method(&dict, Method::Get, &["zz".into(), 0.0.into()]).unwrap(),
            Value::Number(0.0)
        );
        assert_eq!(dictionary_method(&dict, Method::Remove, &["a".into()]).unwrap(), Value::Number(1.0));
        dictionary_method(&dict, Method::Clear, &[]).unwrap();
        assert_eq!(dictionary_method(&dict, Method::Length, &[]).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let items = vec![
            Value::array(vec![2.0.into(), "a".into()]),
            Value::array(vec![1.0.into(), "b".into()]),
            Value::array(vec![2.0.into(), "c".into()]),
        ];
        let first = |v: &Value| match v {
            Value::Array(items) => items.borrow()[0].as_number().unwrap_or_default(),
            _ => 0.0,
        };
        let sorted = merge_sort(items, &mut |a: &Value, b: &Value| {
            Ok(first(a).total_cmp(&first(b)))
        })
        .unwrap();
        let rendered: Vec<String> = sorted.iter().map(Value::to_string).collect();
        assert_eq!(rendered, vec!["[1, b]", "[2, a]", "[2, c]"]);
    }
}
