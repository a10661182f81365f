//! Runtime values.
//!
//! Arrays, dictionaries, instances, classes and functions are reference
//! types: cloning a [`Value`] aliases the same storage.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::FunctionDeclaration;
use crate::environment::Env;
use crate::interpreter::methods::Method;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type DictionaryRef = Rc<RefCell<Dictionary>>;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Dictionary(DictionaryRef),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Native(Rc<NativeFunction>),
    /// A built-in library object such as `Console`
    Library(Rc<str>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn dictionary(dictionary: Dictionary) -> Self {
        Value::Dictionary(Rc::new(RefCell::new(dictionary)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dictionary",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Library(_) => "module",
        }
    }

    /// Truthiness used by conditions and the logical operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.borrow().is_empty(),
            Value::Dictionary(dict) => !dict.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is a number with no fractional part.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// The value as a dictionary key: strings as-is, numbers in their
    /// printed form.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    fn write_to(&self, out: &mut String, open: &mut Vec<*const ()>) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&format_number(*n)),
            Value::String(s) => out.push_str(s),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if open.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                open.push(ptr);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_to(out, open);
                }
                out.push(']');
                open.pop();
            }
            Value::Dictionary(dict) => {
                let ptr = Rc::as_ptr(dict) as *const ();
                if open.contains(&ptr) {
                    out.push_str("{...}");
                    return;
                }
                open.push(ptr);
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    value.write_to(out, open);
                }
                out.push('}');
                open.pop();
            }
            Value::Function(function) => {
                out.push_str(&format!("<func {}>", function.name()));
            }
            Value::Class(class) => out.push_str(&format!("<class {}>", class.name)),
            Value::Instance(instance) => {
                out.push_str(&format!("<{} instance>", instance.class.name));
            }
            Value::Native(native) => out.push_str(&format!("<native {}>", native.name())),
            Value::Library(name) => out.push_str(&format!("<module {}>", name)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out, &mut Vec::new());
        f.write_str(&out)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Structural equality for `==`: arrays and dictionaries compare by
/// content, callables and instances by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_inner(other, &mut Vec::new())
    }
}

/// Container pairs whose comparison is in progress.
type Comparing = Vec<(*const (), *const ())>;

impl Value {
    /// A pair already being compared further up counts as equal, so cyclic
    /// containers terminate.
    fn eq_inner(&self, other: &Self, comparing: &mut Comparing) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_inner(y, comparing));
                comparing.pop();
                equal
            }
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let equal = a.borrow().eq_inner(&b.borrow(), comparing);
                comparing.pop();
                equal
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Library(a), Value::Library(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

/// Format a number the way programs print it: integral values without a
/// fractional part, everything else in shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Insertion-ordered string-keyed map backing dictionary values.
#[derive(Clone, Default)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
    index: FxHashMap<String, usize>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. Overwriting keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for (i, (key, _)) in self.entries.iter().enumerate().skip(position) {
            if let Some(slot) = self.index.get_mut(key.as_str()) {
                *slot = i;
            }
        }
        Some(value)
    }

    /// Remove every entry, handing the values back to the caller.
    pub fn take_all(&mut self) -> Vec<(String, Value)> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Order-insensitive comparison.
impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.eq_inner(other, &mut Vec::new())
    }
}

impl Dictionary {
    fn eq_inner(&self, other: &Self, comparing: &mut Comparing) -> bool {
        self.len() == other.len()
            && self.iter().all(|(key, value)| {
                other
                    .get(key)
                    .is_some_and(|v| value.eq_inner(v, comparing))
            })
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut dictionary = Dictionary::new();
        for (key, value) in iter {
            dictionary.insert(key, value);
        }
        dictionary
    }
}

/// A user-defined function together with the environment it closes over.
pub struct Function {
    pub declaration: Rc<FunctionDeclaration>,
    pub closure: Env,
    /// File the function was defined in, for diagnostics
    pub file: Rc<str>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.declaration.name.name
    }
}

/// A class: a name and its methods.
pub struct Class {
    pub name: String,
    pub methods: FxHashMap<String, Rc<Function>>,
}

/// An instance of a class with its own mutable fields.
pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<FxHashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(FxHashMap::default()),
        }
    }
}

/// A callable implemented by the interpreter itself.
pub enum NativeFunction {
    /// A function of a built-in library, e.g. `Console.print`
    Library {
        library: Rc<str>,
        function: &'static str,
    },
    /// A primitive method bound to its receiver, e.g. `[1, 2].push`
    Method { receiver: Value, method: Method },
    /// The foreign-call bridge entry point
    ForeignCall,
}

impl NativeFunction {
    pub fn name(&self) -> String {
        match self {
            NativeFunction::Library { library, function } => format!("{}.{}", library, function),
            NativeFunction::Method { receiver, method } => {
                format!("{}.{}", receiver.type_name(), method.name())
            }
            NativeFunction::ForeignCall => "__native_call".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::array(vec![]).is_truthy());
        assert!(Value::array(vec![Value::Null]).is_truthy());
        assert!(!Value::dictionary(Dictionary::new()).is_truthy());
        assert!(Value::Library("Math".into()).is_truthy());
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::array(vec![1.0.into(), "x".into()]);
        let b = Value::array(vec![1.0.into(), "x".into()]);
        assert_eq!(a, b);
        assert_ne!(a, Value::array(vec![1.0.into()]));
        assert_ne!(Value::from(1.0), Value::from("1"));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));

        let d1: Dictionary = vec![("a".to_string(), 1.0.into()), ("b".to_string(), 2.0.into())]
            .into_iter()
            .collect();
        let d2: Dictionary = vec![("b".to_string(), 2.0.into()), ("a".to_string(), 1.0.into())]
            .into_iter()
            .collect();
        assert_eq!(Value::dictionary(d1), Value::dictionary(d2));
    }

    #[test]
    fn test_arrays_alias_on_clone() {
        let a = Value::array(vec![]);
        let alias = a.clone();
        if let Value::Array(items) = &alias {
            items.borrow_mut().push(Value::Boolean(true));
        }
        assert_eq!(a.to_string(), "[true]");
    }

    #[test]
    fn test_dictionary_keeps_insertion_order() {
        let mut dict = Dictionary::new();
        dict.insert("z", 1.0.into());
        dict.insert("a", 2.0.into());
        dict.insert("m", 3.0.into());
        dict.insert("z", 4.0.into());
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);

        assert_eq!(dict.remove("a"), Some(2.0.into()));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["z", "m"]);
        assert_eq!(dict.get("m"), Some(&Value::Number(3.0)));
        assert!(dict.remove("a").is_none());
    }

    #[test]
    fn test_display_formats() {
        let mut dict = Dictionary::new();
        dict.insert("name", "Ada".into());
        dict.insert("tags", Value::array(vec![1.0.into(), Value::Null, 2.5.into()]));
        insta::assert_snapshot!(Value::dictionary(dict).to_string(), @"{name: Ada, tags: [1, null, 2.5]}");
    }

    #[test]
    fn test_display_of_recursive_array() {
        let items = Rc::new(RefCell::new(vec![Value::Number(1.0)]));
        items.borrow_mut().push(Value::Array(items.clone()));
        let value = Value::Array(items.clone());
        insta::assert_snapshot!(value.to_string(), @"[1, [...]]");
        // break the cycle so the test does not leak
        items.borrow_mut().clear();
    }

    #[test]
    fn test_equality_of_cyclic_containers() {
        let cyclic = |first: f64| {
            let items = Rc::new(RefCell::new(vec![Value::Number(first)]));
            items.borrow_mut().push(Value::Array(items.clone()));
            items
        };
        let a = cyclic(1.0);
        let b = cyclic(1.0);
        let c = cyclic(2.0);
        assert_eq!(Value::Array(a.clone()), Value::Array(b.clone()));
        assert_ne!(Value::Array(a.clone()), Value::Array(c.clone()));

        let mut dict = Dictionary::new();
        dict.insert("self", Value::Null);
        let d = Rc::new(RefCell::new(dict.clone()));
        let e = Rc::new(RefCell::new(dict));
        d.borrow_mut().insert("self", Value::Dictionary(d.clone()));
        e.borrow_mut().insert("self", Value::Dictionary(e.clone()));
        assert_eq!(Value::Dictionary(d.clone()), Value::Dictionary(e.clone()));

        for items in [a, b, c] {
            items.borrow_mut().clear();
        }
        d.borrow_mut().take_all();
        e.borrow_mut().take_all();
    }

    #[test]
    fn test_as_integer() {
        assert_eq!(Value::Number(3.0).as_integer(), Some(3));
        assert_eq!(Value::Number(3.5).as_integer(), None);
        assert_eq!(Value::from("3").as_integer(), None);
    }
}
