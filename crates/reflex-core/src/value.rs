//! Dynamic value types for producer state and action arguments

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A dynamic, immutable value that can represent any producer state
///
/// Lists and maps are reference counted. A transition never edits a container
/// in place; it builds a new one, so [`Value::same`] can tell a changed value
/// from an untouched one without walking the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// No value / nil
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (for counts, IDs, etc.)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// List of values
    List(Arc<Vec<Value>>),
    /// Map of string keys to values
    Map(Arc<ValueMap>),
}

/// A map of string keys to dynamic values
///
/// Uses IndexMap to preserve insertion order (useful for deterministic serialization)
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    /// Build a map value from key/value pairs
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Build a list value
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    /// An empty map
    pub fn empty_map() -> Self {
        Value::Map(Arc::new(ValueMap::new()))
    }

    /// Reference comparison
    ///
    /// Scalars compare by value, floats by bit pattern (`NaN` is the same as
    /// itself, `0.0` and `-0.0` are not). Lists and maps are the same only when both
    /// sides point at the same allocation, so two structurally equal maps
    /// built separately are *not* the same.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Try to get this value as a map
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Integer or a type error
    pub fn try_int(&self) -> Result<i64> {
        self.as_int().ok_or_else(|| self.type_error("int"))
    }

    /// Float (integers widen) or a type error
    pub fn try_float(&self) -> Result<f64> {
        self.as_float().ok_or_else(|| self.type_error("float"))
    }

    /// String slice or a type error
    pub fn try_str(&self) -> Result<&str> {
        self.as_str().ok_or_else(|| self.type_error("string"))
    }

    /// Map or a type error
    pub fn try_map(&self) -> Result<&ValueMap> {
        self.as_map().ok_or_else(|| self.type_error("map"))
    }

    fn type_error(&self, expected: &str) -> Error {
        Error::TypeError {
            expected: expected.to_string(),
            got: self.type_name().to_string(),
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Look up a key in a map value; `Null` for missing keys and non-maps
    pub fn get(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        match self {
            Value::Map(map) => map.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Look up an index in a list value; `Null` when out of range
    pub fn at(&self, index: usize) -> &Value {
        static NULL: Value = Value::Null;
        match self {
            Value::List(list) => list.get(index).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// A copy of this map with `key` set to `value`
    ///
    /// Non-map values are treated as an empty map. Sibling entries are shared,
    /// not deep-copied.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Value {
        let mut map = self.as_map().cloned().unwrap_or_default();
        map.insert(key.into(), value.into());
        Value::Map(Arc::new(map))
    }

    /// A copy of this map without `key`
    pub fn without(&self, key: &str) -> Value {
        let mut map = self.as_map().cloned().unwrap_or_default();
        map.shift_remove(key);
        Value::Map(Arc::new(map))
    }

    /// Shallow merge: entries of `other` replace entries of `self` at the top level
    pub fn merge(&self, other: &Value) -> Value {
        let mut map = self.as_map().cloned().unwrap_or_default();
        if let Some(entries) = other.as_map() {
            for (key, value) in entries {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Map(Arc::new(map))
    }

    /// A copy of this list with `value` appended
    pub fn push(&self, value: impl Into<Value>) -> Value {
        let mut list = self.as_list().map(<[Value]>::to_vec).unwrap_or_default();
        list.push(value.into());
        Value::List(Arc::new(list))
    }
}

/// Positional action argument; missing trailing arguments read as `Null`
pub fn arg(args: &[Value], index: usize) -> &Value {
    static NULL: Value = Value::Null;
    args.get(index).unwrap_or(&NULL)
}

/// Positional action argument that must be present
pub fn required_arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index).ok_or(Error::MissingArgument(index))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::list(vec)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(3.5).as_float(), Some(3.5));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::String("hello".into()).as_str(), Some("hello"));
    }

    #[test]
    fn test_same_is_reference_identity_for_containers() {
        let a = Value::map([("count", 1)]);
        let b = Value::map([("count", 1)]);

        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert!(a.same(&a.clone()));
        assert!(Value::Int(3).same(&Value::Int(3)));
        assert!(!Value::Int(3).same(&Value::Float(3.0)));
    }

    #[test]
    fn test_same_compares_float_bits() {
        let nan = Value::Float(f64::NAN);
        assert!(nan.same(&nan.clone()));
        assert_ne!(nan, nan.clone());
        assert!(!Value::Float(0.0).same(&Value::Float(-0.0)));
    }

    #[test]
    fn test_with_shares_untouched_entries() {
        let inner = Value::list([1, 2, 3]);
        let state = Value::map([("items", inner.clone()), ("count", Value::Int(0))]);
        let next = state.with("count", 1);

        assert!(!next.same(&state));
        assert!(next.get("items").same(&inner));
        assert_eq!(state.get("count"), &Value::Int(0));
        assert_eq!(next.get("count"), &Value::Int(1));
    }

    #[test]
    fn test_merge_and_without() {
        let base = Value::map([("a", 1), ("b", 2)]);
        let merged = base.merge(&Value::map([("b", 20), ("c", 30)]));

        assert_eq!(merged, Value::map([("a", 1), ("b", 20), ("c", 30)]));
        assert_eq!(merged.without("a"), Value::map([("b", 20), ("c", 30)]));
    }

    #[test]
    fn test_try_accessors_report_type() {
        assert_eq!(Value::Int(2).try_int(), Ok(2));
        assert_eq!(
            Value::from("x").try_int(),
            Err(Error::TypeError {
                expected: "int".into(),
                got: "string".into()
            })
        );
        assert_eq!(arg(&[], 2), &Value::Null);
        assert_eq!(required_arg(&[], 0), Err(Error::MissingArgument(0)));
    }

    #[test]
    fn test_display() {
        let value = Value::map([("name", Value::from("gold")), ("n", Value::list([1, 2]))]);
        assert_eq!(format!("{}", value), "{name: \"gold\", n: [1, 2]}");
    }
}
