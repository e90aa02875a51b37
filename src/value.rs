//! Value types held by the observed state graph.
//!
//! Values are plain owned trees: scalars, sequences, objects, and invocables.
//! They bridge to `serde_json::Value` so seeds and configuration can be loaded
//! from JSON, and so change events can be relayed in serialized form.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Object storage. Keys enumerate in sorted order.
pub type ObjectMap = BTreeMap<String, Value>;

/// Signature of an invocable stored in the graph: `(receiver, arguments) -> result`.
pub type InvocableFn = dyn Fn(&Value, &[Value]) -> Value + Send + Sync;

/// A callable value.
///
/// Two invocables compare equal only when they share the same underlying closure.
#[derive(Clone)]
pub struct Invocable {
    func: Arc<InvocableFn>,
}

impl Invocable {
    /// Wraps a closure.
    pub fn new(func: impl Fn(&Value, &[Value]) -> Value + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
        }
    }

    /// Calls the closure with an explicit receiver.
    pub fn call(&self, receiver: &Value, args: &[Value]) -> Value {
        (self.func)(receiver, args)
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invocable(..)")
    }
}

impl PartialEq for Invocable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// Storage kind of a value, used for type-change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Function,
}

impl ValueKind {
    /// Returns the kind as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value stored in, read from, or reported by the graph.
///
/// # Examples
///
/// ```
/// use statenet::Value;
///
/// let title = Value::from("navigation toolbar");
/// let count = Value::from(3);
///
/// assert!(title.is_string());
/// assert_eq!(count.as_int(), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(ObjectMap),
    Function(Invocable),
}

impl Value {
    /// Builds a function value from a closure.
    pub fn function(func: impl Fn(&Value, &[Value]) -> Value + Send + Sync + 'static) -> Self {
        Self::Function(Invocable::new(func))
    }

    /// Builds an object value from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub const fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    /// True for values that are wrapped in a graph node rather than stored inline.
    #[must_use]
    pub const fn is_node_kind(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_) | Self::Function(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_function(&self) -> Option<&Invocable> {
        match self {
            Self::Function(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the storage kind.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) | Self::Float(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
            Self::Function(_) => ValueKind::Function,
        }
    }

    /// Converts to JSON. Functions and non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null | Self::Function(_) => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int(v) => Json::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Self::String(v) => Json::String(v.clone()),
            Self::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Function(_) => write!(f, "function"),
            Self::Array(_) | Self::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<ObjectMap> for Value {
    fn from(v: ObjectMap) -> Self {
        Self::Object(v)
    }
}

impl From<Invocable> for Value {
    fn from(v: Invocable) -> Self {
        Self::Function(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match v {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_kind_numbers_share_a_kind() {
        assert_eq!(Value::Int(1).kind(), ValueKind::Number);
        assert_eq!(Value::Float(1.5).kind(), ValueKind::Number);
        assert_ne!(Value::Int(1).kind(), Value::from("1").kind());
    }

    #[test]
    fn test_value_node_kinds() {
        assert!(Value::Array(vec![]).is_node_kind());
        assert!(Value::Object(ObjectMap::new()).is_node_kind());
        assert!(Value::function(|_, _| Value::Null).is_node_kind());
        assert!(!Value::from("x").is_node_kind());
    }

    #[test]
    fn test_value_from_json() {
        let val = Value::from(json!({"toolbar": {"title": "nav", "count": 2, "ratio": 0.5}}));
        let toolbar = val.as_object().unwrap().get("toolbar").unwrap();
        let toolbar = toolbar.as_object().unwrap();
        assert_eq!(toolbar.get("title").unwrap().as_str(), Some("nav"));
        assert_eq!(toolbar.get("count").unwrap().as_int(), Some(2));
        assert_eq!(toolbar.get("ratio").unwrap().as_float(), Some(0.5));
    }

    #[test]
    fn test_value_to_json_drops_functions() {
        let val = Value::object([
            ("name", Value::from("a")),
            ("run", Value::function(|_, _| Value::Null)),
        ]);
        assert_eq!(val.to_json(), json!({"name": "a", "run": null}));
    }

    #[test]
    fn test_invocable_call_and_identity() {
        let double = Invocable::new(|_, args| {
            Value::Int(args.first().and_then(Value::as_int).unwrap_or(0) * 2)
        });
        assert_eq!(double.call(&Value::Null, &[Value::Int(4)]), Value::Int(8));
        assert_eq!(double, double.clone());
        assert_ne!(double, Invocable::new(|_, _| Value::Null));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Int(42)), "42");
        assert_eq!(format!("{}", Value::from("hi")), "\"hi\"");
        assert_eq!(format!("{}", Value::Null), "null");
        assert_eq!(format!("{}", Value::Array(vec![Value::Int(1)])), "[1]");
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::from(json!({"items": [1, "two", null]}));
        let text = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(val, back);
    }
}
