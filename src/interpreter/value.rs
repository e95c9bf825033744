// File: src/interpreter/value.rs
//
// Runtime value types for the EBS script core.
// Every value reports exactly one DataType. Composite values (arrays, records,
// JSON) are reference counted and copied on write, so assignment has value
// semantics without deep clones on every read.

use crate::types::{BitFields, DataType};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered field map backing record values and database rows
pub type RecordMap = IndexMap<String, Value>;

/// Array payload: element type, fixed/dynamic flag and items
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub element: DataType,
    pub fixed: bool,
    pub items: Vec<Value>,
}

impl ArrayValue {
    pub fn dynamic(element: DataType, items: Vec<Value>) -> Self {
        ArrayValue { element, fixed: false, items }
    }

    pub fn fixed(element: DataType, items: Vec<Value>) -> Self {
        ArrayValue { element, fixed: true, items }
    }
}

/// Runtime values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<String>),
    Date(NaiveDateTime),
    Bool(bool),
    Json(Arc<serde_json::Value>),
    Array(Arc<ArrayValue>),
    Record(Arc<RecordMap>),
    /// Packed byte; field layout travels with the value once it is typed
    Bitmap { bits: u8, layout: Option<Arc<BitFields>> },
    /// Packed 32-bit integer with named bit ranges
    Intmap { bits: i32, layout: Option<Arc<BitFields>> },
    /// Handle to a cursor owned by the scope frame that declared it
    Cursor(String),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Arc::new(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(ArrayValue::dynamic(DataType::Any, items)))
    }

    pub fn record<I, K>(fields: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Record(Arc::new(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()))
    }

    pub fn json(value: serde_json::Value) -> Value {
        Value::Json(Arc::new(value))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Any,
            Value::Int(_) => DataType::Integer,
            Value::Long(_) => DataType::Long,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Str(_) => DataType::String,
            Value::Date(_) => DataType::Date,
            Value::Bool(_) => DataType::Bool,
            Value::Json(_) => DataType::Json,
            Value::Array(_) => DataType::Array,
            Value::Record(_) => DataType::Record,
            Value::Bitmap { .. } => DataType::Bitmap,
            Value::Intmap { .. } => DataType::Intmap,
            Value::Cursor(_) => DataType::Any,
        }
    }

    /// Name reported by `typeof`
    pub fn type_name(&self) -> String {
        match self {
            Value::Array(array) => {
                if array.fixed {
                    format!("array.{}[{}]", array.element.keyword(), array.items.len())
                } else {
                    format!("array.{}[]", array.element.keyword())
                }
            }
            Value::Record(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| format!("{}:{}", name, value.type_name()))
                    .collect();
                format!("record {{{}}}", parts.join(", "))
            }
            Value::Cursor(_) => "cursor".to_string(),
            other => other.data_type().keyword().to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer view used for indexes and counts
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n as i64),
            Value::Long(n) => Some(*n),
            Value::Bitmap { bits, .. } => Some(*bits as i64),
            Value::Intmap { bits, .. } => Some(*bits as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Long(n) => Some(*n as f64),
            Value::Float(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Converts to a JSON document; records become objects, dates strings
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null | Value::Cursor(_) => J::Null,
            Value::Int(n) => J::from(*n),
            Value::Long(n) => J::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n as f64).map(J::Number).unwrap_or(J::Null),
            Value::Double(n) => serde_json::Number::from_f64(*n).map(J::Number).unwrap_or(J::Null),
            Value::Str(s) => J::String(s.as_ref().clone()),
            Value::Date(d) => J::String(d.format(DATE_FORMAT).to_string()),
            Value::Bool(b) => J::Bool(*b),
            Value::Json(j) => j.as_ref().clone(),
            Value::Array(array) => J::Array(array.items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => {
                J::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Value::Bitmap { bits, .. } => J::from(*bits),
            Value::Intmap { bits, .. } => J::from(*bits),
        }
    }

    /// Lifts a JSON node into a script value; containers stay JSON
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map(Value::Int).unwrap_or(Value::Long(i))
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            J::String(s) => Value::string(s.clone()),
            J::Array(_) | J::Object(_) => Value::json(json.clone()),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

// Whole numbers keep a trailing ".0" so floats never print like integers
fn fmt_float<T: fmt::Display + Into<f64> + Copy>(f: &mut fmt::Formatter, n: T) -> fmt::Result {
    let wide: f64 = n.into();
    if wide.is_finite() && wide.fract() == 0.0 && wide.abs() < 1e15 {
        write!(f, "{:.1}", wide)
    } else {
        write!(f, "{}", n)
    }
}

/// Universal stringify used by print, string concatenation and STRING coercion
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}", n),
            Value::Float(n) => fmt_float(f, *n),
            Value::Double(n) => fmt_float(f, *n),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Json(j) => write!(f, "{}", j),
            Value::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", name)?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Value::Bitmap { bits, .. } => write!(f, "{}", bits),
            Value::Intmap { bits, .. } => write!(f, "{}", bits),
            Value::Cursor(name) => write!(f, "cursor {}", name),
        }
    }
}
