// File: src/types.rs
//
// Type layer for the EBS script core.
// Declares the closed DataType set, composite shapes (record, bitmap, intmap),
// named type aliases, and the two conversion paths:
// - `coerce`: implicit conversion at assignment, parameter binding and return
//   boundaries (identity, numeric widening, universal stringify)
// - `cast`: explicit conversion that may parse strings and narrow numbers

use crate::errors::{ErrorType, ScriptException};
use crate::interpreter::{ArrayValue, RecordMap, Value, DATE_FORMAT};
use ahash::AHashMap;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The closed set of script data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Integer,
    Long,
    Float,
    Double,
    String,
    Date,
    Bool,
    Json,
    Array,
    Record,
    Bitmap,
    Intmap,
    Any,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Long => "LONG",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::String => "STRING",
            DataType::Date => "DATE",
            DataType::Bool => "BOOL",
            DataType::Json => "JSON",
            DataType::Array => "ARRAY",
            DataType::Record => "RECORD",
            DataType::Bitmap => "BITMAP",
            DataType::Intmap => "INTMAP",
            DataType::Any => "ANY",
        }
    }

    /// Spelling used in script source and `typeof` output
    pub fn keyword(self) -> &'static str {
        match self {
            DataType::Integer => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Bool => "bool",
            DataType::Json => "json",
            DataType::Array => "array",
            DataType::Record => "record",
            DataType::Bitmap => "bitmap",
            DataType::Intmap => "intmap",
            DataType::Any => "any",
        }
    }

    /// Accepts either the keyword or the upper-case name, ignoring case
    pub fn from_keyword(word: &str) -> Option<DataType> {
        match word.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(DataType::Integer),
            "long" => Some(DataType::Long),
            "float" => Some(DataType::Float),
            "double" => Some(DataType::Double),
            "string" => Some(DataType::String),
            "date" => Some(DataType::Date),
            "bool" | "boolean" => Some(DataType::Bool),
            "json" => Some(DataType::Json),
            "array" => Some(DataType::Array),
            "record" => Some(DataType::Record),
            "bitmap" => Some(DataType::Bitmap),
            "intmap" => Some(DataType::Intmap),
            "any" => Some(DataType::Any),
            _ => None,
        }
    }

    /// Position in the widening order INTEGER -> LONG -> FLOAT -> DOUBLE
    pub fn numeric_rank(self) -> Option<u8> {
        match self {
            DataType::Integer => Some(0),
            DataType::Long => Some(1),
            DataType::Float => Some(2),
            DataType::Double => Some(3),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, inclusive bit range inside a bitmap or intmap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitField {
    pub name: String,
    pub low: u8,
    pub high: u8,
}

impl BitField {
    pub fn new(name: &str, low: u8, high: u8) -> Self {
        BitField { name: name.to_lowercase(), low, high }
    }

    fn width(&self) -> u32 {
        (self.high - self.low) as u32 + 1
    }

    /// Largest value the field can hold
    pub fn max_value(&self) -> u32 {
        if self.width() >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width()) - 1
        }
    }

    fn mask(&self) -> u32 {
        self.max_value() << self.low
    }
}

/// Field layout of a bitmap (8 bits) or intmap (32 bits).
/// Deserialized layouts go through the same checks as `bitmap`/`intmap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBitFields")]
pub struct BitFields {
    pub width: u8,
    pub fields: Vec<BitField>,
}

#[derive(Deserialize)]
struct RawBitFields {
    width: u8,
    fields: Vec<BitField>,
}

impl TryFrom<RawBitFields> for BitFields {
    type Error = String;

    fn try_from(raw: RawBitFields) -> Result<Self, String> {
        BitFields::new(raw.width, raw.fields)
    }
}

impl BitFields {
    pub fn bitmap(fields: Vec<BitField>) -> Result<Self, String> {
        Self::new(8, fields)
    }

    pub fn intmap(fields: Vec<BitField>) -> Result<Self, String> {
        Self::new(32, fields)
    }

    fn new(width: u8, fields: Vec<BitField>) -> Result<Self, String> {
        if width != 8 && width != 32 {
            return Err(format!("Bit layouts are 8 or 32 bits wide, got {}", width));
        }
        let mut used: u32 = 0;
        for field in &fields {
            if field.low > field.high || field.high >= width {
                return Err(format!(
                    "Bit field '{}' ({}..{}) does not fit in {} bits",
                    field.name, field.low, field.high, width
                ));
            }
            if used & field.mask() != 0 {
                return Err(format!("Bit field '{}' overlaps another field", field.name));
            }
            used |= field.mask();
        }
        Ok(BitFields { width, fields })
    }

    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, bits: u32, name: &str) -> Option<u32> {
        self.field(name).map(|f| (bits & f.mask()) >> f.low)
    }

    /// Writes `value` into the named range, rejecting values that do not fit
    pub fn set(&self, bits: u32, name: &str, value: i64) -> Result<u32, ScriptException> {
        let field = self.field(name).ok_or_else(|| {
            ScriptException::not_found(format!("Unknown bit field '{}'", name))
        })?;
        if value < 0 || value > field.max_value() as i64 {
            return Err(ScriptException::new(
                ErrorType::ValidationError,
                format!(
                    "Value {} does not fit bit field '{}' (0..{})",
                    value,
                    field.name,
                    field.max_value()
                ),
            ));
        }
        Ok((bits & !field.mask()) | ((value as u32) << field.low))
    }
}

/// One declared field of a record shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub spec: TypeSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordType {
    pub fields: Vec<RecordField>,
}

impl RecordType {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, spec: impl Into<TypeSpec>) -> Self {
        self.fields.push(RecordField { name: name.to_lowercase(), spec: spec.into() });
        self
    }

    pub fn get(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Composite shape carried by a declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Record(RecordType),
    Bitmap(Arc<BitFields>),
    Intmap(Arc<BitFields>),
}

impl Shape {
    pub fn bit_fields(&self) -> Option<Arc<BitFields>> {
        match self {
            Shape::Bitmap(layout) | Shape::Intmap(layout) => Some(layout.clone()),
            Shape::Record(_) => None,
        }
    }

    pub fn record(&self) -> Option<&RecordType> {
        match self {
            Shape::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// A complete declared type: data type plus optional shape, element type,
/// fixed size, or a reference to a typedef alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<TypeSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl From<DataType> for TypeSpec {
    fn from(data_type: DataType) -> Self {
        TypeSpec::of(data_type)
    }
}

impl TypeSpec {
    pub fn of(data_type: DataType) -> Self {
        TypeSpec { data_type, shape: None, element: None, size: None, alias: None }
    }

    pub fn any() -> Self {
        Self::of(DataType::Any)
    }

    pub fn array(element: impl Into<TypeSpec>, size: Option<usize>) -> Self {
        TypeSpec { element: Some(Box::new(element.into())), size, ..Self::of(DataType::Array) }
    }

    pub fn record(record: RecordType) -> Self {
        TypeSpec { shape: Some(Shape::Record(record)), ..Self::of(DataType::Record) }
    }

    pub fn bitmap(layout: BitFields) -> Self {
        TypeSpec { shape: Some(Shape::Bitmap(Arc::new(layout))), ..Self::of(DataType::Bitmap) }
    }

    pub fn intmap(layout: BitFields) -> Self {
        TypeSpec { shape: Some(Shape::Intmap(Arc::new(layout))), ..Self::of(DataType::Intmap) }
    }

    /// Reference to a typedef alias, resolved through the TypeRegistry
    pub fn named(alias: &str) -> Self {
        TypeSpec { alias: Some(alias.to_lowercase()), ..Self::any() }
    }

    pub fn element_spec(&self) -> TypeSpec {
        self.element.as_deref().cloned().unwrap_or_else(TypeSpec::any)
    }

    pub fn record_shape(&self) -> Option<&RecordType> {
        self.shape.as_ref().and_then(Shape::record)
    }

    /// Human readable form for diagnostics
    pub fn describe(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match self.data_type {
            DataType::Array => {
                let element = self.element_spec().describe();
                match self.size {
                    Some(n) => format!("array.{}[{}]", element, n),
                    None => format!("array.{}[]", element),
                }
            }
            other => other.keyword().to_string(),
        }
    }

    /// Value of a declaration without an initializer
    pub fn default_value(&self) -> Value {
        match self.data_type {
            DataType::Array => {
                let element = self.element_spec();
                match self.size {
                    Some(n) => Value::Array(Arc::new(ArrayValue::fixed(
                        element.data_type,
                        vec![element.default_value(); n],
                    ))),
                    None => Value::Array(Arc::new(ArrayValue::dynamic(element.data_type, Vec::new()))),
                }
            }
            DataType::Record => match self.record_shape() {
                Some(record) => Value::Record(Arc::new(
                    record
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), f.spec.default_value()))
                        .collect(),
                )),
                None => Value::Record(Arc::new(RecordMap::new())),
            },
            DataType::Bitmap => {
                Value::Bitmap { bits: 0, layout: self.shape.as_ref().and_then(Shape::bit_fields) }
            }
            DataType::Intmap => {
                Value::Intmap { bits: 0, layout: self.shape.as_ref().and_then(Shape::bit_fields) }
            }
            _ => null_default(self.data_type),
        }
    }
}

/// Named type aliases registered by `typedef`
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    aliases: AHashMap<String, TypeSpec>,
}

const MAX_ALIAS_DEPTH: usize = 32;

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces an alias
    pub fn define(&mut self, name: &str, spec: TypeSpec) {
        let key = name.to_lowercase();
        if self.aliases.insert(key.clone(), spec).is_some() {
            tracing::debug!(alias = %key, "typedef replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeSpec> {
        self.aliases.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces every alias reference, including nested element and field
    /// types, with its definition
    pub fn resolve(&self, spec: &TypeSpec) -> Result<TypeSpec, ScriptException> {
        self.resolve_at(spec, 0)
    }

    fn resolve_at(&self, spec: &TypeSpec, depth: usize) -> Result<TypeSpec, ScriptException> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(ScriptException::new(
                ErrorType::ValidationError,
                format!("Type alias '{}' is recursive", spec.describe()),
            ));
        }

        if let Some(alias) = &spec.alias {
            let target = self
                .get(alias)
                .ok_or_else(|| ScriptException::not_found(format!("Unknown type '{}'", alias)))?;
            return self.resolve_at(target, depth + 1);
        }

        let mut resolved = spec.clone();
        if let Some(element) = &spec.element {
            resolved.element = Some(Box::new(self.resolve_at(element, depth + 1)?));
        }
        if let Some(Shape::Record(record)) = &spec.shape {
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                fields.push(RecordField {
                    name: field.name.clone(),
                    spec: self.resolve_at(&field.spec, depth + 1)?,
                });
            }
            resolved.shape = Some(Shape::Record(RecordType { fields }));
        }
        Ok(resolved)
    }
}

fn null_default(data_type: DataType) -> Value {
    match data_type {
        DataType::Integer => Value::Int(0),
        DataType::Long => Value::Long(0),
        DataType::Float => Value::Float(0.0),
        DataType::Double => Value::Double(0.0),
        DataType::Bool => Value::Bool(false),
        DataType::String => Value::string(""),
        _ => Value::Null,
    }
}

fn mismatch(value: &Value, spec: &TypeSpec) -> ScriptException {
    ScriptException::type_error(format!(
        "Cannot convert {} to {}",
        value.type_name(),
        spec.describe()
    ))
}

/// Implicit conversion applied at every typed boundary
///
/// Accepts identity, the widening order INTEGER -> LONG -> FLOAT -> DOUBLE,
/// universal stringify into STRING, anything into ANY or JSON, JSON
/// containers into arrays and records, and integers into bitmaps/intmaps.
/// Null becomes the per-type default for primitives. Anything else is a
/// TYPE_ERROR.
pub fn coerce(value: Value, spec: &TypeSpec) -> Result<Value, ScriptException> {
    if value.is_null() {
        return Ok(null_default(spec.data_type));
    }

    match spec.data_type {
        DataType::Any => Ok(value),
        DataType::Integer => match value {
            Value::Int(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::Long => match value {
            Value::Int(n) => Ok(Value::Long(n as i64)),
            Value::Long(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::Float => match value {
            Value::Int(n) => Ok(Value::Float(n as f32)),
            Value::Long(n) => Ok(Value::Float(n as f32)),
            Value::Float(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::Double => match value {
            Value::Int(n) => Ok(Value::Double(n as f64)),
            Value::Long(n) => Ok(Value::Double(n as f64)),
            Value::Float(n) => Ok(Value::Double(n as f64)),
            Value::Double(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::String => match value {
            Value::Str(_) => Ok(value),
            other => Ok(Value::string(other.to_string())),
        },
        DataType::Date => match value {
            Value::Date(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::Bool => match value {
            Value::Bool(_) => Ok(value),
            other => Err(mismatch(&other, spec)),
        },
        DataType::Json => match value {
            Value::Json(_) => Ok(value),
            Value::Cursor(_) => Err(mismatch(&value, spec)),
            other => Ok(Value::json(other.to_json())),
        },
        DataType::Array => coerce_array(value, spec),
        DataType::Record => coerce_record(value, spec),
        DataType::Bitmap => {
            let layout = spec.shape.as_ref().and_then(Shape::bit_fields);
            match value {
                Value::Bitmap { bits, layout: own } => Ok(Value::Bitmap { bits, layout: layout.or(own) }),
                Value::Int(n) if (0..=255).contains(&n) => Ok(Value::Bitmap { bits: n as u8, layout }),
                other => Err(mismatch(&other, spec)),
            }
        }
        DataType::Intmap => {
            let layout = spec.shape.as_ref().and_then(Shape::bit_fields);
            match value {
                Value::Intmap { bits, layout: own } => Ok(Value::Intmap { bits, layout: layout.or(own) }),
                Value::Int(n) => Ok(Value::Intmap { bits: n, layout }),
                Value::Bitmap { bits, .. } => Ok(Value::Intmap { bits: bits as i32, layout }),
                other => Err(mismatch(&other, spec)),
            }
        }
    }
}

fn coerce_array(value: Value, spec: &TypeSpec) -> Result<Value, ScriptException> {
    let element = spec.element_spec();

    let items: Vec<Value> = match &value {
        Value::Array(array) => {
            let unchanged = element.data_type == DataType::Any
                && element.shape.is_none()
                && spec.size.is_none();
            if unchanged || (array.element == element.data_type && element.shape.is_none() && spec.size.is_none() && !array.fixed) {
                return Ok(value);
            }
            array.items.clone()
        }
        Value::Json(json) => match json.as_array() {
            Some(items) => items.iter().map(Value::from_json).collect(),
            None => return Err(mismatch(&value, spec)),
        },
        _ => return Err(mismatch(&value, spec)),
    };

    let mut converted = Vec::with_capacity(items.len());
    for item in items {
        converted.push(coerce(item, &element)?);
    }

    match spec.size {
        Some(size) => {
            if converted.len() > size {
                return Err(ScriptException::new(
                    ErrorType::IndexError,
                    format!("{} elements do not fit {}", converted.len(), spec.describe()),
                ));
            }
            converted.resize(size, element.default_value());
            Ok(Value::Array(Arc::new(ArrayValue::fixed(element.data_type, converted))))
        }
        None => Ok(Value::Array(Arc::new(ArrayValue::dynamic(element.data_type, converted)))),
    }
}

fn record_entries(value: &Value) -> Option<Vec<(String, Value)>> {
    match value {
        Value::Record(fields) => {
            Some(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        Value::Json(json) => json
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()),
        _ => None,
    }
}

fn coerce_record(value: Value, spec: &TypeSpec) -> Result<Value, ScriptException> {
    let Some(shape) = spec.record_shape() else {
        return match value {
            Value::Record(_) => Ok(value),
            other => match record_entries(&other) {
                Some(entries) => Ok(Value::Record(Arc::new(entries.into_iter().collect()))),
                None => Err(mismatch(&other, spec)),
            },
        };
    };

    let entries = record_entries(&value).ok_or_else(|| mismatch(&value, spec))?;
    let mut source: RecordMap = entries.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();

    let mut fields = RecordMap::with_capacity(shape.fields.len());
    for field in &shape.fields {
        let converted = match source.shift_remove(&field.name) {
            Some(v) => coerce(v, &field.spec)?,
            None => field.spec.default_value(),
        };
        fields.insert(field.name.clone(), converted);
    }

    if let Some((unknown, _)) = source.first() {
        return Err(ScriptException::type_error(format!(
            "Unknown field '{}' for {}",
            unknown,
            spec.describe()
        )));
    }

    Ok(Value::Record(Arc::new(fields)))
}

/// Parses the date formats accepted by casts and date builtins
pub fn parse_date(text: &str) -> Result<NaiveDateTime, ScriptException> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| {
            ScriptException::new(ErrorType::ParseError, format!("Cannot parse '{}' as date", text))
        })
}

fn parse_error(text: &str, spec: &TypeSpec) -> ScriptException {
    ScriptException::new(
        ErrorType::ParseError,
        format!("Cannot parse '{}' as {}", text, spec.describe()),
    )
}

fn out_of_range(value: &Value, spec: &TypeSpec) -> ScriptException {
    ScriptException::math_error(format!("{} is out of range for {}", value, spec.describe()))
}

fn narrow_integer(value: &Value, spec: &TypeSpec) -> Result<i64, ScriptException> {
    match value {
        Value::Int(n) => Ok(*n as i64),
        Value::Long(n) => Ok(*n),
        Value::Float(_) | Value::Double(_) => {
            let wide = value.as_f64().unwrap_or(f64::NAN);
            if !wide.is_finite() || wide < i64::MIN as f64 || wide > i64::MAX as f64 {
                return Err(out_of_range(value, spec));
            }
            Ok(wide.trunc() as i64)
        }
        Value::Bool(b) => Ok(*b as i64),
        other => Err(mismatch(other, spec)),
    }
}

fn numeric_cast(value: &Value, spec: &TypeSpec) -> Result<Value, ScriptException> {
    match spec.data_type {
        DataType::Integer => {
            let n = narrow_integer(value, spec)?;
            i32::try_from(n).map(Value::Int).map_err(|_| out_of_range(value, spec))
        }
        DataType::Long => narrow_integer(value, spec).map(Value::Long),
        DataType::Float => {
            let wide = match value {
                Value::Bool(b) => *b as i64 as f64,
                other => other.as_f64().ok_or_else(|| mismatch(other, spec))?,
            };
            let narrow = wide as f32;
            if wide.is_finite() && !narrow.is_finite() {
                return Err(out_of_range(value, spec));
            }
            Ok(Value::Float(narrow))
        }
        DataType::Double => match value {
            Value::Bool(b) => Ok(Value::Double(*b as i64 as f64)),
            other => other.as_f64().map(Value::Double).ok_or_else(|| mismatch(other, spec)),
        },
        DataType::Bitmap => {
            let n = narrow_integer(value, spec)?;
            u8::try_from(n)
                .map(|bits| Value::Bitmap { bits, layout: spec.shape.as_ref().and_then(Shape::bit_fields) })
                .map_err(|_| out_of_range(value, spec))
        }
        DataType::Intmap => {
            let n = narrow_integer(value, spec)?;
            i32::try_from(n)
                .map(|bits| Value::Intmap { bits, layout: spec.shape.as_ref().and_then(Shape::bit_fields) })
                .map_err(|_| out_of_range(value, spec))
        }
        _ => coerce(value.clone(), spec),
    }
}

fn cast_string(text: &str, spec: &TypeSpec) -> Result<Value, ScriptException> {
    let trimmed = text.trim();
    match spec.data_type {
        DataType::Integer => trimmed.parse::<i32>().map(Value::Int).map_err(|_| parse_error(text, spec)),
        DataType::Long => trimmed.parse::<i64>().map(Value::Long).map_err(|_| parse_error(text, spec)),
        DataType::Float => trimmed.parse::<f32>().map(Value::Float).map_err(|_| parse_error(text, spec)),
        DataType::Double => trimmed.parse::<f64>().map(Value::Double).map_err(|_| parse_error(text, spec)),
        DataType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "y" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "n" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(parse_error(text, spec)),
        },
        DataType::Date => parse_date(text).map(Value::Date),
        DataType::Json | DataType::Array | DataType::Record => {
            let json: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|_| parse_error(text, spec))?;
            coerce(Value::json(json), spec)
        }
        DataType::Bitmap | DataType::Intmap => {
            let n = trimmed.parse::<i64>().map_err(|_| parse_error(text, spec))?;
            numeric_cast(&Value::Long(n), spec)
        }
        DataType::String | DataType::Any => Ok(Value::string(text)),
    }
}

/// Explicit conversion: parses strings, narrows numbers with range checks,
/// and otherwise falls back to implicit coercion
pub fn cast(value: Value, spec: &TypeSpec) -> Result<Value, ScriptException> {
    if let Value::Str(text) = &value {
        return cast_string(text, spec);
    }

    let scalar = match &value {
        Value::Bitmap { bits, .. } => Value::Int(*bits as i32),
        Value::Intmap { bits, .. } => Value::Int(*bits),
        Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) | Value::Bool(_) => {
            value.clone()
        }
        _ => return coerce(value, spec),
    };

    match spec.data_type {
        DataType::Bool => {
            let truthy = match scalar {
                Value::Bool(b) => b,
                other => other.as_f64().unwrap_or(0.0) != 0.0,
            };
            Ok(Value::Bool(truthy))
        }
        t if t.is_numeric() || t == DataType::Bitmap || t == DataType::Intmap => {
            numeric_cast(&scalar, spec)
        }
        _ => coerce(value, spec),
    }
}
