//! Runtime values for the EBS interpreter.
//!
//! `Value` is a closed union; every value a script can observe is one of
//! these variants. Collection variants share their backing store through
//! `Arc<RwLock<..>>` so values handed to another thread stay live and
//! mutations are visible everywhere.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use ebs_ast::DataType;
use indexmap::IndexMap;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::EbsArray;

/// Runtime values in the EBS interpreter.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Null,

    Bool(bool),

    /// 8-bit signed integer
    Byte(i8),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    Long(i64),

    /// 32-bit floating point number
    Float(f32),

    /// 64-bit floating point number
    Double(f64),

    Str(SmolStr),

    Date(NaiveDate),

    DateTime(NaiveDateTime),

    /// Typed fixed or dynamic array, shared by reference
    Array(Arc<RwLock<EbsArray>>),

    /// Record/map with insertion-ordered string keys, shared by reference
    Map(Arc<RwLock<IndexMap<SmolStr, Value>>>),

    /// Handle naming an open cursor in the runtime registry
    Cursor(SmolStr),
}

impl Value {
    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Int(_) => "integer",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Map(_) => "record",
            Value::Cursor(_) => "cursor",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Byte(_) | Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_)
        )
    }

    /// Only booleans have a truth value; everything else is `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(n) => Some(*n as f64),
            Value::Int(n) => Some(*n as f64),
            Value::Long(n) => Some(*n as f64),
            Value::Float(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<RwLock<EbsArray>>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Arc<RwLock<IndexMap<SmolStr, Value>>>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Wrap a fresh array in its shared cell.
    pub fn array(array: EbsArray) -> Value {
        Value::Array(Arc::new(RwLock::new(array)))
    }

    /// Wrap a fresh record in its shared cell.
    pub fn map(map: IndexMap<SmolStr, Value>) -> Value {
        Value::Map(Arc::new(RwLock::new(map)))
    }
}

/// Textual form of a boolean as scripts see it in string contexts.
pub fn string_boolean(b: bool) -> &'static str {
    if b {
        "Y"
    } else {
        "N"
    }
}

fn format_f64(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

// Formatted at f32 width; widening to f64 first would expose excess
// digits (0.1f32 as f64 prints 0.10000000149011612).
fn format_f32(n: f32) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Convert a value to its display string. Strings come out unquoted;
/// containers render as JSON-style text with quoted string elements.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Byte(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Long(n) => n.to_string(),
        Value::Float(n) => format_f32(*n),
        Value::Double(n) => format_f64(*n),
        Value::Str(s) => s.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Value::Array(_) | Value::Map(_) => json_text(value),
        Value::Cursor(name) => format!("<cursor {}>", name),
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("\"{}\"", s),
        Value::Date(_) | Value::DateTime(_) | Value::Cursor(_) => {
            format!("\"{}\"", stringify(value))
        }
        Value::Array(arr) => {
            let arr = arr.read();
            let parts: Vec<String> = arr.values().iter().map(json_text).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Map(map) => {
            let map = map.read();
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("\"{}\": {}", k, json_text(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        other => stringify(other),
    }
}

/// Zero value of a declared type, used for uninitialized slots.
pub fn default_value(ty: DataType) -> Value {
    match ty {
        DataType::Byte => Value::Byte(0),
        DataType::Integer => Value::Int(0),
        DataType::Long => Value::Long(0),
        DataType::Float => Value::Float(0.0),
        DataType::Double => Value::Double(0.0),
        DataType::Bool => Value::Bool(false),
        DataType::String => Value::Str(SmolStr::default()),
        _ => Value::Null,
    }
}

fn parse_i64(text: &str, ty: DataType) -> Result<i64, String> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(n);
    }
    // Fractional text truncates toward zero.
    if let Ok(f) = trimmed.parse::<f64>() {
        return Ok(f.trunc() as i64);
    }
    Err(format!("Cannot convert '{}' to {}.", text, ty.name()))
}

fn string_to_bool(text: &str) -> Result<bool, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "y" => Ok(true),
        "false" | "n" => Ok(false),
        other => Err(format!("Cannot convert '{}' to boolean.", other)),
    }
}

/// Convert a value to the declared type, or explain why it cannot be.
/// Null converts to the zero value for the scalar types and passes
/// through unchanged for everything else. `Any` and `Json` never convert.
pub fn convert_value(ty: DataType, value: Value) -> Result<Value, String> {
    if matches!(ty, DataType::Any | DataType::Json) {
        return Ok(value);
    }
    if value.is_null() {
        return Ok(default_value(ty));
    }
    match ty {
        DataType::Byte => {
            let n = match &value {
                Value::Byte(n) => return Ok(Value::Byte(*n)),
                Value::Int(n) => *n as i64,
                Value::Long(n) => *n,
                Value::Float(n) => n.trunc() as i64,
                Value::Double(n) => n.trunc() as i64,
                Value::Str(s) => {
                    let n = parse_i64(s, DataType::Byte)?;
                    if !(-128..=127).contains(&n) {
                        return Err(format!("Byte value '{}' out of range [-128..127].", s));
                    }
                    n
                }
                other => {
                    return Err(format!("Cannot convert {} to byte.", other.type_name()));
                }
            };
            Ok(Value::Byte(n as i8))
        }
        DataType::Integer => {
            let n = match &value {
                Value::Byte(n) => *n as i64,
                Value::Int(n) => return Ok(Value::Int(*n)),
                Value::Long(n) => *n,
                Value::Float(n) => n.trunc() as i64,
                Value::Double(n) => n.trunc() as i64,
                Value::Str(s) => parse_i64(s, DataType::Integer)?,
                other => {
                    return Err(format!("Cannot convert {} to integer.", other.type_name()));
                }
            };
            Ok(Value::Int(n as i32))
        }
        DataType::Long => {
            let n = match &value {
                Value::Byte(n) => *n as i64,
                Value::Int(n) => *n as i64,
                Value::Long(n) => return Ok(Value::Long(*n)),
                Value::Float(n) => n.trunc() as i64,
                Value::Double(n) => n.trunc() as i64,
                Value::Str(s) => parse_i64(s, DataType::Long)?,
                other => {
                    return Err(format!("Cannot convert {} to long.", other.type_name()));
                }
            };
            Ok(Value::Long(n))
        }
        DataType::Float => {
            let n = match &value {
                Value::Byte(n) => *n as f64,
                Value::Int(n) => *n as f64,
                Value::Long(n) => *n as f64,
                Value::Float(n) => return Ok(Value::Float(*n)),
                Value::Double(n) => *n,
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("Cannot convert '{}' to float.", s))?,
                other => {
                    return Err(format!("Cannot convert {} to float.", other.type_name()));
                }
            };
            Ok(Value::Float(n as f32))
        }
        DataType::Double => {
            let n = match &value {
                Value::Byte(n) => *n as f64,
                Value::Int(n) => *n as f64,
                Value::Long(n) => *n as f64,
                Value::Float(n) => *n as f64,
                Value::Double(n) => return Ok(Value::Double(*n)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("Cannot convert '{}' to double.", s))?,
                other => {
                    return Err(format!("Cannot convert {} to double.", other.type_name()));
                }
            };
            Ok(Value::Double(n))
        }
        DataType::String => match &value {
            Value::Bool(b) => Ok(Value::Str(string_boolean(*b).into())),
            other => Ok(Value::Str(stringify(other).into())),
        },
        DataType::Bool => match &value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Str(s) => Ok(Value::Bool(string_to_bool(s)?)),
            other => Err(format!("Cannot convert {} to boolean.", other.type_name())),
        },
        DataType::Date => match &value {
            Value::Date(_) | Value::DateTime(_) => Ok(value),
            Value::Str(s) => {
                let trimmed = s.trim();
                if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    Ok(Value::Date(d))
                } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
                    Ok(Value::DateTime(dt))
                } else {
                    Err(format!("Cannot convert '{}' to date.", s))
                }
            }
            other => Err(format!("Cannot convert {} to date.", other.type_name())),
        },
        DataType::Array => match &value {
            Value::Array(_) => Ok(value),
            other => Err(format!("Cannot convert {} to array.", other.type_name())),
        },
        DataType::Record | DataType::Map => match &value {
            Value::Map(_) => Ok(value),
            other => Err(format!("Cannot convert {} to record.", other.type_name())),
        },
        DataType::Any | DataType::Json => unreachable!("handled above"),
    }
}

/// Check that a value is acceptable for a declared type without converting
/// it. Null always passes. Integer/long are interchangeable, as are
/// float/double.
pub fn check_data_type(ty: DataType, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    match ty {
        DataType::Any | DataType::Json => true,
        DataType::Byte => matches!(value, Value::Byte(_) | Value::Int(_) | Value::Long(_)),
        DataType::Integer | DataType::Long => {
            matches!(value, Value::Byte(_) | Value::Int(_) | Value::Long(_))
        }
        DataType::Float | DataType::Double => matches!(
            value,
            Value::Float(_) | Value::Double(_) | Value::Int(_) | Value::Long(_) | Value::Byte(_)
        ),
        DataType::String => matches!(value, Value::Str(_)),
        DataType::Bool => matches!(value, Value::Bool(_)),
        DataType::Date => matches!(value, Value::Date(_) | Value::DateTime(_)),
        DataType::Array => matches!(value, Value::Array(_)),
        DataType::Record | DataType::Map => matches!(value, Value::Map(_)),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&stringify(self))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Cursor(a), Value::Cursor(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Arc::ptr_eq(a, b) || *a.read().values() == *b.read().values()
            }
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            // Numbers compare by value across widths.
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64().unwrap() == b.as_f64().unwrap()
            }
            _ => false,
        }
    }
}
