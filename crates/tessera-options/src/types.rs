use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A runtime option value.
///
/// Serialized untagged, so JSON, YAML and TOML documents map onto it in
/// their natural shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Sequence(Vec<OptionValue>),
    Dict(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// Name of the variant as reported in type errors
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Float(_) => "float",
            OptionValue::String(_) => "string",
            OptionValue::Sequence(_) => "sequence",
            OptionValue::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Float(f) => Some(*f),
            OptionValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[OptionValue]> {
        match self {
            OptionValue::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Whether the value counts as "empty" for REQUIRED options
    pub fn is_empty(&self) -> bool {
        match self {
            OptionValue::String(s) => s.is_empty(),
            OptionValue::Sequence(items) => items.is_empty(),
            OptionValue::Dict(map) => map.is_empty(),
            OptionValue::Bool(b) => !b,
            OptionValue::Int(_) | OptionValue::Float(_) => false,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::String(s) => f.write_str(s),
            other => {
                let rendered = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::String(value)
    }
}

impl<T: Into<OptionValue>> From<Vec<T>> for OptionValue {
    fn from(values: Vec<T>) -> Self {
        OptionValue::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// Declared semantic type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Accepts anything; only used for legacy placeholder keys
    Any,
    Bool,
    Int,
    Float,
    /// A float within `[0, 1]`
    Rate,
    String,
    Sequence,
    Dict,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("got {got}, expected {expected}")]
pub struct TypeMismatch {
    pub expected: OptionType,
    pub got: String,
}

impl TypeMismatch {
    fn new(expected: OptionType, value: &OptionValue) -> Self {
        Self {
            expected,
            got: value.kind().to_string(),
        }
    }
}

impl OptionType {
    pub fn name(&self) -> &'static str {
        match self {
            OptionType::Any => "any",
            OptionType::Bool => "bool",
            OptionType::Int => "int",
            OptionType::Float => "float",
            OptionType::Rate => "rate",
            OptionType::String => "string",
            OptionType::Sequence => "sequence",
            OptionType::Dict => "dict",
        }
    }

    /// Derive a type from a default value.
    pub fn infer(value: &OptionValue) -> OptionType {
        match value {
            OptionValue::Bool(_) => OptionType::Bool,
            OptionValue::Int(_) => OptionType::Int,
            OptionValue::Float(_) => OptionType::Float,
            OptionValue::String(_) => OptionType::String,
            OptionValue::Sequence(_) => OptionType::Sequence,
            OptionValue::Dict(_) => OptionType::Dict,
        }
    }

    /// The value used when an option of this type is registered without one.
    pub fn default_value(&self) -> OptionValue {
        match self {
            OptionType::Any | OptionType::String => OptionValue::String(String::new()),
            OptionType::Bool => OptionValue::Bool(false),
            OptionType::Int => OptionValue::Int(0),
            OptionType::Float | OptionType::Rate => OptionValue::Float(0.0),
            OptionType::Sequence => OptionValue::Sequence(Vec::new()),
            OptionType::Dict => OptionValue::Dict(BTreeMap::new()),
        }
    }

    /// Strict membership test, no conversion.
    ///
    /// Integers are accepted where floats are expected.
    pub fn test(&self, value: &OptionValue) -> bool {
        match (self, value) {
            (OptionType::Any, _) => true,
            (OptionType::Bool, OptionValue::Bool(_)) => true,
            (OptionType::Int, OptionValue::Int(_)) => true,
            (OptionType::Float, OptionValue::Float(_) | OptionValue::Int(_)) => true,
            (OptionType::Rate, v) => v
                .as_f64()
                .is_some_and(|rate| (0.0..=1.0).contains(&rate)),
            (OptionType::String, OptionValue::String(_)) => true,
            (OptionType::Sequence, OptionValue::Sequence(_)) => true,
            (OptionType::Dict, OptionValue::Dict(_)) => true,
            _ => false,
        }
    }

    /// Convert a compatible value into this type.
    pub fn coerce(&self, value: OptionValue) -> Result<OptionValue, TypeMismatch> {
        match self {
            OptionType::Any => Ok(value),
            OptionType::Bool => coerce_bool(value),
            OptionType::Int => coerce_int(value),
            OptionType::Float => coerce_float(value, OptionType::Float),
            OptionType::Rate => {
                let coerced = coerce_float(value, OptionType::Rate)?;
                if self.test(&coerced) {
                    Ok(coerced)
                } else {
                    Err(TypeMismatch {
                        expected: OptionType::Rate,
                        got: format!("{} (outside [0, 1])", coerced),
                    })
                }
            }
            OptionType::String => match value {
                OptionValue::String(_) => Ok(value),
                OptionValue::Bool(_) | OptionValue::Int(_) | OptionValue::Float(_) => {
                    Ok(OptionValue::String(value.to_string()))
                }
                other => Err(TypeMismatch::new(OptionType::String, &other)),
            },
            OptionType::Sequence | OptionType::Dict => coerce_structured(*self, value),
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn coerce_bool(value: OptionValue) -> Result<OptionValue, TypeMismatch> {
    match value {
        OptionValue::Bool(_) => Ok(value),
        OptionValue::Int(i) => Ok(OptionValue::Bool(i != 0)),
        OptionValue::String(ref s) => match s.trim().to_lowercase().as_str() {
            "y" | "yes" | "t" | "true" | "1" | "on" => Ok(OptionValue::Bool(true)),
            "n" | "no" | "f" | "false" | "0" | "off" => Ok(OptionValue::Bool(false)),
            _ => Err(TypeMismatch {
                expected: OptionType::Bool,
                got: format!("string {:?}", s),
            }),
        },
        other => Err(TypeMismatch::new(OptionType::Bool, &other)),
    }
}

fn coerce_int(value: OptionValue) -> Result<OptionValue, TypeMismatch> {
    match value {
        OptionValue::Int(_) => Ok(value),
        OptionValue::Float(f) if f.is_finite() => Ok(OptionValue::Int(f.trunc() as i64)),
        OptionValue::String(ref s) => {
            s.trim()
                .parse::<i64>()
                .map(OptionValue::Int)
                .map_err(|_| TypeMismatch {
                    expected: OptionType::Int,
                    got: format!("string {:?}", s),
                })
        }
        other => Err(TypeMismatch::new(OptionType::Int, &other)),
    }
}

fn coerce_float(value: OptionValue, expected: OptionType) -> Result<OptionValue, TypeMismatch> {
    match value {
        OptionValue::Float(_) => Ok(value),
        OptionValue::Int(i) => Ok(OptionValue::Float(i as f64)),
        OptionValue::String(ref s) => {
            s.trim()
                .parse::<f64>()
                .map(OptionValue::Float)
                .map_err(|_| TypeMismatch {
                    expected,
                    got: format!("string {:?}", s),
                })
        }
        other => Err(TypeMismatch::new(expected, &other)),
    }
}

/// Sequences and dicts may arrive as serialized text (JSON or YAML).
fn coerce_structured(expected: OptionType, value: OptionValue) -> Result<OptionValue, TypeMismatch> {
    let parsed = match value {
        OptionValue::String(ref s) if s.trim().is_empty() => return Ok(expected.default_value()),
        OptionValue::String(ref s) => {
            serde_yaml::from_str::<OptionValue>(s).map_err(|_| TypeMismatch {
                expected,
                got: format!("unparsable string {:?}", s),
            })?
        }
        other => other,
    };

    if expected.test(&parsed) {
        Ok(parsed)
    } else {
        Err(TypeMismatch::new(expected, &parsed))
    }
}
