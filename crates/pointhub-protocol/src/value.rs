//! Typed scalar values carried by points.
//!
//! Values travel as plain JSON scalars (`true`, `42`, `1.5`, `"open"`), and
//! every point declares the [`ValueType`] its values must convert to.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Declared type of a point's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Boolean (digital) signal.
    Bool,
    /// Signed integer.
    Int,
    /// Finite floating point number.
    Float,
    /// Free-form text.
    Text,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Value conversion errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The input could not be converted to the expected type.
    #[error("cannot convert {raw:?} to {expected}")]
    Invalid {
        /// Offending input, rendered as text.
        raw: String,
        /// Type the point declares.
        expected: ValueType,
    },
}

/// A scalar point value.
///
/// Variant order matters for untagged deserialization: `1` must become
/// `Int` before `Float` gets a chance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl PointValue {
    /// Get the type of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            PointValue::Bool(_) => ValueType::Bool,
            PointValue::Int(_) => ValueType::Int,
            PointValue::Float(_) => ValueType::Float,
            PointValue::Text(_) => ValueType::Text,
        }
    }

    /// Parse a textual value (as sent by control requests) into `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Invalid`] if the text does not represent a value
    /// of the expected type.
    pub fn parse(raw: &str, expected: ValueType) -> Result<Self, ValueError> {
        let invalid = || ValueError::Invalid {
            raw: raw.to_string(),
            expected,
        };
        let trimmed = raw.trim();

        match expected {
            ValueType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(PointValue::Bool(true)),
                "false" | "0" | "off" => Ok(PointValue::Bool(false)),
                _ => Err(invalid()),
            },
            ValueType::Int => trimmed
                .parse::<i64>()
                .map(PointValue::Int)
                .map_err(|_| invalid()),
            ValueType::Float => match trimmed.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(PointValue::Float(v)),
                _ => Err(invalid()),
            },
            ValueType::Text => Ok(PointValue::Text(raw.to_string())),
        }
    }

    /// Convert this value into `expected`, if a lossless conversion exists.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Invalid`] when no conversion applies.
    pub fn coerce(self, expected: ValueType) -> Result<Self, ValueError> {
        match (self, expected) {
            (v, t) if v.value_type() == t => Ok(v),
            (PointValue::Int(i), ValueType::Float) => Ok(PointValue::Float(i as f64)),
            (PointValue::Float(f), ValueType::Int)
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 =>
            {
                Ok(PointValue::Int(f as i64))
            }
            (PointValue::Bool(b), ValueType::Int) => Ok(PointValue::Int(i64::from(b))),
            (PointValue::Int(i @ (0 | 1)), ValueType::Bool) => Ok(PointValue::Bool(i == 1)),
            (PointValue::Text(s), t) => PointValue::parse(&s, t),
            (v, ValueType::Text) => Ok(PointValue::Text(v.to_string())),
            (v, t) => Err(ValueError::Invalid {
                raw: v.to_string(),
                expected: t,
            }),
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Bool(b) => write!(f, "{b}"),
            PointValue::Int(i) => write!(f, "{i}"),
            PointValue::Float(v) => write!(f, "{v}"),
            PointValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PointValue {
    fn from(v: bool) -> Self {
        PointValue::Bool(v)
    }
}

impl From<i64> for PointValue {
    fn from(v: i64) -> Self {
        PointValue::Int(v)
    }
}

impl From<f64> for PointValue {
    fn from(v: f64) -> Self {
        PointValue::Float(v)
    }
}

impl From<&str> for PointValue {
    fn from(v: &str) -> Self {
        PointValue::Text(v.to_string())
    }
}
