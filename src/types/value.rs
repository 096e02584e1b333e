// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability values and their mapping to raw property values.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValueError;

/// A typed value exposed to the host as a capability.
///
/// Enum properties are exposed by their label, so a mode reported as `2`
/// on the wire becomes `Text("favorite")` here.
///
/// # Examples
///
/// ```
/// use miot_sync::types::CapabilityValue;
///
/// let on = CapabilityValue::from(true);
/// assert_eq!(on.as_bool(), Some(true));
///
/// let level = CapabilityValue::from(42.0);
/// assert_eq!(level.as_f64(), Some(42.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    /// On/off style value.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Enum label or free text.
    Text(String),
}

impl CapabilityValue {
    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the numeric value, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value into JSON, as stored in host settings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Reads a value back from host JSON. Arrays, objects and null are rejected.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CapabilityValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One option of an enum property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumOption {
    /// The raw value on the wire.
    pub value: i64,
    /// The label exposed to the host.
    pub label: String,
}

impl EnumOption {
    /// Creates an enum option.
    #[must_use]
    pub fn new(value: i64, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
        }
    }
}

/// Describes how a raw property value maps to a [`CapabilityValue`].
///
/// # Examples
///
/// ```
/// use miot_sync::types::{CapabilityValue, EnumOption, ValueKind};
/// use serde_json::json;
///
/// let mode = ValueKind::Enum {
///     options: vec![EnumOption::new(0, "auto"), EnumOption::new(2, "favorite")],
/// };
/// assert_eq!(mode.decode(&json!(2)), Some(CapabilityValue::from("favorite")));
/// assert_eq!(mode.encode("mode", &CapabilityValue::from("auto")).unwrap(), json!(0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    /// Boolean property; `0`/`1` are accepted on read.
    Bool,
    /// Numeric property bounded to `[min, max]` on write.
    Number {
        /// Lowest writable value.
        min: f64,
        /// Highest writable value.
        max: f64,
    },
    /// Enumerated property exposed by label.
    Enum {
        /// Known options.
        options: Vec<EnumOption>,
    },
    /// Free text.
    Text,
}

impl ValueKind {
    /// Numeric kind with the given bounds.
    #[must_use]
    pub const fn number(min: f64, max: f64) -> Self {
        Self::Number { min, max }
    }

    /// Enum kind from `(raw, label)` pairs.
    #[must_use]
    pub fn options(pairs: &[(i64, &str)]) -> Self {
        Self::Enum {
            options: pairs
                .iter()
                .map(|(value, label)| EnumOption::new(*value, *label))
                .collect(),
        }
    }

    /// Returns a short name for error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Number { .. } => "number",
            Self::Enum { .. } => "enum",
            Self::Text => "text",
        }
    }

    /// Converts a raw wire value into a capability value.
    ///
    /// Returns `None` when the raw value cannot be interpreted (for example an
    /// enum value the table does not know); callers treat that as absent.
    #[must_use]
    pub fn decode(&self, raw: &Value) -> Option<CapabilityValue> {
        match self {
            Self::Bool => match raw {
                Value::Bool(b) => Some(CapabilityValue::Bool(*b)),
                Value::Number(n) => n.as_f64().map(|v| CapabilityValue::Bool(v != 0.0)),
                _ => None,
            },
            Self::Number { .. } => raw.as_f64().map(CapabilityValue::Number),
            Self::Enum { options } => {
                let raw = raw.as_i64()?;
                options
                    .iter()
                    .find(|o| o.value == raw)
                    .map(|o| CapabilityValue::Text(o.label.clone()))
            }
            Self::Text => match raw {
                Value::String(s) => Some(CapabilityValue::Text(s.clone())),
                Value::Null => None,
                other => Some(CapabilityValue::Text(other.to_string())),
            },
        }
    }

    /// Validates a capability value and converts it into a raw wire value.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] if the value has the wrong type, is out of range
    /// or names an unknown enum option.
    #[allow(clippy::cast_precision_loss)]
    pub fn encode(&self, property: &str, value: &CapabilityValue) -> Result<Value, ValueError> {
        let wrong_type = || ValueError::WrongType {
            property: property.to_string(),
            expected: self.name(),
        };

        match (self, value) {
            (Self::Bool, CapabilityValue::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Number { min, max }, CapabilityValue::Number(n)) => {
                if !n.is_finite() || n < min || n > max {
                    return Err(ValueError::OutOfRange {
                        min: *min,
                        max: *max,
                        actual: *n,
                    });
                }
                Ok(number_to_json(*n))
            }
            (Self::Enum { options }, CapabilityValue::Text(label)) => options
                .iter()
                .find(|o| o.label == *label)
                .map(|o| Value::from(o.value))
                .ok_or_else(|| ValueError::UnknownOption {
                    property: property.to_string(),
                    label: label.clone(),
                }),
            (Self::Enum { options }, CapabilityValue::Number(n)) => options
                .iter()
                .find(|o| (o.value as f64 - n).abs() < f64::EPSILON)
                .map(|o| Value::from(o.value))
                .ok_or_else(|| ValueError::UnknownOption {
                    property: property.to_string(),
                    label: n.to_string(),
                }),
            (Self::Text, CapabilityValue::Text(s)) => Ok(Value::String(s.clone())),
            _ => Err(wrong_type()),
        }
    }
}

/// Integral numbers go on the wire as integers; devices reject `1.0` for `1`.
#[allow(clippy::cast_possible_truncation)]
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}
