//! Client attributes.
//!
//! A small typed key/value bag built once during the handshake and then
//! shared read-only with filters and hooks.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute access errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// No value is stored under the key.
    #[error("Attribute not found: {0}")]
    KeyNotFound(String),

    /// A value exists but holds a different kind.
    #[error("Attribute {key} is not a {expected}")]
    WrongType {
        /// The key that was looked up.
        key: String,
        /// The kind the caller asked for.
        expected: &'static str,
    },
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A boolean value.
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Typed attributes attached to a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Attributes {
    values: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    /// Create an empty attribute bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string value.
    #[must_use]
    pub fn set_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(key.into(), AttributeValue::String(value.into()));
        self
    }

    /// Store a boolean value.
    #[must_use]
    pub fn set_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.values.insert(key.into(), AttributeValue::Bool(value));
        self
    }

    /// Get a string value.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::KeyNotFound`] if the key is absent and
    /// [`AttributeError::WrongType`] if it holds a boolean.
    pub fn get_string(&self, key: &str) -> Result<&str, AttributeError> {
        match self.values.get(key) {
            Some(AttributeValue::String(s)) => Ok(s.as_str()),
            Some(_) => Err(AttributeError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
            None => Err(AttributeError::KeyNotFound(key.to_string())),
        }
    }

    /// Get a boolean value.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::KeyNotFound`] if the key is absent and
    /// [`AttributeError::WrongType`] if it holds a string.
    pub fn get_bool(&self, key: &str) -> Result<bool, AttributeError> {
        match self.values.get(key) {
            Some(AttributeValue::Bool(b)) => Ok(*b),
            Some(_) => Err(AttributeError::WrongType {
                key: key.to_string(),
                expected: "bool",
            }),
            None => Err(AttributeError::KeyNotFound(key.to_string())),
        }
    }

    /// Whether `key` holds the boolean `true`.
    #[must_use]
    pub fn is_flag_set(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(AttributeValue::Bool(true)))
    }

    /// Whether `key` holds exactly the string `value`.
    #[must_use]
    pub fn has_match(&self, key: &str, value: &str) -> bool {
        matches!(self.values.get(key), Some(AttributeValue::String(s)) if s == value)
    }

    /// Get the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    /// Iterate over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of stored attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no attributes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}
