//! Variable values exposed by captured frames and produced by evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A language-neutral value.
///
/// Hosts map their runtime values onto these variants. Anything that has no
/// direct scalar equivalent is carried as [`Value::Object`] with its type name
/// and a printable representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value
{
    /// The absent value (`None` / `null`).
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// Any other host object.
    Object
    {
        /// Host type name.
        type_name: String,
        /// Printable representation.
        repr: String,
        /// Host truthiness, when the host knows it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        truthy: Option<bool>,
    },
}

impl Value
{
    /// Truthiness with the usual dynamic-language rules: `None`, `false`,
    /// zero and the empty string are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool
    {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Object { truthy, .. } => truthy.unwrap_or(true),
        }
    }

    /// Name of the value's type, as shown to the client.
    #[must_use]
    pub fn type_name(&self) -> &str
    {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Object { type_name, .. } => type_name,
        }
    }

    /// Representation with strings quoted, as a REPL would print it.
    #[must_use]
    pub fn repr(&self) -> String
    {
        match self {
            Self::Str(s) => format!("'{s}'"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => f.write_str(s),
            Self::Object { repr, .. } => f.write_str(repr),
        }
    }
}

impl From<bool> for Value
{
    fn from(value: bool) -> Self
    {
        Self::Bool(value)
    }
}

impl From<i64> for Value
{
    fn from(value: i64) -> Self
    {
        Self::Int(value)
    }
}

impl From<f64> for Value
{
    fn from(value: f64) -> Self
    {
        Self::Float(value)
    }
}

impl From<&str> for Value
{
    fn from(value: &str) -> Self
    {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value
{
    fn from(value: String) -> Self
    {
        Self::Str(value)
    }
}
