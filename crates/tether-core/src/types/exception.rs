//! Raised-exception description supplied by the host.

use serde::{Deserialize, Serialize};

/// A raised exception as seen by the instrumentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo
{
    /// Identity of the exception object, stable while it propagates.
    pub id: u64,
    /// Qualified name of the raised type.
    pub type_name: String,
    /// Supertypes, most derived first. May or may not repeat `type_name`.
    #[serde(default)]
    pub mro: Vec<String>,
    /// Printable message.
    #[serde(default)]
    pub message: String,
}

impl ExceptionInfo
{
    /// Create an exception description.
    #[must_use]
    pub fn new(id: u64, type_name: impl Into<String>, mro: Vec<String>, message: impl Into<String>) -> Self
    {
        Self {
            id,
            type_name: type_name.into(),
            mro,
            message: message.into(),
        }
    }

    /// The raised type followed by its supertypes, most derived first, without
    /// duplicates.
    pub fn lineage(&self) -> impl Iterator<Item = &str>
    {
        let skip_first = self.mro.first().is_some_and(|first| *first == self.type_name);
        std::iter::once(self.type_name.as_str()).chain(self.mro.iter().skip(usize::from(skip_first)).map(String::as_str))
    }
}
