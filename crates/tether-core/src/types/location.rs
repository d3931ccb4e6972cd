//! Source positions used as breakpoint keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(unit, line)` pair identifying one executable source line.
///
/// The unit is a path-like string supplied by the host. Backslash separators
/// are normalized to `/` on construction so that a breakpoint set from one
/// platform matches events reported from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation
{
    unit: String,
    line: u32,
}

impl SourceLocation
{
    /// Create a location, normalizing the unit separators.
    #[must_use]
    pub fn new(unit: impl AsRef<str>, line: u32) -> Self
    {
        Self {
            unit: normalize_unit(unit.as_ref()),
            line,
        }
    }

    /// The normalized source unit.
    #[must_use]
    pub fn unit(&self) -> &str
    {
        &self.unit
    }

    /// The 1-based line number.
    #[must_use]
    pub const fn line(&self) -> u32
    {
        self.line
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}:{}", self.unit, self.line)
    }
}

/// Normalize a unit identifier so lookups are separator-agnostic.
#[must_use]
pub fn normalize_unit(unit: &str) -> String
{
    unit.replace('\\', "/")
}
