//! Captured stack frames.
//!
//! A [`Frame`] is a snapshot: the host builds the chain (callee first) when a
//! thread suspends or a condition needs evaluating, and nothing mutates it
//! afterwards apart from the id assignment done by the dispatcher before the
//! chain is published.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::smart_step::CodeObject;
use crate::types::Value;

/// Session-unique identifier of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(u64);

impl FrameId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for FrameId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// One activation record, linked to its caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame
{
    /// Identifier assigned when the frame was published.
    pub id: FrameId,
    /// Source unit of the executing code.
    pub unit: String,
    /// Current line.
    pub line: u32,
    /// Function (code object) name.
    pub function: String,
    /// Offset of the instruction being executed, if the host knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_offset: Option<u32>,
    /// Local variables.
    #[serde(default)]
    pub locals: BTreeMap<String, Value>,
    /// Global variables visible to the frame.
    #[serde(default)]
    pub globals: BTreeMap<String, Value>,
    /// Code object, when the host exposes its instruction stream.
    #[serde(skip)]
    pub code: Option<Arc<CodeObject>>,
    /// Calling frame.
    #[serde(skip)]
    pub parent: Option<Box<Frame>>,
}

impl Frame
{
    /// Create a frame without variables or parent.
    #[must_use]
    pub fn new(unit: impl Into<String>, line: u32, function: impl Into<String>) -> Self
    {
        Self {
            unit: unit.into(),
            line,
            function: function.into(),
            ..Self::default()
        }
    }

    /// Attach a local variable.
    #[must_use]
    pub fn with_local(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self
    {
        self.locals.insert(name.into(), value.into());
        self
    }

    /// Attach a global variable.
    #[must_use]
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self
    {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Attach the calling frame.
    #[must_use]
    pub fn with_parent(mut self, parent: Frame) -> Self
    {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Walk the chain from this frame to the outermost caller.
    pub fn chain(&self) -> impl Iterator<Item = &Frame>
    {
        std::iter::successors(Some(self), |frame| frame.parent.as_deref())
    }

    /// Find a frame in the chain by id.
    #[must_use]
    pub fn find(&self, id: FrameId) -> Option<&Frame>
    {
        self.chain().find(|frame| frame.id == id)
    }

    /// Number of frames in the chain.
    #[must_use]
    pub fn depth(&self) -> usize
    {
        self.chain().count()
    }

    /// Look a name up the way an expression would: locals first, then globals.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Value>
    {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    /// Assign ids to every frame of the chain, callee first.
    pub fn assign_ids(&mut self, mut next: impl FnMut() -> FrameId)
    {
        let mut current = Some(self);
        while let Some(frame) = current {
            frame.id = next();
            current = frame.parent.as_deref_mut();
        }
    }
}
