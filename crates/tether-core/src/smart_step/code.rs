//! Instruction-stream model of a code object.

use serde::{Deserialize, Serialize};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction
{
    /// Byte offset within the code object.
    pub offset: u32,
    /// Opcode name, e.g. `CALL_FUNCTION` or `BINARY_OP`.
    pub opname: String,
    /// Raw numeric argument.
    #[serde(default)]
    pub arg: Option<u32>,
    /// Resolved argument (a name for loads, a constant for `LOAD_CONST`).
    #[serde(default)]
    pub argval: Option<String>,
    /// Human-readable argument as a disassembler prints it.
    ///
    /// Newer instruction sets encode whether a load also pushes a `NULL`
    /// marker here (`NULL + print`), and `BINARY_OP` / `COMPARE_OP` carry
    /// their operator symbol.
    #[serde(default)]
    pub argrepr: Option<String>,
    /// Source line, set on the first instruction of each line.
    #[serde(default)]
    pub line: Option<u32>,
}

impl Instruction
{
    /// Create an instruction with no argument.
    #[must_use]
    pub fn new(offset: u32, opname: impl Into<String>) -> Self
    {
        Self {
            offset,
            opname: opname.into(),
            arg: None,
            argval: None,
            argrepr: None,
            line: None,
        }
    }

    /// Set the numeric argument.
    #[must_use]
    pub const fn with_arg(mut self, arg: u32) -> Self
    {
        self.arg = Some(arg);
        self
    }

    /// Set the resolved argument.
    #[must_use]
    pub fn with_argval(mut self, argval: impl Into<String>) -> Self
    {
        self.argval = Some(argval.into());
        self
    }

    /// Set the printed argument.
    #[must_use]
    pub fn with_argrepr(mut self, argrepr: impl Into<String>) -> Self
    {
        self.argrepr = Some(argrepr.into());
        self
    }

    /// Mark the instruction as the start of `line`.
    #[must_use]
    pub const fn starts_line(mut self, line: u32) -> Self
    {
        self.line = Some(line);
        self
    }

    /// The symbolic argument: `argval` when present, `argrepr` otherwise.
    #[must_use]
    pub fn symbol(&self) -> Option<&str>
    {
        self.argval.as_deref().or(self.argrepr.as_deref())
    }

    /// Whether the printed argument says the load also pushes a `NULL`.
    #[must_use]
    pub fn pushes_null(&self) -> bool
    {
        self.argrepr.as_deref().is_some_and(|repr| repr.contains("NULL"))
    }
}

/// A compiled function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeObject
{
    /// Function name.
    pub name: String,
    /// Source unit the code was compiled from.
    pub unit: String,
    /// First line of the definition.
    pub first_line: u32,
    /// Instructions in offset order.
    pub instructions: Vec<Instruction>,
}

impl CodeObject
{
    /// Create a code object.
    #[must_use]
    pub fn new(name: impl Into<String>, unit: impl Into<String>, first_line: u32, instructions: Vec<Instruction>) -> Self
    {
        Self {
            name: name.into(),
            unit: unit.into(),
            first_line,
            instructions,
        }
    }

    /// Instructions paired with the source line they belong to.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &Instruction)>
    {
        let mut current = self.first_line;
        self.instructions.iter().map(move |instruction| {
            if let Some(line) = instruction.line {
                current = line;
            }
            (current, instruction)
        })
    }
}
