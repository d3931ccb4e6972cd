//! The instruction-stream walker.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::trace;

use super::code::{CodeObject, Instruction};
use super::opcodes::{binary_dunder, compare_dunder, CallShape, OpcodeTable, StackEffect, STANDARD_OPCODES};

const UNNAMED_CALLABLE: &str = "<call>";

/// A call the user can choose to step into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTarget
{
    /// Name shown to the user (`foo`, `method`, `__add__`).
    pub display_name: String,
    /// Offset of the call (or operator) instruction.
    pub offset: u32,
    /// Source line of that instruction.
    pub line: u32,
    /// Whether execution already went past this instruction.
    pub already_visited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind
{
    Value,
    Null,
    Filler,
}

#[derive(Debug, Clone)]
struct Slot
{
    kind: SlotKind,
    name: Option<String>,
    start: u32,
}

impl Slot
{
    const fn value(name: Option<String>, start: u32) -> Self
    {
        Self { kind: SlotKind::Value, name, start }
    }

    const fn marker(kind: SlotKind, start: u32) -> Self
    {
        Self { kind, name: None, start }
    }
}

#[derive(Debug)]
struct Found
{
    key: u32,
    operator: bool,
    target: CallTarget,
}

struct Walker<'t>
{
    table: &'t OpcodeTable,
    start_line: u32,
    end_line: u32,
    current_offset: Option<u32>,
    stack: SmallVec<[Slot; 16]>,
    found: Vec<Found>,
}

/// Enumerate the call targets on `start_line..=end_line` of `code` using the
/// standard opcode table.
///
/// `current_offset` is the instruction the frame is executing; targets before
/// it are flagged `already_visited`.
#[must_use]
pub fn resolve(code: &CodeObject, start_line: u32, end_line: u32, current_offset: Option<u32>) -> Vec<CallTarget>
{
    resolve_with(&STANDARD_OPCODES, code, start_line, end_line, current_offset)
}

/// [`resolve`] with an explicit opcode table.
#[must_use]
pub fn resolve_with(
    table: &OpcodeTable,
    code: &CodeObject,
    start_line: u32,
    end_line: u32,
    current_offset: Option<u32>,
) -> Vec<CallTarget>
{
    let mut walker = Walker {
        table,
        start_line,
        end_line,
        current_offset,
        stack: SmallVec::new(),
        found: Vec::new(),
    };
    for (line, instruction) in code.lines() {
        walker.step(line, instruction);
    }

    let mut found = walker.found;
    found.sort_by_key(|f| (f.key, !f.operator, f.target.offset));

    let mut seen = Vec::with_capacity(found.len());
    let mut targets = Vec::with_capacity(found.len());
    for f in found {
        if !seen.contains(&f.target.offset) {
            seen.push(f.target.offset);
            targets.push(f.target);
        }
    }
    trace!(code = %code.name, start_line, end_line, count = targets.len(), "resolved smart step targets");
    targets
}

impl Walker<'_>
{
    fn pop(&mut self, at: u32) -> Slot
    {
        // Branches make the linear model drift; an empty stack is not an error.
        self.stack.pop().unwrap_or_else(|| Slot::value(None, at))
    }

    /// Pop up to `count` slots; missing slots count as starting at `at`.
    fn pop_n(&mut self, count: u32, at: u32) -> u32
    {
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        let keep = self.stack.len().saturating_sub(count);
        self.stack.drain(keep..).map(|slot| slot.start).fold(at, u32::min)
    }

    fn push(&mut self, slot: Slot)
    {
        self.stack.push(slot);
    }

    fn emit(&mut self, name: &str, key: u32, operator: bool, line: u32, offset: u32)
    {
        if line < self.start_line || line > self.end_line {
            return;
        }
        let already_visited = self.current_offset.is_some_and(|current| offset < current);
        self.found.push(Found {
            key,
            operator,
            target: CallTarget {
                display_name: name.to_string(),
                offset,
                line,
                already_visited,
            },
        });
    }

    fn step(&mut self, line: u32, instruction: &Instruction)
    {
        let at = instruction.offset;
        let arg = instruction.arg.unwrap_or(0);
        match self.table.effect(&instruction.opname) {
            StackEffect::Nop => {}
            StackEffect::Pop(count) => {
                self.pop_n(u32::from(count), at);
            }
            StackEffect::PushName => {
                if instruction.pushes_null() {
                    self.push(Slot::marker(SlotKind::Null, at));
                }
                self.push(Slot::value(symbol_name(instruction), at));
            }
            StackEffect::PushValue => self.push(Slot::value(None, at)),
            StackEffect::PushNull => self.push(Slot::marker(SlotKind::Null, at)),
            StackEffect::LoadAttr => {
                let owner = self.pop(at);
                self.push(Slot::value(symbol_name(instruction), owner.start));
                if instruction.pushes_null() {
                    self.push(Slot::marker(SlotKind::Filler, owner.start));
                }
            }
            StackEffect::LoadMethod => {
                let owner = self.pop(at);
                self.push(Slot::value(symbol_name(instruction), owner.start));
                self.push(Slot::marker(SlotKind::Filler, owner.start));
            }
            StackEffect::Dup => {
                let top = self.stack.last().cloned().unwrap_or_else(|| Slot::value(None, at));
                self.push(top);
            }
            StackEffect::Build { per_item, extra } => {
                let count = arg.saturating_mul(u32::from(per_item)).saturating_add(u32::from(extra));
                let start = self.pop_n(count, at);
                self.push(Slot::value(None, start));
            }
            StackEffect::Unary(dunder) => {
                let operand = self.pop(at);
                if let Some(dunder) = dunder {
                    self.emit(dunder, operand.start, true, line, at);
                }
                self.push(Slot::value(None, operand.start));
            }
            StackEffect::Binary(dunder) => self.binary(dunder, line, at),
            StackEffect::BinaryBySymbol => {
                let dunder = instruction.argrepr.as_deref().or(instruction.argval.as_deref()).and_then(binary_dunder);
                self.binary(dunder, line, at);
            }
            StackEffect::CompareBySymbol => {
                let dunder = instruction.argrepr.as_deref().or(instruction.argval.as_deref()).and_then(compare_dunder);
                self.binary(dunder, line, at);
            }
            StackEffect::Call(shape) => self.call(shape, arg, line, at),
        }
    }

    fn binary(&mut self, dunder: Option<&'static str>, line: u32, at: u32)
    {
        let right = self.pop(at);
        let left = self.pop(at);
        if let Some(dunder) = dunder {
            self.emit(dunder, right.start, true, line, at);
        }
        self.push(Slot::value(None, left.start.min(right.start)));
    }

    fn call(&mut self, shape: CallShape, arg: u32, line: u32, at: u32)
    {
        let (callable, start) = match shape {
            CallShape::Single { extra } => {
                self.pop_n(u32::from(extra).saturating_add(arg), at);
                let callable = self.pop(at);
                let start = callable.start;
                (callable, start)
            }
            CallShape::Paired { extra } => {
                self.pop_n(u32::from(extra).saturating_add(arg), at);
                let upper = self.pop(at);
                let lower = self.pop(at);
                let start = lower.start.min(upper.start);
                let callable = if lower.kind == SlotKind::Value { lower } else { upper };
                (callable, start)
            }
            CallShape::Unpacked => {
                self.pop_n(1 + (arg & 1), at);
                let callable = self.pop(at);
                let mut start = callable.start;
                if self.stack.last().is_some_and(|slot| slot.kind == SlotKind::Null) {
                    start = start.min(self.pop(at).start);
                }
                (callable, start)
            }
        };
        let name = callable.name.as_deref().unwrap_or(UNNAMED_CALLABLE);
        self.emit(name, callable.start, false, line, at);
        self.push(Slot::value(None, start));
    }
}

/// Name carried by a load, with any `NULL` annotation stripped.
fn symbol_name(instruction: &Instruction) -> Option<String>
{
    if let Some(argval) = &instruction.argval {
        return Some(argval.clone());
    }
    let repr = instruction.argrepr.as_deref()?;
    let name = repr
        .split(" + ")
        .find(|part| !part.starts_with("NULL"))
        .unwrap_or(repr)
        .trim();
    Some(name.to_string())
}
