//! # Smart Step Into
//!
//! Static discovery of the call targets on a range of source lines, so a
//! client can pick which call to step into when a line makes several.
//!
//! ## How it works
//!
//! [`resolve`] walks a code object's instruction stream once, keeping a small
//! model of the runtime value stack. Every slot remembers the offset of the
//! first instruction that contributed to it, which gives each value a source
//! position. Call-shaped instructions pop their arguments and callable and
//! emit a target keyed by the call instruction's own offset; operators with a
//! dunder mapping emit synthetic targets (`/` becomes `__truediv__`).
//!
//! Targets come back in source order: a call is positioned at its callable,
//! an operator at its right operand (ahead of any calls inside that operand).
//! For `a() + b()` that yields `a`, `__add__`, `b`.
//!
//! ## Instruction sets
//!
//! The walker never matches on opcode names itself. Everything it knows about
//! an opcode comes from an [`OpcodeTable`], so supporting another instruction
//! set means supplying another table.

mod code;
mod opcodes;
mod resolver;

pub use code::{CodeObject, Instruction};
pub use opcodes::{binary_dunder, compare_dunder, CallShape, OpcodeTable, StackEffect, STANDARD_OPCODES};
pub use resolver::{resolve, resolve_with, CallTarget};
