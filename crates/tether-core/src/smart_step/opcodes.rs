//! Opcode behaviour table for the smart-step walker.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Shape of a call instruction's operands, top of stack last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape
{
    /// `[callable, args..., extra...]`: one slot below the `arg` arguments.
    Single
    {
        /// Fixed slots above the arguments (a keyword-names tuple).
        extra: u8,
    },
    /// `[callable|NULL, self|callable, args..., extra...]`: two slots below the
    /// arguments, one of which is the callable.
    Paired
    {
        /// Fixed slots above the arguments.
        extra: u8,
    },
    /// `[NULL?, callable, args_tuple, kwargs?]`: keyword mapping present when
    /// bit 0 of the argument is set.
    Unpacked,
}

/// What an opcode does to the modelled value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect
{
    /// No stack effect worth modelling.
    Nop,
    /// Pops a fixed number of slots.
    Pop(u8),
    /// Pushes a named value; also pushes a `NULL` below it when the printed
    /// argument says so.
    PushName,
    /// Pushes an unnamed value. Unknown opcodes get this effect.
    PushValue,
    /// Pushes a `NULL` marker.
    PushNull,
    /// Pops an owner and pushes one of its attributes, or a method pair when
    /// the printed argument mentions `NULL`.
    LoadAttr,
    /// Pops an owner and pushes a method pair.
    LoadMethod,
    /// Duplicates the top slot.
    Dup,
    /// Pops `arg * per_item + extra` slots and pushes one.
    Build
    {
        /// Slots consumed per counted item.
        per_item: u8,
        /// Slots consumed regardless of the count.
        extra: u8,
    },
    /// Pops one operand and pushes a result, optionally as a call target.
    Unary(Option<&'static str>),
    /// Pops two operands and pushes a result, optionally as a call target.
    Binary(Option<&'static str>),
    /// Like [`StackEffect::Binary`], with the dunder chosen by the printed
    /// operator symbol (`BINARY_OP`).
    BinaryBySymbol,
    /// Like [`StackEffect::Binary`], with the dunder chosen by the printed
    /// comparison (`COMPARE_OP`).
    CompareBySymbol,
    /// A call.
    Call(CallShape),
}

/// Mapping from opcode name to [`StackEffect`].
#[derive(Debug, Clone, Default)]
pub struct OpcodeTable
{
    effects: HashMap<String, StackEffect>,
}

impl OpcodeTable
{
    /// Create an empty table. Every opcode looks unknown.
    #[must_use]
    pub fn empty() -> Self
    {
        Self::default()
    }

    /// Table covering the classic (`CALL_FUNCTION`, `BINARY_ADD`, ...) and the
    /// newer (`CALL`, `PUSH_NULL`, `BINARY_OP`, ...) instruction families.
    ///
    /// The two families share no opcode with conflicting meaning; where the
    /// stack effect depends on a flag bit (`LOAD_GLOBAL`, `LOAD_ATTR`) the
    /// walker reads the printed argument instead of the raw bit.
    #[must_use]
    pub fn standard() -> Self
    {
        let mut table = Self::empty();

        for name in [
            "LOAD_NAME",
            "LOAD_GLOBAL",
            "LOAD_FAST",
            "LOAD_FAST_CHECK",
            "LOAD_FAST_AND_CLEAR",
            "LOAD_DEREF",
            "LOAD_CLASSDEREF",
            "LOAD_CLOSURE",
            "LOAD_BUILD_CLASS",
        ] {
            table.insert(name, StackEffect::PushName);
        }
        table.insert("LOAD_CONST", StackEffect::PushValue);
        table.insert("LOAD_ASSERTION_ERROR", StackEffect::PushValue);
        table.insert("PUSH_NULL", StackEffect::PushNull);
        table.insert("LOAD_ATTR", StackEffect::LoadAttr);
        table.insert("LOAD_METHOD", StackEffect::LoadMethod);
        table.insert("DUP_TOP", StackEffect::Dup);
        table.insert("COPY", StackEffect::Dup);

        for name in [
            "NOP",
            "RESUME",
            "CACHE",
            "EXTENDED_ARG",
            "PRECALL",
            "KW_NAMES",
            "JUMP_FORWARD",
            "JUMP_BACKWARD",
            "JUMP_ABSOLUTE",
            "JUMP_BACKWARD_NO_INTERRUPT",
            "SETUP_FINALLY",
            "POP_BLOCK",
            "ROT_TWO",
            "ROT_THREE",
            "ROT_FOUR",
            "SWAP",
            "RETURN_CONST",
            "DELETE_NAME",
            "DELETE_FAST",
            "DELETE_GLOBAL",
            "DELETE_DEREF",
            "MAKE_CELL",
            "COPY_FREE_VARS",
        ] {
            table.insert(name, StackEffect::Nop);
        }

        for name in [
            "POP_TOP",
            "RETURN_VALUE",
            "STORE_NAME",
            "STORE_FAST",
            "STORE_GLOBAL",
            "STORE_DEREF",
            "DELETE_ATTR",
            "POP_JUMP_IF_FALSE",
            "POP_JUMP_IF_TRUE",
            "POP_JUMP_IF_NONE",
            "POP_JUMP_IF_NOT_NONE",
            "POP_JUMP_FORWARD_IF_FALSE",
            "POP_JUMP_FORWARD_IF_TRUE",
            "POP_JUMP_BACKWARD_IF_FALSE",
            "POP_JUMP_BACKWARD_IF_TRUE",
            "JUMP_IF_FALSE_OR_POP",
            "JUMP_IF_TRUE_OR_POP",
            "LIST_APPEND",
            "SET_ADD",
            "LIST_EXTEND",
            "SET_UPDATE",
            "DICT_UPDATE",
            "DICT_MERGE",
            "YIELD_VALUE",
        ] {
            table.insert(name, StackEffect::Pop(1));
        }
        table.insert("STORE_ATTR", StackEffect::Pop(2));
        table.insert("DELETE_SUBSCR", StackEffect::Pop(2));
        table.insert("MAP_ADD", StackEffect::Pop(2));
        table.insert("STORE_SUBSCR", StackEffect::Pop(3));

        for name in ["BUILD_TUPLE", "BUILD_LIST", "BUILD_SET", "BUILD_STRING", "BUILD_SLICE"] {
            table.insert(name, StackEffect::Build { per_item: 1, extra: 0 });
        }
        table.insert("BUILD_MAP", StackEffect::Build { per_item: 2, extra: 0 });
        table.insert("BUILD_CONST_KEY_MAP", StackEffect::Build { per_item: 1, extra: 1 });
        table.insert("BINARY_SLICE", StackEffect::Build { per_item: 0, extra: 3 });

        for name in ["UNARY_NOT", "GET_ITER", "GET_LEN", "FORMAT_VALUE", "FORMAT_SIMPLE", "TO_BOOL", "CALL_INTRINSIC_1"] {
            table.insert(name, StackEffect::Unary(None));
        }
        table.insert("UNARY_NEGATIVE", StackEffect::Unary(Some("__neg__")));
        table.insert("UNARY_POSITIVE", StackEffect::Unary(Some("__pos__")));
        table.insert("UNARY_INVERT", StackEffect::Unary(Some("__invert__")));

        for (name, dunder) in [
            ("BINARY_ADD", "__add__"),
            ("BINARY_SUBTRACT", "__sub__"),
            ("BINARY_MULTIPLY", "__mul__"),
            ("BINARY_TRUE_DIVIDE", "__truediv__"),
            ("BINARY_FLOOR_DIVIDE", "__floordiv__"),
            ("BINARY_MODULO", "__mod__"),
            ("BINARY_POWER", "__pow__"),
            ("BINARY_MATRIX_MULTIPLY", "__matmul__"),
            ("BINARY_LSHIFT", "__lshift__"),
            ("BINARY_RSHIFT", "__rshift__"),
            ("BINARY_AND", "__and__"),
            ("BINARY_OR", "__or__"),
            ("BINARY_XOR", "__xor__"),
            ("BINARY_SUBSCR", "__getitem__"),
            ("INPLACE_ADD", "__iadd__"),
            ("INPLACE_SUBTRACT", "__isub__"),
            ("INPLACE_MULTIPLY", "__imul__"),
            ("INPLACE_TRUE_DIVIDE", "__itruediv__"),
            ("INPLACE_FLOOR_DIVIDE", "__ifloordiv__"),
            ("INPLACE_MODULO", "__imod__"),
            ("INPLACE_POWER", "__ipow__"),
            ("INPLACE_MATRIX_MULTIPLY", "__imatmul__"),
            ("INPLACE_LSHIFT", "__ilshift__"),
            ("INPLACE_RSHIFT", "__irshift__"),
            ("INPLACE_AND", "__iand__"),
            ("INPLACE_OR", "__ior__"),
            ("INPLACE_XOR", "__ixor__"),
            ("CONTAINS_OP", "__contains__"),
        ] {
            table.insert(name, StackEffect::Binary(Some(dunder)));
        }
        table.insert("IS_OP", StackEffect::Binary(None));
        table.insert("BINARY_OP", StackEffect::BinaryBySymbol);
        table.insert("COMPARE_OP", StackEffect::CompareBySymbol);

        table.insert("CALL_FUNCTION", StackEffect::Call(CallShape::Single { extra: 0 }));
        table.insert("CALL_FUNCTION_KW", StackEffect::Call(CallShape::Single { extra: 1 }));
        table.insert("CALL_FUNCTION_EX", StackEffect::Call(CallShape::Unpacked));
        table.insert("CALL_METHOD", StackEffect::Call(CallShape::Paired { extra: 0 }));
        table.insert("CALL", StackEffect::Call(CallShape::Paired { extra: 0 }));
        table.insert("CALL_KW", StackEffect::Call(CallShape::Paired { extra: 1 }));

        table
    }

    /// Set the effect of one opcode, replacing any previous entry.
    pub fn insert(&mut self, opname: impl Into<String>, effect: StackEffect)
    {
        self.effects.insert(opname.into(), effect);
    }

    /// Builder-style [`OpcodeTable::insert`].
    #[must_use]
    pub fn with(mut self, opname: impl Into<String>, effect: StackEffect) -> Self
    {
        self.insert(opname, effect);
        self
    }

    /// Effect of `opname`; unknown opcodes push an unnamed value.
    #[must_use]
    pub fn effect(&self, opname: &str) -> StackEffect
    {
        self.effects.get(opname).copied().unwrap_or(StackEffect::PushValue)
    }

    /// Whether the table has an entry for `opname`.
    #[must_use]
    pub fn knows(&self, opname: &str) -> bool
    {
        self.effects.contains_key(opname)
    }
}

/// Shared instance of [`OpcodeTable::standard`].
pub static STANDARD_OPCODES: Lazy<OpcodeTable> = Lazy::new(OpcodeTable::standard);

/// Dunder method for a binary operator symbol; in-place forms end in `=`.
#[must_use]
pub fn binary_dunder(symbol: &str) -> Option<&'static str>
{
    let dunder = match symbol.trim() {
        "+" => "__add__",
        "-" => "__sub__",
        "*" => "__mul__",
        "/" => "__truediv__",
        "//" => "__floordiv__",
        "%" => "__mod__",
        "**" => "__pow__",
        "@" => "__matmul__",
        "<<" => "__lshift__",
        ">>" => "__rshift__",
        "&" => "__and__",
        "|" => "__or__",
        "^" => "__xor__",
        "+=" => "__iadd__",
        "-=" => "__isub__",
        "*=" => "__imul__",
        "/=" => "__itruediv__",
        "//=" => "__ifloordiv__",
        "%=" => "__imod__",
        "**=" => "__ipow__",
        "@=" => "__imatmul__",
        "<<=" => "__ilshift__",
        ">>=" => "__irshift__",
        "&=" => "__iand__",
        "|=" => "__ior__",
        "^=" => "__ixor__",
        "[]" => "__getitem__",
        _ => return None,
    };
    Some(dunder)
}

/// Dunder method for a comparison symbol. Accepts the `bool(<)` spelling
/// some disassemblers print.
#[must_use]
pub fn compare_dunder(symbol: &str) -> Option<&'static str>
{
    let symbol = symbol.trim();
    let symbol = symbol
        .strip_prefix("bool(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(symbol);
    let dunder = match symbol {
        "<" => "__lt__",
        "<=" => "__le__",
        "==" => "__eq__",
        "!=" => "__ne__",
        ">" => "__gt__",
        ">=" => "__ge__",
        _ => return None,
    };
    Some(dunder)
}
