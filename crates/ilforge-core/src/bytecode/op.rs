//! Default instruction vocabulary: a small stack machine in the spirit of CIL.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub(crate) const OP_NOP: u8 = 0x00;
pub(crate) const OP_LDARG: u8 = 0x0E;
pub(crate) const OP_LDC_I4: u8 = 0x20;
pub(crate) const OP_LDC_I8: u8 = 0x21;
pub(crate) const OP_LDC_R8: u8 = 0x23;
pub(crate) const OP_DUP: u8 = 0x25;
pub(crate) const OP_POP: u8 = 0x26;
pub(crate) const OP_RET: u8 = 0x2A;
pub(crate) const OP_BR: u8 = 0x38;
pub(crate) const OP_BRFALSE: u8 = 0x39;
pub(crate) const OP_BRTRUE: u8 = 0x3A;
pub(crate) const OP_ADD: u8 = 0x58;
pub(crate) const OP_SUB: u8 = 0x59;
pub(crate) const OP_MUL: u8 = 0x5A;
pub(crate) const OP_NEG: u8 = 0x65;
pub(crate) const OP_CONV_I4: u8 = 0x69;
pub(crate) const OP_CONV_I8: u8 = 0x6A;
pub(crate) const OP_CONV_R8: u8 = 0x6C;
pub(crate) const OP_LDSTR: u8 = 0x72;
pub(crate) const OP_LDBOOL: u8 = 0xE0;
pub(crate) const OP_CEQ: u8 = 0xE1;
pub(crate) const OP_CGT: u8 = 0xE2;
pub(crate) const OP_CLT: u8 = 0xE3;
pub(crate) const OP_CONCAT: u8 = 0xE4;

/// Types a value can take on the evaluation stack or in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValueType {
    /// No value; only legal as a return type.
    Void,
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit float.
    F64,
    /// UTF-8 string.
    Str,
}

impl ValueType {
    /// Every type, in encoding order.
    pub const ALL: [Self; 6] = [Self::Void, Self::Bool, Self::I32, Self::I64, Self::F64, Self::Str];

    /// Stable one-byte encoding.
    pub const fn code(self) -> u8 {
        match self {
            Self::Void => 0,
            Self::Bool => 1,
            Self::I32 => 2,
            Self::I64 => 3,
            Self::F64 => 4,
            Self::Str => 5,
        }
    }

    /// Inverse of [`ValueType::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Void),
            1 => Some(Self::Bool),
            2 => Some(Self::I32),
            3 => Some(Self::I64),
            4 => Some(Self::F64),
            5 => Some(Self::Str),
            _ => None,
        }
    }

    /// Short lowercase name used by the assembler and diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Str => "str",
        }
    }

    /// `i32`, `i64` or `f64`.
    pub const fn is_numeric(self) -> bool { matches!(self, Self::I32 | Self::I64 | Self::F64) }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "void" => Ok(Self::Void),
            "bool" => Ok(Self::Bool),
            "i32" | "int" => Ok(Self::I32),
            "i64" | "long" => Ok(Self::I64),
            "f64" | "double" => Ok(Self::F64),
            "str" | "string" => Ok(Self::Str),
            other => Err(format!("unknown value type `{other}`")),
        }
    }
}

/// Branch target allocated by a method's stream; bound by `mark_label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Label(u32);

impl Label {
    /// Wraps a raw label index.
    pub const fn from_index(ix: u32) -> Self { Self(ix) }
    /// Raw label index inside its stream.
    pub const fn index(self) -> u32 { self.0 }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "L{}", self.0) }
}

/// One instruction with its inline operand.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Op {
    /// Does nothing.
    Nop,
    /// Push argument `n`.
    Ldarg(u16),
    /// Push an `i32` constant.
    LdcI4(i32),
    /// Push an `i64` constant.
    LdcI8(i64),
    /// Push an `f64` constant.
    LdcR8(f64),
    /// Push a `bool` constant.
    LdBool(bool),
    /// Push a string constant.
    LdStr(String),
    /// Duplicate the top of the stack.
    Dup,
    /// Discard the top of the stack.
    Pop,
    /// Numeric addition (wrapping on integers).
    Add,
    /// Numeric subtraction (wrapping on integers).
    Sub,
    /// Numeric multiplication (wrapping on integers).
    Mul,
    /// Numeric negation.
    Neg,
    /// Equality of two values of the same type, pushes `bool`.
    Ceq,
    /// Greater-than on two numbers of the same type, pushes `bool`.
    Cgt,
    /// Less-than on two numbers of the same type, pushes `bool`.
    Clt,
    /// Convert a number to `i32` (truncating).
    ConvI4,
    /// Convert a number to `i64`.
    ConvI8,
    /// Convert a number to `f64`.
    ConvR8,
    /// Concatenate two strings.
    Concat,
    /// Unconditional branch.
    Br(Label),
    /// Branch when the popped condition is true / non-zero.
    BrTrue(Label),
    /// Branch when the popped condition is false / zero.
    BrFalse(Label),
    /// Return from the method.
    Ret,
}

impl Op {
    /// Opcode byte used by the binary encoding.
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::Nop => OP_NOP,
            Self::Ldarg(_) => OP_LDARG,
            Self::LdcI4(_) => OP_LDC_I4,
            Self::LdcI8(_) => OP_LDC_I8,
            Self::LdcR8(_) => OP_LDC_R8,
            Self::LdBool(_) => OP_LDBOOL,
            Self::LdStr(_) => OP_LDSTR,
            Self::Dup => OP_DUP,
            Self::Pop => OP_POP,
            Self::Add => OP_ADD,
            Self::Sub => OP_SUB,
            Self::Mul => OP_MUL,
            Self::Neg => OP_NEG,
            Self::Ceq => OP_CEQ,
            Self::Cgt => OP_CGT,
            Self::Clt => OP_CLT,
            Self::ConvI4 => OP_CONV_I4,
            Self::ConvI8 => OP_CONV_I8,
            Self::ConvR8 => OP_CONV_R8,
            Self::Concat => OP_CONCAT,
            Self::Br(_) => OP_BR,
            Self::BrTrue(_) => OP_BRTRUE,
            Self::BrFalse(_) => OP_BRFALSE,
            Self::Ret => OP_RET,
        }
    }

    /// Assembler mnemonic.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Ldarg(_) => "ldarg",
            Self::LdcI4(_) => "ldc.i4",
            Self::LdcI8(_) => "ldc.i8",
            Self::LdcR8(_) => "ldc.r8",
            Self::LdBool(_) => "ldbool",
            Self::LdStr(_) => "ldstr",
            Self::Dup => "dup",
            Self::Pop => "pop",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Neg => "neg",
            Self::Ceq => "ceq",
            Self::Cgt => "cgt",
            Self::Clt => "clt",
            Self::ConvI4 => "conv.i4",
            Self::ConvI8 => "conv.i8",
            Self::ConvR8 => "conv.r8",
            Self::Concat => "concat",
            Self::Br(_) => "br",
            Self::BrTrue(_) => "brtrue",
            Self::BrFalse(_) => "brfalse",
            Self::Ret => "ret",
        }
    }

    /// Target label for branch instructions.
    pub const fn branch_target(&self) -> Option<Label> {
        match self {
            Self::Br(l) | Self::BrTrue(l) | Self::BrFalse(l) => Some(*l),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Self::Ldarg(n) => write!(f, "{m} {n}"),
            Self::LdcI4(v) => write!(f, "{m} {v}"),
            Self::LdcI8(v) => write!(f, "{m} {v}"),
            Self::LdcR8(v) => write!(f, "{m} {v:?}"),
            Self::LdBool(b) => write!(f, "{m} {b}"),
            Self::LdStr(s) => write!(f, "{m} {s:?}"),
            Self::Br(l) | Self::BrTrue(l) | Self::BrFalse(l) => write!(f, "{m} {l}"),
            _ => f.write_str(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_codes_are_stable() {
        for ty in ValueType::ALL {
            assert_eq!(ValueType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ValueType::from_code(42), None);
    }

    #[test]
    fn value_type_parses_aliases() {
        assert_eq!("int".parse::<ValueType>(), Ok(ValueType::I32));
        assert_eq!("String".parse::<ValueType>(), Ok(ValueType::Str));
        assert!("object".parse::<ValueType>().is_err());
    }

    #[test]
    fn display_matches_assembler_syntax() {
        assert_eq!(Op::LdStr("hi".into()).to_string(), "ldstr \"hi\"");
        assert_eq!(Op::BrTrue(Label::from_index(3)).to_string(), "brtrue L3");
        assert_eq!(Op::LdcR8(1.0).to_string(), "ldc.r8 1.0");
        assert_eq!(Op::Ret.to_string(), "ret");
    }
}
