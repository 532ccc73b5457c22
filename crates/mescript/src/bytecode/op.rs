//! Opcode definitions for the bytecode VM.
//!
//! Bytecode is stored as raw `Vec<u8>`. The `Opcode` enum is a pure
//! discriminant with no data; operands follow in the byte stream and are
//! fetched separately.
//!
//! # Operand Encoding
//!
//! - 0 bytes: `Pop`, `Return`, `Nop`
//! - 1 byte (u8): `BinaryOp`, `UnaryOp`, `CallFunction`
//! - 2 bytes (u16/i16, little-endian): loads, stores, jumps

use strum::{Display, FromRepr};

/// Opcode discriminant - just identifies the instruction type.
///
/// With `#[repr(u8)]`, each opcode is exactly 1 byte. Uses `strum::FromRepr`
/// for efficient byte-to-opcode conversion (bounds check + transmute).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum Opcode {
    /// Discard top of stack.
    Pop,
    /// Push constant from pool. Operand: u16 const_id.
    LoadConst,
    /// Push from global slot. Operand: u16 slot.
    LoadGlobal,
    /// Pop and store to global slot. Operand: u16 slot.
    StoreGlobal,
    /// Push local variable. Operand: u16 slot.
    LoadLocal,
    /// Pop and store to local variable. Operand: u16 slot.
    StoreLocal,
    /// Pop rhs then lhs, apply operator, push result. Operand: u8 `BinOp`.
    BinaryOp,
    /// Pop operand, apply operator, push result. Operand: u8 `UnOp`.
    UnaryOp,
    /// Call with n positional args below the callee on the stack. Operand: u8 arg_count.
    CallFunction,
    /// Pop v and deliver it to the caller frame's stack, ending this frame.
    Return,
    /// Unconditional relative jump. Operand: i16 offset.
    Jump,
    /// Jump if TOS falsy, always pop. Operand: i16 offset.
    JumpIfFalse,
    /// Jump if TOS falsy (keep), else pop. Operand: i16 offset.
    JumpIfFalseOrPop,
    /// Jump if TOS truthy (keep), else pop. Operand: i16 offset.
    JumpIfTrueOrPop,
    /// No operation.
    Nop,
}

impl Opcode {
    /// Number of operand bytes following the opcode byte.
    pub fn operand_width(self) -> usize {
        match self {
            Opcode::Pop | Opcode::Return | Opcode::Nop => 0,
            Opcode::BinaryOp | Opcode::UnaryOp | Opcode::CallFunction => 1,
            Opcode::LoadConst
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::LoadLocal
            | Opcode::StoreLocal
            | Opcode::Jump
            | Opcode::JumpIfFalse
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop => 2,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when attempting to convert an invalid byte to an Opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcodeError(pub u8);

impl std::fmt::Display for InvalidOpcodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid opcode byte: {}", self.0)
    }
}

impl std::error::Error for InvalidOpcodeError {}

/// Binary operator, carried as the u8 operand of `Opcode::BinaryOp`.
///
/// Logical and/or are not here: they compile to short-circuit jumps.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

/// Unary operator, carried as the u8 operand of `Opcode::UnaryOp`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
pub enum UnOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "+")]
    Pos,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    Invert,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        // All opcodes from 0 to Nop (last opcode) convert to u8 and back.
        for byte in 0..=Opcode::Nop as u8 {
            let opcode = Opcode::try_from(byte).unwrap();
            assert_eq!(opcode as u8, byte, "opcode {opcode:?} has wrong discriminant");
        }
    }

    #[test]
    fn test_invalid_opcode() {
        // Byte just after the last valid opcode should fail.
        let result = Opcode::try_from(Opcode::Nop as u8 + 1);
        assert!(result.is_err());
        let result = Opcode::try_from(255u8);
        assert!(result.is_err());
    }

    #[test]
    fn test_opcode_size() {
        assert_eq!(std::mem::size_of::<Opcode>(), 1);
    }

    #[test]
    fn test_binop_roundtrip() {
        for byte in 0..=BinOp::Ge as u8 {
            let op = BinOp::from_repr(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert!(BinOp::from_repr(BinOp::Ge as u8 + 1).is_none());
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(BinOp::Add.to_string(), "+");
        assert_eq!(BinOp::Shl.to_string(), "<<");
        assert_eq!(UnOp::Invert.to_string(), "~");
    }
}
