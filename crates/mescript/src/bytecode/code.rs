//! Compiled code objects.
//!
//! A [`CodeObject`] is a flat byte buffer plus its constant pool and line
//! table. Constants are plain data; the VM materializes heap values (such as
//! strings) when it loads them. Index 0 of every pool is the `none` constant.
//!
//! The line table uses the classic run-length encoding: pairs of
//! `(byte-offset delta, line delta)` with 255-chaining when either delta
//! exceeds a byte.

use std::fmt::{self, Write};

use crate::bytecode::op::{BinOp, Opcode, UnOp};
use crate::error::CompileError;
use crate::value::FunctionId;

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    None,
    Long(i64),
    Float(f64),
    Str(String),
    Function(FunctionId),
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::None => write!(f, "none"),
            Const::Long(n) => write!(f, "{n}"),
            Const::Float(x) => write!(f, "{x:?}"),
            Const::Str(s) => write!(f, "{s:?}"),
            Const::Function(id) => write!(f, "<function #{id}>"),
        }
    }
}

/// A compiled function: metadata plus its body's code object.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    pub code: CodeObject,
}

/// Immutable compiled code for one module or function body.
#[derive(Debug)]
pub struct CodeObject {
    pub name: String,
    bytecode: Vec<u8>,
    consts: Vec<Const>,
    /// Local slot count; parameters occupy the first slots.
    pub num_locals: usize,
    /// Local names in slot order, for diagnostics.
    pub local_names: Vec<String>,
    lnotab: Vec<u8>,
    first_line: u32,
}

impl CodeObject {
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn const_at(&self, idx: u16) -> Option<&Const> {
        self.consts.get(usize::from(idx))
    }

    /// Source line of the instruction starting at `offset`.
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        let mut line = self.first_line;
        let mut at = 0usize;
        for pair in self.lnotab.chunks_exact(2) {
            at += usize::from(pair[0]);
            if at > offset {
                break;
            }
            line += u32::from(pair[1]);
        }
        line
    }

    /// Human-readable instruction listing with resolved jump targets.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.name);
        let mut ip = 0usize;
        let code = &self.bytecode;
        while ip < code.len() {
            let offset = ip;
            let line = self.line_for_offset(offset);
            let byte = code[ip];
            ip += 1;
            let Ok(op) = Opcode::try_from(byte) else {
                let _ = writeln!(out, "{offset:>5} {line:>4}  <invalid byte {byte}>");
                continue;
            };
            let _ = write!(out, "{offset:>5} {line:>4}  {op:<18?}");
            match op.operand_width() {
                0 => {}
                1 => {
                    let operand = code.get(ip).copied().unwrap_or(0);
                    ip += 1;
                    match op {
                        Opcode::BinaryOp => match BinOp::from_repr(operand) {
                            Some(b) => {
                                let _ = write!(out, "{b}");
                            }
                            None => {
                                let _ = write!(out, "<invalid op {operand}>");
                            }
                        },
                        Opcode::UnaryOp => match UnOp::from_repr(operand) {
                            Some(u) => {
                                let _ = write!(out, "{u}");
                            }
                            None => {
                                let _ = write!(out, "<invalid op {operand}>");
                            }
                        },
                        _ => {
                            let _ = write!(out, "{operand}");
                        }
                    }
                }
                _ => {
                    let lo = code.get(ip).copied().unwrap_or(0);
                    let hi = code.get(ip + 1).copied().unwrap_or(0);
                    ip += 2;
                    match op {
                        Opcode::Jump
                        | Opcode::JumpIfFalse
                        | Opcode::JumpIfFalseOrPop
                        | Opcode::JumpIfTrueOrPop => {
                            let rel = i16::from_le_bytes([lo, hi]);
                            let target = ip as i64 + i64::from(rel);
                            let _ = write!(out, "{rel:+} (-> {target})");
                        }
                        Opcode::LoadConst => {
                            let idx = u16::from_le_bytes([lo, hi]);
                            match self.const_at(idx) {
                                Some(c) => {
                                    let _ = write!(out, "{idx} ({c})");
                                }
                                None => {
                                    let _ = write!(out, "{idx} (<missing>)");
                                }
                            }
                        }
                        _ => {
                            let _ = write!(out, "{}", u16::from_le_bytes([lo, hi]));
                        }
                    }
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

/// Back-patch handle for a forward jump's operand.
#[derive(Debug)]
#[must_use]
pub struct JumpLabel {
    operand_pos: usize,
}

/// Mutable builder the compiler emits into.
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    bytecode: Vec<u8>,
    consts: Vec<Const>,
    lnotab: Vec<u8>,
    first_line: u32,
    current_line: u32,
    last_line: u32,
    last_offset: usize,
    started: bool,
    last_was_return: bool,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytecode: Vec::new(),
            // Index 0 is always the none constant.
            consts: vec![Const::None],
            lnotab: Vec::new(),
            first_line: 1,
            current_line: 1,
            last_line: 1,
            last_offset: 0,
            started: false,
            last_was_return: false,
        }
    }

    /// Sets the source line attributed to subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        if !self.started {
            self.first_line = line;
            self.last_line = line;
            self.started = true;
        }
        self.current_line = line;
    }

    /// Records a line-table entry when the line advanced since the last one.
    fn note_line(&mut self) {
        if self.current_line <= self.last_line {
            return;
        }
        let mut d_off = self.bytecode.len() - self.last_offset;
        let mut d_line = self.current_line - self.last_line;
        while d_off > 255 {
            self.lnotab.extend_from_slice(&[255, 0]);
            d_off -= 255;
        }
        while d_line > 255 {
            self.lnotab.extend_from_slice(&[d_off as u8, 255]);
            d_off = 0;
            d_line -= 255;
        }
        self.lnotab.extend_from_slice(&[d_off as u8, d_line as u8]);
        self.last_offset = self.bytecode.len();
        self.last_line = self.current_line;
    }

    /// Current end offset; the target for backward jumps.
    pub fn offset(&self) -> usize {
        self.bytecode.len()
    }

    pub fn emit(&mut self, op: Opcode) {
        self.note_line();
        self.bytecode.push(op as u8);
        self.last_was_return = op == Opcode::Return;
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.emit(op);
        self.bytecode.push(operand);
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.emit(op);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emits a forward jump with a placeholder offset to patch later.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.emit(op);
        self.bytecode.extend_from_slice(&0xFFFFu16.to_le_bytes());
        JumpLabel {
            operand_pos: self.bytecode.len() - 2,
        }
    }

    /// Points `label` at the current end of the bytecode.
    ///
    /// Offsets are relative to the instruction after the operand:
    /// `target = operand_pos + 2 + offset`.
    pub fn patch_jump(&mut self, label: JumpLabel) -> Result<(), CompileError> {
        let offset = self.bytecode.len() as i64 - (label.operand_pos as i64 + 2);
        let offset = i16::try_from(offset).map_err(|_| CompileError::JumpTooFar)?;
        self.bytecode[label.operand_pos..label.operand_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Emits a jump whose target is a known earlier offset.
    pub fn emit_jump_back(&mut self, op: Opcode, target: usize) -> Result<(), CompileError> {
        self.emit(op);
        let after = self.bytecode.len() as i64 + 2;
        let offset = i16::try_from(target as i64 - after).map_err(|_| CompileError::JumpTooFar)?;
        self.bytecode.extend_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Interns `c`, reusing an existing pool slot when possible.
    pub fn add_const(&mut self, c: Const) -> Result<u16, CompileError> {
        if let Some(idx) = self.consts.iter().position(|existing| *existing == c) {
            return Ok(idx as u16);
        }
        if self.consts.len() > usize::from(u16::MAX) {
            return Err(CompileError::TooManyConstants);
        }
        self.consts.push(c);
        Ok((self.consts.len() - 1) as u16)
    }

    /// True when the last emitted instruction was `Return`.
    pub fn ends_with_return(&self) -> bool {
        self.last_was_return
    }

    pub fn finish(self, num_locals: usize, local_names: Vec<String>) -> CodeObject {
        CodeObject {
            name: self.name,
            bytecode: self.bytecode,
            consts: self.consts,
            num_locals,
            local_names,
            lnotab: self.lnotab,
            first_line: self.first_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_pool_reserves_none() {
        let mut b = CodeBuilder::new("<test>");
        assert_eq!(b.add_const(Const::Long(5)).unwrap(), 1);
        let code = b.finish(0, Vec::new());
        assert_eq!(code.const_at(0), Some(&Const::None));
        assert_eq!(code.const_at(1), Some(&Const::Long(5)));
    }

    #[test]
    fn test_const_dedup() {
        let mut b = CodeBuilder::new("<test>");
        let a = b.add_const(Const::Str("x".to_string())).unwrap();
        let c = b.add_const(Const::Str("x".to_string())).unwrap();
        assert_eq!(a, c);
        assert_eq!(b.add_const(Const::None).unwrap(), 0);
    }

    #[test]
    fn test_forward_jump_patch() {
        let mut b = CodeBuilder::new("<test>");
        let label = b.emit_jump(Opcode::JumpIfFalse);
        b.emit(Opcode::Pop);
        b.emit(Opcode::Pop);
        b.patch_jump(label).unwrap();
        let code = b.finish(0, Vec::new());
        let bytes = code.bytecode();
        let rel = i16::from_le_bytes([bytes[1], bytes[2]]);
        // Offset is relative to the instruction after the operand (3).
        assert_eq!(3 + i64::from(rel), bytes.len() as i64);
    }

    #[test]
    fn test_backward_jump() {
        let mut b = CodeBuilder::new("<test>");
        let start = b.offset();
        b.emit(Opcode::Pop);
        b.emit_jump_back(Opcode::Jump, start).unwrap();
        let code = b.finish(0, Vec::new());
        let bytes = code.bytecode();
        let rel = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(4 + i64::from(rel), start as i64);
    }

    #[test]
    fn test_line_table() {
        let mut b = CodeBuilder::new("<test>");
        b.set_line(1);
        b.emit(Opcode::Pop); // offset 0
        b.set_line(2);
        b.emit_u16(Opcode::LoadConst, 0); // offset 1
        b.emit(Opcode::Pop); // offset 4, still line 2
        b.set_line(7);
        b.emit(Opcode::Return); // offset 5
        let code = b.finish(0, Vec::new());
        assert_eq!(code.line_for_offset(0), 1);
        assert_eq!(code.line_for_offset(1), 2);
        assert_eq!(code.line_for_offset(4), 2);
        assert_eq!(code.line_for_offset(5), 7);
    }

    #[test]
    fn test_line_table_wide_deltas() {
        let mut b = CodeBuilder::new("<test>");
        b.set_line(1);
        for _ in 0..300 {
            b.emit(Opcode::Nop);
        }
        b.set_line(600);
        b.emit(Opcode::Return);
        let code = b.finish(0, Vec::new());
        assert_eq!(code.line_for_offset(0), 1);
        assert_eq!(code.line_for_offset(299), 1);
        assert_eq!(code.line_for_offset(300), 600);
    }

    #[test]
    fn test_disassemble_resolves_jump_targets() {
        let mut b = CodeBuilder::new("<test>");
        let label = b.emit_jump(Opcode::JumpIfFalse);
        b.emit_u16(Opcode::LoadConst, 0);
        b.patch_jump(label).unwrap();
        b.emit(Opcode::Return);
        let code = b.finish(0, Vec::new());
        let listing = code.disassemble();
        assert!(listing.contains("JumpIfFalse"), "{listing}");
        // The jump lands on the Return at offset 6.
        assert!(listing.contains("(-> 6)"), "{listing}");
        assert!(listing.contains("LoadConst"), "{listing}");
    }

    #[test]
    fn test_ends_with_return_tracking() {
        let mut b = CodeBuilder::new("<test>");
        assert!(!b.ends_with_return());
        b.emit(Opcode::Return);
        assert!(b.ends_with_return());
        b.emit(Opcode::Pop);
        assert!(!b.ends_with_return());
    }
}
