//! Bytecode layer: opcode definitions, code objects, the compiler and the VM.

pub mod code;
pub mod compiler;
pub mod op;
pub mod vm;
