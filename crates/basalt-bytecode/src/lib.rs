//! Basalt Stack Bytecode
//!
//! This crate provides the instruction set consumed by the Basalt JIT:
//! opcodes and operand layouts, a word-stream decoder, validated
//! instruction sequences, tagged host values, a label-based assembler and a
//! disassembler.

#![warn(rust_2018_idioms)]

pub mod opcode;
pub mod value;
pub mod decoder;
pub mod iseq;
pub mod assembler;
pub mod disasm;

pub use opcode::{BranchKind, ControlKind, ExitKind, Opcode, OperandKind};
pub use value::{method_id, Value};
pub use decoder::{decode_all, decode_at, DecodeError, DecodedInstr, Operand};
pub use iseq::InstructionSeq;
pub use assembler::{AssembleError, IseqBuilder, Label};
pub use disasm::{disassemble, format_instr};
