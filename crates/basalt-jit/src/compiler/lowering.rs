//! Opcode lowering table
//!
//! Maps each straight-line instruction to its stack effect and the IR it
//! emits. Control transfers are threaded by the CFG compiler itself; the
//! table only supplies the branch condition and the value an exit returns.

use basalt_bytecode::{
    method_id, BranchKind, DecodedInstr, ExitKind, InstructionSeq, Opcode, Value,
};

use super::stack::OperandStack;
use crate::error::CompileError;
use crate::ir::{JitBuilder, Reg};
use crate::runtime::{funcall_name, THROW_HELPER};

/// Per-opcode lowering used by the CFG compiler
pub trait OpcodeLowering {
    /// Lower one straight-line instruction. Opcodes without an entry must
    /// return [`CompileError::UnsupportedInstruction`].
    fn lower(
        &self,
        instr: &DecodedInstr,
        stack: &mut OperandStack,
        builder: &mut JitBuilder<'_>,
    ) -> Result<(), CompileError>;

    /// Boolean that is true when a branch of `kind` on `value` is taken
    fn branch_condition(
        &self,
        kind: BranchKind,
        value: Reg,
        builder: &mut JitBuilder<'_>,
    ) -> Result<Reg, CompileError>;

    /// Value returned to the caller by an exit instruction
    fn exit_value(
        &self,
        kind: ExitKind,
        instr: &DecodedInstr,
        value: Reg,
        builder: &mut JitBuilder<'_>,
    ) -> Result<Reg, CompileError>;

    /// Emitted once into the entry block. Initializes parameters from the
    /// argument vector and every other local to `nil`.
    fn prologue(
        &self,
        iseq: &InstructionSeq,
        builder: &mut JitBuilder<'_>,
    ) -> Result<(), CompileError> {
        for index in 0..iseq.local_count() {
            let value = if index < iseq.param_count() {
                builder.arg(index as u32)
            } else {
                builder.const_value(Value::NIL)
            };
            builder.store_local(index as u32, value);
        }
        Ok(())
    }
}

/// Lowering for the standard instruction set. Method calls go through the
/// `basalt_funcall_<argc>` externs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLowering;

/// Method id dispatched by a specialized `opt_*` instruction
fn opt_method_id(opcode: Opcode) -> Option<u64> {
    let mid = match opcode {
        Opcode::OptPlus => method_id::PLUS,
        Opcode::OptMinus => method_id::MINUS,
        Opcode::OptMult => method_id::MULT,
        Opcode::OptLt => method_id::LT,
        Opcode::OptLe => method_id::LE,
        Opcode::OptGt => method_id::GT,
        Opcode::OptGe => method_id::GE,
        Opcode::OptEq => method_id::EQ,
        _ => return None,
    };
    Some(mid)
}

fn lower_send(
    mid: u64,
    argc: usize,
    stack: &mut OperandStack,
    builder: &mut JitBuilder<'_>,
) -> Result<(), CompileError> {
    let args = stack.pop_n(argc)?;
    let recv = stack.pop()?;
    let mid = builder.const_bits(mid);
    let mut call_args = Vec::with_capacity(argc + 2);
    call_args.push(recv);
    call_args.push(mid);
    call_args.extend(args);
    let result = builder.call(&funcall_name(argc), call_args)?;
    stack.push(result)
}

impl OpcodeLowering for StandardLowering {
    fn lower(
        &self,
        instr: &DecodedInstr,
        stack: &mut OperandStack,
        builder: &mut JitBuilder<'_>,
    ) -> Result<(), CompileError> {
        match instr.opcode {
            Opcode::Nop | Opcode::Trace => Ok(()),
            Opcode::PutNil => stack.push(builder.const_value(Value::NIL)),
            Opcode::PutSelf => stack.push(builder.self_value()),
            Opcode::PutObject => {
                let value = builder.const_bits(instr.operand(0));
                stack.push(value)
            }
            Opcode::PutObjectInt0 => stack.push(builder.const_value(Value::fixnum(0))),
            Opcode::PutObjectInt1 => stack.push(builder.const_value(Value::fixnum(1))),
            Opcode::Pop => stack.pop().map(|_| ()),
            Opcode::Dup => {
                let v = stack.pop()?;
                stack.push(v)?;
                stack.push(v)
            }
            Opcode::Swap => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                stack.push(b)?;
                stack.push(a)
            }
            Opcode::GetLocal => {
                let value = builder.load_local(instr.operand(0) as u32);
                stack.push(value)
            }
            Opcode::SetLocal => {
                let value = stack.pop()?;
                builder.store_local(instr.operand(0) as u32, value);
                Ok(())
            }
            Opcode::Send => lower_send(instr.operand(0), instr.operand(1) as usize, stack, builder),
            op => match opt_method_id(op) {
                Some(mid) => lower_send(mid, 1, stack, builder),
                None => Err(CompileError::UnsupportedInstruction {
                    opcode: op,
                    position: instr.position,
                }),
            },
        }
    }

    fn branch_condition(
        &self,
        kind: BranchKind,
        value: Reg,
        builder: &mut JitBuilder<'_>,
    ) -> Result<Reg, CompileError> {
        let cond = match kind {
            BranchKind::If | BranchKind::Unless => {
                // RTEST: (v & ~nil) != 0
                let mask = builder.const_bits(!Value::NIL.bits());
                let masked = builder.iand(value, mask);
                let zero = builder.const_bits(0);
                if kind == BranchKind::If {
                    builder.icmp_ne(masked, zero)
                } else {
                    builder.icmp_eq(masked, zero)
                }
            }
            BranchKind::Nil => {
                let nil = builder.const_value(Value::NIL);
                builder.icmp_eq(value, nil)
            }
        };
        Ok(cond)
    }

    fn exit_value(
        &self,
        kind: ExitKind,
        instr: &DecodedInstr,
        value: Reg,
        builder: &mut JitBuilder<'_>,
    ) -> Result<Reg, CompileError> {
        match kind {
            ExitKind::Leave => Ok(value),
            ExitKind::Throw => {
                let state = builder.const_bits(instr.operand(0));
                builder.call(THROW_HELPER, vec![state, value])
            }
        }
    }
}
