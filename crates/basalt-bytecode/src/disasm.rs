//! Textual disassembly

use std::fmt::Write;

use crate::decoder::DecodedInstr;
use crate::iseq::InstructionSeq;
use crate::opcode::OperandKind;

/// Format one instruction as `0004 getlocal 0`
pub fn format_instr(instr: &DecodedInstr) -> String {
    let mut out = format!("{:04} {}", instr.position, instr.opcode.name());
    for op in &instr.operands {
        match op.kind {
            OperandKind::JumpOffset => {
                let _ = match instr.resolve(op.as_offset()) {
                    Some(target) => write!(out, " {}", target),
                    None => write!(out, " ?"),
                };
            }
            OperandKind::Literal => {
                let _ = write!(out, " {}", op.raw);
            }
            OperandKind::Value => {
                let _ = write!(out, " {}", op.as_value());
            }
        }
    }
    out
}

/// Disassemble a whole sequence, one instruction per line
pub fn disassemble(iseq: &InstructionSeq) -> String {
    let mut out = format!(
        "== disasm: {} (stack_max={}, params={}, locals={})\n",
        iseq.name(),
        iseq.stack_max(),
        iseq.param_count(),
        iseq.local_count()
    );
    for instr in iseq.instructions() {
        out.push_str(&format_instr(instr));
        out.push('\n');
    }
    out
}
