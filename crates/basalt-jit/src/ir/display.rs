//! Pretty-printing for JIT IR
//!
//! Display implementations for debugging and dump output.

use std::fmt;

use super::instr::{JitBlock, JitFunction, JitInstr, JitTerminator};

impl fmt::Display for JitFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function @{} (params: {}, locals: {}) {{",
            self.name, self.param_count, self.local_count
        )?;

        for block in &self.blocks {
            write!(f, "{}", block)?;
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for JitBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}:", self.id)?;
        if !self.predecessors.is_empty() {
            write!(f, "    ; preds:")?;
            for pred in &self.predecessors {
                write!(f, " {}", pred)?;
            }
            writeln!(f)?;
        }

        for instr in &self.instrs {
            writeln!(f, "    {}", instr)?;
        }

        writeln!(f, "    {}", self.terminator)
    }
}

impl fmt::Display for JitInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitInstr::Const { dest, value } => write!(f, "{} = const {:#x}", dest, value),
            JitInstr::SelfValue { dest } => write!(f, "{} = self", dest),
            JitInstr::Arg { dest, index } => write!(f, "{} = arg {}", dest, index),
            JitInstr::LoadLocal { dest, index } => write!(f, "{} = load.local {}", dest, index),
            JitInstr::StoreLocal { index, value } => write!(f, "store.local {}, {}", index, value),
            JitInstr::IAnd { dest, left, right } => write!(f, "{} = iand {}, {}", dest, left, right),
            JitInstr::ICmpEq { dest, left, right } => {
                write!(f, "{} = icmp.eq {}, {}", dest, left, right)
            }
            JitInstr::ICmpNe { dest, left, right } => {
                write!(f, "{} = icmp.ne {}, {}", dest, left, right)
            }
            JitInstr::Call { dest, callee, args } => {
                write!(f, "{} = call @{}(", dest, callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            JitInstr::Phi { dest, sources } => {
                write!(f, "{} = phi [", dest)?;
                for (i, (block, reg)) in sources.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", block, reg)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for JitTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitTerminator::Jump(target) => write!(f, "jmp {}", target),
            JitTerminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {}, {}, {}", cond, then_block, else_block),
            JitTerminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {} [", value)?;
                for (key, block) in cases {
                    write!(f, "{:#x}: {}, ", key, block)?;
                }
                write!(f, "default: {}]", default)
            }
            JitTerminator::Return(reg) => write!(f, "ret {}", reg),
            JitTerminator::Unreachable => write!(f, "unreachable"),
            JitTerminator::None => write!(f, "<no terminator>"),
        }
    }
}
