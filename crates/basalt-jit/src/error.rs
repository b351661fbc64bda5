//! Compile errors
//!
//! Every variant aborts the compile of the current method. The caller
//! decides whether to fall back to interpretation.

use basalt_bytecode::{DecodeError, Opcode};

/// Error raised while turning bytecode into IR
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("stack overflow: max={max}, next size={next}")]
    StackOverflow { max: usize, next: usize },

    #[error("stack underflow: next size={next}")]
    StackUnderflow { next: isize },

    #[error("unexpected stack depth {depth} at {opcode} (position {position}), expected 1")]
    UnexpectedStackDepth {
        depth: usize,
        opcode: Opcode,
        position: usize,
    },

    #[error("unresolved external function: {name}")]
    UnresolvedExternal { name: String },

    #[error("unsupported instruction {opcode} at position {position}")]
    UnsupportedInstruction { opcode: Opcode, position: usize },

    #[error("inconsistent merge into block {position} from edge at {from}")]
    InconsistentMerge { position: usize, from: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            CompileError::StackOverflow { max: 2, next: 3 }.to_string(),
            "stack overflow: max=2, next size=3"
        );
        assert_eq!(
            CompileError::StackUnderflow { next: -1 }.to_string(),
            "stack underflow: next size=-1"
        );
        assert_eq!(
            CompileError::UnresolvedExternal {
                name: "basalt_funcall_4".into()
            }
            .to_string(),
            "unresolved external function: basalt_funcall_4"
        );
        assert_eq!(
            CompileError::UnsupportedInstruction {
                opcode: Opcode::PutString,
                position: 6
            }
            .to_string(),
            "unsupported instruction putstring at position 6"
        );
    }
}
