//! Validated instruction sequences

use std::ops::RangeInclusive;

use rustc_hash::FxHashSet;

use crate::decoder::{decode_all, DecodeError, DecodedInstr};
use crate::opcode::Opcode;

/// A method body: the word stream plus the frame shape it runs in.
///
/// Construction decodes and validates the whole stream once, so every
/// accessor afterwards is infallible.
#[derive(Debug, Clone)]
pub struct InstructionSeq {
    name: String,
    code: Vec<u64>,
    instrs: Vec<DecodedInstr>,
    stack_max: usize,
    param_count: usize,
    local_count: usize,
}

impl InstructionSeq {
    pub fn new(
        name: impl Into<String>,
        code: Vec<u64>,
        stack_max: usize,
        param_count: usize,
        local_count: usize,
    ) -> Result<Self, DecodeError> {
        if code.is_empty() {
            return Err(DecodeError::Empty);
        }
        if param_count > local_count {
            return Err(DecodeError::TooManyParams {
                params: param_count,
                locals: local_count,
            });
        }
        let instrs = decode_all(&code)?;
        verify_jump_targets(&instrs, code.len())?;
        verify_local_refs(&instrs, local_count)?;
        verify_dispatch_keys(&instrs)?;

        Ok(Self {
            name: name.into(),
            code,
            instrs,
            stack_max,
            param_count,
            local_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &[u64] {
        &self.code
    }

    /// Stream length in words
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Declared maximum operand stack depth
    pub fn stack_max(&self) -> usize {
        self.stack_max
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    /// All instructions in position order
    pub fn instructions(&self) -> &[DecodedInstr] {
        &self.instrs
    }

    /// The instruction starting exactly at `position`
    pub fn instruction_at(&self, position: usize) -> Option<&DecodedInstr> {
        self.instrs
            .binary_search_by_key(&position, |i| i.position)
            .ok()
            .map(|idx| &self.instrs[idx])
    }

    /// Instructions whose opcode word lies in `range`
    pub fn instructions_in(&self, range: RangeInclusive<usize>) -> &[DecodedInstr] {
        let lo = self.instrs.partition_point(|i| i.position < *range.start());
        let hi = self.instrs.partition_point(|i| i.position <= *range.end());
        &self.instrs[lo..hi.max(lo)]
    }
}

fn verify_jump_targets(instrs: &[DecodedInstr], len: usize) -> Result<(), DecodeError> {
    for instr in instrs {
        for target in instr.jump_targets() {
            let on_boundary = target
                .and_then(|t| usize::try_from(t).ok())
                .filter(|&t| t < len)
                .is_some_and(|t| {
                    instrs
                        .binary_search_by_key(&t, |i| i.position)
                        .is_ok()
                });
            if !on_boundary {
                return Err(DecodeError::InvalidJumpTarget {
                    // saturated when the offset overflows
                    target: target.unwrap_or(i64::MAX),
                    position: instr.position,
                });
            }
        }
    }
    Ok(())
}

fn verify_local_refs(instrs: &[DecodedInstr], local_count: usize) -> Result<(), DecodeError> {
    for instr in instrs {
        if matches!(instr.opcode, Opcode::GetLocal | Opcode::SetLocal) {
            let index = instr.operand(0);
            if index >= local_count as u64 {
                return Err(DecodeError::InvalidLocalRef {
                    index,
                    max: local_count,
                    position: instr.position,
                });
            }
        }
    }
    Ok(())
}

fn verify_dispatch_keys(instrs: &[DecodedInstr]) -> Result<(), DecodeError> {
    for instr in instrs {
        if let Some((cases, _)) = instr.dispatch_table() {
            let mut seen = FxHashSet::default();
            for (key, _) in cases {
                if !seen.insert(key) {
                    return Err(DecodeError::DuplicateCaseKey {
                        key,
                        position: instr.position,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn op(o: Opcode) -> u64 {
        o.to_word()
    }

    #[test]
    fn test_valid_sequence() {
        let code = vec![
            op(Opcode::GetLocal),
            0,
            op(Opcode::BranchUnless),
            1,
            op(Opcode::PutNil),
            op(Opcode::Leave),
        ];
        let iseq = InstructionSeq::new("m", code, 1, 1, 1).unwrap();
        assert_eq!(iseq.len(), 6);
        assert_eq!(iseq.instructions().len(), 4);
        assert_eq!(iseq.instruction_at(4).map(|i| i.opcode), Some(Opcode::PutNil));
        assert!(iseq.instruction_at(1).is_none());
    }

    #[test]
    fn test_instructions_in_range() {
        let code = vec![
            op(Opcode::PutObject),
            Value::fixnum(1).bits(),
            op(Opcode::Dup),
            op(Opcode::Pop),
            op(Opcode::Leave),
        ];
        let iseq = InstructionSeq::new("m", code, 2, 0, 0).unwrap();
        let opcodes: Vec<_> = iseq.instructions_in(1..=3).iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Dup, Opcode::Pop]);
        assert_eq!(iseq.instructions_in(0..=4).len(), 4);
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            InstructionSeq::new("m", vec![], 0, 0, 0).unwrap_err(),
            DecodeError::Empty
        );
    }

    #[test]
    fn test_rejects_jump_out_of_range() {
        let code = vec![op(Opcode::Jump), 5, op(Opcode::Leave)];
        let err = InstructionSeq::new("m", code, 1, 0, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidJumpTarget {
                target: 7,
                position: 0
            }
        );
    }

    #[test]
    fn test_rejects_overflowing_jump_offset() {
        let code = vec![op(Opcode::Jump), i64::MAX as u64, op(Opcode::Leave)];
        let err = InstructionSeq::new("m", code, 1, 0, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidJumpTarget {
                target: i64::MAX,
                position: 0
            }
        );
    }

    #[test]
    fn test_rejects_jump_into_operand() {
        // jump lands on the value operand of putobject
        let code = vec![
            op(Opcode::Jump),
            1,
            op(Opcode::PutObject),
            Value::NIL.bits(),
            op(Opcode::Leave),
        ];
        let err = InstructionSeq::new("m", code, 1, 0, 0).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJumpTarget { target: 3, .. }));
    }

    #[test]
    fn test_rejects_invalid_local() {
        let code = vec![op(Opcode::GetLocal), 2, op(Opcode::Leave)];
        let err = InstructionSeq::new("m", code, 1, 0, 2).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLocalRef {
                index: 2,
                max: 2,
                position: 0
            }
        );
    }

    #[test]
    fn test_rejects_too_many_params() {
        let code = vec![op(Opcode::PutNil), op(Opcode::Leave)];
        let err = InstructionSeq::new("m", code, 1, 3, 1).unwrap_err();
        assert_eq!(err, DecodeError::TooManyParams { params: 3, locals: 1 });
    }

    #[test]
    fn test_rejects_duplicate_dispatch_key() {
        let key = Value::fixnum(4).bits();
        let code = vec![
            op(Opcode::CaseDispatch),
            2,
            key,
            0,
            key,
            0,
            0,
            op(Opcode::PutNil),
            op(Opcode::Leave),
        ];
        let err = InstructionSeq::new("m", code, 1, 0, 0).unwrap_err();
        assert!(matches!(err, DecodeError::DuplicateCaseKey { position: 0, .. }));
    }
}
