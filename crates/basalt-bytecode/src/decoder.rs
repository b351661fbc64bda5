//! Instruction decoder
//!
//! Decodes the word stream into [`DecodedInstr`] values whose operands carry
//! their [`OperandKind`].

use crate::opcode::{Opcode, OperandKind};
use crate::value::Value;

/// Error during decoding or validation of an instruction stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid opcode word {word:#x} at position {position}")]
    InvalidOpcode { word: u64, position: usize },
    #[error("instruction at position {position} runs past the end of the stream")]
    Truncated { position: usize },
    #[error("dispatch table at position {position} declares {count} entries")]
    InvalidDispatchSize { count: u64, position: usize },
    #[error("jump target {target} at position {position} is not an instruction boundary")]
    InvalidJumpTarget { target: i64, position: usize },
    #[error("invalid local variable reference: index {index} (max {max}) at position {position}")]
    InvalidLocalRef {
        index: u64,
        max: usize,
        position: usize,
    },
    #[error("duplicate dispatch key {key} at position {position}")]
    DuplicateCaseKey { key: Value, position: usize },
    #[error("parameter count {params} exceeds local count {locals}")]
    TooManyParams { params: usize, locals: usize },
    #[error("empty instruction sequence")]
    Empty,
}

/// One operand word with its classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub raw: u64,
}

impl Operand {
    /// Reinterpret as a signed jump offset
    pub fn as_offset(self) -> i64 {
        self.raw as i64
    }

    /// Reinterpret as a host value
    pub fn as_value(self) -> Value {
        Value(self.raw)
    }
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    /// Word index of the opcode
    pub position: usize,
    pub opcode: Opcode,
    /// Total length in words (opcode + operands)
    pub len: usize,
    pub operands: Vec<Operand>,
}

impl DecodedInstr {
    /// Position of the next instruction
    pub fn next_position(&self) -> usize {
        self.position + self.len
    }

    /// Kind of the operand in `slot`
    pub fn operand_kind(&self, slot: usize) -> Option<OperandKind> {
        self.operands.get(slot).map(|op| op.kind)
    }

    /// Raw operand word in `slot`, 0 when absent
    pub fn operand(&self, slot: usize) -> u64 {
        self.operands.get(slot).map_or(0, |op| op.raw)
    }

    /// Resolve a signed offset to an absolute target, `None` on overflow
    pub fn resolve(&self, offset: i64) -> Option<i64> {
        i64::try_from(self.next_position()).ok()?.checked_add(offset)
    }

    /// Absolute targets of every jump-offset operand, in operand order.
    /// An offset that overflows yields `None`.
    pub fn jump_targets(&self) -> impl Iterator<Item = Option<i64>> + '_ {
        self.operands
            .iter()
            .filter(|op| op.kind == OperandKind::JumpOffset)
            .map(move |op| self.resolve(op.as_offset()))
    }

    /// Target of a single-offset jump or branch
    pub fn jump_target(&self) -> Option<usize> {
        self.jump_targets()
            .next()
            .flatten()
            .and_then(|t| usize::try_from(t).ok())
    }

    /// `(key, target)` entries and the default target of `opt_case_dispatch`
    pub fn dispatch_table(&self) -> Option<(Vec<(Value, usize)>, usize)> {
        if self.opcode != Opcode::CaseDispatch {
            return None;
        }
        let (last, pairs) = self.operands[1..].split_last()?;
        let cases = pairs
            .chunks_exact(2)
            .map(|pair| {
                let target = usize::try_from(self.resolve(pair[1].as_offset())?).ok()?;
                Some((pair[0].as_value(), target))
            })
            .collect::<Option<Vec<_>>>()?;
        let default = usize::try_from(self.resolve(last.as_offset())?).ok()?;
        Some((cases, default))
    }
}

/// Decode the instruction starting at `position`
pub fn decode_at(code: &[u64], position: usize) -> Result<DecodedInstr, DecodeError> {
    let word = *code.get(position).ok_or(DecodeError::Truncated { position })?;
    let opcode = Opcode::from_word(word).ok_or(DecodeError::InvalidOpcode { word, position })?;

    let mut operands = Vec::new();
    let mut cursor = position + 1;
    let mut take = |kind: OperandKind, cursor: &mut usize| -> Result<Operand, DecodeError> {
        let raw = *code.get(*cursor).ok_or(DecodeError::Truncated { position })?;
        *cursor += 1;
        Ok(Operand { kind, raw })
    };

    match opcode.fixed_operands() {
        Some(layout) => {
            for &kind in layout {
                operands.push(take(kind, &mut cursor)?);
            }
        }
        None => {
            // count, (key, offset) * count, else offset
            let count_op = take(OperandKind::Literal, &mut cursor)?;
            let remaining = code.len().saturating_sub(cursor) as u64;
            if count_op.raw > remaining / 2 {
                return Err(DecodeError::InvalidDispatchSize {
                    count: count_op.raw,
                    position,
                });
            }
            operands.push(count_op);
            for _ in 0..count_op.raw {
                operands.push(take(OperandKind::Value, &mut cursor)?);
                operands.push(take(OperandKind::JumpOffset, &mut cursor)?);
            }
            operands.push(take(OperandKind::JumpOffset, &mut cursor)?);
        }
    }

    Ok(DecodedInstr {
        position,
        opcode,
        len: cursor - position,
        operands,
    })
}

/// Decode a whole stream
pub fn decode_all(code: &[u64]) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        let instr = decode_at(code, pos)?;
        pos = instr.next_position();
        instrs.push(instr);
    }
    Ok(instrs)
}
