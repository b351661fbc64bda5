//! Label-based assembler for instruction sequences
//!
//! Jumps are emitted against [`Label`]s and patched into relative offsets
//! when the sequence is built.

use rustc_hash::FxHashMap;

use crate::decoder::DecodeError;
use crate::iseq::InstructionSeq;
use crate::opcode::Opcode;
use crate::value::Value;

/// Error while assembling a sequence
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    #[error("label {0} is used but never marked")]
    UnmarkedLabel(u32),
    #[error("label {0} is marked twice")]
    DuplicateLabel(u32),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A jump target, resolved when the sequence is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    id: u32,
}

/// Offset word waiting for its label
#[derive(Debug, Clone, Copy)]
struct UnresolvedJump {
    /// Word holding the offset
    operand_position: usize,
    /// Position the offset is relative to (end of the instruction)
    base: usize,
    target: Label,
}

/// Builder for [`InstructionSeq`]
#[derive(Debug)]
pub struct IseqBuilder {
    name: String,
    code: Vec<u64>,
    param_count: usize,
    local_count: usize,
    next_label_id: u32,
    label_positions: FxHashMap<u32, usize>,
    unresolved: Vec<UnresolvedJump>,
    depth: usize,
    max_depth: usize,
    stack_max: Option<usize>,
}

impl IseqBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: Vec::new(),
            param_count: 0,
            local_count: 0,
            next_label_id: 0,
            label_positions: FxHashMap::default(),
            unresolved: Vec::new(),
            depth: 0,
            max_depth: 0,
            stack_max: None,
        }
    }

    /// Set parameter and local counts. Locals include the parameters.
    pub fn frame(mut self, param_count: usize, local_count: usize) -> Self {
        self.param_count = param_count;
        self.local_count = local_count;
        self
    }

    /// Override the estimated maximum stack depth
    pub fn stack_max(mut self, max: usize) -> Self {
        self.stack_max = Some(max);
        self
    }

    /// Position of the next emitted word
    pub fn position(&self) -> usize {
        self.code.len()
    }

    fn track(&mut self, pops: usize, pushes: usize) {
        self.depth = self.depth.saturating_sub(pops) + pushes;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn emit_words(&mut self, opcode: Opcode, operands: &[u64]) -> &mut Self {
        if let Some((pops, pushes)) = opcode.stack_effect() {
            self.track(pops, pushes);
        }
        self.code.push(opcode.to_word());
        self.code.extend_from_slice(operands);
        self
    }

    /// Emit a fixed-layout opcode with raw operand words
    pub fn emit(&mut self, opcode: Opcode, operands: &[u64]) -> &mut Self {
        self.emit_words(opcode, operands)
    }

    pub fn nop(&mut self) -> &mut Self {
        self.emit_words(Opcode::Nop, &[])
    }

    pub fn trace(&mut self, event: u64) -> &mut Self {
        self.emit_words(Opcode::Trace, &[event])
    }

    pub fn putnil(&mut self) -> &mut Self {
        self.emit_words(Opcode::PutNil, &[])
    }

    pub fn putself(&mut self) -> &mut Self {
        self.emit_words(Opcode::PutSelf, &[])
    }

    /// Push a value, using the specialized opcodes for fixnum 0 and 1
    pub fn putobject(&mut self, value: Value) -> &mut Self {
        if value == Value::fixnum(0) {
            self.emit_words(Opcode::PutObjectInt0, &[])
        } else if value == Value::fixnum(1) {
            self.emit_words(Opcode::PutObjectInt1, &[])
        } else {
            self.emit_words(Opcode::PutObject, &[value.bits()])
        }
    }

    pub fn putstring(&mut self, value: Value) -> &mut Self {
        self.emit_words(Opcode::PutString, &[value.bits()])
    }

    pub fn newarray(&mut self, count: usize) -> &mut Self {
        self.track(count, 1);
        self.emit_words(Opcode::NewArray, &[count as u64])
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit_words(Opcode::Pop, &[])
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit_words(Opcode::Dup, &[])
    }

    pub fn swap(&mut self) -> &mut Self {
        self.emit_words(Opcode::Swap, &[])
    }

    pub fn getlocal(&mut self, index: usize) -> &mut Self {
        self.emit_words(Opcode::GetLocal, &[index as u64])
    }

    pub fn setlocal(&mut self, index: usize) -> &mut Self {
        self.emit_words(Opcode::SetLocal, &[index as u64])
    }

    /// Generic call: pops receiver and `argc` arguments
    pub fn send(&mut self, mid: u64, argc: usize) -> &mut Self {
        self.track(argc + 1, 1);
        self.emit_words(Opcode::Send, &[mid, argc as u64])
    }

    pub fn leave(&mut self) -> &mut Self {
        self.emit_words(Opcode::Leave, &[])
    }

    pub fn throw(&mut self, state: u64) -> &mut Self {
        self.emit_words(Opcode::Throw, &[state])
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label {
            id: self.next_label_id,
        };
        self.next_label_id += 1;
        label
    }

    /// Bind `label` to the current position
    pub fn mark_label(&mut self, label: Label) -> Result<&mut Self, AssembleError> {
        if self.label_positions.insert(label.id, self.position()).is_some() {
            return Err(AssembleError::DuplicateLabel(label.id));
        }
        Ok(self)
    }

    fn emit_jump_op(&mut self, opcode: Opcode, target: Label) -> &mut Self {
        let operand_position = self.position() + 1;
        self.emit_words(opcode, &[0]);
        self.unresolved.push(UnresolvedJump {
            operand_position,
            base: self.position(),
            target,
        });
        self
    }

    pub fn jump(&mut self, target: Label) -> &mut Self {
        self.emit_jump_op(Opcode::Jump, target)
    }

    pub fn branch_if(&mut self, target: Label) -> &mut Self {
        self.emit_jump_op(Opcode::BranchIf, target)
    }

    pub fn branch_unless(&mut self, target: Label) -> &mut Self {
        self.emit_jump_op(Opcode::BranchUnless, target)
    }

    pub fn branch_nil(&mut self, target: Label) -> &mut Self {
        self.emit_jump_op(Opcode::BranchNil, target)
    }

    /// Emit `opt_case_dispatch` over `cases`, falling back to `otherwise`
    pub fn case_dispatch(&mut self, cases: &[(Value, Label)], otherwise: Label) -> &mut Self {
        self.track(1, 0);
        let start = self.position();
        self.code.push(Opcode::CaseDispatch.to_word());
        self.code.push(cases.len() as u64);
        let mut offsets = Vec::with_capacity(cases.len() + 1);
        for &(key, label) in cases {
            self.code.push(key.bits());
            offsets.push((self.position(), label));
            self.code.push(0);
        }
        offsets.push((self.position(), otherwise));
        self.code.push(0);

        let base = start + 2 + cases.len() * 2 + 1;
        for (operand_position, target) in offsets {
            self.unresolved.push(UnresolvedJump {
                operand_position,
                base,
                target,
            });
        }
        self
    }

    /// Patch every jump and validate the result
    pub fn build(mut self) -> Result<InstructionSeq, AssembleError> {
        for jump in &self.unresolved {
            let target = *self
                .label_positions
                .get(&jump.target.id)
                .ok_or(AssembleError::UnmarkedLabel(jump.target.id))?;
            let offset = target as i64 - jump.base as i64;
            self.code[jump.operand_position] = offset as u64;
        }

        let stack_max = self.stack_max.unwrap_or(self.max_depth);
        let iseq = InstructionSeq::new(
            self.name,
            self.code,
            stack_max,
            self.param_count,
            self.local_count,
        )?;
        Ok(iseq)
    }
}
