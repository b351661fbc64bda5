//! Bounded operand stack threaded through block compilation

use crate::error::CompileError;
use crate::ir::Reg;

/// Abstract operand stack: the register occupying each slot.
///
/// Branches clone it so every successor gets a private copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandStack {
    values: Vec<Reg>,
    max: usize,
}

impl OperandStack {
    pub fn new(max: usize) -> Self {
        OperandStack {
            values: Vec::with_capacity(max),
            max,
        }
    }

    pub fn push(&mut self, reg: Reg) -> Result<(), CompileError> {
        if self.values.len() >= self.max {
            return Err(CompileError::StackOverflow {
                max: self.max,
                next: self.values.len() + 1,
            });
        }
        self.values.push(reg);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Reg, CompileError> {
        self.values.pop().ok_or(CompileError::StackUnderflow { next: -1 })
    }

    /// Pop `n` values, returned bottom-first
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Reg>, CompileError> {
        if n > self.values.len() {
            return Err(CompileError::StackUnderflow {
                next: self.values.len() as isize - n as isize,
            });
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    pub fn peek(&self) -> Option<Reg> {
        self.values.last().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Live values, bottom first
    pub fn as_slice(&self) -> &[Reg] {
        &self.values
    }
}
