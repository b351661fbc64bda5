//! SSA builder helpers
//!
//! Utilities for constructing JIT IR while the CFG compiler walks bytecode.
//! The builder owns the function under construction and a cursor block.

use basalt_bytecode::Value;

use super::instr::{JitBlockId, JitFunction, JitInstr, JitTerminator, Reg};
use super::types::JitType;
use crate::error::CompileError;
use crate::runtime::ExternTable;

/// Builder that simplifies JIT IR construction
pub struct JitBuilder<'a> {
    func: JitFunction,
    current_block: JitBlockId,
    externs: &'a ExternTable,
}

impl<'a> JitBuilder<'a> {
    /// Start a function with a single empty entry block
    pub fn new(func: JitFunction, externs: &'a ExternTable) -> Self {
        let mut func = func;
        if func.blocks.is_empty() {
            func.entry = func.add_block();
        }
        let entry = func.entry;
        JitBuilder {
            func,
            current_block: entry,
            externs,
        }
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: JitBlockId) {
        self.current_block = block;
    }

    /// Get the current block ID
    pub fn current_block(&self) -> JitBlockId {
        self.current_block
    }

    /// The function built so far
    pub fn func(&self) -> &JitFunction {
        &self.func
    }

    /// Allocate a new virtual register with the given type
    pub fn alloc_reg(&mut self, ty: JitType) -> Reg {
        self.func.alloc_reg(ty)
    }

    /// Create a new basic block
    pub fn create_block(&mut self) -> JitBlockId {
        self.func.add_block()
    }

    /// Emit an instruction into the current block
    pub fn emit(&mut self, instr: JitInstr) {
        self.func.block_mut(self.current_block).instrs.push(instr);
    }

    /// Set the terminator for the current block
    pub fn terminate(&mut self, term: JitTerminator) {
        let block = self.current_block;
        for succ in term.successors() {
            let preds = &mut self.func.block_mut(succ).predecessors;
            if !preds.contains(&block) {
                preds.push(block);
            }
        }
        self.func.block_mut(block).terminator = term;
    }

    /// Emit a tagged constant
    pub fn const_value(&mut self, value: Value) -> Reg {
        self.const_bits(value.bits())
    }

    /// Emit a raw 64-bit constant
    pub fn const_bits(&mut self, value: u64) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::Const { dest, value });
        dest
    }

    pub fn self_value(&mut self) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::SelfValue { dest });
        dest
    }

    pub fn arg(&mut self, index: u32) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::Arg { dest, index });
        dest
    }

    /// Emit a LoadLocal instruction
    pub fn load_local(&mut self, index: u32) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::LoadLocal { dest, index });
        dest
    }

    /// Emit a StoreLocal instruction
    pub fn store_local(&mut self, index: u32, value: Reg) {
        self.emit(JitInstr::StoreLocal { index, value });
    }

    pub fn iand(&mut self, left: Reg, right: Reg) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::IAnd { dest, left, right });
        dest
    }

    pub fn icmp_eq(&mut self, left: Reg, right: Reg) -> Reg {
        let dest = self.alloc_reg(JitType::Bool);
        self.emit(JitInstr::ICmpEq { dest, left, right });
        dest
    }

    pub fn icmp_ne(&mut self, left: Reg, right: Reg) -> Reg {
        let dest = self.alloc_reg(JitType::Bool);
        self.emit(JitInstr::ICmpNe { dest, left, right });
        dest
    }

    /// Call a registered extern, checking it exists with a matching arity
    pub fn call(&mut self, callee: &str, args: Vec<Reg>) -> Result<Reg, CompileError> {
        if self.externs.resolve(callee, args.len()).is_none() {
            return Err(CompileError::UnresolvedExternal {
                name: callee.to_string(),
            });
        }
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::Call {
            dest,
            callee: callee.to_string(),
            args,
        });
        Ok(dest)
    }

    /// Emit a phi at the current position with the given incoming pairs
    pub fn phi(&mut self, sources: Vec<(JitBlockId, Reg)>) -> Reg {
        let dest = self.alloc_reg(JitType::Value);
        self.emit(JitInstr::Phi { dest, sources });
        dest
    }

    /// Add an incoming pair to an existing phi. Returns false if `block`
    /// holds no phi defining `phi`.
    pub fn add_phi_incoming(
        &mut self,
        block: JitBlockId,
        phi: Reg,
        pred: JitBlockId,
        value: Reg,
    ) -> bool {
        match self.func.phi_sources_mut(block, phi) {
            Some(sources) => {
                sources.push((pred, value));
                true
            }
            None => false,
        }
    }

    /// Finish and hand back the function
    pub fn finish(self) -> JitFunction {
        self.func
    }
}
