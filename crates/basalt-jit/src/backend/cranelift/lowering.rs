//! JIT IR → Cranelift IR lowering
//!
//! Every IR register and every local becomes a Cranelift `Variable`, so SSA
//! construction is left to `cranelift-frontend`. A phi is lowered as a copy
//! into its destination variable at the end of each predecessor.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{self, types, AbiParam, InstBuilder, MemFlags, TrapCode};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Switch, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{Linkage, Module};
use rustc_hash::FxHashMap;

use crate::ir::{JitBlockId, JitFunction, JitInstr, JitTerminator, JitType, Reg};
use crate::runtime::trampoline::ENTRY_PARAM_COUNT;
use crate::runtime::ExternTable;

/// Trap code for blocks control never reaches
const UNREACHABLE_TRAP: u8 = 1;

/// Error during Cranelift lowering
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("call to unknown extern {0}")]
    UnknownExtern(String),
    #[error("extern {name} takes {expected} arguments, got {got}")]
    ExternArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{0} has no terminator")]
    MissingTerminator(JitBlockId),
    #[error("invalid trap code {0}")]
    TrapCode(u8),
    #[error("module: {0}")]
    Module(#[from] cranelift_module::ModuleError),
}

/// Cranelift signature of a compiled method: `(recv, args_ptr) -> value`
pub fn jit_entry_signature(call_conv: CallConv) -> ir::Signature {
    extern_signature(call_conv, ENTRY_PARAM_COUNT)
}

/// Signature of an extern taking `arity` tagged words
fn extern_signature(call_conv: CallConv, arity: usize) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    for _ in 0..arity {
        sig.params.push(AbiParam::new(types::I64));
    }
    sig.returns.push(AbiParam::new(types::I64));
    sig
}

/// Phi resolution: for each predecessor, the (phi_dest, source) copies to
/// perform before its terminator
fn build_phi_copies(func: &JitFunction) -> FxHashMap<JitBlockId, Vec<(Reg, Reg)>> {
    let mut copies: FxHashMap<JitBlockId, Vec<(Reg, Reg)>> = FxHashMap::default();
    for block in &func.blocks {
        for instr in &block.instrs {
            if let JitInstr::Phi { dest, sources } = instr {
                for (pred, src) in sources {
                    copies.entry(*pred).or_default().push((*dest, *src));
                }
            }
        }
    }
    copies
}

/// State maintained during lowering of a single function
pub struct LoweringContext<'a> {
    func: &'a JitFunction,
    externs: &'a ExternTable,
    module: &'a mut JITModule,
    reg_vars: FxHashMap<Reg, Variable>,
    local_vars: Vec<Variable>,
    block_map: FxHashMap<JitBlockId, ir::Block>,
    phi_copies: FxHashMap<JitBlockId, Vec<(Reg, Reg)>>,
    /// Imported externs, declared once per function
    callees: FxHashMap<String, ir::FuncRef>,
    recv: ir::Value,
    args_ptr: ir::Value,
}

impl<'a> LoweringContext<'a> {
    /// Lower `func` into the function under construction by `builder`.
    /// Takes ownership of the builder since `finalize()` consumes it.
    pub fn lower(
        func: &'a JitFunction,
        externs: &'a ExternTable,
        module: &'a mut JITModule,
        mut builder: FunctionBuilder<'_>,
    ) -> Result<(), LowerError> {
        let reachable = func.reachable_blocks();

        let mut block_map = FxHashMap::default();
        for &id in &reachable {
            block_map.insert(id, builder.create_block());
        }

        let entry_block = block_map[&func.entry];
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        let recv = builder.block_params(entry_block)[0];
        let args_ptr = builder.block_params(entry_block)[1];

        let mut reg_vars = FxHashMap::default();
        for index in 0..func.next_reg {
            let reg = Reg(index);
            let ty = match func.reg_type(reg) {
                JitType::Bool => types::I8,
                JitType::Value => types::I64,
            };
            reg_vars.insert(reg, builder.declare_var(ty));
        }
        let local_vars = (0..func.local_count)
            .map(|_| builder.declare_var(types::I64))
            .collect();

        let mut ctx = LoweringContext {
            func,
            externs,
            module,
            reg_vars,
            local_vars,
            block_map,
            phi_copies: build_phi_copies(func),
            callees: FxHashMap::default(),
            recv,
            args_ptr,
        };

        for (idx, &id) in reachable.iter().enumerate() {
            if idx > 0 {
                builder.switch_to_block(ctx.block_map[&id]);
            }
            ctx.lower_block(id, &mut builder)?;
        }

        builder.seal_all_blocks();
        builder.finalize();
        Ok(())
    }

    fn use_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg) -> ir::Value {
        builder.use_var(self.reg_vars[&reg])
    }

    fn def_reg(&self, builder: &mut FunctionBuilder<'_>, reg: Reg, val: ir::Value) {
        builder.def_var(self.reg_vars[&reg], val);
    }

    fn lower_block(
        &mut self,
        id: JitBlockId,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), LowerError> {
        let func = self.func;
        let block = func.block(id);
        for instr in &block.instrs {
            self.lower_instr(instr, builder)?;
        }

        // Read every source before writing any destination
        if let Some(copies) = self.phi_copies.get(&id) {
            let values: Vec<_> = copies
                .iter()
                .map(|&(dest, src)| (dest, self.use_reg(builder, src)))
                .collect();
            for (dest, val) in values {
                self.def_reg(builder, dest, val);
            }
        }

        self.lower_terminator(id, &block.terminator, builder)
    }

    fn lower_instr(
        &mut self,
        instr: &JitInstr,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), LowerError> {
        match instr {
            JitInstr::Const { dest, value } => {
                let val = builder.ins().iconst(types::I64, *value as i64);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::SelfValue { dest } => {
                self.def_reg(builder, *dest, self.recv);
            }
            JitInstr::Arg { dest, index } => {
                let offset = (*index as i32) * 8;
                let val = builder
                    .ins()
                    .load(types::I64, MemFlags::trusted(), self.args_ptr, offset);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::LoadLocal { dest, index } => {
                let val = builder.use_var(self.local_vars[*index as usize]);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::StoreLocal { index, value } => {
                let val = self.use_reg(builder, *value);
                builder.def_var(self.local_vars[*index as usize], val);
            }
            JitInstr::IAnd { dest, left, right } => {
                let l = self.use_reg(builder, *left);
                let r = self.use_reg(builder, *right);
                let val = builder.ins().band(l, r);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::ICmpEq { dest, left, right } => {
                let l = self.use_reg(builder, *left);
                let r = self.use_reg(builder, *right);
                let val = builder.ins().icmp(IntCC::Equal, l, r);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::ICmpNe { dest, left, right } => {
                let l = self.use_reg(builder, *left);
                let r = self.use_reg(builder, *right);
                let val = builder.ins().icmp(IntCC::NotEqual, l, r);
                self.def_reg(builder, *dest, val);
            }
            JitInstr::Call { dest, callee, args } => {
                let func_ref = self.callee(callee, args.len(), builder)?;
                let arg_vals: Vec<_> = args.iter().map(|a| self.use_reg(builder, *a)).collect();
                let call = builder.ins().call(func_ref, &arg_vals);
                let val = builder.inst_results(call)[0];
                self.def_reg(builder, *dest, val);
            }
            // Defined by the copies at the end of each predecessor
            JitInstr::Phi { .. } => {}
        }
        Ok(())
    }

    /// Import `name` into the current function, declaring it on first use
    fn callee(
        &mut self,
        name: &str,
        argc: usize,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<ir::FuncRef, LowerError> {
        if let Some(&func_ref) = self.callees.get(name) {
            return Ok(func_ref);
        }
        let arity = self
            .externs
            .get(name)
            .map(|ext| ext.arity)
            .ok_or_else(|| LowerError::UnknownExtern(name.to_string()))?;
        if arity != argc {
            return Err(LowerError::ExternArity {
                name: name.to_string(),
                expected: arity,
                got: argc,
            });
        }
        let call_conv = self.module.isa().default_call_conv();
        let sig = extern_signature(call_conv, arity);
        let func_id = self.module.declare_function(name, Linkage::Import, &sig)?;
        let func_ref = self.module.declare_func_in_func(func_id, builder.func);
        self.callees.insert(name.to_string(), func_ref);
        Ok(func_ref)
    }

    fn lower_terminator(
        &self,
        id: JitBlockId,
        terminator: &JitTerminator,
        builder: &mut FunctionBuilder<'_>,
    ) -> Result<(), LowerError> {
        match terminator {
            JitTerminator::Jump(target) => {
                builder.ins().jump(self.block_map[target], &[]);
            }
            JitTerminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let c = self.use_reg(builder, *cond);
                builder.ins().brif(
                    c,
                    self.block_map[then_block],
                    &[],
                    self.block_map[else_block],
                    &[],
                );
            }
            JitTerminator::Switch {
                value,
                cases,
                default,
            } => {
                let v = self.use_reg(builder, *value);
                let mut switch = Switch::new();
                for (key, target) in cases {
                    switch.set_entry(*key as u128, self.block_map[target]);
                }
                switch.emit(builder, v, self.block_map[default]);
            }
            JitTerminator::Return(reg) => {
                let v = self.use_reg(builder, *reg);
                builder.ins().return_(&[v]);
            }
            JitTerminator::Unreachable => {
                let code =
                    TrapCode::user(UNREACHABLE_TRAP).ok_or(LowerError::TrapCode(UNREACHABLE_TRAP))?;
                builder.ins().trap(code);
            }
            JitTerminator::None => return Err(LowerError::MissingTerminator(id)),
        }
        Ok(())
    }
}
