//! Cranelift code generation backend
//!
//! Implements `CodegenBackend` using Cranelift to produce native code from
//! JIT IR. Each function gets its own `JITModule` with every extern
//! registered as a symbol; the module is owned by the returned
//! [`CompiledCode`] and its memory is released when that is dropped.

pub mod lowering;

use std::sync::Arc;

use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use target_lexicon::Architecture;
use tracing::debug;

use self::lowering::{jit_entry_signature, LoweringContext};
use super::traits::*;
use crate::ir::JitFunction;
use crate::runtime::ExternTable;

/// Cranelift optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    fn as_flag(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Owns the executable memory of one compiled function
struct ModuleCode {
    module: Option<JITModule>,
}

impl Drop for ModuleCode {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the entry pointer lives in the CompiledCode that owns
            // this value, so no code from the module can run past this point.
            unsafe { module.free_memory() };
        }
    }
}

/// Cranelift-based code generation backend
pub struct CraneliftBackend {
    /// The target ISA (instruction set architecture)
    isa: Arc<dyn TargetIsa>,
}

impl CraneliftBackend {
    /// Create a backend targeting the host machine
    pub fn host(opt_level: OptLevel, verify: bool) -> Result<Self, CodegenError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", opt_level.as_flag())
            .map_err(|e| CodegenError::BackendError(format!("Failed to set opt_level: {}", e)))?;
        flag_builder
            .set("enable_verifier", if verify { "true" } else { "false" })
            .map_err(|e| {
                CodegenError::BackendError(format!("Failed to set enable_verifier: {}", e))
            })?;
        // The JIT linker patches absolute addresses of the externs
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| {
                CodegenError::BackendError(format!("Failed to set use_colocated_libcalls: {}", e))
            })?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| CodegenError::BackendError(format!("Failed to set is_pic: {}", e)))?;

        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|e| {
                CodegenError::BackendError(format!("Failed to create native ISA builder: {}", e))
            })?
            .finish(flags)
            .map_err(|e| CodegenError::BackendError(format!("Failed to finish ISA: {}", e)))?;

        Ok(CraneliftBackend { isa })
    }

    /// Create a backend with a specific ISA
    pub fn with_isa(isa: Arc<dyn TargetIsa>) -> Self {
        CraneliftBackend { isa }
    }

    fn new_module(&self, externs: &ExternTable) -> JITModule {
        let mut builder =
            JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        for ext in externs.iter() {
            builder.symbol(ext.name.clone(), ext.address);
        }
        JITModule::new(builder)
    }
}

fn module_error(e: cranelift_module::ModuleError) -> CodegenError {
    CodegenError::Module(e.to_string())
}

impl CodegenBackend for CraneliftBackend {
    fn name(&self) -> &str {
        "cranelift"
    }

    fn compile_function(
        &self,
        func: &JitFunction,
        externs: &ExternTable,
    ) -> Result<CompiledCode, CodegenError> {
        let mut module = self.new_module(externs);
        let mut codegen_ctx = module.make_context();
        let mut func_builder_ctx = FunctionBuilderContext::new();

        let signature = jit_entry_signature(self.isa.default_call_conv());
        let func_id = module
            .declare_function(&func.name, Linkage::Export, &signature)
            .map_err(module_error)?;
        codegen_ctx.func.signature = signature;

        {
            let builder = FunctionBuilder::new(&mut codegen_ctx.func, &mut func_builder_ctx);
            LoweringContext::lower(func, externs, &mut module, builder).map_err(|e| {
                CodegenError::Lowering {
                    function: func.name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        module
            .define_function(func_id, &mut codegen_ctx)
            .map_err(module_error)?;
        let code_size = codegen_ctx
            .compiled_code()
            .map_or(0, |code| code.code_buffer().len());
        module.clear_context(&mut codegen_ctx);
        module.finalize_definitions().map_err(module_error)?;

        let entry = module.get_finalized_function(func_id);
        debug!(
            target: "basalt::jit::codegen",
            name = %func.name,
            code_size,
            "finalized function"
        );

        Ok(CompiledCode::new(
            entry,
            code_size,
            Box::new(ModuleCode {
                module: Some(module),
            }),
        ))
    }

    fn target_info(&self) -> TargetInfo {
        let arch = match self.isa.triple().architecture {
            Architecture::X86_64 => TargetArch::X86_64,
            Architecture::Aarch64(_) => TargetArch::AArch64,
            _ => TargetArch::Other,
        };
        TargetInfo {
            arch,
            pointer_size: self.isa.pointer_bytes() as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JitInstr, JitTerminator, JitType};
    use crate::runtime::JitEntryFn;
    use basalt_bytecode::{method_id, Value};

    fn backend() -> CraneliftBackend {
        CraneliftBackend::host(OptLevel::Speed, true).unwrap()
    }

    fn call(code: &CompiledCode, recv: u64, args: &[u64]) -> u64 {
        let f: JitEntryFn = unsafe { std::mem::transmute(code.entry) };
        unsafe { f(recv, args.as_ptr()) }
    }

    #[test]
    fn test_cranelift_backend_creation() {
        let backend = backend();
        assert_eq!(backend.name(), "cranelift");
        let info = backend.target_info();
        assert_eq!(info.pointer_size, 8);
    }

    #[test]
    fn test_compile_constant_return() {
        let mut func = JitFunction::new("const", 0, 0);
        let entry = func.add_block();
        let r0 = func.alloc_reg(JitType::Value);
        func.block_mut(entry).instrs.push(JitInstr::Const {
            dest: r0,
            value: Value::fixnum(42).bits(),
        });
        func.block_mut(entry).terminator = JitTerminator::Return(r0);

        let code = backend()
            .compile_function(&func, &ExternTable::new())
            .unwrap();
        assert!(code.code_size > 0);
        assert_eq!(Value(call(&code, Value::NIL.bits(), &[])), Value::fixnum(42));
    }

    #[test]
    fn test_compile_extern_call_with_args() {
        let mut func = JitFunction::new("add", 1, 0);
        let entry = func.add_block();
        let recv = func.alloc_reg(JitType::Value);
        let arg = func.alloc_reg(JitType::Value);
        let mid = func.alloc_reg(JitType::Value);
        let sum = func.alloc_reg(JitType::Value);
        let block = func.block_mut(entry);
        block.instrs.push(JitInstr::SelfValue { dest: recv });
        block.instrs.push(JitInstr::Arg { dest: arg, index: 0 });
        block.instrs.push(JitInstr::Const {
            dest: mid,
            value: method_id::PLUS,
        });
        block.instrs.push(JitInstr::Call {
            dest: sum,
            callee: "basalt_funcall_1".into(),
            args: vec![recv, mid, arg],
        });
        block.terminator = JitTerminator::Return(sum);

        let code = backend()
            .compile_function(&func, &ExternTable::standard())
            .unwrap();
        let result = call(
            &code,
            Value::fixnum(40).bits(),
            &[Value::fixnum(2).bits()],
        );
        assert_eq!(Value(result), Value::fixnum(42));
    }

    #[test]
    fn test_unknown_extern_is_lowering_error() {
        let mut func = JitFunction::new("bad", 0, 0);
        let entry = func.add_block();
        let r0 = func.alloc_reg(JitType::Value);
        func.block_mut(entry).instrs.push(JitInstr::Call {
            dest: r0,
            callee: "missing".into(),
            args: vec![],
        });
        func.block_mut(entry).terminator = JitTerminator::Return(r0);

        let err = backend()
            .compile_function(&func, &ExternTable::new())
            .unwrap_err();
        assert!(matches!(err, CodegenError::Lowering { .. }));
    }

    #[test]
    fn test_phi_copies_and_branch() {
        // bb0: c = (arg0 == nil); br c, bb1, bb2
        // bb1: r = 1; jmp bb3
        // bb2: r = 2; jmp bb3
        // bb3: p = phi [bb1: r1, bb2: r2]; ret p
        let mut func = JitFunction::new("select", 1, 0);
        let b0 = func.add_block();
        let b1 = func.add_block();
        let b2 = func.add_block();
        let b3 = func.add_block();
        let arg = func.alloc_reg(JitType::Value);
        let nil = func.alloc_reg(JitType::Value);
        let cond = func.alloc_reg(JitType::Bool);
        let one = func.alloc_reg(JitType::Value);
        let two = func.alloc_reg(JitType::Value);
        let phi = func.alloc_reg(JitType::Value);

        let block = func.block_mut(b0);
        block.instrs.push(JitInstr::Arg { dest: arg, index: 0 });
        block.instrs.push(JitInstr::Const {
            dest: nil,
            value: Value::NIL.bits(),
        });
        block.instrs.push(JitInstr::ICmpEq {
            dest: cond,
            left: arg,
            right: nil,
        });
        block.terminator = JitTerminator::Branch {
            cond,
            then_block: b1,
            else_block: b2,
        };
        func.block_mut(b1).instrs.push(JitInstr::Const {
            dest: one,
            value: Value::fixnum(1).bits(),
        });
        func.block_mut(b1).terminator = JitTerminator::Jump(b3);
        func.block_mut(b2).instrs.push(JitInstr::Const {
            dest: two,
            value: Value::fixnum(2).bits(),
        });
        func.block_mut(b2).terminator = JitTerminator::Jump(b3);
        func.block_mut(b3).instrs.push(JitInstr::Phi {
            dest: phi,
            sources: vec![(b1, one), (b2, two)],
        });
        func.block_mut(b3).terminator = JitTerminator::Return(phi);

        let code = backend()
            .compile_function(&func, &ExternTable::new())
            .unwrap();
        let recv = Value::NIL.bits();
        assert_eq!(Value(call(&code, recv, &[Value::NIL.bits()])), Value::fixnum(1));
        assert_eq!(Value(call(&code, recv, &[Value::TRUE.bits()])), Value::fixnum(2));
    }
}
