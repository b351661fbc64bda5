//! Compilation pipeline: bytecode → JIT IR → backend
//!
//! The pipeline chains together all compilation stages:
//! 1. Find block boundaries and allocate the block table
//! 2. Compile the CFG, threading the operand stack into phis
//! 3. Lower to native code through the backend

use basalt_bytecode::InstructionSeq;

use crate::backend::{CodegenBackend, CodegenError, CompiledCode};
use crate::compiler::{self, CompileOptions, IrModule, OpcodeLowering, StandardLowering};
use crate::error::CompileError;
use crate::runtime::ExternTable;

/// Errors from the compilation pipeline
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
    #[error("{name} expects {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Complete JIT compilation pipeline
///
/// Chains: block starts → CFG compile → backend.compile_function()
pub struct JitPipeline<B: CodegenBackend> {
    backend: B,
    externs: ExternTable,
    lowering: Box<dyn OpcodeLowering + Send + Sync>,
    options: CompileOptions,
}

impl<B: CodegenBackend> JitPipeline<B> {
    /// Create a pipeline with the standard lowering and runtime helpers
    pub fn new(backend: B) -> Self {
        JitPipeline {
            backend,
            externs: ExternTable::standard(),
            lowering: Box::new(StandardLowering),
            options: CompileOptions::default(),
        }
    }

    /// Replace the extern table
    pub fn with_externs(mut self, externs: ExternTable) -> Self {
        self.externs = externs;
        self
    }

    /// Replace the opcode lowering
    pub fn with_lowering(mut self, lowering: Box<dyn OpcodeLowering + Send + Sync>) -> Self {
        self.lowering = lowering;
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile a method to IR without backend compilation
    pub fn compile_ir(&self, iseq: &InstructionSeq) -> Result<IrModule, JitError> {
        let module = compiler::compile(iseq, &self.externs, self.lowering.as_ref(), &self.options)?;
        Ok(module)
    }

    /// Compile a method through the full pipeline
    pub fn compile(&self, iseq: &InstructionSeq) -> Result<(IrModule, CompiledCode), JitError> {
        let module = self.compile_ir(iseq)?;
        let code = self
            .backend
            .compile_function(&module.function, &self.externs)?;
        Ok((module, code))
    }

    /// Get a reference to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn externs(&self) -> &ExternTable {
        &self.externs
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::{TargetArch, TargetInfo};
    use crate::ir::JitFunction;
    use basalt_bytecode::{IseqBuilder, Opcode, Value};

    /// Records what reaches the backend without generating code
    #[derive(Default)]
    struct RecordingBackend {
        calls: AtomicUsize,
    }

    impl CodegenBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        fn compile_function(
            &self,
            func: &JitFunction,
            _externs: &ExternTable,
        ) -> Result<CompiledCode, CodegenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompiledCode::new(
                std::ptr::null(),
                func.blocks.len(),
                Box::new(()),
            ))
        }

        fn target_info(&self) -> TargetInfo {
            TargetInfo {
                arch: TargetArch::Other,
                pointer_size: 8,
            }
        }
    }

    #[test]
    fn test_pipeline_reaches_backend() {
        let mut b = IseqBuilder::new("one");
        b.putobject(Value::fixnum(1)).leave();
        let iseq = b.build().unwrap();

        let pipeline = JitPipeline::new(RecordingBackend::default());
        let (module, code) = pipeline.compile(&iseq).unwrap();
        assert_eq!(module.function.name, "one");
        assert_eq!(code.code_size, module.function.blocks.len());
        assert_eq!(pipeline.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_compile_error_skips_backend() {
        let mut b = IseqBuilder::new("under").stack_max(1);
        b.pop().putnil().leave();
        let iseq = b.build().unwrap();

        let pipeline = JitPipeline::new(RecordingBackend::default());
        let err = pipeline.compile(&iseq).unwrap_err();
        assert!(matches!(
            err,
            JitError::Compile(CompileError::StackUnderflow { .. })
        ));
        assert_eq!(pipeline.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_custom_externs_are_used() {
        let mut b = IseqBuilder::new("add");
        b.putobject(Value::fixnum(1))
            .putobject(Value::fixnum(2))
            .emit(Opcode::OptPlus, &[])
            .leave();
        let iseq = b.build().unwrap();

        let pipeline =
            JitPipeline::new(RecordingBackend::default()).with_externs(ExternTable::new());
        let err = pipeline.compile_ir(&iseq).unwrap_err();
        assert!(matches!(
            err,
            JitError::Compile(CompileError::UnresolvedExternal { .. })
        ));
    }
}
