//! Top-level JIT engine: configuration, compilation, and invocation of
//! compiled methods.

use basalt_bytecode::{InstructionSeq, Value};
use tracing::debug;

use crate::backend::{CodegenBackend, CompiledCode, CraneliftBackend, OptLevel};
use crate::compiler::CompileOptions;
use crate::ir::JitFunction;
use crate::pipeline::{JitError, JitPipeline};
use crate::runtime::{take_pending_exception, ExternTable, JitEntryFn};

/// Configuration for the JIT engine
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Cranelift optimization level (default: speed)
    pub opt_level: OptLevel,
    /// Run the Cranelift verifier on every function (default: on in debug builds)
    pub verify: bool,
    /// Log the IR of every compiled method at debug level
    pub dump_ir: bool,
    /// Log a disassembly before failing on an unsupported instruction
    pub disasm_on_unsupported: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            opt_level: OptLevel::Speed,
            verify: cfg!(debug_assertions),
            dump_ir: false,
            disasm_on_unsupported: true,
        }
    }
}

/// Top-level JIT engine
pub struct JitEngine {
    pipeline: JitPipeline<CraneliftBackend>,
    config: JitConfig,
}

impl JitEngine {
    /// Create a new JIT engine with default configuration
    pub fn new() -> Result<Self, JitError> {
        Self::with_config(JitConfig::default())
    }

    /// Create a new JIT engine with custom configuration
    pub fn with_config(config: JitConfig) -> Result<Self, JitError> {
        let backend = CraneliftBackend::host(config.opt_level, config.verify)?;
        let pipeline = JitPipeline::new(backend).with_options(CompileOptions {
            disasm_on_unsupported: config.disasm_on_unsupported,
        });
        Ok(JitEngine { pipeline, config })
    }

    /// Replace the host functions compiled code may call
    pub fn with_externs(mut self, externs: ExternTable) -> Self {
        self.pipeline = self.pipeline.with_externs(externs);
        self
    }

    /// Compile a method to native code
    pub fn compile(&self, iseq: &InstructionSeq) -> Result<CompiledMethod, JitError> {
        let (module, code) = self.pipeline.compile(iseq)?;
        if self.config.dump_ir {
            debug!(target: "basalt::jit::engine", "{}", module.function);
        }
        debug!(
            target: "basalt::jit::engine",
            name = iseq.name(),
            backend = self.pipeline.backend().name(),
            code_size = code.code_size,
            "compiled"
        );
        Ok(CompiledMethod {
            function: module.function,
            code,
        })
    }

    /// Get a reference to the compilation pipeline
    pub fn pipeline(&self) -> &JitPipeline<CraneliftBackend> {
        &self.pipeline
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }
}

/// A natively compiled method
#[derive(Debug)]
pub struct CompiledMethod {
    function: JitFunction,
    code: CompiledCode,
}

impl CompiledMethod {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn param_count(&self) -> usize {
        self.function.param_count
    }

    /// IR the native code was generated from
    pub fn ir(&self) -> &JitFunction {
        &self.function
    }

    pub fn code_size(&self) -> usize {
        self.code.code_size
    }

    /// Call the method. A method that threw returns `undef`; the thrown
    /// value is then available from [`take_pending_exception`].
    pub fn invoke(&self, recv: Value, args: &[Value]) -> Result<Value, JitError> {
        if args.len() != self.param_count() {
            return Err(JitError::ArityMismatch {
                name: self.function.name.clone(),
                expected: self.param_count(),
                got: args.len(),
            });
        }
        // Drop anything left over from an earlier call on this thread
        let _ = take_pending_exception();

        let words: Vec<u64> = args.iter().map(|v| v.bits()).collect();
        // SAFETY: `entry` was produced by the backend for the JitEntryFn
        // signature and stays valid while `self.code` is alive.
        let result = unsafe {
            let entry: JitEntryFn = std::mem::transmute(self.code.entry);
            entry(recv.bits(), words.as_ptr())
        };
        Ok(Value(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_bytecode::IseqBuilder;

    #[test]
    fn test_engine_creation() {
        let engine = JitEngine::new().unwrap();
        assert_eq!(engine.pipeline().backend().name(), "cranelift");
        assert!(engine.config().disasm_on_unsupported);
    }

    #[test]
    fn test_engine_with_config() {
        let config = JitConfig {
            opt_level: OptLevel::None,
            verify: true,
            dump_ir: true,
            ..Default::default()
        };
        let engine = JitEngine::with_config(config).unwrap();
        assert_eq!(engine.config().opt_level, OptLevel::None);

        let mut b = IseqBuilder::new("answer");
        b.putobject(Value::fixnum(42)).leave();
        let method = engine.compile(&b.build().unwrap()).unwrap();
        assert_eq!(method.name(), "answer");
        assert!(method.code_size() > 0);
        assert_eq!(method.invoke(Value::NIL, &[]).unwrap(), Value::fixnum(42));
    }

    #[test]
    fn test_arity_mismatch() {
        let engine = JitEngine::new().unwrap();
        let mut b = IseqBuilder::new("id").frame(1, 1);
        b.getlocal(0).leave();
        let method = engine.compile(&b.build().unwrap()).unwrap();

        let err = method.invoke(Value::NIL, &[]).unwrap_err();
        assert!(matches!(
            err,
            JitError::ArityMismatch {
                expected: 1,
                got: 0,
                ..
            }
        ));
        assert_eq!(
            method.invoke(Value::NIL, &[Value::TRUE]).unwrap(),
            Value::TRUE
        );
    }
}
