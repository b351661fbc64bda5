//! Backend-agnostic code generation traits
//!
//! A backend turns a finished [`JitFunction`] into callable native code. The
//! extern table supplies the host address of every function the IR calls.

use std::any::Any;

use crate::ir::JitFunction;
use crate::runtime::ExternTable;

/// Target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
    Other,
}

/// Target information
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub arch: TargetArch,
    pub pointer_size: usize,
}

/// Error during code generation
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("backend error: {0}")]
    BackendError(String),
    #[error("lowering failed in {function}: {reason}")]
    Lowering { function: String, reason: String },
    #[error("module error: {0}")]
    Module(String),
}

/// Finalized native code for one function.
///
/// `owner` keeps the executable memory alive; `entry` is only valid while
/// this value exists.
pub struct CompiledCode {
    /// Address of the function entry
    pub entry: *const u8,
    /// Size of the emitted machine code in bytes
    pub code_size: usize,
    owner: Box<dyn Any>,
}

impl CompiledCode {
    pub fn new(entry: *const u8, code_size: usize, owner: Box<dyn Any>) -> Self {
        CompiledCode {
            entry,
            code_size,
            owner,
        }
    }

    /// The object holding the code memory
    pub fn owner(&self) -> &dyn Any {
        self.owner.as_ref()
    }
}

impl std::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCode")
            .field("entry", &self.entry)
            .field("code_size", &self.code_size)
            .finish_non_exhaustive()
    }
}

/// The backend-agnostic code generation trait
///
/// The compilation pipeline is:
///   JitFunction → compile_function() → CompiledCode
pub trait CodegenBackend: Send + Sync {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Compile and finalize a JIT IR function. Every `Call` in `func` must
    /// name an entry of `externs`.
    fn compile_function(
        &self,
        func: &JitFunction,
        externs: &ExternTable,
    ) -> Result<CompiledCode, CodegenError>;

    /// Return target architecture information
    fn target_info(&self) -> TargetInfo;
}
