//! Backend-agnostic code generation traits and implementations

#[cfg(feature = "jit")]
pub mod cranelift;
pub mod traits;

#[cfg(feature = "jit")]
pub use self::cranelift::{CraneliftBackend, OptLevel};
pub use traits::{CodegenBackend, CodegenError, CompiledCode, TargetArch, TargetInfo};
