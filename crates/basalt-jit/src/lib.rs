//! Basalt JIT
//!
//! Compiles methods written in Basalt stack bytecode into an SSA control-flow
//! graph and, with the `jit` feature, into native code:
//! - **Analysis**: basic-block boundaries and the block table (`analysis`)
//! - **IR**: SSA-form JIT IR and its builder (`ir`)
//! - **Compiler**: the CFG compiler threading the operand stack through
//!   blocks, and the opcode lowering table (`compiler`)
//! - **Runtime**: host helpers and the extern registry (`runtime`)
//! - **Backend**: code generation trait and the Cranelift backend (`backend`)
//!
//! # Example
//!
//! ```rust,ignore
//! use basalt_bytecode::{IseqBuilder, Value};
//! use basalt_jit::JitEngine;
//!
//! let mut b = IseqBuilder::new("answer");
//! b.putobject(Value::fixnum(42)).leave();
//! let iseq = b.build()?;
//!
//! let engine = JitEngine::new()?;
//! let method = engine.compile(&iseq)?;
//! assert_eq!(method.invoke(Value::NIL, &[])?, Value::fixnum(42));
//! ```

#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod backend;
pub mod compiler;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod runtime;

#[cfg(feature = "jit")]
mod engine;

pub use compiler::{compile, CfgCompiler, CompileOptions, IrModule, OpcodeLowering, StandardLowering};
pub use error::CompileError;
pub use pipeline::{JitError, JitPipeline};
pub use runtime::{take_pending_exception, ExternTable};

#[cfg(feature = "jit")]
pub use engine::{CompiledMethod, JitConfig, JitEngine};
#[cfg(feature = "jit")]
pub use backend::{CraneliftBackend, OptLevel};
