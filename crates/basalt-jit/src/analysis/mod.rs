//! Bytecode analysis: block boundaries and the block table

pub mod boundaries;
pub mod cfg;

pub use boundaries::block_starts;
pub use cfg::{BasicBlock, ControlFlowGraph};
