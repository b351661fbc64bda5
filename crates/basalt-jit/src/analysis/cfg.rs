//! Block table construction
//!
//! One [`BasicBlock`] per start position, created in bulk before any
//! instruction is lowered so forward branches always find their target.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ir::{JitBlockId, JitBuilder, Reg};

/// A basic block in the bytecode, keyed by its start position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Position of the first instruction
    pub start: usize,
    /// Inclusive last word of the block
    pub end: usize,
    /// IR block that receives this block's code
    pub handle: JitBlockId,
    /// Phi joining the incoming top-of-stack values, once materialized
    pub merge_node: Option<Reg>,
    /// Incoming (value, predecessor) pairs recorded before the merge node exists
    pub pending_incoming: Vec<(Reg, JitBlockId)>,
    pub compiled: bool,
    /// Whether forward edges into this block carry a stack value.
    /// Fixed by the first edge or by entering the block.
    pub carries_value: Option<bool>,
}

impl BasicBlock {
    /// Number of incoming pairs known for this block, queued or merged
    pub fn incoming_len(&self, func: &crate::ir::JitFunction) -> usize {
        match self.merge_node {
            Some(phi) => func.phi_sources(self.handle, phi).map_or(0, |s| s.len()),
            None => self.pending_incoming.len(),
        }
    }
}

/// Mapping from start position to block
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    /// Map from position to the index of the block that starts there
    index: FxHashMap<usize, usize>,
}

impl ControlFlowGraph {
    /// Allocate one block per start. `starts` must be ascending and begin
    /// with 0; `stream_len` must exceed the last start.
    pub fn build(starts: &[usize], stream_len: usize, builder: &mut JitBuilder<'_>) -> Self {
        let mut blocks = Vec::with_capacity(starts.len());
        let mut index = FxHashMap::default();

        for (i, &start) in starts.iter().enumerate() {
            let end = match starts.get(i + 1) {
                Some(&next) => next - 1,
                None => stream_len - 1,
            };
            let handle = builder.create_block();
            trace!(target: "basalt::jit::cfg", start, end, %handle, "block");
            index.insert(start, i);
            blocks.push(BasicBlock {
                start,
                end,
                handle,
                merge_node: None,
                pending_incoming: Vec::new(),
                compiled: false,
                carries_value: None,
            });
        }

        Self { blocks, index }
    }

    pub fn block(&self, start: usize) -> Option<&BasicBlock> {
        self.index.get(&start).map(|&i| &self.blocks[i])
    }

    pub fn block_mut(&mut self, start: usize) -> Option<&mut BasicBlock> {
        self.index.get(&start).map(|&i| &mut self.blocks[i])
    }

    /// Start of the block textually following the one at `start`
    pub fn following(&self, start: usize) -> Option<usize> {
        let i = *self.index.get(&start)?;
        self.blocks.get(i + 1).map(|b| b.start)
    }

    /// Blocks in ascending start order
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn starts(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.start).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// `start..=end` ranges, one per line, for diagnostics
    pub fn dump(&self) -> String {
        let mut out = String::from("basic blocks:\n");
        for b in &self.blocks {
            out.push_str(&format!("  {:04}..={:04} -> {}\n", b.start, b.end, b.handle));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::JitFunction;
    use crate::runtime::ExternTable;

    fn build(starts: &[usize], len: usize) -> ControlFlowGraph {
        let externs = ExternTable::new();
        let mut builder = JitBuilder::new(JitFunction::new("f", 0, 0), &externs);
        ControlFlowGraph::build(starts, len, &mut builder)
    }

    #[test]
    fn test_block_ends() {
        let cfg = build(&[0, 4, 8, 10], 11);
        let ends: Vec<_> = cfg.blocks().iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ends, vec![(0, 3), (4, 7), (8, 9), (10, 10)]);
    }

    #[test]
    fn test_single_block() {
        let cfg = build(&[0], 6);
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.block(0).map(|b| b.end), Some(5));
        assert_eq!(cfg.following(0), None);
    }

    #[test]
    fn test_fresh_state_and_handles() {
        let cfg = build(&[0, 3], 5);
        let a = cfg.block(0).unwrap();
        let b = cfg.block(3).unwrap();
        assert_ne!(a.handle, b.handle);
        for block in cfg.blocks() {
            assert!(!block.compiled);
            assert!(block.merge_node.is_none());
            assert!(block.pending_incoming.is_empty());
            assert!(block.carries_value.is_none());
        }
        assert_eq!(cfg.following(0), Some(3));
        assert!(cfg.block(1).is_none());
    }

    #[test]
    fn test_deterministic_table() {
        let a = build(&[0, 2, 9], 12);
        let b = build(&[0, 2, 9], 12);
        assert_eq!(a.blocks(), b.blocks());
    }

    #[test]
    fn test_dump() {
        let cfg = build(&[0, 2], 4);
        assert_eq!(cfg.dump(), "basic blocks:\n  0000..=0001 -> bb1\n  0002..=0003 -> bb2\n");
    }
}
