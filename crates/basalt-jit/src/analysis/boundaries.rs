//! Basic-block boundary discovery
//!
//! A block starts at position 0, at every resolved jump-offset operand, and
//! right after every control transfer that is not the last instruction.

use std::collections::BTreeSet;

use basalt_bytecode::InstructionSeq;
use tracing::trace;

/// Sorted, deduplicated block start positions
pub fn block_starts(iseq: &InstructionSeq) -> Vec<usize> {
    let mut starts = BTreeSet::new();
    starts.insert(0);

    for instr in iseq.instructions() {
        for target in instr.jump_targets().flatten() {
            // validated on construction, so the conversion cannot fail
            if let Ok(target) = usize::try_from(target) {
                starts.insert(target);
            }
        }
        if instr.opcode.control_kind().is_some() && instr.next_position() < iseq.len() {
            starts.insert(instr.next_position());
        }
    }

    let starts: Vec<usize> = starts.into_iter().collect();
    trace!(target: "basalt::jit::boundaries", name = iseq.name(), ?starts, "block starts");
    starts
}
