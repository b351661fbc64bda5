//! CFG compiler
//!
//! Walks the block table recursively from position 0, threading an explicit
//! operand stack through the blocks. A value left on the stack across a
//! forward edge is queued on the destination block; the destination turns
//! its queue into a phi when it is entered, and edges discovered after that
//! extend the phi directly. Backward edges never register incoming values:
//! a loop header sees only the values of the path that entered it first.

pub mod lowering;
pub mod stack;

use basalt_bytecode::{
    disassemble, BranchKind, ControlKind, DecodeError, DecodedInstr, ExitKind, InstructionSeq,
};
use tracing::{debug, trace, warn};

use crate::analysis::{block_starts, ControlFlowGraph};
use crate::error::CompileError;
use crate::ir::{JitBlockId, JitBuilder, JitFunction, JitTerminator, Reg};
use crate::runtime::ExternTable;

pub use lowering::{OpcodeLowering, StandardLowering};
pub use stack::OperandStack;

/// Compiler-facing options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Log a disassembly and the block table before failing on an
    /// unsupported instruction
    pub disasm_on_unsupported: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            disasm_on_unsupported: true,
        }
    }
}

/// Finished IR for one method
#[derive(Debug, Clone)]
pub struct IrModule {
    pub function: JitFunction,
    pub cfg: ControlFlowGraph,
}

impl IrModule {
    /// Incoming pair count of the merge node of the block at `start`
    pub fn merge_incoming(&self, start: usize) -> Option<usize> {
        let block = self.cfg.block(start)?;
        block.merge_node?;
        Some(block.incoming_len(&self.function))
    }

    /// Starts of every block that was compiled
    pub fn compiled_starts(&self) -> Vec<usize> {
        self.cfg
            .blocks()
            .iter()
            .filter(|b| b.compiled)
            .map(|b| b.start)
            .collect()
    }
}

/// Compile `iseq` into an IR module
pub fn compile(
    iseq: &InstructionSeq,
    externs: &ExternTable,
    lowering: &dyn OpcodeLowering,
    options: &CompileOptions,
) -> Result<IrModule, CompileError> {
    CfgCompiler::new(iseq, externs, lowering, options.clone()).compile()
}

/// Per-method compile state
pub struct CfgCompiler<'a> {
    iseq: &'a InstructionSeq,
    lowering: &'a dyn OpcodeLowering,
    options: CompileOptions,
    builder: JitBuilder<'a>,
    cfg: ControlFlowGraph,
    /// Target for a branch whose fallthrough runs off the end of the stream
    unreachable: Option<JitBlockId>,
}

impl<'a> CfgCompiler<'a> {
    /// Run boundary analysis and allocate the block table
    pub fn new(
        iseq: &'a InstructionSeq,
        externs: &'a ExternTable,
        lowering: &'a dyn OpcodeLowering,
        options: CompileOptions,
    ) -> Self {
        let func = JitFunction::new(iseq.name(), iseq.param_count(), iseq.local_count());
        let mut builder = JitBuilder::new(func, externs);
        let starts = block_starts(iseq);
        let cfg = ControlFlowGraph::build(&starts, iseq.len(), &mut builder);
        CfgCompiler {
            iseq,
            lowering,
            options,
            builder,
            cfg,
            unreachable: None,
        }
    }

    /// Emit the prologue and compile everything reachable from position 0
    pub fn compile(mut self) -> Result<IrModule, CompileError> {
        let entry = self.builder.func().entry;
        self.builder.switch_to_block(entry);
        self.lowering.prologue(self.iseq, &mut self.builder)?;
        let first = self.handle(0, 0)?;
        self.builder.terminate(JitTerminator::Jump(first));

        let stack = OperandStack::new(self.iseq.stack_max());
        self.compile_block(0, stack)?;

        let function = self.builder.finish();
        debug!(
            target: "basalt::jit::compile",
            name = %function.name,
            blocks = self.cfg.len(),
            compiled = self.cfg.blocks().iter().filter(|b| b.compiled).count(),
            phis = function.phi_count(),
            "compiled method"
        );
        Ok(IrModule {
            function,
            cfg: self.cfg,
        })
    }

    fn handle(&self, start: usize, from: usize) -> Result<JitBlockId, CompileError> {
        self.cfg
            .block(start)
            .map(|b| b.handle)
            .ok_or(CompileError::Decode(DecodeError::InvalidJumpTarget {
                target: start as i64,
                position: from,
            }))
    }

    /// Handle of the block at `start`, or a trap block if `start` is the
    /// end of the stream
    fn successor_handle(&mut self, start: usize, from: usize) -> Result<JitBlockId, CompileError> {
        if start < self.iseq.len() {
            return self.handle(start, from);
        }
        if let Some(block) = self.unreachable {
            return Ok(block);
        }
        let current = self.builder.current_block();
        let block = self.builder.create_block();
        self.builder.switch_to_block(block);
        self.builder.terminate(JitTerminator::Unreachable);
        self.builder.switch_to_block(current);
        self.unreachable = Some(block);
        Ok(block)
    }

    fn compile_block(&mut self, start: usize, mut stack: OperandStack) -> Result<(), CompileError> {
        let iseq = self.iseq;
        let Some(block) = self.cfg.block_mut(start) else {
            // fallthrough past the end of the stream
            return Ok(());
        };
        if block.compiled {
            return Ok(());
        }
        block.compiled = true;
        let pending = std::mem::take(&mut block.pending_incoming);
        // Only a back edge enters with a value and nothing queued
        let live_entry = pending.is_empty() && !stack.is_empty();
        if block.carries_value.is_none() {
            block.carries_value = Some(!pending.is_empty() || live_entry);
        }
        let (handle, end) = (block.handle, block.end);

        self.builder.switch_to_block(handle);
        trace!(
            target: "basalt::jit::compile",
            start,
            end,
            %handle,
            depth = stack.len(),
            incoming = pending.len(),
            "enter block"
        );

        if !pending.is_empty() || live_entry {
            if live_entry {
                // The merge node takes the entry value's slot; back edges add no pair
                stack.pop()?;
            }
            let sources = pending.into_iter().map(|(value, pred)| (pred, value)).collect();
            let phi = self.builder.phi(sources);
            if let Some(block) = self.cfg.block_mut(start) {
                block.merge_node = Some(phi);
            }
            stack.push(phi)?;
        }

        for instr in iseq.instructions_in(start..=end) {
            trace!(
                target: "basalt::jit::compile",
                position = instr.position,
                opcode = instr.opcode.name(),
                depth = stack.len(),
                "lower"
            );
            let Some(kind) = instr.opcode.control_kind() else {
                self.lower(instr, &mut stack)?;
                continue;
            };
            return match kind {
                ControlKind::Jump => {
                    let dest = self.jump_target(instr)?;
                    self.compile_jump(instr.position, dest, stack)
                }
                ControlKind::Branch(kind) => self.compile_branch(instr, kind, stack),
                ControlKind::Dispatch => self.compile_dispatch(instr, stack),
                ControlKind::Exit(kind) => self.compile_exit(instr, kind, stack),
            };
        }

        match self.cfg.following(start) {
            Some(next) => self.compile_jump(end, next, stack),
            None => {
                self.builder.terminate(JitTerminator::Unreachable);
                Ok(())
            }
        }
    }

    fn lower(&mut self, instr: &DecodedInstr, stack: &mut OperandStack) -> Result<(), CompileError> {
        let result = self.lowering.lower(instr, stack, &mut self.builder);
        if let Err(CompileError::UnsupportedInstruction { opcode, position }) = &result {
            if self.options.disasm_on_unsupported {
                warn!(
                    target: "basalt::jit::compile",
                    opcode = opcode.name(),
                    position,
                    "unsupported instruction\n{}block starts: {:?}\n{}",
                    disassemble(self.iseq),
                    self.cfg.starts(),
                    self.cfg.dump()
                );
            }
        }
        result
    }

    fn jump_target(&self, instr: &DecodedInstr) -> Result<usize, CompileError> {
        instr.jump_target().ok_or(CompileError::Decode(DecodeError::InvalidJumpTarget {
            target: instr.jump_targets().next().flatten().unwrap_or(i64::MAX),
            position: instr.position,
        }))
    }

    /// Record the edge `pred -> dest` created by the instruction at `from`.
    /// A forward edge pops the top of `stack` (if any) as the incoming value.
    fn record_edge(
        &mut self,
        from: usize,
        pred: JitBlockId,
        dest: usize,
        stack: &mut OperandStack,
    ) -> Result<(), CompileError> {
        if dest <= from {
            trace!(target: "basalt::jit::compile", from, dest, "backward edge");
            return Ok(());
        }
        let value: Option<Reg> = if stack.is_empty() {
            None
        } else {
            Some(stack.pop()?)
        };
        let Some(block) = self.cfg.block_mut(dest) else {
            return Ok(());
        };

        let carries = value.is_some();
        if *block.carries_value.get_or_insert(carries) != carries {
            return Err(CompileError::InconsistentMerge {
                position: dest,
                from,
            });
        }
        let Some(value) = value else {
            return Ok(());
        };

        match block.merge_node {
            Some(phi) => {
                let handle = block.handle;
                if !self.builder.add_phi_incoming(handle, phi, pred, value) {
                    return Err(CompileError::InconsistentMerge {
                        position: dest,
                        from,
                    });
                }
            }
            None if block.compiled => {
                return Err(CompileError::InconsistentMerge {
                    position: dest,
                    from,
                });
            }
            None => block.pending_incoming.push((value, pred)),
        }
        trace!(target: "basalt::jit::compile", from, dest, %value, %pred, "incoming");
        Ok(())
    }

    fn compile_jump(
        &mut self,
        from: usize,
        dest: usize,
        mut stack: OperandStack,
    ) -> Result<(), CompileError> {
        let pred = self.builder.current_block();
        let handle = self.handle(dest, from)?;
        self.record_edge(from, pred, dest, &mut stack)?;
        self.builder.terminate(JitTerminator::Jump(handle));
        self.compile_block(dest, stack)
    }

    fn compile_branch(
        &mut self,
        instr: &DecodedInstr,
        kind: BranchKind,
        mut stack: OperandStack,
    ) -> Result<(), CompileError> {
        let value = stack.pop()?;
        let cond = self.lowering.branch_condition(kind, value, &mut self.builder)?;
        let dest = self.jump_target(instr)?;
        let fallthrough = instr.next_position();

        let pred = self.builder.current_block();
        let then_block = self.handle(dest, instr.position)?;
        let else_block = self.successor_handle(fallthrough, instr.position)?;
        self.builder.terminate(JitTerminator::Branch {
            cond,
            then_block,
            else_block,
        });

        self.compile_successors(instr.position, pred, &[fallthrough, dest], &stack)
    }

    fn compile_dispatch(
        &mut self,
        instr: &DecodedInstr,
        mut stack: OperandStack,
    ) -> Result<(), CompileError> {
        let key = stack.pop()?;
        let (cases, default) = instr.dispatch_table().ok_or(CompileError::Decode(
            DecodeError::Truncated {
                position: instr.position,
            },
        ))?;

        let pred = self.builder.current_block();
        let mut switch_cases = Vec::with_capacity(cases.len());
        for &(value, target) in &cases {
            switch_cases.push((value.bits(), self.handle(target, instr.position)?));
        }
        let default_block = self.handle(default, instr.position)?;
        self.builder.terminate(JitTerminator::Switch {
            value: key,
            cases: switch_cases,
            default: default_block,
        });

        let mut successors = Vec::with_capacity(cases.len() + 1);
        successors.push(default);
        successors.extend(cases.iter().map(|&(_, target)| target));
        self.compile_successors(instr.position, pred, &successors, &stack)
    }

    /// Visit successors in order, each with its own copy of `snapshot`
    fn compile_successors(
        &mut self,
        from: usize,
        pred: JitBlockId,
        successors: &[usize],
        snapshot: &OperandStack,
    ) -> Result<(), CompileError> {
        for &succ in successors {
            let mut arm = snapshot.clone();
            self.record_edge(from, pred, succ, &mut arm)?;
            self.compile_block(succ, arm)?;
        }
        Ok(())
    }

    fn compile_exit(
        &mut self,
        instr: &DecodedInstr,
        kind: ExitKind,
        mut stack: OperandStack,
    ) -> Result<(), CompileError> {
        if stack.len() != 1 {
            return Err(CompileError::UnexpectedStackDepth {
                depth: stack.len(),
                opcode: instr.opcode,
                position: instr.position,
            });
        }
        let value = stack.pop()?;
        let result = self.lowering.exit_value(kind, instr, value, &mut self.builder)?;
        self.builder.terminate(JitTerminator::Return(result));
        Ok(())
    }
}
