//! JIT IR instructions, blocks, and functions
//!
//! Instructions operate on virtual registers (Reg) in SSA form and are
//! grouped into basic blocks with explicit terminators. Stack values that
//! meet at a block boundary are joined with `Phi`.

use rustc_hash::{FxHashMap, FxHashSet};

use super::types::JitType;

/// Virtual register in the JIT IR (SSA form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JitBlockId(pub u32);

impl std::fmt::Display for JitBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A JIT IR instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitInstr {
    /// Tagged constant
    Const { dest: Reg, value: u64 },
    /// The receiver
    SelfValue { dest: Reg },
    /// Positional argument from the caller's argument vector
    Arg { dest: Reg, index: u32 },
    LoadLocal { dest: Reg, index: u32 },
    StoreLocal { index: u32, value: Reg },
    IAnd { dest: Reg, left: Reg, right: Reg },
    ICmpEq { dest: Reg, left: Reg, right: Reg },
    ICmpNe { dest: Reg, left: Reg, right: Reg },
    /// Call a registered extern
    Call {
        dest: Reg,
        callee: String,
        args: Vec<Reg>,
    },
    /// SSA merge; one source per incoming edge
    Phi {
        dest: Reg,
        sources: Vec<(JitBlockId, Reg)>,
    },
}

impl JitInstr {
    /// Get the destination register if this instruction produces a value
    pub fn dest(&self) -> Option<Reg> {
        match self {
            JitInstr::Const { dest, .. }
            | JitInstr::SelfValue { dest }
            | JitInstr::Arg { dest, .. }
            | JitInstr::LoadLocal { dest, .. }
            | JitInstr::IAnd { dest, .. }
            | JitInstr::ICmpEq { dest, .. }
            | JitInstr::ICmpNe { dest, .. }
            | JitInstr::Call { dest, .. }
            | JitInstr::Phi { dest, .. } => Some(*dest),
            JitInstr::StoreLocal { .. } => None,
        }
    }

    /// Registers read by this instruction
    pub fn uses(&self) -> Vec<Reg> {
        match self {
            JitInstr::Const { .. }
            | JitInstr::SelfValue { .. }
            | JitInstr::Arg { .. }
            | JitInstr::LoadLocal { .. } => vec![],
            JitInstr::StoreLocal { value, .. } => vec![*value],
            JitInstr::IAnd { left, right, .. }
            | JitInstr::ICmpEq { left, right, .. }
            | JitInstr::ICmpNe { left, right, .. } => vec![*left, *right],
            JitInstr::Call { args, .. } => args.clone(),
            JitInstr::Phi { sources, .. } => sources.iter().map(|(_, r)| *r).collect(),
        }
    }
}

/// A basic block in the JIT IR
#[derive(Debug, Clone)]
pub struct JitBlock {
    pub id: JitBlockId,
    pub instrs: Vec<JitInstr>,
    pub terminator: JitTerminator,
    pub predecessors: Vec<JitBlockId>,
}

/// How a JIT IR block terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitTerminator {
    /// Unconditional jump to target block
    Jump(JitBlockId),
    /// Conditional branch on a boolean register
    Branch {
        cond: Reg,
        then_block: JitBlockId,
        else_block: JitBlockId,
    },
    /// Multi-way branch on raw value bits
    Switch {
        value: Reg,
        cases: Vec<(u64, JitBlockId)>,
        default: JitBlockId,
    },
    /// Return a value to the caller
    Return(Reg),
    /// Control never reaches the end of this block
    Unreachable,
    /// Placeholder terminator (not yet assigned)
    None,
}

impl JitTerminator {
    /// Successor blocks in edge order, duplicates included
    pub fn successors(&self) -> Vec<JitBlockId> {
        match self {
            JitTerminator::Jump(target) => vec![*target],
            JitTerminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            JitTerminator::Switch { cases, default, .. } => {
                let mut succs = vec![*default];
                succs.extend(cases.iter().map(|(_, b)| *b));
                succs
            }
            JitTerminator::Return(_) | JitTerminator::Unreachable | JitTerminator::None => vec![],
        }
    }
}

/// A complete JIT IR function
#[derive(Debug, Clone)]
pub struct JitFunction {
    /// Function name (for debugging)
    pub name: String,
    /// Number of parameters
    pub param_count: usize,
    /// Number of local variables, parameters included
    pub local_count: usize,
    /// Basic blocks
    pub blocks: Vec<JitBlock>,
    /// Entry block
    pub entry: JitBlockId,
    /// Next available register number
    pub next_reg: u32,
    /// Type of each register
    pub reg_types: FxHashMap<Reg, JitType>,
}

impl JitFunction {
    /// Create a new empty function
    pub fn new(name: impl Into<String>, param_count: usize, local_count: usize) -> Self {
        JitFunction {
            name: name.into(),
            param_count,
            local_count,
            blocks: vec![],
            entry: JitBlockId(0),
            next_reg: 0,
            reg_types: FxHashMap::default(),
        }
    }

    /// Allocate a fresh virtual register with a given type
    pub fn alloc_reg(&mut self, ty: JitType) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        self.reg_types.insert(reg, ty);
        reg
    }

    /// Get the type of a register
    pub fn reg_type(&self, reg: Reg) -> JitType {
        self.reg_types.get(&reg).copied().unwrap_or(JitType::Value)
    }

    /// Get a block by ID
    pub fn block(&self, id: JitBlockId) -> &JitBlock {
        &self.blocks[id.0 as usize]
    }

    /// Get a mutable block by ID
    pub fn block_mut(&mut self, id: JitBlockId) -> &mut JitBlock {
        &mut self.blocks[id.0 as usize]
    }

    /// Add a new block and return its ID
    pub fn add_block(&mut self) -> JitBlockId {
        let id = JitBlockId(self.blocks.len() as u32);
        self.blocks.push(JitBlock {
            id,
            instrs: vec![],
            terminator: JitTerminator::None,
            predecessors: vec![],
        });
        id
    }

    /// Incoming list of the phi defining `dest` in `block`
    pub fn phi_sources_mut(
        &mut self,
        block: JitBlockId,
        dest: Reg,
    ) -> Option<&mut Vec<(JitBlockId, Reg)>> {
        self.block_mut(block)
            .instrs
            .iter_mut()
            .find_map(|instr| match instr {
                JitInstr::Phi { dest: d, sources } if *d == dest => Some(sources),
                _ => None,
            })
    }

    /// Incoming list of the phi defining `dest` in `block`
    pub fn phi_sources(&self, block: JitBlockId, dest: Reg) -> Option<&[(JitBlockId, Reg)]> {
        self.block(block).instrs.iter().find_map(|instr| match instr {
            JitInstr::Phi { dest: d, sources } if *d == dest => Some(sources.as_slice()),
            _ => None,
        })
    }

    /// Blocks reachable from the entry, in depth-first preorder
    pub fn reachable_blocks(&self) -> Vec<JitBlockId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut work = vec![self.entry];
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            let succs = self.block(id).terminator.successors();
            work.extend(succs.into_iter().rev());
        }
        order
    }

    /// Total number of phi nodes
    pub fn phi_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| &b.instrs)
            .filter(|i| matches!(i, JitInstr::Phi { .. }))
            .count()
    }
}
