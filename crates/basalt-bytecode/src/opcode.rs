//! Bytecode opcodes
//!
//! Each instruction is one opcode word followed by its operand words. Most
//! opcodes have a fixed operand layout (see [`Opcode::fixed_operands`]);
//! `opt_case_dispatch` is the only variable-length instruction.

/// Classification of a single operand word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Signed offset relative to the end of the instruction
    JumpOffset,
    /// Plain numeric literal (local index, argument count, table size)
    Literal,
    /// Tagged host value
    Value,
}

/// Polarity of a two-way conditional branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// Jump when the popped value is truthy
    If,
    /// Jump when the popped value is falsy
    Unless,
    /// Jump when the popped value is `nil`
    Nil,
}

/// Kind of non-local exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    /// Return the top of stack to the caller
    Leave,
    /// Raise the top of stack
    Throw,
}

/// How an instruction transfers control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Unconditional jump
    Jump,
    /// Two-way conditional branch
    Branch(BranchKind),
    /// Multi-way dispatch on a key
    Dispatch,
    /// Return or throw
    Exit(ExitKind),
}

/// Bytecode opcode enumeration
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0,
    /// Tracing hook (operand: event literal), no stack effect
    Trace = 1,
    /// Push `nil`
    PutNil = 2,
    /// Push the receiver
    PutSelf = 3,
    /// Push a host value (operand: value)
    PutObject = 4,
    /// Push fixnum 0
    PutObjectInt0 = 5,
    /// Push fixnum 1
    PutObjectInt1 = 6,
    /// Push a fresh string (operand: value)
    PutString = 7,
    /// Pop `count` values and push an array (operand: count)
    NewArray = 8,
    /// Pop top value
    Pop = 9,
    /// Duplicate top value
    Dup = 10,
    /// Swap top two values
    Swap = 11,
    /// Push local variable (operand: index)
    GetLocal = 12,
    /// Pop into local variable (operand: index)
    SetLocal = 13,
    /// Generic method call (operands: method id, argc)
    Send = 14,
    /// `a + b`
    OptPlus = 15,
    /// `a - b`
    OptMinus = 16,
    /// `a * b`
    OptMult = 17,
    /// `a < b`
    OptLt = 18,
    /// `a <= b`
    OptLe = 19,
    /// `a > b`
    OptGt = 20,
    /// `a >= b`
    OptGe = 21,
    /// `a == b`
    OptEq = 22,
    /// Return top of stack
    Leave = 23,
    /// Raise top of stack (operand: throw state)
    Throw = 24,
    /// Unconditional jump (operand: offset)
    Jump = 25,
    /// Pop, jump if truthy (operand: offset)
    BranchIf = 26,
    /// Pop, jump if falsy (operand: offset)
    BranchUnless = 27,
    /// Pop, jump if nil (operand: offset)
    BranchNil = 28,
    /// Pop key, jump through a key table (operands: count, pairs, else offset)
    CaseDispatch = 29,
}

const ALL_OPCODES: [Opcode; 30] = [
    Opcode::Nop,
    Opcode::Trace,
    Opcode::PutNil,
    Opcode::PutSelf,
    Opcode::PutObject,
    Opcode::PutObjectInt0,
    Opcode::PutObjectInt1,
    Opcode::PutString,
    Opcode::NewArray,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Swap,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::Send,
    Opcode::OptPlus,
    Opcode::OptMinus,
    Opcode::OptMult,
    Opcode::OptLt,
    Opcode::OptLe,
    Opcode::OptGt,
    Opcode::OptGe,
    Opcode::OptEq,
    Opcode::Leave,
    Opcode::Throw,
    Opcode::Jump,
    Opcode::BranchIf,
    Opcode::BranchUnless,
    Opcode::BranchNil,
    Opcode::CaseDispatch,
];

impl Opcode {
    /// Convert an opcode word to an Opcode
    pub fn from_word(word: u64) -> Option<Self> {
        usize::try_from(word)
            .ok()
            .and_then(|index| ALL_OPCODES.get(index).copied())
    }

    /// Convert Opcode to its encoded word
    pub fn to_word(self) -> u64 {
        self as u64
    }

    /// Every opcode, in encoding order
    pub fn all() -> &'static [Opcode] {
        &ALL_OPCODES
    }

    /// Get the mnemonic name of this opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Trace => "trace",
            Self::PutNil => "putnil",
            Self::PutSelf => "putself",
            Self::PutObject => "putobject",
            Self::PutObjectInt0 => "putobject_INT2FIX_0_",
            Self::PutObjectInt1 => "putobject_INT2FIX_1_",
            Self::PutString => "putstring",
            Self::NewArray => "newarray",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::GetLocal => "getlocal",
            Self::SetLocal => "setlocal",
            Self::Send => "send",
            Self::OptPlus => "opt_plus",
            Self::OptMinus => "opt_minus",
            Self::OptMult => "opt_mult",
            Self::OptLt => "opt_lt",
            Self::OptLe => "opt_le",
            Self::OptGt => "opt_gt",
            Self::OptGe => "opt_ge",
            Self::OptEq => "opt_eq",
            Self::Leave => "leave",
            Self::Throw => "throw",
            Self::Jump => "jump",
            Self::BranchIf => "branchif",
            Self::BranchUnless => "branchunless",
            Self::BranchNil => "branchnil",
            Self::CaseDispatch => "opt_case_dispatch",
        }
    }

    /// Operand layout for fixed-length opcodes, `None` for `opt_case_dispatch`
    pub fn fixed_operands(self) -> Option<&'static [OperandKind]> {
        use OperandKind::*;
        let layout: &'static [OperandKind] = match self {
            Self::Trace | Self::NewArray | Self::GetLocal | Self::SetLocal | Self::Throw => {
                &[Literal]
            }
            Self::PutObject | Self::PutString => &[Value],
            Self::Send => &[Value, Literal],
            Self::Jump | Self::BranchIf | Self::BranchUnless | Self::BranchNil => &[JumpOffset],
            Self::CaseDispatch => return None,
            _ => &[],
        };
        Some(layout)
    }

    /// How this opcode transfers control, `None` for straight-line opcodes
    pub fn control_kind(self) -> Option<ControlKind> {
        match self {
            Self::Jump => Some(ControlKind::Jump),
            Self::BranchIf => Some(ControlKind::Branch(BranchKind::If)),
            Self::BranchUnless => Some(ControlKind::Branch(BranchKind::Unless)),
            Self::BranchNil => Some(ControlKind::Branch(BranchKind::Nil)),
            Self::CaseDispatch => Some(ControlKind::Dispatch),
            Self::Leave => Some(ControlKind::Exit(ExitKind::Leave)),
            Self::Throw => Some(ControlKind::Exit(ExitKind::Throw)),
            _ => None,
        }
    }

    /// Check if this opcode ends a basic block
    pub fn is_terminator(self) -> bool {
        self.control_kind().is_some()
    }

    /// Stack effect `(pops, pushes)` for opcodes whose effect does not depend
    /// on operands. `send` and `newarray` pop a variable number of values.
    pub fn stack_effect(self) -> Option<(usize, usize)> {
        let effect = match self {
            Self::Nop | Self::Trace | Self::Jump => (0, 0),
            Self::PutNil
            | Self::PutSelf
            | Self::PutObject
            | Self::PutObjectInt0
            | Self::PutObjectInt1
            | Self::PutString
            | Self::GetLocal => (0, 1),
            Self::Pop | Self::SetLocal => (1, 0),
            Self::Dup => (1, 2),
            Self::Swap => (2, 2),
            Self::OptPlus
            | Self::OptMinus
            | Self::OptMult
            | Self::OptLt
            | Self::OptLe
            | Self::OptGt
            | Self::OptGe
            | Self::OptEq => (2, 1),
            Self::Leave | Self::Throw => (1, 0),
            Self::BranchIf | Self::BranchUnless | Self::BranchNil | Self::CaseDispatch => (1, 0),
            Self::Send | Self::NewArray => return None,
        };
        Some(effect)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for &op in Opcode::all() {
            assert_eq!(Opcode::from_word(op.to_word()), Some(op));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_word(30), None);
        assert_eq!(Opcode::from_word(0xFF), None);
        assert_eq!(Opcode::from_word(u64::MAX), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "nop");
        assert_eq!(Opcode::PutObjectInt1.name(), "putobject_INT2FIX_1_");
        assert_eq!(Opcode::BranchUnless.name(), "branchunless");
        assert_eq!(Opcode::CaseDispatch.to_string(), "opt_case_dispatch");
    }

    #[test]
    fn test_control_kinds() {
        assert_eq!(Opcode::Jump.control_kind(), Some(ControlKind::Jump));
        assert_eq!(
            Opcode::BranchNil.control_kind(),
            Some(ControlKind::Branch(BranchKind::Nil))
        );
        assert_eq!(
            Opcode::Throw.control_kind(),
            Some(ControlKind::Exit(ExitKind::Throw))
        );
        assert_eq!(Opcode::CaseDispatch.control_kind(), Some(ControlKind::Dispatch));
        assert!(Opcode::OptPlus.control_kind().is_none());
        assert!(!Opcode::Send.is_terminator());
        assert!(Opcode::Leave.is_terminator());
    }

    #[test]
    fn test_operand_layouts() {
        assert_eq!(Opcode::Nop.fixed_operands(), Some(&[][..]));
        assert_eq!(
            Opcode::Send.fixed_operands(),
            Some(&[OperandKind::Value, OperandKind::Literal][..])
        );
        assert_eq!(
            Opcode::BranchIf.fixed_operands(),
            Some(&[OperandKind::JumpOffset][..])
        );
        assert_eq!(Opcode::CaseDispatch.fixed_operands(), None);
    }

    #[test]
    fn test_every_jump_opcode_has_offset_operand() {
        for &op in Opcode::all() {
            if let Some(ControlKind::Jump | ControlKind::Branch(_)) = op.control_kind() {
                let layout = op.fixed_operands().unwrap_or(&[]);
                assert!(layout.contains(&OperandKind::JumpOffset), "{}", op);
            }
        }
    }
}
