//! JIT type system
//!
//! Every stack value is a tagged host word. Conditions produced for branches
//! are the only other type.

/// JIT IR type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JitType {
    /// Tagged u64 host value
    Value,
    /// Branch condition
    Bool,
}

impl std::fmt::Display for JitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitType::Value => write!(f, "val"),
            JitType::Bool => write!(f, "bool"),
        }
    }
}
