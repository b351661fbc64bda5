//! Runtime support: host helpers, the extern registry, and the native
//! calling convention

pub mod externs;
pub mod helpers;
pub mod trampoline;

pub use externs::{funcall_name, ExternFunction, ExternTable, THROW_HELPER};
pub use helpers::take_pending_exception;
pub use trampoline::JitEntryFn;
