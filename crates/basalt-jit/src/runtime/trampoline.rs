//! Calling convention of compiled methods
//!
//! Compiled code receives the receiver and a pointer to `param_count`
//! tagged arguments, and returns a tagged value. A method that threw returns
//! `undef` and leaves the exception in
//! [`take_pending_exception`](super::helpers::take_pending_exception).

/// Entry point signature for JIT-compiled methods
pub type JitEntryFn = unsafe extern "C" fn(recv: u64, args: *const u64) -> u64;

/// Number of native parameters of [`JitEntryFn`]
pub const ENTRY_PARAM_COUNT: usize = 2;
