//! Host helpers callable from compiled code
//!
//! Every helper takes and returns tagged words. Method dispatch only knows
//! fixnum arithmetic and comparisons; any other receiver or method id yields
//! `nil`.

use std::cell::Cell;

use basalt_bytecode::{method_id, Value};
use tracing::trace;

thread_local! {
    static PENDING_EXCEPTION: Cell<Option<u64>> = const { Cell::new(None) };
}

fn dispatch(recv: Value, mid: u64, args: &[Value]) -> Value {
    let (Some(a), [rhs]) = (recv.as_fixnum(), args) else {
        return Value::NIL;
    };
    let Some(b) = rhs.as_fixnum() else {
        return Value::NIL;
    };
    match mid {
        method_id::PLUS => Value::fixnum(a.wrapping_add(b)),
        method_id::MINUS => Value::fixnum(a.wrapping_sub(b)),
        method_id::MULT => Value::fixnum(a.wrapping_mul(b)),
        method_id::LT => Value::from_bool(a < b),
        method_id::LE => Value::from_bool(a <= b),
        method_id::GT => Value::from_bool(a > b),
        method_id::GE => Value::from_bool(a >= b),
        method_id::EQ => Value::from_bool(a == b),
        _ => Value::NIL,
    }
}

/// `recv.mid()`
pub extern "C" fn basalt_funcall_0(recv: u64, mid: u64) -> u64 {
    dispatch(Value(recv), mid, &[]).bits()
}

/// `recv.mid(a0)`
pub extern "C" fn basalt_funcall_1(recv: u64, mid: u64, a0: u64) -> u64 {
    dispatch(Value(recv), mid, &[Value(a0)]).bits()
}

/// `recv.mid(a0, a1)`
pub extern "C" fn basalt_funcall_2(recv: u64, mid: u64, a0: u64, a1: u64) -> u64 {
    dispatch(Value(recv), mid, &[Value(a0), Value(a1)]).bits()
}

/// `recv.mid(a0, a1, a2)`
pub extern "C" fn basalt_funcall_3(recv: u64, mid: u64, a0: u64, a1: u64, a2: u64) -> u64 {
    dispatch(Value(recv), mid, &[Value(a0), Value(a1), Value(a2)]).bits()
}

/// Record `value` as the pending exception and return `undef`
pub extern "C" fn basalt_throw(state: u64, value: u64) -> u64 {
    trace!(target: "basalt::jit::runtime", state, value = %Value(value), "throw");
    PENDING_EXCEPTION.with(|slot| slot.set(Some(value)));
    Value::UNDEF.bits()
}

/// Take the exception raised by the last compiled call on this thread
pub fn take_pending_exception() -> Option<Value> {
    PENDING_EXCEPTION.with(|slot| slot.take()).map(Value)
}
