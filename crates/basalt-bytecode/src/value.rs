//! Tagged host values
//!
//! Immediates use the same layout as a Ruby VM: the low bit tags fixnums,
//! and `false`, `nil`, `true` and `undef` are small special constants.

use std::fmt;

/// A tagged 64-bit host value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(pub u64);

/// Fixnum tag bit
pub const FIXNUM_FLAG: u64 = 0x01;

impl Value {
    /// `false`
    pub const FALSE: Value = Value(0x00);
    /// `nil`
    pub const NIL: Value = Value(0x08);
    /// `true`
    pub const TRUE: Value = Value(0x14);
    /// Marker for "no value" (returned after a throw)
    pub const UNDEF: Value = Value(0x34);

    /// Encode a fixnum. The top bit of `n` is lost.
    pub const fn fixnum(n: i64) -> Value {
        Value(((n << 1) as u64) | FIXNUM_FLAG)
    }

    /// Encode a boolean
    pub const fn from_bool(b: bool) -> Value {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    /// Raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check the fixnum tag
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_FLAG != 0
    }

    /// Decode a fixnum
    pub const fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    /// Check for `nil`
    pub const fn is_nil(self) -> bool {
        self.0 == Value::NIL.0
    }

    /// Ruby truthiness: everything except `false` and `nil`
    pub const fn truthy(self) -> bool {
        self.0 & !Value::NIL.0 != 0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::FALSE => write!(f, "false"),
            Value::NIL => write!(f, "nil"),
            Value::TRUE => write!(f, "true"),
            Value::UNDEF => write!(f, "undef"),
            v => match v.as_fixnum() {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "#<{:#x}>", v.0),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::fixnum(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::from_bool(b)
    }
}

/// Method ids used by the specialized `opt_*` instructions
pub mod method_id {
    /// `+`
    pub const PLUS: u64 = b'+' as u64;
    /// `-`
    pub const MINUS: u64 = b'-' as u64;
    /// `*`
    pub const MULT: u64 = b'*' as u64;
    /// `<`
    pub const LT: u64 = b'<' as u64;
    /// `>`
    pub const GT: u64 = b'>' as u64;
    /// `<=`
    pub const LE: u64 = u16::from_be_bytes(*b"<=") as u64;
    /// `>=`
    pub const GE: u64 = u16::from_be_bytes(*b">=") as u64;
    /// `==`
    pub const EQ: u64 = u16::from_be_bytes(*b"==") as u64;
}
