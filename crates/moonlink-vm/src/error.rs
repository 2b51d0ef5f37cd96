//! VM error types
//!
//! A raise inside the VM is an early `Err` return. It travels up through
//! `?` until the nearest [`crate::State::pcall`] turns it back into an error
//! value on the stack.

use crate::value::LuaValue;

/// Result type for VM operations
pub type LuaResult<T> = Result<T, LuaError>;

/// Errors raised by the VM or by native functions running inside it
#[derive(Debug, Clone, thiserror::Error)]
pub enum LuaError {
    /// Runtime error carrying an arbitrary error value
    #[error("{0}")]
    Runtime(LuaValue),

    /// Call depth limit exceeded
    #[error("stack overflow")]
    StackOverflow,
}

impl LuaError {
    /// Create a runtime error from a plain message
    pub fn message(msg: impl AsRef<str>) -> Self {
        LuaError::Runtime(LuaValue::from(msg.as_ref()))
    }

    /// Convert into the value a protected call leaves on the stack
    pub fn into_value(self) -> LuaValue {
        match self {
            LuaError::Runtime(value) => value,
            LuaError::StackOverflow => LuaValue::from("stack overflow"),
        }
    }

    /// Borrow the raised value, if any
    pub fn value(&self) -> Option<&LuaValue> {
        match self {
            LuaError::Runtime(value) => Some(value),
            LuaError::StackOverflow => None,
        }
    }
}

/// Outcome of a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Status {
    /// Call completed; results are on the stack
    Ok,
    /// A runtime error was raised; the error value is on the stack
    RuntimeError,
    /// The call depth limit was hit; the error value is on the stack
    StackOverflow,
}

impl Status {
    /// True when the call completed without raising
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}
