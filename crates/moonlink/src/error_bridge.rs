//! Error translation across the boundary
//!
//! Host code reports failures as [`NativeException`]s; the VM reports them
//! as raised values unwinding to the nearest protected call. A host
//! exception crossing into the VM travels as a [`WrappedError`] userdata so
//! that, when it comes back out, the original exception instance is
//! recovered instead of a copy of its message.

use moonlink_vm::{LuaError, LuaValue, State, TableRef};

use crate::error::{BridgeError, NativeException, ScriptError, WrappedError};

/// Registry key of the metatable given to raised [`WrappedError`] values
pub(crate) const ERROR_METATABLE: &str = "moonlink.error";

/// Turn a host exception into a VM raise.
///
/// The returned error carries a `WrappedError` userdata with the location
/// of the script code that called the running native function. Return it
/// from the native function to perform the raise.
pub fn raise_from_native(state: &State, exception: NativeException) -> LuaError {
    let location = state.where_(1);
    log::debug!("raising native exception into the VM: {}{}", location, exception);
    let metatable = match state.registry().borrow().get_str(ERROR_METATABLE) {
        LuaValue::Table(t) => Some(t),
        _ => None,
    };
    wrap(state, WrappedError { exception, location }, metatable)
}

/// Raise a bridge error inside the VM
pub(crate) fn raise_bridge(state: &State, error: BridgeError) -> LuaError {
    raise_from_native(state, error.into())
}

fn wrap(state: &State, payload: WrappedError, metatable: Option<TableRef>) -> LuaError {
    let ud = state.create_userdata(Box::new(payload), metatable);
    LuaError::Runtime(LuaValue::UserData(ud))
}

/// Turn a raised VM value into a host exception.
///
/// A value that wraps a host exception yields that same exception. Any other
/// value becomes a [`ScriptError`] carrying its string form; string errors
/// already carry their location, other values get the location of the
/// caller of the running function.
pub fn raise_from_vm(state: &mut State, error: LuaValue) -> NativeException {
    if let LuaValue::UserData(ud) = &error {
        if let Some(wrapped) = ud.downcast_ref::<WrappedError>() {
            return wrapped.exception.clone();
        }
    }
    let (message, location) = match &error {
        LuaValue::String(s) => (s.to_string(), String::new()),
        other => {
            let top = state.get_top();
            state.push_value(other.clone());
            let message = state
                .tostring(-1)
                .map(|s| s.to_string())
                .unwrap_or_else(|_| other.to_string());
            state.set_top(top);
            (message, state.where_(1))
        }
    };
    NativeException::new(ScriptError { message, location })
}

/// Convert a failed VM operation into a host exception
pub(crate) fn from_lua_error(state: &mut State, error: LuaError) -> NativeException {
    match error {
        LuaError::Runtime(value) => raise_from_vm(state, value),
        LuaError::StackOverflow => NativeException::new(ScriptError {
            message: "stack overflow".into(),
            location: String::new(),
        }),
    }
}
