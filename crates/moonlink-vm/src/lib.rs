//! Moonlink VM - a minimal stack-based Lua-style virtual machine
//!
//! This crate provides the low-level embedding API that the `moonlink`
//! marshaling engine builds on: a position-indexed value stack, tables with
//! metatables, userdata with `__gc` finalizers, protected calls and a
//! registry with integer references.
//!
//! There is no parser. Functions are host closures; a function created with
//! [`State::push_chunk`] behaves like a script function and reports its chunk
//! label as the source location of errors raised on its behalf.
//!
//! # Example
//!
//! ```ignore
//! use moonlink_vm::{native_fn, State};
//!
//! let mut state = State::new();
//! state.push_function(native_fn(|state| {
//!     let n = state.to_number(1).unwrap_or(0.0);
//!     state.push_number(n * 2.0);
//!     Ok(1)
//! }));
//! state.push_number(21.0);
//! state.call(1, 1)?;
//! assert_eq!(state.to_number(-1), Some(42.0));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod state;
pub mod table;
pub mod value;

pub use error::{LuaError, LuaResult, Status};
pub use state::{metafield_of, metatable_of, State, StateOptions, MULTRET, REF_NIL};
pub use table::Table;
pub use value::{
    format_number, native_fn, str_to_number, Function, FunctionRef, LuaType, LuaValue, NativeFn,
    TableRef, UserData,
};
