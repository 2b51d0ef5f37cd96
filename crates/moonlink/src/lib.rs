//! Moonlink - object marshaling and dynamic dispatch for an embedded VM
//!
//! This crate lets scripts running in a [`moonlink_vm::State`] use native
//! objects as if they were script values: read and write their fields and
//! properties, call overloaded methods, construct types, subscribe to
//! events and pass script functions and tables where delegates and
//! interfaces are expected.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  translate   ┌─────────────────┐  expose/resolve  ┌───────────────────┐
//! │   Lua (VM)   │ ───────────> │ ObjectTranslator│ ───────────────> │ ReferenceRegistry │
//! └──────────────┘              └─────────────────┘                  └───────────────────┘
//!        │ __index/__call               │ member cache
//!        v                              v
//! ┌──────────────┐  resolve     ┌─────────────────┐  check_type      ┌───────────────────┐
//! │  metatables  │ ───────────> │  MethodWrapper  │ ───────────────> │ matcher/extract   │
//! └──────────────┘              └─────────────────┘                  └───────────────────┘
//!                                       │ native failure
//!                                       v
//!                               ┌─────────────────┐
//!                               │  error_bridge   │
//!                               └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use moonlink::{ClassInfo, Lua, NativeType, NativeValue, ParamInfo};
//!
//! let mut lua = Lua::new();
//! lua.register_type(
//!     ClassInfo::builder("Demo.Math")
//!         .static_method("Twice", vec![ParamInfo::new("x", NativeType::I32)], NativeType::I32, |inv| {
//!             Ok(NativeValue::I32(inv.arg(0).as_i32().unwrap_or(0) * 2))
//!         })
//!         .build(),
//! );
//! lua.import_type("Demo.Math")?;
//! ```

#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod error_bridge;
pub mod extract;
mod globals;
pub mod lua;
pub mod matcher;
mod metatables;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod translator;
pub mod types;
pub mod value;

pub use catalog::{TypeCatalog, EVENT_BINDING_CLASS, OBJECT_CLASS, TYPE_CLASS};
pub use config::BridgeOptions;
pub use dispatch::{invoke_delegate, Binding, MethodWrapper};
pub use error::{
    BridgeError, BridgeResult, NativeException, NativeResult, ScriptError, WrappedError,
};
pub use error_bridge::{raise_from_native, raise_from_vm};
pub use extract::{get_extractor, Extractor};
pub use lua::Lua;
pub use matcher::check_type;
pub use metatables::{CLASS_METATABLE, FUNCTION_METATABLE, OBJECT_METATABLE};
pub use proxy::{DynamicProxyFactory, ProxyFactory};
pub use registry::{ObjectId, ReferenceRegistry};
pub use resolver::{match_parameters, resolve, InvocationPlan, ReplayError};
pub use translator::ObjectTranslator;
pub use types::{
    ClassBuilder, ClassInfo, ClassKind, ClassRef, EventInfo, FieldInfo, Invocation, Member,
    MethodInfo, MethodRef, NativeType, ParamInfo, ParamMode,
};
pub use value::{LuaRef, NativeObject, NativeValue, ObjectData, ObjectRef};
