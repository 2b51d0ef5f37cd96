//! Error types for the marshaling engine
//!
//! [`NativeException`] is the host-side exception handle. It is a shared
//! pointer so that an exception raised inside a dispatched call, carried
//! through the VM as a [`WrappedError`] and caught again on the host side is
//! the very same instance (`NativeException::ptr_eq`).

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type for native method bodies
pub type NativeResult<T> = Result<T, NativeException>;

// ============================================================================
// Bridge errors
// ============================================================================

/// Failures detected by the dispatch and translation layers
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// No candidate method or constructor accepts the VM arguments
    #[error("invalid arguments to {callable}")]
    NoOverloadMatch {
        /// Callable description, e.g. `method 'Demo.Counter.Add'`
        callable: String,
    },

    /// A replayed argument could no longer be converted
    #[error("argument number {position} is invalid for {callable}")]
    InvalidArgument {
        /// Callable description
        callable: String,
        /// 1-based VM argument position
        position: usize,
    },

    /// Named member does not exist on the type
    #[error("'{type_name}' does not contain a definition for '{member}'")]
    MemberNotFound {
        /// Full type name
        type_name: String,
        /// Requested member
        member: String,
    },

    /// Proxy does not wrap a usable native reference
    #[error("{0}")]
    InvalidTarget(String),

    /// Assignment to something that is not a writable field or property
    #[error("{0}")]
    InvalidAssignment(String),

    /// Static member accessed through an instance
    #[error("static member '{member}' of '{type_name}' cannot be accessed through an instance")]
    StaticFromInstance {
        /// Full type name
        type_name: String,
        /// Requested member
        member: String,
    },

    /// The invoked native code failed.
    ///
    /// Host method bodies that forward to other callables return this to
    /// wrap the exception they caught. The dispatcher never raises it: the
    /// layers are removed with [`NativeException::innermost`] so scripts and
    /// host callers see the original exception.
    #[error("exception in {callable}: {exception}")]
    NativeExceptionDuringInvoke {
        /// Callable description
        callable: String,
        /// Original exception
        exception: NativeException,
    },

    /// Value could not be converted to the requested native type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected native type name
        expected: String,
        /// Actual VM type name
        got: String,
    },

    /// Configuration document could not be parsed
    #[error("invalid bridge configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        BridgeError::Config(e.to_string())
    }
}

// ============================================================================
// Native exceptions
// ============================================================================

/// Shared, identity-preserving handle to a host exception
#[derive(Clone)]
pub struct NativeException(Arc<dyn Error + Send + Sync + 'static>);

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}

impl NativeException {
    /// Wrap an error value
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        NativeException(Arc::new(error))
    }

    /// Exception carrying only a message
    pub fn msg(message: impl Into<String>) -> Self {
        NativeException::new(Message(message.into()))
    }

    /// True when both handles point at the same exception instance
    pub fn ptr_eq(&self, other: &NativeException) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Downcast to a concrete error type
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Borrow as a standard error
    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Strip [`BridgeError::NativeExceptionDuringInvoke`] layers and return
    /// the exception the invoked code actually raised
    pub fn innermost(&self) -> NativeException {
        let mut current = self.clone();
        while let Some(BridgeError::NativeExceptionDuringInvoke { exception, .. }) =
            current.downcast_ref::<BridgeError>()
        {
            let next = exception.clone();
            current = next;
        }
        current
    }
}

impl<E> From<E> for NativeException
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        NativeException::new(error)
    }
}

impl fmt::Display for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for NativeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

// ============================================================================
// Script-side errors
// ============================================================================

/// A VM error that did not originate from host code
#[derive(Debug, Clone, thiserror::Error)]
#[error("{location}{message}")]
pub struct ScriptError {
    /// String form of the raised VM value
    pub message: String,
    /// Location prefix, possibly empty
    pub location: String,
}

/// Payload of a VM error raised from host code
#[derive(Debug, Clone)]
pub struct WrappedError {
    /// The host exception, shared with whoever raised it
    pub exception: NativeException,
    /// Script location at the time of the raise
    pub location: String,
}

impl fmt::Display for WrappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.location, self.exception)
    }
}
