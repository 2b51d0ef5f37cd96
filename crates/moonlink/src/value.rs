//! Native values and objects
//!
//! [`NativeValue`] is what host code sees on its side of the boundary.
//! Scalars are stored inline; objects are shared [`ObjectRef`]s whose
//! identity is the `Arc` pointer; VM tables, functions and userdata are held
//! through [`LuaRef`] handles.
//!
//! # Thread Safety
//!
//! Everything here is `Send + Sync`. A `LuaRef` may be dropped on any thread;
//! dropping only enqueues the VM reference, which the owning session releases
//! the next time it runs on the VM thread.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::{ClassRef, EventInfo, MethodFn, NativeType};

/// Shared handle to a native object
pub type ObjectRef = Arc<NativeObject>;

/// Queue of VM references waiting to be released
pub(crate) type ReleaseQueue = Arc<Mutex<Vec<i32>>>;

// ============================================================================
// VM references
// ============================================================================

struct LuaRefInner {
    reference: i32,
    session: u64,
    releases: ReleaseQueue,
}

impl Drop for LuaRefInner {
    fn drop(&mut self) {
        self.releases.lock().push(self.reference);
    }
}

/// Host-side handle to a VM value kept alive in the VM registry
#[derive(Clone)]
pub struct LuaRef(Arc<LuaRefInner>);

impl LuaRef {
    pub(crate) fn new(reference: i32, session: u64, releases: ReleaseQueue) -> Self {
        LuaRef(Arc::new(LuaRefInner {
            reference,
            session,
            releases,
        }))
    }

    /// Registry reference number
    pub fn reference(&self) -> i32 {
        self.0.reference
    }

    /// Session that owns the reference
    pub fn session(&self) -> u64 {
        self.0.session
    }
}

impl PartialEq for LuaRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.session == other.0.session && self.0.reference == other.0.reference
    }
}

impl fmt::Debug for LuaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LuaRef({}@{})", self.0.reference, self.0.session)
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Subscription handle produced when a script indexes an event member
pub struct EventBinding {
    /// Object raising the event; `None` for static events
    pub target: Option<ObjectRef>,
    /// Event description
    pub event: Arc<EventInfo>,
}

/// Payload of a native object
pub enum ObjectData {
    /// Host data owned by the object
    Host(RwLock<Box<dyn Any + Send + Sync>>),
    /// Fixed-length array
    Array {
        /// Element type
        element: NativeType,
        /// Elements
        items: RwLock<Vec<NativeValue>>,
    },
    /// Delegate body
    Delegate(MethodFn),
    /// Reference to a type, exposed to scripts as a type proxy
    Type(ClassRef),
    /// Interface implementation backed by a VM table
    ScriptTable(LuaRef),
    /// Event subscription handle
    Event(EventBinding),
}

/// A native object exposed to the VM
pub struct NativeObject {
    class: ClassRef,
    data: ObjectData,
}

impl NativeObject {
    /// Create an object holding host data
    pub fn new<T: Any + Send + Sync>(class: &ClassRef, value: T) -> ObjectRef {
        Self::with_data(class, ObjectData::Host(RwLock::new(Box::new(value))))
    }

    /// Create an object with an explicit payload
    pub fn with_data(class: &ClassRef, data: ObjectData) -> ObjectRef {
        Arc::new(NativeObject {
            class: class.clone(),
            data,
        })
    }

    /// Create a delegate object of the given delegate type
    pub fn delegate(class: &ClassRef, body: MethodFn) -> ObjectRef {
        Self::with_data(class, ObjectData::Delegate(body))
    }

    /// Runtime class
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Payload
    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    /// Read host data as `T`
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &self.data {
            ObjectData::Host(cell) => cell.read().downcast_ref::<T>().map(f),
            _ => None,
        }
    }

    /// Mutate host data as `T`
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match &self.data {
            ObjectData::Host(cell) => cell.write().downcast_mut::<T>().map(f),
            _ => None,
        }
    }

    /// Array elements, if this is an array
    pub fn array_items(&self) -> Option<&RwLock<Vec<NativeValue>>> {
        match &self.data {
            ObjectData::Array { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Delegate body, if this is a delegate
    pub fn delegate_body(&self) -> Option<&MethodFn> {
        match &self.data {
            ObjectData::Delegate(body) => Some(body),
            _ => None,
        }
    }

    /// Referenced type, if this is a type object
    pub fn type_target(&self) -> Option<&ClassRef> {
        match &self.data {
            ObjectData::Type(class) => Some(class),
            _ => None,
        }
    }

    /// String representation, as seen by `tostring` in scripts
    pub fn display(&self) -> String {
        if let Some(hook) = self.class.display_hook() {
            return hook(self);
        }
        match &self.data {
            ObjectData::Type(target) => format!("ProxyType({})", target.name()),
            _ => self.class.name().to_string(),
        }
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeObject({})", self.class.name())
    }
}

/// Address identifying an object instance
pub fn object_address(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as usize
}

// ============================================================================
// Values
// ============================================================================

/// A value on the host side of the boundary
#[derive(Clone, Debug, Default)]
pub enum NativeValue {
    /// Null reference / absent value
    #[default]
    Null,
    /// bool
    Bool(bool),
    /// i8
    I8(i8),
    /// u8
    U8(u8),
    /// i16
    I16(i16),
    /// u16
    U16(u16),
    /// i32
    I32(i32),
    /// u32
    U32(u32),
    /// i64
    I64(i64),
    /// u64
    U64(u64),
    /// f32
    F32(f32),
    /// f64
    F64(f64),
    /// char
    Char(char),
    /// Immutable string
    Str(Arc<str>),
    /// Native object reference
    Object(ObjectRef),
    /// VM table
    Table(LuaRef),
    /// VM function
    Function(LuaRef),
    /// VM userdata not owned by the bridge
    UserData(LuaRef),
}

impl NativeValue {
    /// True for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer scalar widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            NativeValue::I8(v) => Some(v as i64),
            NativeValue::U8(v) => Some(v as i64),
            NativeValue::I16(v) => Some(v as i64),
            NativeValue::U16(v) => Some(v as i64),
            NativeValue::I32(v) => Some(v as i64),
            NativeValue::U32(v) => Some(v as i64),
            NativeValue::I64(v) => Some(v),
            NativeValue::U64(v) => i64::try_from(v).ok(),
            NativeValue::Char(c) => Some(c as i64),
            _ => None,
        }
    }

    /// i32 value, if an integer scalar fits
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// Any numeric scalar as f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            NativeValue::F32(v) => Some(v as f64),
            NativeValue::F64(v) => Some(v),
            NativeValue::U64(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object reference
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            NativeValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Name of the value's kind, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            NativeValue::Null => "null",
            NativeValue::Bool(_) => "bool",
            NativeValue::I8(_) => "i8",
            NativeValue::U8(_) => "u8",
            NativeValue::I16(_) => "i16",
            NativeValue::U16(_) => "u16",
            NativeValue::I32(_) => "i32",
            NativeValue::U32(_) => "u32",
            NativeValue::I64(_) => "i64",
            NativeValue::U64(_) => "u64",
            NativeValue::F32(_) => "f32",
            NativeValue::F64(_) => "f64",
            NativeValue::Char(_) => "char",
            NativeValue::Str(_) => "string",
            NativeValue::Object(_) => "object",
            NativeValue::Table(_) => "table",
            NativeValue::Function(_) => "function",
            NativeValue::UserData(_) => "userdata",
        }
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        use NativeValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            (Table(a), Table(b)) | (Function(a), Function(b)) | (UserData(a), UserData(b)) => {
                a == b
            }
            _ => false,
        }
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        NativeValue::Bool(b)
    }
}

impl From<i32> for NativeValue {
    fn from(v: i32) -> Self {
        NativeValue::I32(v)
    }
}

impl From<i64> for NativeValue {
    fn from(v: i64) -> Self {
        NativeValue::I64(v)
    }
}

impl From<f64> for NativeValue {
    fn from(v: f64) -> Self {
        NativeValue::F64(v)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        NativeValue::Str(Arc::from(s))
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        NativeValue::Str(Arc::from(s))
    }
}

impl From<ObjectRef> for NativeValue {
    fn from(o: ObjectRef) -> Self {
        NativeValue::Object(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassInfo;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(NativeValue::U8(7).as_i32(), Some(7));
        assert_eq!(NativeValue::I64(i64::MAX).as_i32(), None);
        assert_eq!(NativeValue::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(NativeValue::from("x").as_i64(), None);
    }

    #[test]
    fn test_object_identity_equality() {
        let class = ClassInfo::builder("Demo.Box").build();
        let a = NativeObject::new(&class, 1u32);
        let b = NativeObject::new(&class, 1u32);
        assert_eq!(NativeValue::Object(a.clone()), NativeValue::Object(a.clone()));
        assert_ne!(NativeValue::Object(a), NativeValue::Object(b));
    }

    #[test]
    fn test_host_data_access() {
        let class = ClassInfo::builder("Demo.Counter").build();
        let obj = NativeObject::new(&class, 10i64);
        obj.with_mut(|n: &mut i64| *n += 5);
        assert_eq!(obj.with(|n: &i64| *n), Some(15));
        assert_eq!(obj.with(|s: &String| s.len()), None);
        assert_eq!(obj.display(), "Demo.Counter");
    }

    #[test]
    fn test_lua_ref_drop_enqueues_release() {
        let queue: ReleaseQueue = Arc::new(Mutex::new(Vec::new()));
        let r = LuaRef::new(12, 1, queue.clone());
        let copy = r.clone();
        drop(r);
        assert!(queue.lock().is_empty());
        drop(copy);
        assert_eq!(queue.lock().as_slice(), &[12]);
    }
}
