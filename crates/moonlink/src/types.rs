//! Native type descriptions
//!
//! The host has no runtime reflection, so every type that crosses the
//! boundary is described by a [`ClassInfo`] built with [`ClassBuilder`].
//! Members keep their declaration order, which is the order the overload
//! resolver scans them in.
//!
//! # Example
//!
//! ```ignore
//! let counter = ClassInfo::builder("Demo.Counter")
//!     .constructor(vec![ParamInfo::new("start", NativeType::I64)], |inv| {
//!         let start = inv.arg(0).as_i64().unwrap_or(0);
//!         Ok(NativeObject::new(inv.class(), start).into())
//!     })
//!     .method("Add", vec![ParamInfo::new("n", NativeType::I64)], NativeType::I64, |inv| {
//!         let n = inv.arg(0).as_i64().unwrap_or(0);
//!         inv.with_target_mut(|c: &mut i64| { *c += n; *c }).map(NativeValue::I64)
//!     })
//!     .build();
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use moonlink_vm::State;
use parking_lot::RwLock;

use crate::error::{BridgeError, NativeException, NativeResult};
use crate::value::{NativeObject, NativeValue, ObjectData, ObjectRef};

/// Shared handle to a class description
pub type ClassRef = Arc<ClassInfo>;

/// Shared handle to a method description
pub type MethodRef = Arc<MethodInfo>;

/// Body of a native method, constructor or delegate
pub type MethodFn = Arc<dyn Fn(&mut Invocation<'_>) -> NativeResult<NativeValue> + Send + Sync>;

/// Field/property getter. The target is `None` for static members.
pub type Getter = Arc<dyn Fn(Option<&ObjectRef>) -> NativeResult<NativeValue> + Send + Sync>;

/// Field/property setter. The target is `None` for static members.
pub type Setter = Arc<dyn Fn(Option<&ObjectRef>, NativeValue) -> NativeResult<()> + Send + Sync>;

/// Event subscription hook: `(target, handler delegate)`
pub type EventFn = Arc<dyn Fn(Option<&ObjectRef>, &ObjectRef) -> NativeResult<()> + Send + Sync>;

/// Indexer getter: `(target, key)`
pub type IndexGetter = Arc<dyn Fn(&ObjectRef, &NativeValue) -> NativeResult<NativeValue> + Send + Sync>;

/// Indexer setter: `(target, key, value)`
pub type IndexSetter =
    Arc<dyn Fn(&ObjectRef, &NativeValue, NativeValue) -> NativeResult<()> + Send + Sync>;

static NULL_VALUE: NativeValue = NativeValue::Null;

/// Custom string representation
pub type DisplayFn = Arc<dyn Fn(&NativeObject) -> String + Send + Sync>;

// ============================================================================
// Native types
// ============================================================================

/// A native parameter, field or return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// Accepts any value with the generic conversion
    Any,
    /// bool
    Bool,
    /// i8
    I8,
    /// u8
    U8,
    /// i16
    I16,
    /// u16
    U16,
    /// i32
    I32,
    /// u32
    U32,
    /// i64
    I64,
    /// u64
    U64,
    /// f32
    F32,
    /// f64
    F64,
    /// char
    Char,
    /// String
    String,
    /// Value type that may also be null
    Nullable(Box<NativeType>),
    /// Array of the element type
    Array(Box<NativeType>),
    /// Class, interface, delegate or struct, by full name
    Class(Arc<str>),
    /// Handle to a VM table
    LuaTable,
    /// Handle to a VM function
    LuaFunction,
    /// Handle to a VM userdata
    LuaUserData,
    /// No value (method return type only)
    Void,
}

impl NativeType {
    /// Class type by full name
    pub fn class(name: &str) -> Self {
        NativeType::Class(Arc::from(name))
    }

    /// Array of `element`
    pub fn array(element: NativeType) -> Self {
        NativeType::Array(Box::new(element))
    }

    /// Nullable `inner`
    pub fn nullable(inner: NativeType) -> Self {
        NativeType::Nullable(Box::new(inner))
    }

    /// Canonical type name, as accepted by [`NativeType::parse`]
    pub fn name(&self) -> String {
        match self {
            NativeType::Any => "any".into(),
            NativeType::Bool => "bool".into(),
            NativeType::I8 => "i8".into(),
            NativeType::U8 => "u8".into(),
            NativeType::I16 => "i16".into(),
            NativeType::U16 => "u16".into(),
            NativeType::I32 => "i32".into(),
            NativeType::U32 => "u32".into(),
            NativeType::I64 => "i64".into(),
            NativeType::U64 => "u64".into(),
            NativeType::F32 => "f32".into(),
            NativeType::F64 => "f64".into(),
            NativeType::Char => "char".into(),
            NativeType::String => "string".into(),
            NativeType::Nullable(inner) => format!("{}?", inner.name()),
            NativeType::Array(element) => format!("{}[]", element.name()),
            NativeType::Class(name) => name.to_string(),
            NativeType::LuaTable => "table".into(),
            NativeType::LuaFunction => "function".into(),
            NativeType::LuaUserData => "userdata".into(),
            NativeType::Void => "void".into(),
        }
    }

    /// Parse a type name. Unknown names are taken as class names.
    pub fn parse(name: &str) -> NativeType {
        let name = name.trim();
        if let Some(inner) = name.strip_suffix("[]") {
            return NativeType::array(NativeType::parse(inner));
        }
        if let Some(inner) = name.strip_suffix('?') {
            return NativeType::nullable(NativeType::parse(inner));
        }
        match name {
            "any" => NativeType::Any,
            "bool" => NativeType::Bool,
            "i8" => NativeType::I8,
            "u8" => NativeType::U8,
            "i16" => NativeType::I16,
            "u16" => NativeType::U16,
            "i32" => NativeType::I32,
            "u32" => NativeType::U32,
            "i64" => NativeType::I64,
            "u64" => NativeType::U64,
            "f32" => NativeType::F32,
            "f64" => NativeType::F64,
            "char" => NativeType::Char,
            "string" => NativeType::String,
            "table" => NativeType::LuaTable,
            "function" => NativeType::LuaFunction,
            "userdata" => NativeType::LuaUserData,
            "void" => NativeType::Void,
            other => NativeType::class(other),
        }
    }

    /// Strip one `Nullable` layer
    pub fn unwrap_nullable(&self) -> &NativeType {
        match self {
            NativeType::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Value used for unset slots of this type
    pub fn default_value(&self) -> NativeValue {
        match self {
            NativeType::Bool => NativeValue::Bool(false),
            NativeType::I8 => NativeValue::I8(0),
            NativeType::U8 => NativeValue::U8(0),
            NativeType::I16 => NativeValue::I16(0),
            NativeType::U16 => NativeValue::U16(0),
            NativeType::I32 => NativeValue::I32(0),
            NativeType::U32 => NativeValue::U32(0),
            NativeType::I64 => NativeValue::I64(0),
            NativeType::U64 => NativeValue::U64(0),
            NativeType::F32 => NativeValue::F32(0.0),
            NativeType::F64 => NativeValue::F64(0.0),
            NativeType::Char => NativeValue::Char('\0'),
            _ => NativeValue::Null,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ============================================================================
// Parameters and methods
// ============================================================================

/// How a parameter passes its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    /// Input only
    In,
    /// Output only; consumes no VM argument
    Out,
    /// Input and output
    Ref,
}

/// A formal parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name
    pub name: Arc<str>,
    /// Declared type; for params arrays this is the array type
    pub ty: NativeType,
    /// Passing mode
    pub mode: ParamMode,
    /// Default used when the argument is omitted
    pub default: Option<NativeValue>,
    /// Variadic trailing array
    pub params_array: bool,
}

impl ParamInfo {
    /// Plain input parameter
    pub fn new(name: &str, ty: NativeType) -> Self {
        ParamInfo {
            name: Arc::from(name),
            ty,
            mode: ParamMode::In,
            default: None,
            params_array: false,
        }
    }

    /// Output-only parameter
    pub fn out(name: &str, ty: NativeType) -> Self {
        ParamInfo {
            mode: ParamMode::Out,
            ..ParamInfo::new(name, ty)
        }
    }

    /// By-reference parameter
    pub fn by_ref(name: &str, ty: NativeType) -> Self {
        ParamInfo {
            mode: ParamMode::Ref,
            ..ParamInfo::new(name, ty)
        }
    }

    /// Variadic array of `element`
    pub fn params(name: &str, element: NativeType) -> Self {
        ParamInfo {
            params_array: true,
            ..ParamInfo::new(name, NativeType::array(element))
        }
    }

    /// Attach a default value
    pub fn with_default(mut self, value: impl Into<NativeValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Element type of a params array
    pub fn element_type(&self) -> Option<&NativeType> {
        match &self.ty {
            NativeType::Array(element) => Some(element),
            _ => None,
        }
    }
}

/// A method, constructor or delegate `Invoke`
pub struct MethodInfo {
    /// Method name
    pub name: Arc<str>,
    /// Full name of the declaring type
    pub declaring_type: Arc<str>,
    /// Formal parameters in declaration order
    pub params: Vec<ParamInfo>,
    /// Return type
    pub ret: NativeType,
    /// Static methods and constructors take no target
    pub is_static: bool,
    /// Constructors are only reachable through a type proxy call
    pub is_constructor: bool,
    body: Option<MethodFn>,
}

impl MethodInfo {
    /// Human-readable callable description used in errors
    pub fn callable(&self) -> String {
        if self.is_constructor {
            format!("constructor of '{}'", self.declaring_type)
        } else {
            format!("method '{}.{}'", self.declaring_type, self.name)
        }
    }

    /// True when the method has no implementation of its own
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    /// Parameter type names, used to select overloads by signature
    pub fn signature(&self) -> Vec<String> {
        self.params.iter().map(|p| p.ty.name()).collect()
    }

    /// Invoke with already converted arguments. `args` has one slot per
    /// formal parameter; out/ref slots may be overwritten by the body.
    pub fn invoke(
        &self,
        state: &mut State,
        class: &ClassRef,
        target: Option<&ObjectRef>,
        args: &mut [NativeValue],
    ) -> NativeResult<NativeValue> {
        match &self.body {
            Some(body) => {
                let mut inv = Invocation {
                    state,
                    class,
                    target,
                    args,
                };
                body(&mut inv)
            }
            None => match target.map(|t| t.data()) {
                Some(ObjectData::ScriptTable(table)) => {
                    crate::proxy::call_table_method(state, table, self, args)
                }
                _ => Err(BridgeError::InvalidTarget(format!(
                    "{} has no implementation",
                    self.callable()
                ))
                .into()),
            },
        }
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.callable(), self.signature().join(", "))
    }
}

/// Call context handed to a method body
pub struct Invocation<'a> {
    /// VM the call runs in
    pub state: &'a mut State,
    class: &'a ClassRef,
    target: Option<&'a ObjectRef>,
    args: &'a mut [NativeValue],
}

impl<'a> Invocation<'a> {
    /// Class declaring the invoked method (the constructed class for
    /// constructors)
    pub fn class(&self) -> &ClassRef {
        self.class
    }

    /// Target object; `None` for static calls
    pub fn target(&self) -> Option<&ObjectRef> {
        self.target
    }

    /// Argument `i`; `Null` past the end
    pub fn arg(&self, i: usize) -> &NativeValue {
        self.args.get(i).unwrap_or(&NULL_VALUE)
    }

    /// All arguments
    pub fn args(&self) -> &[NativeValue] {
        self.args
    }

    /// Store an out/ref result in slot `i`
    pub fn set_arg(&mut self, i: usize, value: NativeValue) {
        if let Some(slot) = self.args.get_mut(i) {
            *slot = value;
        }
    }

    fn missing_target(&self) -> NativeException {
        BridgeError::InvalidTarget(format!(
            "'{}' call requires a target of the right type",
            self.class.name()
        ))
        .into()
    }

    /// Read the target's host data
    pub fn with_target<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> NativeResult<R> {
        self.target
            .and_then(|t| t.with(f))
            .ok_or_else(|| self.missing_target())
    }

    /// Mutate the target's host data
    pub fn with_target_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> NativeResult<R> {
        self.target
            .and_then(|t| t.with_mut(f))
            .ok_or_else(|| self.missing_target())
    }
}

// ============================================================================
// Fields, properties, events, indexers
// ============================================================================

/// A field or property
pub struct FieldInfo {
    /// Member name
    pub name: Arc<str>,
    /// Value type
    pub ty: NativeType,
    /// Static members take no target
    pub is_static: bool,
    /// Read accessor
    pub get: Option<Getter>,
    /// Write accessor
    pub set: Option<Setter>,
}

/// An event
pub struct EventInfo {
    /// Event name
    pub name: Arc<str>,
    /// Full name of the handler delegate type
    pub delegate_type: Arc<str>,
    /// Static events take no target
    pub is_static: bool,
    /// Subscribe a handler
    pub add: EventFn,
    /// Unsubscribe a handler
    pub remove: EventFn,
}

/// Default indexed member (`obj[key]`)
pub struct Indexer {
    /// Key type
    pub key: NativeType,
    /// Value type
    pub value: NativeType,
    /// `get_Item`
    pub get: Option<IndexGetter>,
    /// `set_Item`
    pub set: Option<IndexSetter>,
}

/// A named member of a class
#[derive(Clone)]
pub enum Member {
    /// Field
    Field(Arc<FieldInfo>),
    /// Property
    Property(Arc<FieldInfo>),
    /// One method overload
    Method(MethodRef),
    /// Event
    Event(Arc<EventInfo>),
    /// Nested type, by full name
    NestedType {
        /// Short name used for lookup
        name: Arc<str>,
        /// Full name in the catalog
        full_name: Arc<str>,
    },
}

impl Member {
    /// Lookup name
    pub fn name(&self) -> &str {
        match self {
            Member::Field(f) | Member::Property(f) => &f.name,
            Member::Method(m) => &m.name,
            Member::Event(e) => &e.name,
            Member::NestedType { name, .. } => name,
        }
    }

    /// True for static members; nested types count as static
    pub fn is_static(&self) -> bool {
        match self {
            Member::Field(f) | Member::Property(f) => f.is_static,
            Member::Method(m) => m.is_static,
            Member::Event(e) => e.is_static,
            Member::NestedType { .. } => true,
        }
    }
}

// ============================================================================
// Classes
// ============================================================================

/// Kind of a native type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Reference type
    Class,
    /// Interface; scripts can implement it with a table
    Interface,
    /// Delegate; scripts can implement it with a function
    Delegate,
    /// Value type
    Struct,
}

/// Description of a native type
pub struct ClassInfo {
    name: Arc<str>,
    namespace: Arc<str>,
    kind: ClassKind,
    base: Option<Arc<str>>,
    interfaces: Vec<Arc<str>>,
    members: Vec<Member>,
    constructors: Vec<MethodRef>,
    indexer: Option<Indexer>,
    display: Option<DisplayFn>,
}

impl ClassInfo {
    /// Start describing a class with the given full name
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    /// Describe a delegate type. The result has a single instance method,
    /// `Invoke`, that calls the delegate body.
    pub fn delegate(name: &str, params: Vec<ParamInfo>, ret: NativeType) -> ClassRef {
        ClassBuilder::new(name)
            .kind(ClassKind::Delegate)
            .method("Invoke", params, ret, |inv| {
                let body = inv
                    .target()
                    .and_then(|t| t.delegate_body().cloned())
                    .ok_or_else(|| {
                        NativeException::from(BridgeError::InvalidTarget(
                            "delegate target is not a delegate".into(),
                        ))
                    })?;
                body(inv)
            })
            .build()
    }

    /// Full name, e.g. `Demo.Widget`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace: everything before the last `.` of the full name
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name without namespace
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Kind
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Base class full name
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Implemented interfaces
    pub fn interfaces(&self) -> &[Arc<str>] {
        &self.interfaces
    }

    /// Members declared on this class, in declaration order
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Members declared on this class with the given name
    pub fn members_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Member> + 'a {
        self.members.iter().filter(move |m| m.name() == name)
    }

    /// Constructors in declaration order
    pub fn constructors(&self) -> &[MethodRef] {
        &self.constructors
    }

    /// Indexer, if declared
    pub fn indexer(&self) -> Option<&Indexer> {
        self.indexer.as_ref()
    }

    /// Delegate signature (`Invoke`), for delegate types
    pub fn invoke_method(&self) -> Option<&MethodRef> {
        if self.kind != ClassKind::Delegate {
            return None;
        }
        self.members_named("Invoke").find_map(|m| match m {
            Member::Method(method) => Some(method),
            _ => None,
        })
    }

    pub(crate) fn display_hook(&self) -> Option<&DisplayFn> {
        self.display.as_ref()
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInfo")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members.len())
            .finish()
    }
}

/// Builder for [`ClassInfo`]
pub struct ClassBuilder {
    info: ClassInfo,
}

impl ClassBuilder {
    fn new(name: &str) -> Self {
        let namespace = name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("");
        ClassBuilder {
            info: ClassInfo {
                name: Arc::from(name),
                namespace: Arc::from(namespace),
                kind: ClassKind::Class,
                base: None,
                interfaces: Vec::new(),
                members: Vec::new(),
                constructors: Vec::new(),
                indexer: None,
                display: None,
            },
        }
    }

    fn new_method(
        &self,
        name: &str,
        params: Vec<ParamInfo>,
        ret: NativeType,
        is_static: bool,
        body: Option<MethodFn>,
    ) -> MethodRef {
        Arc::new(MethodInfo {
            name: Arc::from(name),
            declaring_type: self.info.name.clone(),
            params,
            ret,
            is_static,
            is_constructor: false,
            body,
        })
    }

    /// Set the kind
    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.info.kind = kind;
        self
    }

    /// Mark as an interface
    pub fn interface(self) -> Self {
        self.kind(ClassKind::Interface)
    }

    /// Set the base class
    pub fn base(mut self, name: &str) -> Self {
        self.info.base = Some(Arc::from(name));
        self
    }

    /// Add an implemented interface
    pub fn implements(mut self, name: &str) -> Self {
        self.info.interfaces.push(Arc::from(name));
        self
    }

    /// Add a constructor
    pub fn constructor<F>(mut self, params: Vec<ParamInfo>, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> NativeResult<NativeValue> + Send + Sync + 'static,
    {
        let ctor = Arc::new(MethodInfo {
            name: Arc::from(".ctor"),
            declaring_type: self.info.name.clone(),
            params,
            ret: NativeType::Class(self.info.name.clone()),
            is_static: true,
            is_constructor: true,
            body: Some(Arc::new(body)),
        });
        self.info.constructors.push(ctor);
        self
    }

    /// Add an instance method overload
    pub fn method<F>(mut self, name: &str, params: Vec<ParamInfo>, ret: NativeType, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> NativeResult<NativeValue> + Send + Sync + 'static,
    {
        let m = self.new_method(name, params, ret, false, Some(Arc::new(body)));
        self.info.members.push(Member::Method(m));
        self
    }

    /// Add a static method overload
    pub fn static_method<F>(
        mut self,
        name: &str,
        params: Vec<ParamInfo>,
        ret: NativeType,
        body: F,
    ) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> NativeResult<NativeValue> + Send + Sync + 'static,
    {
        let m = self.new_method(name, params, ret, true, Some(Arc::new(body)));
        self.info.members.push(Member::Method(m));
        self
    }

    /// Add an interface method without implementation
    pub fn abstract_method(mut self, name: &str, params: Vec<ParamInfo>, ret: NativeType) -> Self {
        let m = self.new_method(name, params, ret, false, None);
        self.info.members.push(Member::Method(m));
        self
    }

    /// Add an instance field stored in host data of type `T`
    pub fn field<T, G, S>(mut self, name: &str, ty: NativeType, get: G, set: S) -> Self
    where
        T: Any,
        G: Fn(&T) -> NativeValue + Send + Sync + 'static,
        S: Fn(&mut T, NativeValue) + Send + Sync + 'static,
    {
        let field = FieldInfo {
            name: Arc::from(name),
            ty,
            is_static: false,
            get: Some(host_getter(self.info.name.clone(), get)),
            set: Some(host_setter(self.info.name.clone(), set)),
        };
        self.info.members.push(Member::Field(Arc::new(field)));
        self
    }

    /// Add a static field with its own storage
    pub fn static_field(mut self, name: &str, ty: NativeType, initial: NativeValue) -> Self {
        let storage = Arc::new(RwLock::new(initial));
        let read = storage.clone();
        let field = FieldInfo {
            name: Arc::from(name),
            ty,
            is_static: true,
            get: Some(Arc::new(move |_: Option<&ObjectRef>| -> NativeResult<NativeValue> {
                Ok(read.read().clone())
            })),
            set: Some(Arc::new(move |_: Option<&ObjectRef>, value: NativeValue| -> NativeResult<()> {
                *storage.write() = value;
                Ok(())
            })),
        };
        self.info.members.push(Member::Field(Arc::new(field)));
        self
    }

    /// Add a property with explicit accessors. Accessors receive the target
    /// (`None` when `is_static`).
    pub fn property(
        mut self,
        name: &str,
        ty: NativeType,
        is_static: bool,
        get: Option<Getter>,
        set: Option<Setter>,
    ) -> Self {
        let prop = FieldInfo {
            name: Arc::from(name),
            ty,
            is_static,
            get,
            set,
        };
        self.info.members.push(Member::Property(Arc::new(prop)));
        self
    }

    /// Add an event
    pub fn event(
        mut self,
        name: &str,
        delegate_type: &str,
        is_static: bool,
        add: EventFn,
        remove: EventFn,
    ) -> Self {
        let event = EventInfo {
            name: Arc::from(name),
            delegate_type: Arc::from(delegate_type),
            is_static,
            add,
            remove,
        };
        self.info.members.push(Member::Event(Arc::new(event)));
        self
    }

    /// Declare a nested type; `full_name` must be registered separately
    pub fn nested(mut self, name: &str, full_name: &str) -> Self {
        self.info.members.push(Member::NestedType {
            name: Arc::from(name),
            full_name: Arc::from(full_name),
        });
        self
    }

    /// Declare the indexer
    pub fn indexer(
        mut self,
        key: NativeType,
        value: NativeType,
        get: Option<IndexGetter>,
        set: Option<IndexSetter>,
    ) -> Self {
        self.info.indexer = Some(Indexer {
            key,
            value,
            get,
            set,
        });
        self
    }

    /// Custom string representation
    pub fn display<F>(mut self, f: F) -> Self
    where
        F: Fn(&NativeObject) -> String + Send + Sync + 'static,
    {
        self.info.display = Some(Arc::new(f));
        self
    }

    /// Finish the description
    pub fn build(self) -> ClassRef {
        Arc::new(self.info)
    }
}

fn host_getter<T, G>(class: Arc<str>, get: G) -> Getter
where
    T: Any,
    G: Fn(&T) -> NativeValue + Send + Sync + 'static,
{
    Arc::new(move |target: Option<&ObjectRef>| -> NativeResult<NativeValue> {
        target.and_then(|t| t.with(|data: &T| get(data))).ok_or_else(|| {
            BridgeError::InvalidTarget(format!("field access requires a '{}' instance", class)).into()
        })
    })
}

fn host_setter<T, S>(class: Arc<str>, set: S) -> Setter
where
    T: Any,
    S: Fn(&mut T, NativeValue) + Send + Sync + 'static,
{
    Arc::new(move |target: Option<&ObjectRef>, value: NativeValue| -> NativeResult<()> {
        target
            .and_then(|t| t.with_mut(|data: &mut T| set(data, value)))
            .ok_or_else(|| {
                BridgeError::InvalidTarget(format!("field access requires a '{}' instance", class))
                    .into()
            })
    })
}
