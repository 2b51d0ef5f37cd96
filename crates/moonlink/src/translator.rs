//! Value translation and object identity
//!
//! One [`ObjectTranslator`] is attached to each VM as its application data.
//! It converts values in both directions, keeps every exposed object mapped
//! to exactly one live proxy userdata, and owns the per-session caches
//! (members, constructors, type objects).
//!
//! # Architecture
//!
//! ```text
//! native object ──expose──> ObjectId ──> weak "objects" table ──> userdata
//!      ^                                                            │
//!      └──────────── resolve(ObjectId) <── ObjectHandle payload <───┘
//! ```
//!
//! The objects table holds proxies weakly. When the VM drops the last
//! reference to a proxy its `__gc` handler revokes the id. If the object is
//! pushed again while that finalizer is still pending, the stale id is
//! revoked on the spot and the object gets a fresh id and proxy.
//!
//! # Thread Safety
//!
//! The translator itself lives on the VM thread. Only the
//! [`ReferenceRegistry`] and the [`LuaRef`] release queue are shared with
//! other threads.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moonlink_vm::{Function, FunctionRef, LuaType, LuaValue, State, TableRef};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::catalog::TypeCatalog;
use crate::config::BridgeOptions;
use crate::dispatch::{Binding, MethodWrapper};
use crate::error::{BridgeError, BridgeResult};
use crate::matcher::check_type;
use crate::metatables::{self, CachedMember, CLASS_METATABLE, FUNCTION_METATABLE, OBJECT_METATABLE};
use crate::proxy::ProxyFactory;
use crate::registry::{ObjectId, ReferenceRegistry};
use crate::types::{ClassKind, ClassRef, Member, MethodRef, NativeType};
use crate::value::{LuaRef, NativeValue, ObjectData, ObjectRef, ReleaseQueue};

/// Registry key of the weak `ObjectId -> proxy` table
pub(crate) const OBJECTS_KEY: &str = "moonlink.objects";

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Payload of a proxy userdata
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectHandle {
    pub(crate) id: ObjectId,
}

type MemberKey = (Arc<str>, Binding, Arc<str>);

/// Per-session translation state
pub struct ObjectTranslator {
    session: u64,
    catalog: Arc<TypeCatalog>,
    registry: ReferenceRegistry,
    options: BridgeOptions,
    proxies: Arc<dyn ProxyFactory>,
    objects: TableRef,
    members: RefCell<FxHashMap<MemberKey, CachedMember>>,
    constructors: RefCell<FxHashMap<Arc<str>, Rc<MethodWrapper>>>,
    type_objects: RefCell<FxHashMap<Arc<str>, ObjectRef>>,
    materialized: RefCell<FxHashSet<ObjectId>>,
    events: RefCell<Vec<(ObjectRef, ObjectRef)>>,
    releases: ReleaseQueue,
}

impl ObjectTranslator {
    /// Create a translator, install the proxy metatables and attach it to
    /// `state`
    pub fn install(
        state: &mut State,
        catalog: Arc<TypeCatalog>,
        registry: ReferenceRegistry,
        options: BridgeOptions,
        proxies: Arc<dyn ProxyFactory>,
    ) -> Rc<Self> {
        let objects = metatables::install(state);
        let translator = Rc::new(ObjectTranslator {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            catalog,
            registry,
            options,
            proxies,
            objects,
            members: RefCell::new(FxHashMap::default()),
            constructors: RefCell::new(FxHashMap::default()),
            type_objects: RefCell::new(FxHashMap::default()),
            materialized: RefCell::new(FxHashSet::default()),
            events: RefCell::new(Vec::new()),
            releases: Arc::new(Mutex::new(Vec::new())),
        });
        state.set_app_data(translator.clone());
        if translator.options.register_globals {
            crate::globals::register(state);
        }
        log::debug!("marshaling session {} installed", translator.session);
        translator
    }

    /// Translator attached to `state`
    pub fn from_state(state: &State) -> BridgeResult<Rc<Self>> {
        state.app_data::<ObjectTranslator>().ok_or_else(|| {
            BridgeError::InvalidTarget("no marshaling session is attached to this VM".into())
        })
    }

    /// Session id
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Loaded types
    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    /// Object id map
    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    /// Session options
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Delegate and interface adapter factory
    pub fn proxies(&self) -> &dyn ProxyFactory {
        &*self.proxies
    }

    // ========================================================================
    // Native -> VM
    // ========================================================================

    /// Push a native value
    pub fn push(&self, state: &mut State, value: &NativeValue) {
        match value {
            NativeValue::Null => state.push_nil(),
            NativeValue::Bool(b) => state.push_boolean(*b),
            NativeValue::F32(v) => state.push_number(*v as f64),
            NativeValue::F64(v) => state.push_number(*v),
            NativeValue::U64(v) => state.push_number(*v as f64),
            NativeValue::Str(s) => state.push_string(s),
            NativeValue::Object(obj) => self.push_object(state, obj),
            NativeValue::Table(r) | NativeValue::Function(r) | NativeValue::UserData(r) => {
                self.push_ref(state, r)
            }
            other => match other.as_i64() {
                Some(n) => state.push_number(n as f64),
                None => state.push_nil(),
            },
        }
    }

    /// Push the proxy of `obj`, creating it if needed. Objects of
    /// blacklisted namespaces are pushed as their string form.
    pub fn push_object(&self, state: &mut State, obj: &ObjectRef) {
        if self.options.is_blacklisted(obj.class().namespace()) {
            state.push_string(&obj.display());
            return;
        }
        let mut id = self.registry.expose(obj);
        let existing = self.objects.borrow().get_int(id.0 as i64);
        if let LuaValue::UserData(ud) = existing {
            state.push_value(LuaValue::UserData(ud));
            return;
        }
        if self.materialized.borrow_mut().remove(&id) {
            // The previous proxy is unreachable but its finalizer has not run
            self.registry.revoke(id);
            id = self.registry.expose(obj);
        }
        let metatable = self.metatable(state, proxy_metatable(obj));
        let ud = state.create_userdata(Box::new(ObjectHandle { id }), metatable);
        self.objects
            .borrow_mut()
            .set_int(id.0 as i64, LuaValue::UserData(ud.clone()));
        self.materialized.borrow_mut().insert(id);
        state.push_value(LuaValue::UserData(ud));
    }

    /// Push the type proxy of `class`
    pub fn push_type(&self, state: &mut State, class: &ClassRef) {
        let obj = self.type_object(class);
        self.push_object(state, &obj);
    }

    /// The one type object standing for `class` in this session
    pub fn type_object(&self, class: &ClassRef) -> ObjectRef {
        self.type_objects
            .borrow_mut()
            .entry(Arc::from(class.name()))
            .or_insert_with(|| self.catalog.type_object(class))
            .clone()
    }

    fn metatable(&self, state: &State, key: &str) -> Option<TableRef> {
        match state.registry().borrow().get_str(key) {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Push the VM value behind `r`. References of other sessions push nil.
    pub fn push_ref(&self, state: &mut State, r: &LuaRef) {
        if r.session() != self.session {
            log::debug!("ignoring {:?} from another session", r);
            state.push_nil();
            return;
        }
        state.push_ref(r.reference());
    }

    // ========================================================================
    // VM -> native
    // ========================================================================

    /// Keep the value at `idx` alive and return a handle to it
    pub fn to_lua_ref(&self, state: &mut State, idx: i32) -> LuaRef {
        state.push_copy(idx);
        let reference = state.create_ref();
        LuaRef::new(reference, self.session, self.releases.clone())
    }

    /// Release VM references whose handles were dropped. Returns how many
    /// were released.
    pub fn collect_released(&self, state: &mut State) -> usize {
        let released: Vec<i32> = std::mem::take(&mut *self.releases.lock());
        for r in &released {
            state.release_ref(*r);
        }
        if !released.is_empty() {
            log::debug!("released {} VM reference(s)", released.len());
        }
        released.len()
    }

    /// Generic conversion of the value at `idx`
    pub fn to_native(&self, state: &mut State, idx: i32) -> NativeValue {
        match state.value(idx) {
            LuaValue::Nil => NativeValue::Null,
            LuaValue::Boolean(b) => NativeValue::Bool(b),
            LuaValue::Number(n) => NativeValue::F64(n),
            LuaValue::String(s) => NativeValue::Str(Arc::from(&*s)),
            LuaValue::Table(_) => NativeValue::Table(self.to_lua_ref(state, idx)),
            LuaValue::Function(_) => NativeValue::Function(self.to_lua_ref(state, idx)),
            LuaValue::UserData(ud) => match ud.downcast_ref::<ObjectHandle>() {
                Some(handle) => self
                    .registry
                    .resolve(handle.id)
                    .map(NativeValue::Object)
                    .unwrap_or(NativeValue::Null),
                None => NativeValue::UserData(self.to_lua_ref(state, idx)),
            },
        }
    }

    /// Native object behind the value at `idx`: a proxy userdata, or a
    /// table whose `__index` metafield is one
    pub fn get_net_object(&self, state: &State, idx: i32) -> Option<ObjectRef> {
        let value = state.value(idx);
        let ud = match &value {
            LuaValue::UserData(ud) => ud.clone(),
            LuaValue::Table(_) => match moonlink_vm::metafield_of(&value, "__index") {
                LuaValue::UserData(ud) => ud,
                _ => return None,
            },
            _ => return None,
        };
        let handle = ud.downcast_ref::<ObjectHandle>()?;
        self.registry.resolve(handle.id)
    }

    /// Convert the value at `idx` to `ty`
    pub fn get_as_type(&self, state: &mut State, idx: i32, ty: &NativeType) -> Option<NativeValue> {
        let idx = state.abs_index(idx);
        check_type(state, self, idx, ty)?.extract(state, self, idx)
    }

    /// True if `obj` can be passed as `ty`
    pub fn is_instance_of(&self, obj: &ObjectRef, ty: &NativeType) -> bool {
        match ty.unwrap_nullable() {
            NativeType::Any => true,
            NativeType::Class(name) => self.catalog.is_assignable(name, obj.class()),
            array @ NativeType::Array(_) => obj.class().name() == array.name(),
            _ => false,
        }
    }

    /// Convert the sequence part of the table at `idx` to elements of
    /// `element`. Fails if any element does not convert.
    pub fn table_to_array(
        &self,
        state: &mut State,
        idx: i32,
        element: &NativeType,
    ) -> Option<Vec<NativeValue>> {
        let idx = state.abs_index(idx);
        if state.type_of(idx) != LuaType::Table {
            return None;
        }
        let len = state.raw_len(idx);
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            state.raw_get_i(idx, i as i64).ok()?;
            let item = self.get_as_type(state, -1, element);
            state.pop(1);
            items.push(item?);
        }
        Some(items)
    }

    // ========================================================================
    // Proxy lifetime
    // ========================================================================

    /// Forget a collected proxy
    pub(crate) fn forget(&self, id: ObjectId) {
        self.materialized.borrow_mut().remove(&id);
        let live = self.objects.borrow().get_int(id.0 as i64);
        if live.is_nil() {
            self.objects.borrow_mut().set_int(id.0 as i64, LuaValue::Nil);
        }
        self.registry.revoke(id);
    }

    // ========================================================================
    // Member and constructor caches
    // ========================================================================

    /// Resolve `name` on `class` for the given kind of lookup, using the
    /// member cache
    pub(crate) fn member(&self, class: &ClassRef, binding: Binding, name: &str) -> Option<CachedMember> {
        let key: MemberKey = (Arc::from(class.name()), binding, Arc::from(name));
        if let Some(hit) = self.members.borrow().get(&key) {
            return Some(hit.clone());
        }
        let found = match binding {
            Binding::Instance => self.scan(class, name, false).or_else(|| {
                if self.options.implicit_static {
                    self.scan(class, name, true)
                } else {
                    None
                }
            }),
            Binding::Static | Binding::Constructor => self.scan(class, name, true),
        }?;
        log::trace!("cached member {}.{} ({:?})", class.name(), name, binding);
        self.members.borrow_mut().insert(key, found.clone());
        Some(found)
    }

    fn scan(&self, class: &ClassRef, name: &str, is_static: bool) -> Option<CachedMember> {
        let chain = self.catalog.hierarchy(class);
        let methods: Vec<MethodRef> = chain
            .iter()
            .flat_map(|c| c.members_named(name))
            .filter_map(|m| match m {
                Member::Method(method) if method.is_static == is_static => Some(method.clone()),
                _ => None,
            })
            .collect();
        if !methods.is_empty() {
            let binding = if is_static {
                Binding::Static
            } else {
                Binding::Instance
            };
            let wrapper = Rc::new(MethodWrapper::new(name, class.clone(), binding, methods));
            let function = wrapper_function(&wrapper);
            return Some(CachedMember::Method { wrapper, function });
        }
        let found = chain
            .iter()
            .flat_map(|c| c.members_named(name))
            .filter(|m| m.is_static() == is_static)
            .find_map(|m| match m {
                Member::Field(f) => Some(CachedMember::Field(f.clone())),
                Member::Property(p) => Some(CachedMember::Property(p.clone())),
                Member::Event(e) => Some(CachedMember::Event(e.clone())),
                Member::NestedType { full_name, .. } => {
                    Some(CachedMember::NestedType(self.catalog.find(full_name)))
                }
                Member::Method(_) => None,
            });
        found
    }

    /// Constructor dispatcher for `class`; `None` if it declares none
    pub(crate) fn constructor_wrapper(&self, class: &ClassRef) -> Option<Rc<MethodWrapper>> {
        if let Some(hit) = self.constructors.borrow().get(class.name()) {
            return Some(hit.clone());
        }
        if class.constructors().is_empty() {
            return None;
        }
        let wrapper = Rc::new(MethodWrapper::new(
            ".ctor",
            class.clone(),
            Binding::Constructor,
            class.constructors().to_vec(),
        ));
        self.constructors
            .borrow_mut()
            .insert(Arc::from(class.name()), wrapper.clone());
        Some(wrapper)
    }

    /// Class in the hierarchy of `class` that declares an indexer
    pub(crate) fn indexer_class(&self, class: &ClassRef) -> Option<ClassRef> {
        self.catalog
            .hierarchy(class)
            .into_iter()
            .find(|c| c.indexer().is_some())
    }

    // ========================================================================
    // Event subscriptions
    // ========================================================================

    /// Remember a subscription made by a script
    pub fn track_event(&self, binding: &ObjectRef, handler: &ObjectRef) {
        self.events
            .borrow_mut()
            .push((binding.clone(), handler.clone()));
    }

    /// Forget a subscription removed by a script
    pub fn untrack_event(&self, handler: &ObjectRef) {
        self.events
            .borrow_mut()
            .retain(|(_, h)| !Arc::ptr_eq(h, handler));
    }

    /// Take every subscription still pending
    pub(crate) fn take_events(&self) -> Vec<(ObjectRef, ObjectRef)> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Number of subscriptions still pending
    pub fn pending_events(&self) -> usize {
        self.events.borrow().len()
    }
}

/// VM function calling `wrapper`
pub(crate) fn wrapper_function(wrapper: &Rc<MethodWrapper>) -> FunctionRef {
    Rc::new(Function::named(wrapper.name(), wrapper.clone().into_function()))
}

fn proxy_metatable(obj: &ObjectRef) -> &'static str {
    match obj.data() {
        ObjectData::Type(_) => CLASS_METATABLE,
        ObjectData::Delegate(_) => FUNCTION_METATABLE,
        _ if obj.class().kind() == ClassKind::Delegate => FUNCTION_METATABLE,
        _ => OBJECT_METATABLE,
    }
}
