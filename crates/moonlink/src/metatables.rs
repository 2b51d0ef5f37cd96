//! Proxy metatables
//!
//! Three metatables give native values their behavior inside the VM:
//!
//! - `moonlink.object`: instance proxies. Indexing resolves instance
//!   members, array elements and indexers; assignment writes fields,
//!   properties, array elements and indexers.
//! - `moonlink.class`: type proxies. Indexing resolves static members,
//!   calling runs a constructor and indexing with a number allocates an
//!   array of the type.
//! - `moonlink.function`: delegate proxies. Calling runs `Invoke`.
//!
//! Every handler reports failures as raised [`WrappedError`] values.
//!
//! [`WrappedError`]: crate::error::WrappedError

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use moonlink_vm::{native_fn, Function, FunctionRef, LuaResult, LuaType, LuaValue, State, Table, TableRef};

use crate::dispatch::{Binding, MethodWrapper};
use crate::error::{BridgeError, NativeException, NativeResult, WrappedError};
use crate::error_bridge::{raise_bridge, raise_from_native, ERROR_METATABLE};
use crate::translator::{ObjectHandle, ObjectTranslator, OBJECTS_KEY};
use crate::types::{ClassKind, ClassRef, EventInfo, FieldInfo, NativeType};
use crate::value::{NativeValue, ObjectData, ObjectRef};

/// Registry key of the instance proxy metatable
pub const OBJECT_METATABLE: &str = "moonlink.object";

/// Registry key of the type proxy metatable
pub const CLASS_METATABLE: &str = "moonlink.class";

/// Registry key of the delegate proxy metatable
pub const FUNCTION_METATABLE: &str = "moonlink.function";

/// Result of a member lookup, as kept in the per-session member cache
#[derive(Clone)]
pub(crate) enum CachedMember {
    /// Method group with its VM function
    Method {
        wrapper: Rc<MethodWrapper>,
        function: FunctionRef,
    },
    Field(Arc<FieldInfo>),
    Property(Arc<FieldInfo>),
    Event(Arc<EventInfo>),
    /// Nested type; `None` when it was never registered
    NestedType(Option<ClassRef>),
}

impl CachedMember {
    pub(crate) fn is_static(&self) -> bool {
        match self {
            CachedMember::Method { wrapper, .. } => wrapper.binding() != Binding::Instance,
            CachedMember::Field(info) | CachedMember::Property(info) => info.is_static,
            CachedMember::Event(event) => event.is_static,
            CachedMember::NestedType(_) => true,
        }
    }
}

pub(crate) type Handler = fn(&mut State, &ObjectTranslator) -> NativeResult<usize>;

/// Create the proxy and error metatables and the weak objects table in the
/// registry. Returns the objects table.
pub(crate) fn install(state: &mut State) -> TableRef {
    let objects = Rc::new(RefCell::new(Table::new()));
    let mut mode = Table::new();
    mode.set_str("__mode", LuaValue::from("v"));
    objects
        .borrow_mut()
        .set_metatable(Some(Rc::new(RefCell::new(mode))));

    let object_mt = metatable(&[
        ("__index", handler("object.__index", object_index)),
        ("__newindex", handler("object.__newindex", object_newindex)),
        ("__tostring", handler("object.__tostring", proxy_tostring)),
        ("__gc", raw("object.__gc", proxy_gc)),
    ]);
    let class_mt = metatable(&[
        ("__index", handler("class.__index", class_index)),
        ("__newindex", handler("class.__newindex", class_newindex)),
        ("__call", raw("class.__call", class_call)),
        ("__tostring", handler("class.__tostring", proxy_tostring)),
        ("__gc", raw("class.__gc", proxy_gc)),
    ]);
    let function_mt = metatable(&[
        ("__index", handler("function.__index", object_index)),
        ("__call", raw("function.__call", function_call)),
        ("__tostring", handler("function.__tostring", proxy_tostring)),
        ("__gc", raw("function.__gc", proxy_gc)),
    ]);
    let error_mt = metatable(&[("__tostring", raw("error.__tostring", error_tostring))]);

    let mut registry = state.registry().borrow_mut();
    registry.set_str(OBJECTS_KEY, LuaValue::Table(objects.clone()));
    registry.set_str(OBJECT_METATABLE, object_mt);
    registry.set_str(CLASS_METATABLE, class_mt);
    registry.set_str(FUNCTION_METATABLE, function_mt);
    registry.set_str(ERROR_METATABLE, error_mt);
    objects
}

fn metatable(entries: &[(&str, LuaValue)]) -> LuaValue {
    let mut table = Table::new();
    for (name, value) in entries {
        table.set_str(name, value.clone());
    }
    LuaValue::Table(Rc::new(RefCell::new(table)))
}

/// VM function running `body` with the session translator; failures are
/// raised through the error bridge
pub(crate) fn handler(name: &str, body: Handler) -> LuaValue {
    let f = native_fn(move |state| {
        let translator = ObjectTranslator::from_state(state).map_err(|e| raise_bridge(state, e))?;
        body(state, &translator).map_err(|e| raise_from_native(state, e.innermost()))
    });
    LuaValue::Function(Rc::new(Function::named(name, f)))
}

fn raw(name: &str, body: fn(&mut State) -> LuaResult<usize>) -> LuaValue {
    LuaValue::Function(Rc::new(Function::named(name, native_fn(body))))
}

// ============================================================================
// Instance proxies
// ============================================================================

fn self_object(state: &State, translator: &ObjectTranslator) -> NativeResult<ObjectRef> {
    translator.get_net_object(state, 1).ok_or_else(|| {
        BridgeError::InvalidTarget("proxy does not refer to a live native object".into()).into()
    })
}

fn key_name(state: &State, idx: i32) -> String {
    state
        .to_lua_string(idx)
        .map(|s| s.to_string())
        .unwrap_or_else(|| state.type_of(idx).name().to_string())
}

fn member_not_found(class: &ClassRef, member: String) -> NativeException {
    BridgeError::MemberNotFound {
        type_name: class.name().to_string(),
        member,
    }
    .into()
}

fn object_index(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let obj = self_object(state, translator)?;
    let class = obj.class().clone();
    if state.type_of(2) == LuaType::String {
        let name = key_name(state, 2);
        if let Some(member) = translator.member(&class, Binding::Instance, &name) {
            push_member(state, translator, Some(&obj), member)?;
            return Ok(1);
        }
    }
    if let Some(items) = obj.array_items() {
        if state.type_of(2) == LuaType::Number {
            let i = array_index(state, items.read().len())?;
            let value = items.read()[i].clone();
            translator.push(state, &value);
            return Ok(1);
        }
    }
    if let Some(owner) = translator.indexer_class(&class) {
        if let Some(get) = owner.indexer().and_then(|ix| ix.get.clone()) {
            let key = indexer_key(state, translator, &owner)?;
            let value = get(&obj, &key)?;
            translator.push(state, &value);
            return Ok(1);
        }
    }
    Err(member_not_found(&class, key_name(state, 2)))
}

fn object_newindex(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let obj = self_object(state, translator)?;
    let class = obj.class().clone();
    if state.type_of(2) == LuaType::String {
        let name = key_name(state, 2);
        let member = translator.member(&class, Binding::Instance, &name);
        if let Some(member) = member.filter(|m| !m.is_static()) {
            assign_member(state, translator, Some(&obj), &class, &name, member)?;
            return Ok(0);
        }
        if translator.member(&class, Binding::Static, &name).is_some() {
            return Err(BridgeError::StaticFromInstance {
                type_name: class.name().to_string(),
                member: name,
            }
            .into());
        }
    }
    if let ObjectData::Array { element, items } = obj.data() {
        if state.type_of(2) == LuaType::Number {
            let len = items.read().len();
            let i = array_index(state, len)?;
            let value = convert(state, translator, 3, element)?;
            items.write()[i] = value;
            return Ok(0);
        }
    }
    if let Some(owner) = translator.indexer_class(&class) {
        if let Some(indexer) = owner.indexer() {
            let set = indexer.set.clone().ok_or_else(|| {
                NativeException::from(BridgeError::InvalidAssignment(format!(
                    "indexer of '{}' is read-only",
                    owner.name()
                )))
            })?;
            let key = indexer_key(state, translator, &owner)?;
            let value = convert(state, translator, 3, &indexer.value)?;
            set(&obj, &key, value)?;
            return Ok(0);
        }
    }
    Err(member_not_found(&class, key_name(state, 2)))
}

/// 0-based array position from the key at stack position 2
fn array_index(state: &State, len: usize) -> NativeResult<usize> {
    let n = state.to_number(2).unwrap_or(f64::NAN);
    if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
        return Err(BridgeError::InvalidTarget(format!(
            "index {} is out of range for an array of length {}",
            key_name(state, 2),
            len
        ))
        .into());
    }
    Ok(n as usize)
}

fn indexer_key(
    state: &mut State,
    translator: &ObjectTranslator,
    owner: &ClassRef,
) -> NativeResult<NativeValue> {
    match owner.indexer() {
        Some(indexer) => convert(state, translator, 2, &indexer.key),
        None => Err(member_not_found(owner, key_name(state, 2))),
    }
}

fn convert(
    state: &mut State,
    translator: &ObjectTranslator,
    idx: i32,
    ty: &NativeType,
) -> NativeResult<NativeValue> {
    translator.get_as_type(state, idx, ty).ok_or_else(|| {
        BridgeError::TypeMismatch {
            expected: ty.name(),
            got: state.type_of(idx).name().to_string(),
        }
        .into()
    })
}

/// Push the value of a resolved member. `target` is `None` for static
/// lookups.
fn push_member(
    state: &mut State,
    translator: &ObjectTranslator,
    target: Option<&ObjectRef>,
    member: CachedMember,
) -> NativeResult<()> {
    match member {
        CachedMember::Method { function, .. } => state.push_value(LuaValue::Function(function)),
        CachedMember::Field(info) | CachedMember::Property(info) => {
            let get = info.get.clone().ok_or_else(|| {
                NativeException::from(BridgeError::InvalidTarget(format!(
                    "'{}' has no getter",
                    info.name
                )))
            })?;
            let value = get(target)?;
            translator.push(state, &value);
        }
        CachedMember::Event(event) => {
            let binding = translator.catalog().event_binding(target.cloned(), event);
            translator.push_object(state, &binding);
        }
        CachedMember::NestedType(Some(class)) => translator.push_type(state, &class),
        CachedMember::NestedType(None) => state.push_nil(),
    }
    Ok(())
}

fn assign_member(
    state: &mut State,
    translator: &ObjectTranslator,
    target: Option<&ObjectRef>,
    class: &ClassRef,
    name: &str,
    member: CachedMember,
) -> NativeResult<()> {
    let info = match member {
        CachedMember::Field(info) | CachedMember::Property(info) => info,
        _ => {
            return Err(BridgeError::InvalidAssignment(format!(
                "'{}.{}' is not a field or property",
                class.name(),
                name
            ))
            .into())
        }
    };
    let set = info.set.clone().ok_or_else(|| {
        NativeException::from(BridgeError::InvalidAssignment(format!(
            "'{}.{}' is read-only",
            class.name(),
            name
        )))
    })?;
    let value = convert(state, translator, 3, &info.ty)?;
    set(target, value)?;
    Ok(())
}

fn proxy_tostring(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let text = match translator.get_net_object(state, 1) {
        Some(obj) => obj.display(),
        None => "<collected native object>".to_string(),
    };
    state.push_string(&text);
    Ok(1)
}

fn proxy_gc(state: &mut State) -> LuaResult<usize> {
    let Some(handle) = state
        .to_userdata(1)
        .and_then(|ud| ud.downcast_ref::<ObjectHandle>().copied())
    else {
        return Ok(0);
    };
    match ObjectTranslator::from_state(state) {
        Ok(translator) => translator.forget(handle.id),
        Err(_) => log::warn!("proxy {} collected without a marshaling session", handle.id),
    }
    Ok(0)
}

// ============================================================================
// Type proxies
// ============================================================================

fn self_type(state: &State, translator: &ObjectTranslator) -> NativeResult<ClassRef> {
    self_object(state, translator)?
        .type_target()
        .cloned()
        .ok_or_else(|| BridgeError::InvalidTarget("not a type proxy".into()).into())
}

fn class_index(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let class = self_type(state, translator)?;
    if state.type_of(2) == LuaType::Number {
        let n = state.to_number(2).unwrap_or(-1.0);
        let limit = translator.options().max_array_length.min(i32::MAX as usize) as f64;
        if n.fract() != 0.0 || n < 0.0 || n > limit {
            return Err(BridgeError::InvalidTarget(format!(
                "invalid array length {}",
                key_name(state, 2)
            ))
            .into());
        }
        let element = NativeType::parse(class.name());
        let items = vec![element.default_value(); n as usize];
        let array = translator.catalog().new_array(element, items);
        translator.push_object(state, &array);
        return Ok(1);
    }
    let name = key_name(state, 2);
    match translator.member(&class, Binding::Static, &name) {
        Some(member) => {
            push_member(state, translator, None, member)?;
            Ok(1)
        }
        None => Err(member_not_found(&class, name)),
    }
}

fn class_newindex(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let class = self_type(state, translator)?;
    let name = key_name(state, 2);
    match translator.member(&class, Binding::Static, &name) {
        Some(member) => {
            assign_member(state, translator, None, &class, &name, member)?;
            Ok(0)
        }
        None => Err(member_not_found(&class, name)),
    }
}

/// `Type(args...)`: run a constructor, or wrap a function for delegate types
fn class_call(state: &mut State) -> LuaResult<usize> {
    let translator = ObjectTranslator::from_state(state).map_err(|e| raise_bridge(state, e))?;
    let class = match self_type(state, &translator) {
        Ok(class) => class,
        Err(e) => return Err(raise_from_native(state, e)),
    };
    if let Some(wrapper) = translator.constructor_wrapper(&class) {
        state.remove(1);
        return wrapper.call(state);
    }
    if class.kind() == ClassKind::Delegate && state.type_of(2) == LuaType::Function {
        let function = translator.to_lua_ref(state, 2);
        return match translator.proxies().delegate_for(&class, function) {
            Ok(delegate) => {
                translator.push_object(state, &delegate);
                Ok(1)
            }
            Err(e) => Err(raise_bridge(state, e)),
        };
    }
    Err(raise_bridge(
        state,
        BridgeError::InvalidTarget(format!("'{}' has no constructors", class.name())),
    ))
}

// ============================================================================
// Delegate proxies and errors
// ============================================================================

/// `delegate(args...)`: dispatch to `Invoke` with the delegate as target
fn function_call(state: &mut State) -> LuaResult<usize> {
    let translator = ObjectTranslator::from_state(state).map_err(|e| raise_bridge(state, e))?;
    let delegate = match self_object(state, &translator) {
        Ok(obj) => obj,
        Err(e) => return Err(raise_from_native(state, e)),
    };
    let class = delegate.class().clone();
    match translator.member(&class, Binding::Instance, "Invoke") {
        Some(CachedMember::Method { wrapper, .. }) => wrapper.call(state),
        _ => Err(raise_bridge(
            state,
            BridgeError::InvalidTarget(format!("'{}' is not callable", class.name())),
        )),
    }
}

fn error_tostring(state: &mut State) -> LuaResult<usize> {
    let text = match state.to_userdata(1) {
        Some(ud) => match ud.downcast_ref::<WrappedError>() {
            Some(wrapped) => format!("{}{}", wrapped.location, wrapped.exception),
            None => "native error".to_string(),
        },
        None => "native error".to_string(),
    };
    state.push_string(&text);
    Ok(1)
}
