//! Script-side helper functions
//!
//! `import_type`, `get_method_bysig` and `get_constructor_bysig` are
//! installed as globals of every session unless `register_globals` is off.

use std::rc::Rc;

use moonlink_vm::{LuaType, State};

use crate::dispatch::{Binding, MethodWrapper};
use crate::error::{BridgeError, NativeResult};
use crate::metatables::handler;
use crate::translator::{wrapper_function, ObjectTranslator};
use crate::types::{ClassRef, Member, MethodRef, NativeType};
use crate::value::ObjectRef;

/// Install the helper globals
pub(crate) fn register(state: &mut State) {
    let mut globals = state.globals().borrow_mut();
    globals.set_str("import_type", handler("import_type", import_type));
    globals.set_str("get_method_bysig", handler("get_method_bysig", get_method_bysig));
    globals.set_str(
        "get_constructor_bysig",
        handler("get_constructor_bysig", get_constructor_bysig),
    );
}

fn import_type(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let class = state
        .to_lua_string(1)
        .and_then(|name| translator.catalog().find(&name));
    match class {
        Some(class) => translator.push_type(state, &class),
        None => state.push_nil(),
    }
    Ok(1)
}

/// `get_method_bysig(type_or_object, name, typename...)`
fn get_method_bysig(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let (class, target) = class_argument(state, translator)?;
    let name = match state.type_of(2) {
        LuaType::String => state.to_lua_string(2).map(|s| s.to_string()).unwrap_or_default(),
        other => {
            return Err(BridgeError::TypeMismatch {
                expected: "string".into(),
                got: other.name().into(),
            }
            .into())
        }
    };
    let signature = signature_arguments(state, 3);
    let wrapper = bind_by_signature(translator, &class, &name, &signature, target)?;
    state.push_value(moonlink_vm::LuaValue::Function(wrapper_function(&wrapper)));
    Ok(1)
}

/// `get_constructor_bysig(type, typename...)`
fn get_constructor_bysig(state: &mut State, translator: &ObjectTranslator) -> NativeResult<usize> {
    let (class, _) = class_argument(state, translator)?;
    let signature = signature_arguments(state, 2);
    let ctor = class
        .constructors()
        .iter()
        .find(|c| c.signature() == signature)
        .cloned()
        .ok_or_else(|| BridgeError::MemberNotFound {
            type_name: class.name().to_string(),
            member: format!(".ctor({})", signature.join(", ")),
        })?;
    let wrapper = Rc::new(MethodWrapper::new(".ctor", class, Binding::Constructor, vec![ctor]));
    state.push_value(moonlink_vm::LuaValue::Function(wrapper_function(&wrapper)));
    Ok(1)
}

/// Class named by argument 1: a type proxy, or the class of an object (which
/// is also returned as the binding target)
fn class_argument(
    state: &State,
    translator: &ObjectTranslator,
) -> NativeResult<(ClassRef, Option<ObjectRef>)> {
    let obj = translator.get_net_object(state, 1).ok_or_else(|| {
        BridgeError::InvalidTarget("expected a type proxy or a native object".into())
    })?;
    Ok(match obj.type_target() {
        Some(class) => (class.clone(), None),
        None => (obj.class().clone(), Some(obj)),
    })
}

/// Canonical type names from the string arguments starting at `from`
fn signature_arguments(state: &State, from: i32) -> Vec<String> {
    (from..=state.get_top())
        .filter_map(|i| state.to_lua_string(i))
        .map(|s| NativeType::parse(&s).name())
        .collect()
}

/// Overload of `name` with exactly the given parameter types, searched along
/// the base class chain
pub(crate) fn find_by_signature(
    translator: &ObjectTranslator,
    class: &ClassRef,
    name: &str,
    signature: &[String],
) -> Option<MethodRef> {
    translator
        .catalog()
        .hierarchy(class)
        .iter()
        .flat_map(|c| c.members_named(name).cloned().collect::<Vec<_>>())
        .find_map(|m| match m {
            Member::Method(method) if method.signature() == signature => Some(method),
            _ => None,
        })
}

/// Single-overload wrapper. Instance methods are bound to `target` when one
/// is given.
pub(crate) fn bind_by_signature(
    translator: &ObjectTranslator,
    class: &ClassRef,
    name: &str,
    signature: &[String],
    target: Option<ObjectRef>,
) -> Result<Rc<MethodWrapper>, BridgeError> {
    let method = find_by_signature(translator, class, name, signature).ok_or_else(|| {
        BridgeError::MemberNotFound {
            type_name: class.name().to_string(),
            member: format!("{}({})", name, signature.join(", ")),
        }
    })?;
    let binding = if method.is_static {
        Binding::Static
    } else {
        Binding::Instance
    };
    let wrapper = MethodWrapper::new(name, class.clone(), binding, vec![method]);
    Ok(Rc::new(match target {
        Some(obj) if binding == Binding::Instance => wrapper.bind(obj),
        _ => wrapper,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::Lua;
    use crate::types::{ClassInfo, ParamInfo};
    use crate::value::NativeValue;

    fn formatter() -> ClassRef {
        ClassInfo::builder("Demo.Format")
            .static_method(
                "Show",
                vec![ParamInfo::new("n", NativeType::I32)],
                NativeType::String,
                |inv| Ok(format!("int {}", inv.arg(0).as_i32().unwrap_or(0)).into()),
            )
            .static_method(
                "Show",
                vec![ParamInfo::new("n", NativeType::F64)],
                NativeType::String,
                |inv| Ok(format!("double {}", inv.arg(0).as_f64().unwrap_or(0.0)).into()),
            )
            .build()
    }

    #[test]
    fn test_import_type_unknown_is_nil() {
        let mut lua = Lua::new();
        let state = lua.state_mut();
        state.get_global("import_type").unwrap();
        state.push_string("Demo.Missing");
        state.call(1, 1).unwrap();
        assert!(state.is_nil(-1));
    }

    #[test]
    fn test_method_by_signature_skips_first_match() {
        let mut lua = Lua::new();
        lua.register_type(formatter());
        let state = lua.state_mut();
        state.get_global("get_method_bysig").unwrap();
        state.get_global("import_type").unwrap();
        state.push_string("Demo.Format");
        state.call(1, 1).unwrap();
        state.push_string("Show");
        state.push_string("f64");
        state.call(3, 1).unwrap();

        state.push_number(2.0);
        state.call(1, 1).unwrap();
        assert_eq!(state.value(-1).as_str(), Some("double 2"));
    }

    #[test]
    fn test_bound_instance_method() {
        let mut lua = Lua::new();
        let class = ClassInfo::builder("Demo.Greeter")
            .method("Hello", vec![], NativeType::String, |inv| {
                inv.with_target(|name: &String| NativeValue::from(format!("hi {}", name)))
            })
            .build();
        lua.register_type(class.clone());
        let obj = crate::value::NativeObject::new(&class, String::from("ada"));
        let translator = lua.translator().clone();
        let wrapper = bind_by_signature(&translator, &class, "Hello", &[], Some(obj)).unwrap();
        assert_eq!(wrapper.binding(), Binding::Instance);

        let state = lua.state_mut();
        state.push_value(moonlink_vm::LuaValue::Function(wrapper_function(&wrapper)));
        state.call(0, 1).unwrap();
        assert_eq!(state.value(-1).as_str(), Some("hi ada"));
    }
}
