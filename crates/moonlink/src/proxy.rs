//! Script-backed delegates and interfaces
//!
//! When a script passes a function where a delegate is expected, or a table
//! where an interface is expected, the bridge asks a [`ProxyFactory`] for a
//! native object standing in for it. [`DynamicProxyFactory`] builds those
//! objects without generating code: a delegate gets a body that calls the
//! VM function, and an interface proxy forwards each abstract method to the
//! table.

use std::sync::Arc;

use moonlink_vm::{State, Status, MULTRET};

use crate::error::{BridgeError, BridgeResult, NativeResult};
use crate::error_bridge::raise_from_vm;
use crate::translator::ObjectTranslator;
use crate::types::{ClassKind, ClassRef, Invocation, MethodFn, MethodInfo, NativeType, ParamMode};
use crate::value::{LuaRef, NativeObject, NativeValue, ObjectData, ObjectRef};

/// Produces native stand-ins for VM functions and tables
pub trait ProxyFactory {
    /// Delegate of type `class` that calls `function`
    fn delegate_for(&self, class: &ClassRef, function: LuaRef) -> BridgeResult<ObjectRef>;

    /// Object implementing interface `class` by forwarding to `table`
    fn interface_for(&self, class: &ClassRef, table: LuaRef) -> BridgeResult<ObjectRef>;
}

/// Default [`ProxyFactory`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicProxyFactory;

impl ProxyFactory for DynamicProxyFactory {
    fn delegate_for(&self, class: &ClassRef, function: LuaRef) -> BridgeResult<ObjectRef> {
        let invoke = class.invoke_method().cloned().ok_or_else(|| {
            BridgeError::InvalidTarget(format!("'{}' is not a delegate type", class.name()))
        })?;
        let body: MethodFn = Arc::new(move |inv: &mut Invocation<'_>| -> NativeResult<NativeValue> {
            let mut args = inv.args().to_vec();
            let ret = call_script_function(inv.state, &function, &invoke, &mut args)?;
            for (i, value) in args.into_iter().enumerate() {
                inv.set_arg(i, value);
            }
            Ok(ret)
        });
        Ok(NativeObject::delegate(class, body))
    }

    fn interface_for(&self, class: &ClassRef, table: LuaRef) -> BridgeResult<ObjectRef> {
        if class.kind() != ClassKind::Interface {
            return Err(BridgeError::InvalidTarget(format!(
                "'{}' is not an interface",
                class.name()
            )));
        }
        Ok(NativeObject::with_data(class, ObjectData::ScriptTable(table)))
    }
}

/// Call a VM function with the in/ref arguments of `method`
pub fn call_script_function(
    state: &mut State,
    function: &LuaRef,
    method: &MethodInfo,
    args: &mut [NativeValue],
) -> NativeResult<NativeValue> {
    let translator = ObjectTranslator::from_state(state)?;
    let top = state.get_top();
    translator.push_ref(state, function);
    let nargs = push_in_args(state, &translator, method, args);
    finish_call(state, &translator, method, args, top, nargs)
}

/// Call `table[method.name](table, args...)`. A missing function yields the
/// default of the return type.
pub fn call_table_method(
    state: &mut State,
    table: &LuaRef,
    method: &MethodInfo,
    args: &mut [NativeValue],
) -> NativeResult<NativeValue> {
    let translator = ObjectTranslator::from_state(state)?;
    let top = state.get_top();
    translator.push_ref(state, table);
    if let Err(e) = state.get_field(-1, &method.name) {
        state.set_top(top);
        return Err(crate::error_bridge::from_lua_error(state, e));
    }
    if !matches!(state.type_of(-1), moonlink_vm::LuaType::Function) {
        state.set_top(top);
        return Ok(method.ret.default_value());
    }
    // table, function -> function, table
    state.insert(-2);
    let nargs = push_in_args(state, &translator, method, args);
    finish_call(state, &translator, method, args, top, nargs + 1)
}

fn push_in_args(
    state: &mut State,
    translator: &ObjectTranslator,
    method: &MethodInfo,
    args: &[NativeValue],
) -> i32 {
    let mut n = 0;
    for (param, value) in method.params.iter().zip(args) {
        if param.mode != ParamMode::Out {
            translator.push(state, value);
            n += 1;
        }
    }
    n
}

/// Run the prepared call and convert its results: the first is the return
/// value (unless void), the rest fill out/ref parameters in order
fn finish_call(
    state: &mut State,
    translator: &ObjectTranslator,
    method: &MethodInfo,
    args: &mut [NativeValue],
    top: i32,
    nargs: i32,
) -> NativeResult<NativeValue> {
    if state.pcall(nargs, MULTRET) != Status::Ok {
        let error = state.pop_value();
        state.set_top(top);
        return Err(raise_from_vm(state, error));
    }
    let last = state.get_top();
    let outcome = read_results(state, translator, method, args, top + 1, last);
    state.set_top(top);
    outcome
}

fn read_results(
    state: &mut State,
    translator: &ObjectTranslator,
    method: &MethodInfo,
    args: &mut [NativeValue],
    mut pos: i32,
    last: i32,
) -> NativeResult<NativeValue> {
    let ret = if method.ret == NativeType::Void {
        NativeValue::Null
    } else {
        let value = convert_result(state, translator, pos, last, &method.ret)?;
        pos += 1;
        value
    };
    for (i, param) in method.params.iter().enumerate() {
        if param.mode == ParamMode::In {
            continue;
        }
        if let Some(slot) = args.get_mut(i) {
            *slot = convert_result(state, translator, pos, last, &param.ty)?;
        }
        pos += 1;
    }
    Ok(ret)
}

fn convert_result(
    state: &mut State,
    translator: &ObjectTranslator,
    pos: i32,
    last: i32,
    ty: &NativeType,
) -> NativeResult<NativeValue> {
    if pos > last {
        return Ok(ty.default_value());
    }
    translator.get_as_type(state, pos, ty).ok_or_else(|| {
        BridgeError::TypeMismatch {
            expected: ty.name(),
            got: state.type_of(pos).name().to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::Lua;
    use crate::types::{ClassInfo, ParamInfo};
    use moonlink_vm::native_fn;

    #[test]
    fn test_delegate_calls_function_and_fills_outs() {
        let mut lua = Lua::new();
        let class = ClassInfo::delegate(
            "Demo.Divide",
            vec![
                ParamInfo::new("a", NativeType::I32),
                ParamInfo::new("b", NativeType::I32),
                ParamInfo::out("rem", NativeType::I32),
            ],
            NativeType::I32,
        );
        lua.register_type(class.clone());
        lua.state_mut().push_function(native_fn(|state| {
            let a = state.to_number(1).unwrap_or(0.0);
            let b = state.to_number(2).unwrap_or(1.0);
            state.push_number((a / b).floor());
            state.push_number(a % b);
            Ok(2)
        }));
        let translator = lua.translator().clone();
        let function = translator.to_lua_ref(lua.state_mut(), -1);
        lua.state_mut().pop(1);

        let delegate = DynamicProxyFactory.delegate_for(&class, function).unwrap();
        let mut args = vec![NativeValue::I32(17), NativeValue::I32(5), NativeValue::Null];
        let top = lua.state().get_top();
        let ret = lua.invoke_delegate(&delegate, &mut args).unwrap();
        assert_eq!(ret, NativeValue::I32(3));
        assert_eq!(args[2], NativeValue::I32(2));
        assert_eq!(lua.state().get_top(), top);
    }

    #[test]
    fn test_interface_proxy_forwards_to_table() {
        let mut lua = Lua::new();
        let class = ClassInfo::builder("Demo.IGreeter")
            .interface()
            .abstract_method("Greet", vec![ParamInfo::new("name", NativeType::String)], NativeType::String)
            .abstract_method("Missing", vec![], NativeType::I32)
            .build();
        lua.register_type(class.clone());

        let state = lua.state_mut();
        state.new_table();
        state.push_function(native_fn(|state| {
            let name = state.to_lua_string(2).unwrap_or_else(|| "".into());
            state.push_string(&format!("hello {}", name));
            Ok(1)
        }));
        state.set_field(-2, "Greet").unwrap();
        let translator = lua.translator().clone();
        let table = translator.to_lua_ref(lua.state_mut(), -1);
        lua.state_mut().pop(1);

        let proxy = DynamicProxyFactory.interface_for(&class, table).unwrap();
        let greet = class.members()[0].clone();
        let crate::types::Member::Method(greet) = greet else {
            panic!("method expected");
        };
        let mut args = vec![NativeValue::from("moon")];
        let ret = greet.invoke(lua.state_mut(), &class, Some(&proxy), &mut args).unwrap();
        assert_eq!(ret, NativeValue::from("hello moon"));

        let crate::types::Member::Method(missing) = class.members()[1].clone() else {
            panic!("method expected");
        };
        let ret = missing.invoke(lua.state_mut(), &class, Some(&proxy), &mut []).unwrap();
        assert_eq!(ret, NativeValue::I32(0));
        assert_eq!(lua.state().get_top(), 0);
    }

    #[test]
    fn test_script_error_surfaces_as_exception() {
        let mut lua = Lua::new();
        let class = ClassInfo::delegate("Demo.Action", vec![], NativeType::Void);
        lua.state_mut().push_chunk(
            "handler.lua:9",
            native_fn(|state| Err(state.error_at(0, "nope"))),
        );
        let translator = lua.translator().clone();
        let function = translator.to_lua_ref(lua.state_mut(), -1);
        lua.state_mut().pop(1);
        let delegate = DynamicProxyFactory.delegate_for(&class, function).unwrap();
        let err = lua.invoke_delegate(&delegate, &mut []).unwrap_err();
        assert_eq!(err.to_string(), "handler.lua:9: nope");
        assert_eq!(lua.state().get_top(), 0);
    }
}
