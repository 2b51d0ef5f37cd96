//! Integration tests for overload resolution and member dispatch
//!
//! Tests cover:
//! - Declaration-order first match between `f(i32)` and `f(f64)`
//! - Params arrays filled from an argument run or from a single table
//! - Nil accepted for reference types and rejected for scalars
//! - Static members isolated from instance lookups in either order
//! - Implicit static reads when enabled
//! - Constructors, out parameters and cached plans through type proxies
//! - Instance methods called with a target of an unrelated class

use moonlink::{
    check_type, BridgeError, BridgeOptions, ClassInfo, ClassRef, Lua, NativeObject, NativeType,
    NativeValue, ParamInfo, WrappedError,
};
use moonlink_vm::{native_fn, LuaResult, LuaValue, State, Status, MULTRET};

/// Run `body` as a script chunk in protected mode
fn run<F>(lua: &mut Lua, body: F) -> Status
where
    F: Fn(&mut State) -> LuaResult<usize> + 'static,
{
    let state = lua.state_mut();
    state.push_chunk("test.lua:1", native_fn(body));
    state.pcall(0, MULTRET)
}

fn bridge_error(lua: &mut Lua) -> BridgeError {
    let value = lua.state_mut().pop_value();
    let LuaValue::UserData(ud) = &value else {
        panic!("expected a wrapped error, got {}", value);
    };
    let wrapped = ud.downcast_ref::<WrappedError>().unwrap();
    wrapped.exception.downcast_ref::<BridgeError>().unwrap().clone()
}

fn overloads() -> ClassRef {
    ClassInfo::builder("Demo.Overloads")
        .static_method(
            "f",
            vec![ParamInfo::new("x", NativeType::I32)],
            NativeType::String,
            |_| Ok(NativeValue::from("int")),
        )
        .static_method(
            "f",
            vec![ParamInfo::new("x", NativeType::F64)],
            NativeType::String,
            |_| Ok(NativeValue::from("double")),
        )
        .static_method(
            "g",
            vec![ParamInfo::params("values", NativeType::I32)],
            NativeType::String,
            |inv| {
                let items = inv
                    .arg(0)
                    .as_object()
                    .and_then(|o| o.array_items())
                    .map(|items| items.read().clone())
                    .unwrap_or_default();
                let text: Vec<String> = items
                    .iter()
                    .map(|v| v.as_i64().unwrap_or(0).to_string())
                    .collect();
                Ok(NativeValue::from(text.join(",")))
            },
        )
        .static_method(
            "Divide",
            vec![
                ParamInfo::new("a", NativeType::I32),
                ParamInfo::new("b", NativeType::I32),
                ParamInfo::out("rem", NativeType::I32),
            ],
            NativeType::I32,
            |inv| {
                let a = inv.arg(0).as_i32().unwrap_or(0);
                let b = inv.arg(1).as_i32().unwrap_or(1);
                inv.set_arg(2, NativeValue::I32(a % b));
                Ok(NativeValue::I32(a / b))
            },
        )
        .build()
}

fn session() -> Lua {
    let mut lua = Lua::new();
    lua.register_type(overloads());
    lua.import_type("Demo.Overloads").unwrap();
    lua
}

#[test]
fn test_first_declared_overload_wins() {
    let mut lua = session();
    let status = run(&mut lua, |state| {
        state.get_global("Overloads")?;
        state.get_field(-1, "f")?;
        state.push_number(1.0);
        state.call(1, 1)?;
        state.get_field(-2, "f")?;
        state.push_number(1.5);
        state.call(1, 1)?;
        Ok(2)
    });
    assert_eq!(status, Status::Ok);
    let state = lua.state();
    assert_eq!(state.value(-2).as_str(), Some("int"));
    assert_eq!(state.value(-1).as_str(), Some("double"));
}

#[test]
fn test_params_array_from_run_and_from_table() {
    let mut lua = session();
    let status = run(&mut lua, |state| {
        state.get_global("Overloads")?;
        state.get_field(-1, "g")?;
        for n in [1.0, 2.0, 3.0] {
            state.push_number(n);
        }
        state.call(3, 1)?;

        state.get_field(-2, "g")?;
        state.new_table();
        for (i, n) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            state.push_number(n);
            state.raw_set_i(-2, i as i64 + 1)?;
        }
        state.call(1, 1)?;

        state.get_field(-3, "g")?;
        state.call(0, 1)?;
        Ok(3)
    });
    assert_eq!(status, Status::Ok);
    let state = lua.state();
    assert_eq!(state.value(-3).as_str(), Some("1,2,3"));
    assert_eq!(state.value(-2).as_str(), Some("1,2,3"));
    assert_eq!(state.value(-1).as_str(), Some(""));
}

#[test]
fn test_out_parameters_follow_return_value() {
    let mut lua = session();
    let top = lua.state().get_top();
    let status = run(&mut lua, |state| {
        state.get_global("Overloads")?;
        state.get_field(-1, "Divide")?;
        state.push_number(17.0);
        state.push_number(5.0);
        state.call(2, MULTRET)?;
        Ok(2)
    });
    assert_eq!(status, Status::Ok);
    assert_eq!(lua.state().get_top(), top + 2);
    assert_eq!(lua.state().to_number(-2), Some(3.0));
    assert_eq!(lua.state().to_number(-1), Some(2.0));
}

#[test]
fn test_nil_matches_reference_types_only() {
    let mut lua = Lua::new();
    lua.register_type(ClassInfo::builder("Demo.Widget").build());
    lua.register_type(ClassInfo::builder("Demo.IWidget").interface().build());
    lua.state_mut().push_nil();
    let translator = lua.translator().clone();

    for ty in [
        NativeType::class("Demo.Widget"),
        NativeType::class("Demo.IWidget"),
        NativeType::LuaTable,
        NativeType::LuaFunction,
        NativeType::array(NativeType::I32),
    ] {
        let extractor = check_type(lua.state_mut(), &translator, -1, &ty)
            .unwrap_or_else(|| panic!("{} should accept nil", ty));
        let value = extractor.extract(lua.state_mut(), &translator, -1);
        assert_eq!(value, Some(NativeValue::Null), "{}", ty);
    }
    for ty in [NativeType::Bool, NativeType::I32, NativeType::F64, NativeType::String] {
        assert!(check_type(lua.state_mut(), &translator, -1, &ty).is_none(), "{}", ty);
    }
}

// ============================================================================
// Static isolation
// ============================================================================

struct Account {
    balance: f64,
}

fn account_class() -> ClassRef {
    ClassInfo::builder("Demo.Account")
        .constructor(vec![], |inv| {
            Ok(NativeObject::new(inv.class(), Account { balance: 0.0 }).into())
        })
        .field::<Account, _, _>(
            "Public",
            NativeType::F64,
            |a| NativeValue::F64(a.balance),
            |a, v| a.balance = v.as_f64().unwrap_or(a.balance),
        )
        .static_field("PublicS", NativeType::I32, NativeValue::I32(7))
        .build()
}

fn accounts(options: BridgeOptions) -> Lua {
    let mut lua = Lua::with_options(options);
    lua.register_type(account_class());
    lua.import_type("Demo.Account").unwrap();
    let status = run(&mut lua, |state| {
        state.get_global("Account")?;
        state.call(0, 1)?;
        state.set_global("acct")?;
        Ok(0)
    });
    assert_eq!(status, Status::Ok);
    lua
}

fn read_static_through_type(lua: &mut Lua) -> Option<f64> {
    let status = run(lua, |state| {
        state.get_global("Account")?;
        state.get_field(-1, "PublicS")?;
        Ok(1)
    });
    assert_eq!(status, Status::Ok);
    let n = lua.state().to_number(-1);
    lua.state_mut().pop(1);
    n
}

fn read_static_through_instance(lua: &mut Lua) -> Result<f64, BridgeError> {
    let top = lua.state().get_top();
    let status = run(lua, |state| {
        state.get_global("acct")?;
        state.get_field(-1, "PublicS")?;
        Ok(1)
    });
    assert_eq!(lua.state().get_top(), top + 1);
    match status {
        Status::Ok => {
            let n = lua.state().to_number(-1).unwrap_or(f64::NAN);
            lua.state_mut().pop(1);
            Ok(n)
        }
        _ => Err(bridge_error(lua)),
    }
}

#[test]
fn test_static_isolation_type_first() {
    let mut lua = accounts(BridgeOptions::default());
    assert_eq!(read_static_through_type(&mut lua), Some(7.0));
    let err = read_static_through_instance(&mut lua).unwrap_err();
    assert!(matches!(err, BridgeError::MemberNotFound { .. }), "{}", err);
}

#[test]
fn test_static_isolation_instance_first() {
    let mut lua = accounts(BridgeOptions::default());
    let err = read_static_through_instance(&mut lua).unwrap_err();
    assert!(matches!(err, BridgeError::MemberNotFound { .. }), "{}", err);
    assert_eq!(read_static_through_type(&mut lua), Some(7.0));
    assert!(read_static_through_instance(&mut lua).is_err());
}

#[test]
fn test_instance_members_invisible_on_type() {
    let mut lua = accounts(BridgeOptions::default());
    let status = run(&mut lua, |state| {
        state.get_global("Account")?;
        state.get_field(-1, "Public")?;
        Ok(1)
    });
    assert_eq!(status, Status::RuntimeError);
    assert!(matches!(bridge_error(&mut lua), BridgeError::MemberNotFound { .. }));
}

#[test]
fn test_static_assignment_through_instance_rejected() {
    for implicit_static in [false, true] {
        let mut lua = accounts(BridgeOptions {
            implicit_static,
            ..BridgeOptions::default()
        });
        let status = run(&mut lua, |state| {
            state.get_global("acct")?;
            state.push_number(1.0);
            state.set_field(-2, "PublicS")?;
            Ok(0)
        });
        assert_eq!(status, Status::RuntimeError);
        assert!(matches!(
            bridge_error(&mut lua),
            BridgeError::StaticFromInstance { .. }
        ));
        assert_eq!(read_static_through_type(&mut lua), Some(7.0));
    }
}

#[test]
fn test_implicit_static_read_when_enabled() {
    let mut lua = accounts(BridgeOptions {
        implicit_static: true,
        ..BridgeOptions::default()
    });
    assert_eq!(read_static_through_instance(&mut lua).unwrap(), 7.0);
    assert_eq!(read_static_through_type(&mut lua), Some(7.0));
}

#[test]
fn test_instance_field_round_trip() {
    let mut lua = accounts(BridgeOptions::default());
    let status = run(&mut lua, |state| {
        state.get_global("acct")?;
        state.push_number(12.5);
        state.set_field(-2, "Public")?;
        state.get_field(-1, "Public")?;
        Ok(1)
    });
    assert_eq!(status, Status::Ok);
    assert_eq!(lua.state().to_number(-1), Some(12.5));
}

struct Plain;

fn target_classes() -> Lua {
    let mut lua = Lua::new();
    let who = ClassInfo::builder("Demo.A")
        .constructor(vec![], |inv| Ok(NativeObject::new(inv.class(), Plain).into()))
        .method("Who", vec![], NativeType::String, |inv| {
            let name = inv.target().map(|t| t.class().name().to_string());
            Ok(name.map(NativeValue::from).unwrap_or(NativeValue::Null))
        })
        .build();
    lua.register_type(who);
    for (name, base) in [("Demo.B", None), ("Demo.SubA", Some("Demo.A"))] {
        let mut builder = ClassInfo::builder(name)
            .constructor(vec![], |inv| Ok(NativeObject::new(inv.class(), Plain).into()));
        if let Some(base) = base {
            builder = builder.base(base);
        }
        lua.register_type(builder.build());
        lua.import_type(name).unwrap();
    }
    lua.import_type("Demo.A").unwrap();
    lua
}

/// `A().Who(other)` where `other` is a fresh instance of the global type `other`
fn call_who_with(lua: &mut Lua, other: &'static str) -> Status {
    run(lua, move |state| {
        state.get_global("A")?;
        state.call(0, 1)?;
        state.get_field(-1, "Who")?;
        state.get_global(other)?;
        state.call(0, 1)?;
        state.call(1, 1)?;
        Ok(1)
    })
}

#[test]
fn test_instance_method_rejects_unrelated_target() {
    let mut lua = target_classes();
    let top = lua.state().get_top();
    assert_eq!(call_who_with(&mut lua, "B"), Status::RuntimeError);
    assert_eq!(lua.state().get_top(), top + 1);
    let BridgeError::InvalidTarget(message) = bridge_error(&mut lua) else {
        panic!("expected an invalid target error");
    };
    assert!(message.contains("requires a non null target object"), "{}", message);
}

#[test]
fn test_instance_method_accepts_derived_target() {
    let mut lua = target_classes();
    assert_eq!(call_who_with(&mut lua, "SubA"), Status::Ok);
    assert_eq!(lua.state().value(-1).as_str(), Some("Demo.SubA"));
    assert_eq!(call_who_with(&mut lua, "A"), Status::Ok);
    assert_eq!(lua.state().value(-1).as_str(), Some("Demo.A"));
}
