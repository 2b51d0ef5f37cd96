//! Type matcher
//!
//! Decides whether a VM value can be passed where a native type is expected
//! and, if so, which [`Extractor`] reads it.

use moonlink_vm::{LuaType, State};

use crate::extract::{get_extractor, is_scalar_compatible, Extractor};
use crate::translator::ObjectTranslator;
use crate::types::{ClassKind, NativeType};

/// Match the value at `idx` against `ty`. `None` means no match.
///
/// Nil matches every reference-like type and nullable scalars (yielding a
/// native null) but never a plain bool, number, char or string.
pub fn check_type(
    state: &mut State,
    translator: &ObjectTranslator,
    idx: i32,
    ty: &NativeType,
) -> Option<Extractor> {
    let vm_type = state.type_of(idx);
    let nil = matches!(vm_type, LuaType::Nil | LuaType::None);
    if nil && matches!(ty, NativeType::Nullable(_)) {
        return Some(get_extractor(ty));
    }
    match ty.unwrap_nullable() {
        NativeType::Any => Some(Extractor::Any),
        NativeType::Void => None,
        NativeType::LuaTable => (nil || vm_type == LuaType::Table).then_some(Extractor::Table),
        NativeType::LuaFunction => {
            (nil || vm_type == LuaType::Function).then_some(Extractor::Function)
        }
        NativeType::LuaUserData => {
            (nil || vm_type == LuaType::UserData).then_some(Extractor::UserData)
        }
        NativeType::Array(element) => {
            if nil {
                return Some(get_extractor(ty));
            }
            if vm_type == LuaType::Table && translator.get_net_object(state, idx).is_none() {
                return translator
                    .table_to_array(state, idx, element)
                    .map(|_| Extractor::ArrayTable((**element).clone()));
            }
            let target = ty.unwrap_nullable();
            translator
                .get_net_object(state, idx)
                .filter(|obj| translator.is_instance_of(obj, target))
                .map(|_| get_extractor(target))
        }
        NativeType::Class(name) => {
            if nil {
                return Some(get_extractor(ty));
            }
            let class = translator.catalog().find(name);
            if let Some(class) = &class {
                match (class.kind(), vm_type) {
                    (ClassKind::Delegate, LuaType::Function) => {
                        return Some(Extractor::Delegate(class.clone()));
                    }
                    (ClassKind::Interface, LuaType::Table) => {
                        let wrapped = translator.get_net_object(state, idx);
                        return match wrapped {
                            Some(obj) if translator.is_instance_of(&obj, ty) => {
                                Some(get_extractor(ty))
                            }
                            _ => Some(Extractor::Interface(class.clone())),
                        };
                    }
                    _ => {}
                }
            }
            translator
                .get_net_object(state, idx)
                .filter(|obj| translator.is_instance_of(obj, ty))
                .map(|_| get_extractor(ty))
        }
        scalar => is_scalar_compatible(state, idx, scalar).then(|| get_extractor(ty)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::Lua;
    use crate::types::{ClassInfo, ParamInfo};
    use crate::value::{NativeObject, NativeValue};
    use moonlink_vm::native_fn;

    fn session() -> Lua {
        let lua = Lua::new();
        lua.register_type(ClassInfo::builder("Demo.IShape").interface().build());
        lua.register_type(ClassInfo::builder("Demo.Square").implements("Demo.IShape").build());
        lua.register_type(ClassInfo::delegate(
            "Demo.Callback",
            vec![ParamInfo::new("x", NativeType::I32)],
            NativeType::I32,
        ));
        lua
    }

    fn check(lua: &mut Lua, ty: &NativeType) -> Option<Extractor> {
        let translator = lua.translator().clone();
        check_type(lua.state_mut(), &translator, -1, ty)
    }

    #[test]
    fn test_nil_matches_references_not_scalars() {
        let mut lua = session();
        lua.state_mut().push_nil();
        for ty in [
            NativeType::class("Demo.Square"),
            NativeType::class("Demo.IShape"),
            NativeType::LuaTable,
            NativeType::LuaFunction,
            NativeType::nullable(NativeType::I32),
        ] {
            assert!(check(&mut lua, &ty).is_some(), "{} should accept nil", ty);
        }
        for ty in [NativeType::Bool, NativeType::F64, NativeType::String, NativeType::I32] {
            assert!(check(&mut lua, &ty).is_none(), "{} should reject nil", ty);
        }
    }

    #[test]
    fn test_function_matches_delegate() {
        let mut lua = session();
        lua.state_mut().push_function(native_fn(|_| Ok(0)));
        assert!(matches!(
            check(&mut lua, &NativeType::class("Demo.Callback")),
            Some(Extractor::Delegate(_))
        ));
        assert!(check(&mut lua, &NativeType::class("Demo.Square")).is_none());
    }

    #[test]
    fn test_table_matches_interface() {
        let mut lua = session();
        lua.state_mut().new_table();
        assert!(matches!(
            check(&mut lua, &NativeType::class("Demo.IShape")),
            Some(Extractor::Interface(_))
        ));
        assert!(check(&mut lua, &NativeType::class("Demo.Square")).is_none());
    }

    #[test]
    fn test_object_matches_assignable_types() {
        let mut lua = session();
        let square = lua.catalog().find("Demo.Square").unwrap();
        let obj = NativeObject::new(&square, ());
        lua.translate_to_vm(&NativeValue::Object(obj));
        for ty in ["Demo.Square", "Demo.IShape", "Object"] {
            assert!(matches!(
                check(&mut lua, &NativeType::class(ty)),
                Some(Extractor::NetObject(_))
            ));
        }
        assert!(check(&mut lua, &NativeType::class("Demo.Callback")).is_none());
        assert!(check(&mut lua, &NativeType::I32).is_none());
    }

    #[test]
    fn test_table_matches_array_when_elements_convert() {
        let mut lua = session();
        let state = lua.state_mut();
        state.new_table();
        for (i, n) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            state.push_number(n);
            state.raw_set_i(-2, i as i64 + 1).unwrap();
        }
        assert!(check(&mut lua, &NativeType::array(NativeType::I32)).is_some());

        let state = lua.state_mut();
        state.push_string("four");
        state.raw_set_i(-2, 4).unwrap();
        assert!(check(&mut lua, &NativeType::array(NativeType::I32)).is_none());
    }
}
