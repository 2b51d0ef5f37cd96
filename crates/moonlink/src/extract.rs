//! Extractor catalog
//!
//! An [`Extractor`] reads one VM stack slot as a value of one native type,
//! or fails. Scalar extractors are stateless and shared; the delegate and
//! interface extractors generate a fresh adapter every time they run, so
//! they are only kept inside an invocation plan.

use moonlink_vm::{LuaType, LuaValue, State};

use crate::translator::ObjectTranslator;
use crate::types::{ClassRef, NativeType};
use crate::value::NativeValue;

/// Reads a VM stack slot as a native value
#[derive(Debug, Clone)]
pub enum Extractor {
    /// Bool, numeric, char or string; `Nullable` types accept nil
    Scalar(NativeType),
    /// Generic conversion
    Any,
    /// VM table handle; nil yields null
    Table,
    /// VM function handle; nil yields null
    Function,
    /// VM userdata handle; nil yields null
    UserData,
    /// Exposed native object assignable to the named type; nil yields null
    NetObject(NativeType),
    /// VM table converted element-wise into a native array
    ArrayTable(NativeType),
    /// VM function wrapped as a delegate of the given type
    Delegate(ClassRef),
    /// VM table wrapped as an implementation of the given interface
    Interface(ClassRef),
}

impl Extractor {
    /// Read the value at `idx`. `None` means the slot no longer fits.
    pub fn extract(
        &self,
        state: &mut State,
        translator: &ObjectTranslator,
        idx: i32,
    ) -> Option<NativeValue> {
        let nil = state.is_none_or_nil(idx);
        match self {
            Extractor::Scalar(ty) => match ty {
                NativeType::Nullable(_) if nil => Some(NativeValue::Null),
                ty => scalar(state, idx, ty.unwrap_nullable()),
            },
            Extractor::Any => Some(translator.to_native(state, idx)),
            _ if nil => Some(NativeValue::Null),
            Extractor::Table => match state.type_of(idx) {
                LuaType::Table => Some(NativeValue::Table(translator.to_lua_ref(state, idx))),
                _ => None,
            },
            Extractor::Function => match state.type_of(idx) {
                LuaType::Function => Some(NativeValue::Function(translator.to_lua_ref(state, idx))),
                _ => None,
            },
            Extractor::UserData => match state.type_of(idx) {
                LuaType::UserData => Some(NativeValue::UserData(translator.to_lua_ref(state, idx))),
                _ => None,
            },
            Extractor::NetObject(ty) => translator
                .get_net_object(state, idx)
                .filter(|obj| translator.is_instance_of(obj, ty))
                .map(NativeValue::Object),
            Extractor::ArrayTable(element) => translator
                .table_to_array(state, idx, element)
                .map(|items| NativeValue::Object(translator.catalog().new_array(element.clone(), items))),
            Extractor::Delegate(class) => match state.type_of(idx) {
                LuaType::Function => {
                    let function = translator.to_lua_ref(state, idx);
                    translator
                        .proxies()
                        .delegate_for(class, function)
                        .map_err(|e| log::debug!("delegate adapter for {} failed: {}", class.name(), e))
                        .ok()
                        .map(NativeValue::Object)
                }
                _ => None,
            },
            Extractor::Interface(class) => match state.type_of(idx) {
                LuaType::Table => {
                    let table = translator.to_lua_ref(state, idx);
                    translator
                        .proxies()
                        .interface_for(class, table)
                        .map_err(|e| log::debug!("interface proxy for {} failed: {}", class.name(), e))
                        .ok()
                        .map(NativeValue::Object)
                }
                _ => None,
            },
        }
    }
}

/// Shared extractor for a native type. Class types get the opaque
/// reference extractor; adapters are only produced by the type matcher.
pub fn get_extractor(ty: &NativeType) -> Extractor {
    match ty.unwrap_nullable() {
        NativeType::Any => Extractor::Any,
        NativeType::LuaTable => Extractor::Table,
        NativeType::LuaFunction => Extractor::Function,
        NativeType::LuaUserData => Extractor::UserData,
        NativeType::Class(_) | NativeType::Array(_) => Extractor::NetObject(ty.unwrap_nullable().clone()),
        _ => Extractor::Scalar(ty.clone()),
    }
}

fn scalar(state: &State, idx: i32, ty: &NativeType) -> Option<NativeValue> {
    match ty {
        NativeType::Bool => match state.value(idx) {
            LuaValue::Boolean(b) => Some(NativeValue::Bool(b)),
            _ => None,
        },
        NativeType::F64 => state.to_number(idx).map(NativeValue::F64),
        NativeType::F32 => state.to_number(idx).map(|n| NativeValue::F32(n as f32)),
        NativeType::String => match state.type_of(idx) {
            LuaType::String | LuaType::Number => {
                state.to_lua_string(idx).map(|s| NativeValue::Str(s.as_ref().into()))
            }
            _ => None,
        },
        NativeType::Char => match state.value(idx) {
            LuaValue::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(NativeValue::Char(c)),
                    _ => None,
                }
            }
            LuaValue::Number(n) => integer(n, 0.0, u32::MAX as f64 + 1.0)
                .and_then(|v| char::from_u32(v as u32))
                .map(NativeValue::Char),
            _ => None,
        },
        int => {
            let n = state.to_number(idx)?;
            let v = match int {
                NativeType::I8 => NativeValue::I8(integer(n, i8::MIN as f64, i8::MAX as f64 + 1.0)? as i8),
                NativeType::U8 => NativeValue::U8(integer(n, 0.0, u8::MAX as f64 + 1.0)? as u8),
                NativeType::I16 => NativeValue::I16(integer(n, i16::MIN as f64, i16::MAX as f64 + 1.0)? as i16),
                NativeType::U16 => NativeValue::U16(integer(n, 0.0, u16::MAX as f64 + 1.0)? as u16),
                NativeType::I32 => NativeValue::I32(integer(n, i32::MIN as f64, i32::MAX as f64 + 1.0)? as i32),
                NativeType::U32 => NativeValue::U32(integer(n, 0.0, u32::MAX as f64 + 1.0)? as u32),
                NativeType::I64 => NativeValue::I64(integer(n, i64::MIN as f64, TWO_POW_63)? as i64),
                NativeType::U64 => NativeValue::U64(integer(n, 0.0, TWO_POW_64)? as u64),
                _ => return None,
            };
            Some(v)
        }
    }
}

// `i64::MAX as f64` and `u64::MAX as f64` round up to these
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// `n` as an integral value within `[min, end)`
fn integer(n: f64, min: f64, end: f64) -> Option<f64> {
    (n.fract() == 0.0 && n >= min && n < end).then_some(n)
}

/// True if the slot at `idx` can be read as the scalar `ty`
pub(crate) fn is_scalar_compatible(state: &State, idx: i32, ty: &NativeType) -> bool {
    scalar(state, idx, ty).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_value(value: LuaValue, ty: NativeType) -> Option<NativeValue> {
        let mut state = State::new();
        state.push_value(value);
        scalar(&state, 1, &ty)
    }

    #[test]
    fn test_integer_kinds_require_integral_in_range() {
        assert_eq!(with_value(LuaValue::Number(7.0), NativeType::I32), Some(NativeValue::I32(7)));
        assert_eq!(with_value(LuaValue::Number(7.5), NativeType::I32), None);
        assert_eq!(with_value(LuaValue::Number(300.0), NativeType::U8), None);
        assert_eq!(with_value(LuaValue::Number(-1.0), NativeType::U32), None);
        assert_eq!(with_value(LuaValue::from("12"), NativeType::I64), Some(NativeValue::I64(12)));
    }

    #[test]
    fn test_integer_upper_bounds_are_exact() {
        assert_eq!(
            with_value(LuaValue::Number(2147483647.0), NativeType::I32),
            Some(NativeValue::I32(i32::MAX))
        );
        assert_eq!(with_value(LuaValue::Number(2147483648.0), NativeType::I32), None);
        assert_eq!(with_value(LuaValue::Number(TWO_POW_63), NativeType::I64), None);
        assert_eq!(
            with_value(LuaValue::Number(9223372036854774784.0), NativeType::I64),
            Some(NativeValue::I64(9223372036854774784))
        );
        assert_eq!(
            with_value(LuaValue::Number(-TWO_POW_63), NativeType::I64),
            Some(NativeValue::I64(i64::MIN))
        );
        assert_eq!(with_value(LuaValue::Number(TWO_POW_64), NativeType::U64), None);
        assert_eq!(
            with_value(LuaValue::Number(18446744073709549568.0), NativeType::U64),
            Some(NativeValue::U64(18446744073709549568))
        );
    }

    #[test]
    fn test_string_accepts_numbers_but_not_nil() {
        assert_eq!(
            with_value(LuaValue::Number(3.0), NativeType::String),
            Some(NativeValue::from("3"))
        );
        assert_eq!(with_value(LuaValue::Nil, NativeType::String), None);
        assert_eq!(with_value(LuaValue::Boolean(true), NativeType::String), None);
    }

    #[test]
    fn test_bool_is_strict() {
        assert_eq!(with_value(LuaValue::Boolean(false), NativeType::Bool), Some(NativeValue::Bool(false)));
        assert_eq!(with_value(LuaValue::Number(1.0), NativeType::Bool), None);
        assert_eq!(with_value(LuaValue::Nil, NativeType::Bool), None);
    }

    #[test]
    fn test_char_from_string_or_code() {
        assert_eq!(with_value(LuaValue::from("x"), NativeType::Char), Some(NativeValue::Char('x')));
        assert_eq!(with_value(LuaValue::from("xy"), NativeType::Char), None);
        assert_eq!(with_value(LuaValue::Number(65.0), NativeType::Char), Some(NativeValue::Char('A')));
    }

    #[test]
    fn test_get_extractor_kinds() {
        assert!(matches!(get_extractor(&NativeType::I32), Extractor::Scalar(NativeType::I32)));
        assert!(matches!(get_extractor(&NativeType::Any), Extractor::Any));
        assert!(matches!(
            get_extractor(&NativeType::class("Demo.Widget")),
            Extractor::NetObject(_)
        ));
        assert!(matches!(
            get_extractor(&NativeType::nullable(NativeType::F64)),
            Extractor::Scalar(NativeType::Nullable(_))
        ));
    }
}
