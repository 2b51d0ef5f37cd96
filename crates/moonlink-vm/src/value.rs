//! VM values
//!
//! Strings are immutable `Rc<str>`, tables are shared `Rc<RefCell<Table>>`,
//! and userdata carry an opaque payload plus a metatable. Memory is reference
//! counted; a userdata whose metatable has `__gc` is queued for finalization
//! when its last strong reference goes away.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::LuaError;
use crate::state::State;
use crate::table::Table;

/// Shared table handle
pub type TableRef = Rc<RefCell<Table>>;

/// Shared function handle
pub type FunctionRef = Rc<Function>;

/// Native function signature: arguments are at stack positions `1..=get_top()`
/// of the callee frame, and the return value is the number of results left on
/// top of the stack.
pub type NativeFn = Rc<dyn Fn(&mut State) -> Result<usize, LuaError>>;

/// Wrap a closure as a [`NativeFn`]
pub fn native_fn<F>(f: F) -> NativeFn
where
    F: Fn(&mut State) -> Result<usize, LuaError> + 'static,
{
    Rc::new(f)
}

// ============================================================================
// Type tags
// ============================================================================

/// Basic type of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    /// Slot outside the valid stack range
    None,
    /// nil
    Nil,
    /// true/false
    Boolean,
    /// Double precision number
    Number,
    /// Immutable string
    String,
    /// Table
    Table,
    /// Callable function
    Function,
    /// Full userdata
    UserData,
}

impl LuaType {
    /// Name as reported in error messages
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::UserData => "userdata",
        }
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Functions
// ============================================================================

/// A callable function value
pub struct Function {
    name: Option<Rc<str>>,
    chunk: Option<Rc<str>>,
    pub(crate) body: NativeFn,
}

impl Function {
    /// Create a native function
    pub fn native(body: NativeFn) -> Self {
        Function {
            name: None,
            chunk: None,
            body,
        }
    }

    /// Create a named native function
    pub fn named(name: &str, body: NativeFn) -> Self {
        Function {
            name: Some(Rc::from(name)),
            chunk: None,
            body,
        }
    }

    /// Create a script function. `chunk` is the source location reported by
    /// [`State::where_`] for frames running this function, e.g. `"init.lua:12"`.
    pub fn chunk(chunk: &str, body: NativeFn) -> Self {
        Function {
            name: None,
            chunk: Some(Rc::from(chunk)),
            body,
        }
    }

    /// Function name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Source location label for script functions
    pub fn chunk_label(&self) -> Option<&str> {
        self.chunk.as_deref()
    }
}

// ============================================================================
// Userdata
// ============================================================================

/// Finalizer waiting for the next [`State::gc`]
pub(crate) struct PendingFinalizer {
    pub(crate) payload: Box<dyn Any>,
    pub(crate) metatable: TableRef,
}

pub(crate) type Graveyard = Rc<RefCell<Vec<PendingFinalizer>>>;

/// Full userdata: an opaque host payload with a metatable
pub struct UserData {
    payload: Option<Box<dyn Any>>,
    metatable: RefCell<Option<TableRef>>,
    graveyard: Weak<RefCell<Vec<PendingFinalizer>>>,
    finalized: Cell<bool>,
}

impl UserData {
    pub(crate) fn new(payload: Box<dyn Any>, graveyard: &Graveyard) -> Self {
        UserData {
            payload: Some(payload),
            metatable: RefCell::new(None),
            graveyard: Rc::downgrade(graveyard),
            finalized: Cell::new(false),
        }
    }

    /// Rebuild a collected userdata so its `__gc` handler can see it.
    /// A resurrected value is never queued again.
    pub(crate) fn resurrect(pending: PendingFinalizer) -> Self {
        UserData {
            payload: Some(pending.payload),
            metatable: RefCell::new(Some(pending.metatable)),
            graveyard: Weak::new(),
            finalized: Cell::new(true),
        }
    }

    /// Borrow the payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// True if the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Current metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub(crate) fn set_metatable(&self, mt: Option<TableRef>) {
        *self.metatable.borrow_mut() = mt;
    }

    /// True once the `__gc` handler has been scheduled for this payload
    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }
}

impl Drop for UserData {
    fn drop(&mut self) {
        if self.finalized.get() {
            return;
        }
        let Some(metatable) = self.metatable.get_mut().take() else {
            return;
        };
        let has_gc = metatable
            .try_borrow()
            .map(|mt| !mt.get_str("__gc").is_nil())
            .unwrap_or(false);
        if !has_gc {
            return;
        }
        if let (Some(graveyard), Some(payload)) = (self.graveyard.upgrade(), self.payload.take()) {
            if let Ok(mut queue) = graveyard.try_borrow_mut() {
                queue.push(PendingFinalizer { payload, metatable });
            }
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A VM value
#[derive(Clone, Default)]
pub enum LuaValue {
    /// nil
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Number
    Number(f64),
    /// String
    String(Rc<str>),
    /// Table
    Table(TableRef),
    /// Function
    Function(FunctionRef),
    /// Userdata
    UserData(Rc<UserData>),
}

impl LuaValue {
    /// Type tag
    pub fn type_of(&self) -> LuaType {
        match self {
            LuaValue::Nil => LuaType::Nil,
            LuaValue::Boolean(_) => LuaType::Boolean,
            LuaValue::Number(_) => LuaType::Number,
            LuaValue::String(_) => LuaType::String,
            LuaValue::Table(_) => LuaType::Table,
            LuaValue::Function(_) => LuaType::Function,
            LuaValue::UserData(_) => LuaType::UserData,
        }
    }

    /// True for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Lua truthiness: everything except nil and false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    /// Borrow a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number value, converting numeric strings
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            LuaValue::String(s) => str_to_number(s),
            _ => None,
        }
    }

    /// Identity/primitive equality without metamethods
    pub fn raw_equal(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Number(a), LuaValue::Number(b)) => a == b,
            (LuaValue::String(a), LuaValue::String(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => Rc::ptr_eq(a, b),
            (LuaValue::UserData(a), LuaValue::UserData(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address used for identity hashing and display
    pub(crate) fn address(&self) -> usize {
        match self {
            LuaValue::Table(t) => Rc::as_ptr(t) as *const u8 as usize,
            LuaValue::Function(f) => Rc::as_ptr(f) as *const u8 as usize,
            LuaValue::UserData(u) => Rc::as_ptr(u) as *const u8 as usize,
            _ => 0,
        }
    }
}

/// Parse a numeric string the way the VM coerces strings to numbers
pub fn str_to_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let n = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if negative { -n } else { n });
    }
    s.parse::<f64>().ok()
}

/// Format a number the way `tostring` does
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => f.write_str("nil"),
            LuaValue::Boolean(b) => write!(f, "{}", b),
            LuaValue::Number(n) => f.write_str(&format_number(*n)),
            LuaValue::String(s) => f.write_str(s),
            other => write!(f, "{}: {:#x}", other.type_of(), other.address()),
        }
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Number(n)
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Number(n as f64)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::String(Rc::from(s))
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::String(Rc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_number() {
        assert_eq!(str_to_number("42"), Some(42.0));
        assert_eq!(str_to_number(" 1.5 "), Some(1.5));
        assert_eq!(str_to_number("0x10"), Some(16.0));
        assert_eq!(str_to_number("-0x10"), Some(-16.0));
        assert_eq!(str_to_number("abc"), None);
        assert_eq!(str_to_number(""), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_truthiness() {
        assert!(!LuaValue::Nil.is_truthy());
        assert!(!LuaValue::Boolean(false).is_truthy());
        assert!(LuaValue::Number(0.0).is_truthy());
        assert!(LuaValue::from("").is_truthy());
    }

    #[test]
    fn test_raw_equal() {
        assert!(LuaValue::from("a").raw_equal(&LuaValue::from("a")));
        assert!(!LuaValue::Number(1.0).raw_equal(&LuaValue::from("1")));
        let t = Rc::new(RefCell::new(Table::new()));
        let a = LuaValue::Table(t.clone());
        let b = LuaValue::Table(t);
        let c = LuaValue::Table(Rc::new(RefCell::new(Table::new())));
        assert!(a.raw_equal(&b));
        assert!(!a.raw_equal(&c));
    }
}
