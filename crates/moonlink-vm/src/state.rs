//! VM state and the stack API
//!
//! # Architecture
//!
//! ```text
//! stack:  [ .. caller slots .. | f | a1 | a2 | .. ]
//!                                   ^ frame base (index 1 inside f)
//! ```
//!
//! Every call pushes a [`Frame`] whose base is the slot after the callee.
//! Positive indices are relative to the current frame, negative indices count
//! down from the top. When a call returns (normally or by raising) the stack
//! is truncated back to the callee slot, so error paths cannot leave garbage
//! behind.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{LuaError, LuaResult, Status};
use crate::table::Table;
use crate::value::{
    Function, FunctionRef, Graveyard, LuaType, LuaValue, NativeFn, TableRef, UserData,
};

/// Pass as `nresults` to keep every result
pub const MULTRET: i32 = -1;

/// Reference returned by [`State::create_ref`] for a nil value
pub const REF_NIL: i32 = -1;

/// Bound on `__index`/`__newindex` chains
const MAX_TAG_LOOP: usize = 100;

/// Registry slot holding the head of the free reference list
const FREE_LIST_KEY: &str = "__free_refs";

/// Limits for a [`State`]
#[derive(Debug, Clone)]
pub struct StateOptions {
    /// Maximum nesting of calls before raising `StackOverflow`
    pub max_call_depth: usize,

    /// Maximum number of stack slots
    pub max_stack: usize,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_stack: 1_000_000,
        }
    }
}

/// Activation record of a running function
struct Frame {
    base: usize,
    func: Option<FunctionRef>,
}

/// A VM instance
pub struct State {
    stack: Vec<LuaValue>,
    frames: Vec<Frame>,
    registry: TableRef,
    globals: TableRef,
    graveyard: Graveyard,
    next_ref: i32,
    app_data: Option<Rc<dyn Any>>,
    options: StateOptions,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create a state with default limits
    pub fn new() -> Self {
        Self::with_options(StateOptions::default())
    }

    /// Create a state with specific limits
    pub fn with_options(options: StateOptions) -> Self {
        State {
            stack: Vec::with_capacity(64),
            frames: vec![Frame {
                base: 0,
                func: None,
            }],
            registry: Rc::new(RefCell::new(Table::new())),
            globals: Rc::new(RefCell::new(Table::new())),
            graveyard: Rc::new(RefCell::new(Vec::new())),
            next_ref: 1,
            app_data: None,
            options,
        }
    }

    // ========================================================================
    // Index helpers
    // ========================================================================

    fn base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    fn slot(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        if idx > 0 {
            let pos = base + idx as usize - 1;
            (pos < self.stack.len()).then_some(pos)
        } else if idx < 0 {
            let back = (-idx) as usize;
            let pos = self.stack.len().checked_sub(back)?;
            (pos >= base).then_some(pos)
        } else {
            None
        }
    }

    /// Convert a relative index to an absolute (positive) one
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx < 0 {
            self.get_top() + idx + 1
        } else {
            idx
        }
    }

    // ========================================================================
    // Basic stack manipulation
    // ========================================================================

    /// Number of slots in the current frame
    pub fn get_top(&self) -> i32 {
        (self.stack.len() - self.base()) as i32
    }

    /// Grow (with nils) or shrink the current frame to `top` slots.
    /// A negative `top` is relative to the current top.
    pub fn set_top(&mut self, top: i32) {
        let top = if top < 0 {
            (self.get_top() + top + 1).max(0)
        } else {
            top
        };
        let new_len = self.base() + top as usize;
        self.stack.resize(new_len, LuaValue::Nil);
    }

    /// Pop `n` values
    pub fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    /// True if `n` more slots can be pushed
    pub fn check_stack(&self, n: usize) -> bool {
        self.stack.len() + n <= self.options.max_stack
    }

    /// Push a value
    pub fn push_value(&mut self, value: LuaValue) {
        self.stack.push(value);
    }

    /// Push nil
    pub fn push_nil(&mut self) {
        self.push_value(LuaValue::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&mut self, b: bool) {
        self.push_value(LuaValue::Boolean(b));
    }

    /// Push a number
    pub fn push_number(&mut self, n: f64) {
        self.push_value(LuaValue::Number(n));
    }

    /// Push a string
    pub fn push_string(&mut self, s: &str) {
        self.push_value(LuaValue::from(s));
    }

    /// Push a native function
    pub fn push_function(&mut self, f: NativeFn) {
        self.push_value(LuaValue::Function(Rc::new(Function::native(f))));
    }

    /// Push a script function labeled with a source location
    pub fn push_chunk(&mut self, chunk: &str, f: NativeFn) {
        self.push_value(LuaValue::Function(Rc::new(Function::chunk(chunk, f))));
    }

    /// Push a copy of the value at `idx`
    pub fn push_copy(&mut self, idx: i32) {
        let v = self.value(idx);
        self.push_value(v);
    }

    /// Remove the value at `idx`, shifting the values above it down
    pub fn remove(&mut self, idx: i32) {
        if let Some(pos) = self.slot(idx) {
            self.stack.remove(pos);
        }
    }

    /// Move the top value into `idx`, shifting the values above it up
    pub fn insert(&mut self, idx: i32) {
        if let Some(pos) = self.slot(idx) {
            if let Some(v) = self.stack.pop() {
                self.stack.insert(pos, v);
            }
        }
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) {
        if let Some(pos) = self.slot(idx) {
            if let Some(v) = self.stack.pop() {
                if pos < self.stack.len() {
                    self.stack[pos] = v;
                }
            }
        }
    }

    /// Pop the top value
    pub fn pop_value(&mut self) -> LuaValue {
        if self.stack.len() > self.base() {
            self.stack.pop().unwrap_or_default()
        } else {
            LuaValue::Nil
        }
    }

    // ========================================================================
    // Reading values
    // ========================================================================

    /// Value at `idx`; nil for invalid indices
    pub fn value(&self, idx: i32) -> LuaValue {
        self.slot(idx)
            .map(|pos| self.stack[pos].clone())
            .unwrap_or_default()
    }

    /// Type at `idx`; [`LuaType::None`] for invalid indices
    pub fn type_of(&self, idx: i32) -> LuaType {
        self.slot(idx)
            .map(|pos| self.stack[pos].type_of())
            .unwrap_or(LuaType::None)
    }

    /// True for nil
    pub fn is_nil(&self, idx: i32) -> bool {
        self.type_of(idx) == LuaType::Nil
    }

    /// True for nil or an invalid index
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), LuaType::Nil | LuaType::None)
    }

    /// True for numbers and strings convertible to numbers
    pub fn is_number(&self, idx: i32) -> bool {
        self.to_number(idx).is_some()
    }

    /// True for strings and numbers
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.type_of(idx), LuaType::String | LuaType::Number)
    }

    /// Number at `idx`, converting numeric strings
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).to_number()
    }

    /// Truthiness at `idx`
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_truthy()
    }

    /// String at `idx`, converting numbers
    pub fn to_lua_string(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx) {
            LuaValue::String(s) => Some(s),
            LuaValue::Number(n) => Some(Rc::from(crate::value::format_number(n))),
            _ => None,
        }
    }

    /// Userdata at `idx`
    pub fn to_userdata(&self, idx: i32) -> Option<Rc<UserData>> {
        match self.value(idx) {
            LuaValue::UserData(u) => Some(u),
            _ => None,
        }
    }

    /// Primitive equality of two slots
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        self.slot(a).is_some() && self.slot(b).is_some() && self.value(a).raw_equal(&self.value(b))
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Push a new empty table
    pub fn new_table(&mut self) {
        self.push_value(LuaValue::Table(Rc::new(RefCell::new(Table::new()))));
    }

    fn table_at(&self, idx: i32) -> LuaResult<TableRef> {
        match self.value(idx) {
            LuaValue::Table(t) => Ok(t),
            other => Err(LuaError::message(format!(
                "table expected, got {}",
                other.type_of()
            ))),
        }
    }

    /// Pop a key and push `t[key]` without metamethods
    pub fn raw_get(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let key = self.pop_value();
        let v = t.borrow().get(&key);
        self.push_value(v);
        Ok(())
    }

    /// Push `t[name]` without metamethods
    pub fn raw_get_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = t.borrow().get_str(name);
        self.push_value(v);
        Ok(())
    }

    /// Push `t[n]` without metamethods
    pub fn raw_get_i(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = t.borrow().get_int(n);
        self.push_value(v);
        Ok(())
    }

    /// Pop a value and a key (key below value) and assign without metamethods
    pub fn raw_set(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let value = self.pop_value();
        let key = self.pop_value();
        let result = t.borrow_mut().set(key, value);
        result
    }

    /// Pop a value and assign it to `t[name]` without metamethods
    pub fn raw_set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let value = self.pop_value();
        t.borrow_mut().set_str(name, value);
        Ok(())
    }

    /// Pop a value and assign it to `t[n]` without metamethods
    pub fn raw_set_i(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let value = self.pop_value();
        t.borrow_mut().set_int(n, value);
        Ok(())
    }

    /// Length of the sequence part of the table at `idx` (0 for other types)
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value(idx) {
            LuaValue::Table(t) => t.borrow().len(),
            LuaValue::String(s) => s.len(),
            _ => 0,
        }
    }

    /// Pop a key and push the next key/value pair; false at the end
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.table_at(idx)?;
        let key = self.pop_value();
        let entry = t.borrow().next(&key)?;
        match entry {
            Some((k, v)) => {
                self.push_value(k);
                self.push_value(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a key and push `obj[key]`, honoring `__index`
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value(idx);
        let key = self.pop_value();
        let v = self.index_value(obj, key)?;
        self.push_value(v);
        Ok(())
    }

    /// Push `obj[name]`, honoring `__index`
    pub fn get_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value(idx);
        let v = self.index_value(obj, LuaValue::from(name))?;
        self.push_value(v);
        Ok(())
    }

    /// Pop a value and a key and assign `obj[key] = value`, honoring `__newindex`
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value(idx);
        let value = self.pop_value();
        let key = self.pop_value();
        self.set_index_value(obj, key, value)
    }

    /// Pop a value and assign `obj[name] = value`, honoring `__newindex`
    pub fn set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value(idx);
        let value = self.pop_value();
        self.set_index_value(obj, LuaValue::from(name), value)
    }

    /// Push global `name`
    pub fn get_global(&mut self, name: &str) -> LuaResult<()> {
        let globals = LuaValue::Table(self.globals.clone());
        let v = self.index_value(globals, LuaValue::from(name))?;
        self.push_value(v);
        Ok(())
    }

    /// Pop a value into global `name`
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        let value = self.pop_value();
        let globals = LuaValue::Table(self.globals.clone());
        self.set_index_value(globals, LuaValue::from(name), value)
    }

    /// Registry table
    pub fn registry(&self) -> &TableRef {
        &self.registry
    }

    /// Globals table
    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    fn index_value(&mut self, obj: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
        let mut current = obj;
        for _ in 0..MAX_TAG_LOOP {
            let handler = match &current {
                LuaValue::Table(t) => {
                    let v = t.borrow().get(&key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let h = metafield_of(&current, "__index");
                    if h.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    h
                }
                other => {
                    let h = metafield_of(other, "__index");
                    if h.is_nil() {
                        return Err(self.error_at(
                            0,
                            &format!("attempt to index a {} value", other.type_of()),
                        ));
                    }
                    h
                }
            };
            if let LuaValue::Function(_) = handler {
                self.push_value(handler);
                self.push_value(current);
                self.push_value(key);
                self.call(2, 1)?;
                return Ok(self.pop_value());
            }
            current = handler;
        }
        Err(self.error_at(0, "'__index' chain too long; possible loop"))
    }

    fn set_index_value(&mut self, obj: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let mut current = obj;
        for _ in 0..MAX_TAG_LOOP {
            let handler = match &current {
                LuaValue::Table(t) => {
                    let present = !t.borrow().get(&key).is_nil();
                    let h = if present {
                        LuaValue::Nil
                    } else {
                        metafield_of(&current, "__newindex")
                    };
                    if h.is_nil() {
                        let result = t.borrow_mut().set(key, value);
                        return result;
                    }
                    h
                }
                other => {
                    let h = metafield_of(other, "__newindex");
                    if h.is_nil() {
                        return Err(self.error_at(
                            0,
                            &format!("attempt to index a {} value", other.type_of()),
                        ));
                    }
                    h
                }
            };
            if let LuaValue::Function(_) = handler {
                self.push_value(handler);
                self.push_value(current);
                self.push_value(key);
                self.push_value(value);
                return self.call(3, 0);
            }
            current = handler;
        }
        Err(self.error_at(0, "'__newindex' chain too long; possible loop"))
    }

    // ========================================================================
    // Metatables and userdata
    // ========================================================================

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable(&mut self, idx: i32) -> LuaResult<()> {
        let target = self.value(idx);
        let mt = match self.pop_value() {
            LuaValue::Table(t) => Some(t),
            LuaValue::Nil => None,
            _ => return Err(LuaError::message("metatable must be a table or nil")),
        };
        match target {
            LuaValue::Table(t) => t.borrow_mut().set_metatable(mt),
            LuaValue::UserData(u) => u.set_metatable(mt),
            other => {
                return Err(LuaError::message(format!(
                    "cannot set the metatable of a {} value",
                    other.type_of()
                )))
            }
        }
        Ok(())
    }

    /// Push the metatable of the value at `idx`; pushes nothing and returns
    /// false when there is none
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        match metatable_of(&self.value(idx)) {
            Some(mt) => {
                self.push_value(LuaValue::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Push metatable field `name` of the value at `idx`; pushes nothing and
    /// returns false when absent
    pub fn get_metafield(&mut self, idx: i32, name: &str) -> bool {
        let v = metafield_of(&self.value(idx), name);
        if v.is_nil() {
            false
        } else {
            self.push_value(v);
            true
        }
    }

    /// Create a userdata value without pushing it
    pub fn create_userdata(&self, payload: Box<dyn Any>, metatable: Option<TableRef>) -> Rc<UserData> {
        let ud = UserData::new(payload, &self.graveyard);
        ud.set_metatable(metatable);
        Rc::new(ud)
    }

    /// Push a new userdata
    pub fn new_userdata(&mut self, payload: Box<dyn Any>) {
        let ud = self.create_userdata(payload, None);
        self.push_value(LuaValue::UserData(ud));
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function below the top `nargs` values.
    ///
    /// On success the function and arguments are replaced by `nresults`
    /// results (all of them for [`MULTRET`]). On error the function and
    /// arguments are removed and the error is returned.
    pub fn call(&mut self, nargs: i32, nresults: i32) -> LuaResult<()> {
        let nargs = nargs.max(0) as usize;
        let Some(func_pos) = self
            .stack
            .len()
            .checked_sub(nargs + 1)
            .filter(|pos| *pos >= self.base())
        else {
            return Err(LuaError::message("not enough values on the stack for call"));
        };

        let callee = self.stack[func_pos].clone();
        let func = match callee {
            LuaValue::Function(f) => f,
            other => {
                let handler = metafield_of(&other, "__call");
                match handler {
                    LuaValue::Function(f) => {
                        self.stack.insert(func_pos, LuaValue::Function(f.clone()));
                        f
                    }
                    _ => {
                        let msg = format!("attempt to call a {} value", other.type_of());
                        self.stack.truncate(func_pos);
                        return Err(self.error_at(0, &msg));
                    }
                }
            }
        };

        if self.frames.len() > self.options.max_call_depth {
            self.stack.truncate(func_pos);
            return Err(LuaError::StackOverflow);
        }

        self.frames.push(Frame {
            base: func_pos + 1,
            func: Some(func.clone()),
        });
        let result = (func.body)(self);
        self.frames.pop();

        match result {
            Ok(n) => {
                let available = self.stack.len().saturating_sub(func_pos + 1);
                let n = n.min(available);
                let results = self.stack.split_off(self.stack.len() - n);
                self.stack.truncate(func_pos);
                self.stack.extend(results);
                if nresults >= 0 {
                    let wanted = func_pos + nresults as usize;
                    self.stack.resize(wanted, LuaValue::Nil);
                }
                Ok(())
            }
            Err(e) => {
                self.stack.truncate(func_pos);
                Err(e)
            }
        }
    }

    /// Protected call: like [`State::call`] but a raised error is caught and
    /// left as the single value in place of the function and arguments.
    pub fn pcall(&mut self, nargs: i32, nresults: i32) -> Status {
        let func_pos = self.stack.len().saturating_sub(nargs.max(0) as usize + 1);
        let depth = self.frames.len();
        match self.call(nargs, nresults) {
            Ok(()) => Status::Ok,
            Err(e) => {
                self.frames.truncate(depth);
                self.stack.truncate(func_pos.max(self.base()));
                let status = match e {
                    LuaError::StackOverflow => Status::StackOverflow,
                    LuaError::Runtime(_) => Status::RuntimeError,
                };
                self.push_value(e.into_value());
                status
            }
        }
    }

    /// Location prefix (`"chunk: "`) of the frame `level` levels below the
    /// running one. Level 0 is the running function. Unlabeled frames yield
    /// an empty string.
    pub fn where_(&self, level: usize) -> String {
        self.frames
            .len()
            .checked_sub(level + 1)
            .and_then(|i| self.frames.get(i))
            .and_then(|f| f.func.as_ref())
            .and_then(|f| f.chunk_label().map(|c| format!("{}: ", c)))
            .unwrap_or_default()
    }

    /// Runtime error with the location of frame `level` prepended
    pub fn error_at(&self, level: usize, msg: &str) -> LuaError {
        LuaError::message(format!("{}{}", self.where_(level), msg))
    }

    /// Error raised by a native function on behalf of its caller
    pub fn runtime_error(&self, msg: &str) -> LuaError {
        self.error_at(1, msg)
    }

    /// String form of the value at `idx`, honoring `__tostring`
    pub fn tostring(&mut self, idx: i32) -> LuaResult<Rc<str>> {
        let v = self.value(idx);
        let handler = metafield_of(&v, "__tostring");
        if let LuaValue::Function(_) = handler {
            self.push_value(handler);
            self.push_value(v);
            self.call(1, 1)?;
            return match self.pop_value() {
                LuaValue::String(s) => Ok(s),
                _ => Err(LuaError::message("'__tostring' must return a string")),
            };
        }
        Ok(Rc::from(v.to_string()))
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Pop the top value into the registry and return a reference to it
    pub fn create_ref(&mut self) -> i32 {
        let value = self.pop_value();
        if value.is_nil() {
            return REF_NIL;
        }
        let mut registry = self.registry.borrow_mut();
        let free = registry.get_str(FREE_LIST_KEY).to_number().unwrap_or(0.0) as i32;
        let r = if free > 0 {
            let following = registry.get_int(free as i64);
            registry.set_str(FREE_LIST_KEY, following);
            free
        } else {
            let r = self.next_ref;
            self.next_ref += 1;
            r
        };
        registry.set_int(r as i64, value);
        r
    }

    /// Push the value held by reference `r`
    pub fn push_ref(&mut self, r: i32) {
        let v = if r == REF_NIL {
            LuaValue::Nil
        } else {
            self.registry.borrow().get_int(r as i64)
        };
        self.push_value(v);
    }

    /// Release reference `r` so its slot can be reused
    pub fn release_ref(&mut self, r: i32) {
        if r <= 0 {
            return;
        }
        let mut registry = self.registry.borrow_mut();
        let free = registry.get_str(FREE_LIST_KEY);
        registry.set_int(r as i64, if free.is_nil() { LuaValue::Number(0.0) } else { free });
        registry.set_str(FREE_LIST_KEY, LuaValue::Number(r as f64));
    }

    // ========================================================================
    // Collection and application data
    // ========================================================================

    /// Run `__gc` handlers for userdata that became unreachable. Returns the
    /// number of finalizers run. Errors raised by finalizers are discarded.
    pub fn gc(&mut self) -> usize {
        let mut count = 0;
        loop {
            let pending: Vec<_> = std::mem::take(&mut *self.graveyard.borrow_mut());
            if pending.is_empty() {
                break;
            }
            for entry in pending {
                let handler = entry.metatable.borrow().get_str("__gc");
                let ud = Rc::new(UserData::resurrect(entry));
                if let LuaValue::Function(_) = handler {
                    let top = self.get_top();
                    self.push_value(handler);
                    self.push_value(LuaValue::UserData(ud));
                    let status = self.pcall(1, 0);
                    if status != Status::Ok {
                        log::warn!("__gc finalizer failed ({:?}): {}", status, self.value(-1));
                    }
                    self.set_top(top);
                }
                count += 1;
            }
        }
        count
    }

    /// Number of finalizers waiting for [`State::gc`]
    pub fn pending_finalizers(&self) -> usize {
        self.graveyard.borrow().len()
    }

    /// Attach host data to this state
    pub fn set_app_data(&mut self, data: Rc<dyn Any>) {
        self.app_data = Some(data);
    }

    /// Host data previously attached with [`State::set_app_data`]
    pub fn app_data<T: Any>(&self) -> Option<Rc<T>> {
        self.app_data.clone()?.downcast::<T>().ok()
    }

    /// Current call depth (1 when no function is running)
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }
}

/// Metatable of a value
pub fn metatable_of(value: &LuaValue) -> Option<TableRef> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::UserData(u) => u.metatable(),
        _ => None,
    }
}

/// Raw metatable field of a value; nil when absent
pub fn metafield_of(value: &LuaValue, name: &str) -> LuaValue {
    metatable_of(value)
        .map(|mt| mt.borrow().get_str(name))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::native_fn;

    fn adder() -> NativeFn {
        native_fn(|state| {
            let a = state.to_number(1).unwrap_or(0.0);
            let b = state.to_number(2).unwrap_or(0.0);
            state.push_number(a + b);
            Ok(1)
        })
    }

    #[test]
    fn test_push_and_index() {
        let mut state = State::new();
        state.push_number(1.0);
        state.push_string("two");
        state.push_boolean(true);
        assert_eq!(state.get_top(), 3);
        assert_eq!(state.type_of(1), LuaType::Number);
        assert_eq!(state.type_of(-2), LuaType::String);
        assert_eq!(state.type_of(4), LuaType::None);
        assert_eq!(state.abs_index(-1), 3);
    }

    #[test]
    fn test_insert_remove_replace() {
        let mut state = State::new();
        state.push_number(1.0);
        state.push_number(2.0);
        state.push_number(3.0);
        state.insert(1);
        assert_eq!(state.to_number(1), Some(3.0));
        state.remove(1);
        assert_eq!(state.to_number(1), Some(1.0));
        state.push_number(9.0);
        state.replace(1);
        assert_eq!(state.to_number(1), Some(9.0));
        assert_eq!(state.get_top(), 2);
    }

    #[test]
    fn test_string_number_coercion() {
        let mut state = State::new();
        state.push_string("12");
        state.push_number(3.0);
        assert!(state.is_number(1));
        assert!(state.is_string(2));
        assert_eq!(state.to_lua_string(2).as_deref(), Some("3"));
    }

    #[test]
    fn test_call_adjusts_results() {
        let mut state = State::new();
        state.push_function(adder());
        state.push_number(2.0);
        state.push_number(3.0);
        state.call(2, 1).unwrap();
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.to_number(-1), Some(5.0));

        state.push_function(adder());
        state.call(0, 3).unwrap();
        assert_eq!(state.get_top(), 4);
    }

    #[test]
    fn test_pcall_balances_stack_on_error() {
        let mut state = State::new();
        state.push_number(7.0);
        state.push_function(native_fn(|state| {
            state.push_number(1.0);
            state.push_number(2.0);
            Err(state.runtime_error("boom"))
        }));
        state.push_number(1.0);
        let status = state.pcall(1, MULTRET);
        assert_eq!(status, Status::RuntimeError);
        assert_eq!(state.get_top(), 2);
        assert_eq!(state.value(-1).as_str(), Some("boom"));
    }

    #[test]
    fn test_call_depth_limit() {
        let mut state = State::with_options(StateOptions {
            max_call_depth: 8,
            ..Default::default()
        });
        fn recurse() -> NativeFn {
            native_fn(|state| {
                state.push_function(recurse());
                state.call(0, 0)?;
                Ok(0)
            })
        }
        state.push_function(recurse());
        assert_eq!(state.pcall(0, 0), Status::StackOverflow);
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.call_depth(), 1);
    }

    #[test]
    fn test_where_reports_chunk_label() {
        let mut state = State::new();
        let inner: NativeFn = native_fn(|state| {
            let loc = state.where_(1);
            state.push_string(&loc);
            Ok(1)
        });
        state.push_chunk(
            "main.lua:4",
            native_fn(move |state| {
                state.push_function(inner.clone());
                state.call(0, 1)?;
                Ok(1)
            }),
        );
        state.call(0, 1).unwrap();
        assert_eq!(state.value(-1).as_str(), Some("main.lua:4: "));
    }

    #[test]
    fn test_index_metamethod_function() {
        let mut state = State::new();
        state.new_table();
        state.new_table();
        state.push_function(native_fn(|state| {
            let key = state.to_lua_string(2).unwrap_or_else(|| Rc::from(""));
            state.push_string(&format!("dyn:{}", key));
            Ok(1)
        }));
        state.raw_set_field(-2, "__index").unwrap();
        state.set_metatable(-2).unwrap();
        state.get_field(-1, "x").unwrap();
        assert_eq!(state.value(-1).as_str(), Some("dyn:x"));
    }

    #[test]
    fn test_index_non_table_errors() {
        let mut state = State::new();
        state.push_number(1.0);
        assert!(state.get_field(-1, "x").is_err());
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_call_metamethod() {
        let mut state = State::new();
        state.new_table();
        state.new_table();
        state.push_function(native_fn(|state| {
            state.push_number(state.get_top() as f64);
            Ok(1)
        }));
        state.raw_set_field(-2, "__call").unwrap();
        state.set_metatable(-2).unwrap();
        state.push_number(5.0);
        state.call(1, 1).unwrap();
        // self + one argument
        assert_eq!(state.to_number(-1), Some(2.0));
    }

    #[test]
    fn test_references() {
        let mut state = State::new();
        state.push_string("kept");
        let r = state.create_ref();
        assert_eq!(state.get_top(), 0);
        state.push_ref(r);
        assert_eq!(state.value(-1).as_str(), Some("kept"));
        state.release_ref(r);

        state.push_string("reused");
        let r2 = state.create_ref();
        assert_eq!(r, r2);

        state.push_nil();
        assert_eq!(state.create_ref(), REF_NIL);
    }

    #[test]
    fn test_gc_runs_finalizer() {
        let mut state = State::new();
        state.new_table();
        state.push_function(native_fn(|state| {
            let n = state.to_userdata(1).and_then(|u| u.downcast_ref::<i32>().copied());
            state.push_number(n.unwrap_or(-1) as f64);
            state.set_global("finalized")?;
            Ok(0)
        }));
        state.raw_set_field(-2, "__gc").unwrap();
        let mt = state.pop_value();

        state.new_userdata(Box::new(42i32));
        state.push_value(mt);
        state.set_metatable(-2).unwrap();
        state.pop(1);

        assert_eq!(state.pending_finalizers(), 1);
        assert_eq!(state.gc(), 1);
        state.get_global("finalized").unwrap();
        assert_eq!(state.to_number(-1), Some(42.0));
    }

    #[test]
    fn test_gc_survives_failing_finalizer() {
        let mut state = State::new();
        state.new_table();
        state.push_function(native_fn(|state| Err(state.error_at(0, "finalizer broke"))));
        state.raw_set_field(-2, "__gc").unwrap();
        let mt = state.pop_value();

        for n in 0..2i32 {
            state.new_userdata(Box::new(n));
            state.push_value(mt.clone());
            state.set_metatable(-2).unwrap();
            state.pop(1);
        }
        state.push_number(7.0);
        let top = state.get_top();

        assert_eq!(state.gc(), 2);
        assert_eq!(state.pending_finalizers(), 0);
        assert_eq!(state.get_top(), top);
        assert_eq!(state.to_number(-1), Some(7.0));
    }

    #[test]
    fn test_app_data() {
        let mut state = State::new();
        state.set_app_data(Rc::new(String::from("ctx")));
        assert_eq!(state.app_data::<String>().as_deref().map(String::as_str), Some("ctx"));
        assert!(state.app_data::<i32>().is_none());
    }
}
