//! Tables
//!
//! A single insertion-ordered hash part. Integral float keys are normalized
//! to integer keys so `t[1]` and `t[1.0]` address the same slot. Tables whose
//! metatable declares `__mode = "v"` hold table and userdata values weakly.

use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{LuaError, LuaResult};
use crate::value::{LuaValue, TableRef, UserData};

/// Hash key of a table slot
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TableKey {
    Integer(i64),
    /// Non-integral float, stored as raw bits
    Float(u64),
    String(Rc<str>),
    Boolean(bool),
    /// Reference value, keyed by address
    Ref(usize),
}

impl TableKey {
    fn from_value(key: &LuaValue) -> Option<TableKey> {
        match key {
            LuaValue::Nil => None,
            LuaValue::Boolean(b) => Some(TableKey::Boolean(*b)),
            LuaValue::Number(n) => {
                if n.is_nan() {
                    None
                } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Some(TableKey::Integer(*n as i64))
                } else {
                    Some(TableKey::Float(n.to_bits()))
                }
            }
            LuaValue::String(s) => Some(TableKey::String(s.clone())),
            other => Some(TableKey::Ref(other.address())),
        }
    }
}

/// Stored value; weak slots do not keep their referent alive
enum Slot {
    Strong(LuaValue),
    WeakTable(Weak<std::cell::RefCell<Table>>),
    WeakUserData(Weak<UserData>),
}

impl Slot {
    fn get(&self) -> LuaValue {
        match self {
            Slot::Strong(v) => v.clone(),
            Slot::WeakTable(w) => w.upgrade().map(LuaValue::Table).unwrap_or_default(),
            Slot::WeakUserData(w) => w.upgrade().map(LuaValue::UserData).unwrap_or_default(),
        }
    }
}

/// A VM table
#[derive(Default)]
pub struct Table {
    /// Original key value kept next to each slot so reference keys stay alive
    entries: IndexMap<TableKey, (LuaValue, Slot)>,
    metatable: Option<TableRef>,
    weak_values: bool,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw read; missing keys (and collected weak values) read as nil
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        TableKey::from_value(key)
            .and_then(|k| self.entries.get(&k).map(|(_, slot)| slot.get()))
            .unwrap_or_default()
    }

    /// Raw read by string key
    pub fn get_str(&self, key: &str) -> LuaValue {
        self.entries
            .get(&TableKey::String(Rc::from(key)))
            .map(|(_, slot)| slot.get())
            .unwrap_or_default()
    }

    /// Raw read by integer key
    pub fn get_int(&self, key: i64) -> LuaValue {
        self.entries
            .get(&TableKey::Integer(key))
            .map(|(_, slot)| slot.get())
            .unwrap_or_default()
    }

    /// Raw write. Assigning nil removes the slot.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let Some(k) = TableKey::from_value(&key) else {
            return Err(LuaError::message(if key.is_nil() {
                "table index is nil"
            } else {
                "table index is NaN"
            }));
        };
        if value.is_nil() {
            self.entries.shift_remove(&k);
            return Ok(());
        }
        let slot = match (&value, self.weak_values) {
            (LuaValue::Table(t), true) => Slot::WeakTable(Rc::downgrade(t)),
            (LuaValue::UserData(u), true) => Slot::WeakUserData(Rc::downgrade(u)),
            _ => Slot::Strong(value),
        };
        self.entries.insert(k, (key, slot));
        Ok(())
    }

    /// Raw write by string key
    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        // A string key is never nil or NaN
        let _ = self.set(LuaValue::from(key), value);
    }

    /// Raw write by integer key
    pub fn set_int(&mut self, key: i64, value: LuaValue) {
        let _ = self.set(LuaValue::Number(key as f64), value);
    }

    /// Border of the sequence part: the largest `n` with `t[1..=n]` all non-nil
    pub fn len(&self) -> usize {
        let mut n = 0;
        while !self.get_int(n as i64 + 1).is_nil() {
            n += 1;
        }
        n
    }

    /// True when the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|(_, slot)| slot.get().is_nil())
    }

    /// Traversal step: the entry following `key` (nil starts the traversal).
    /// Dead weak entries are skipped.
    pub fn next(&self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        let start = if key.is_nil() {
            0
        } else {
            let index = TableKey::from_value(key)
                .and_then(|k| self.entries.get_index_of(&k))
                .ok_or_else(|| LuaError::message("invalid key to 'next'"))?;
            index + 1
        };
        for i in start..self.entries.len() {
            if let Some((_, (k, slot))) = self.entries.get_index(i) {
                let v = slot.get();
                if !v.is_nil() {
                    return Ok(Some((k.clone(), v)));
                }
            }
        }
        Ok(None)
    }

    /// Metatable, if any
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    /// Replace the metatable. Weak-value mode follows `__mode`.
    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.weak_values = mt
            .as_ref()
            .and_then(|m| m.try_borrow().ok().map(|m| m.get_str("__mode")))
            .and_then(|mode| mode.as_str().map(|s| s.contains('v')))
            .unwrap_or(false);
        self.metatable = mt;
    }

    /// True when values are held weakly
    pub fn has_weak_values(&self) -> bool {
        self.weak_values
    }
}
