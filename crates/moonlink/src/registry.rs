//! Reference registry
//!
//! Bidirectional map between [`ObjectId`]s and the native objects exposed to
//! the VM. Ids are assigned from a monotonically increasing counter and are
//! never reused.
//!
//! # Thread Safety
//!
//! The registry is `Clone + Send + Sync`; clones share one map. `expose` and
//! `revoke` may be called from any thread, e.g. from a host finalizer, while
//! the VM's own `__gc` path revokes the same ids on the VM thread. Both map
//! directions are updated under one lock, so they can never disagree.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::value::{object_address, ObjectRef};

/// VM-side handle for an exposed native object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    objects: FxHashMap<ObjectId, ObjectRef>,
    ids: FxHashMap<usize, ObjectId>,
}

/// Bidirectional `ObjectId <-> object` map owned by one session
#[derive(Clone, Default)]
pub struct ReferenceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ReferenceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `obj`, assigning a fresh one if it has none
    pub fn expose(&self, obj: &ObjectRef) -> ObjectId {
        let mut inner = self.inner.lock();
        let addr = object_address(obj);
        if let Some(id) = inner.ids.get(&addr) {
            return *id;
        }
        inner.next_id += 1;
        let id = ObjectId(inner.next_id);
        inner.ids.insert(addr, id);
        inner.objects.insert(id, obj.clone());
        log::trace!("exposed {} as {}", obj.class().name(), id);
        id
    }

    /// Object behind `id`; `None` once revoked
    pub fn resolve(&self, id: ObjectId) -> Option<ObjectRef> {
        self.inner.lock().objects.get(&id).cloned()
    }

    /// Current id of `obj`, without assigning one
    pub fn id_of(&self, obj: &ObjectRef) -> Option<ObjectId> {
        self.inner.lock().ids.get(&object_address(obj)).copied()
    }

    /// Remove `id`. Revoking an unknown or already revoked id does nothing.
    /// Returns the object if this call removed it.
    pub fn revoke(&self, id: ObjectId) -> Option<ObjectRef> {
        let mut inner = self.inner.lock();
        let obj = inner.objects.remove(&id)?;
        inner.ids.remove(&object_address(&obj));
        log::trace!("revoked {}", id);
        Some(obj)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// True when nothing is exposed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that both directions have the same size and are mutual inverses
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        inner.objects.len() == inner.ids.len()
            && inner
                .objects
                .iter()
                .all(|(id, obj)| inner.ids.get(&object_address(obj)) == Some(id))
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.objects.clear();
        inner.ids.clear();
    }
}

impl fmt::Debug for ReferenceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassInfo;
    use crate::value::NativeObject;

    fn object(n: u32) -> ObjectRef {
        let class = ClassInfo::builder("Demo.Item").build();
        NativeObject::new(&class, n)
    }

    #[test]
    fn test_expose_dedups() {
        let registry = ReferenceRegistry::new();
        let obj = object(1);
        let a = registry.expose(&obj);
        let b = registry.expose(&obj);
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_increase_and_are_not_reused() {
        let registry = ReferenceRegistry::new();
        let obj = object(1);
        let first = registry.expose(&obj);
        registry.revoke(first);
        let second = registry.expose(&obj);
        assert!(second > first);
        assert!(registry.resolve(first).is_none());
        assert!(Arc::ptr_eq(&registry.resolve(second).unwrap(), &obj));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let registry = ReferenceRegistry::new();
        let id = registry.expose(&object(1));
        assert!(registry.revoke(id).is_some());
        assert!(registry.revoke(id).is_none());
        assert!(registry.revoke(ObjectId(999)).is_none());
        assert!(registry.is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let registry = ReferenceRegistry::new();
        let a = registry.expose(&object(1));
        let b = registry.expose(&object(1));
        assert_ne!(a, b);
        assert_eq!(registry.id_of(&object(1)), None);
    }
}
