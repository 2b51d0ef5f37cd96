//! Loaded-type catalog
//!
//! One catalog per session. Besides the host-registered classes it carries
//! the built-in classes the bridge itself hands out: `Object` (the root every
//! class is assignable to), the class of type proxies, the class of event
//! subscription handles and synthesized array classes.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{BridgeError, NativeException, NativeResult};
use crate::translator::ObjectTranslator;
use crate::types::{ClassInfo, ClassRef, EventInfo, NativeType, ParamInfo};
use crate::value::{EventBinding, NativeObject, NativeValue, ObjectData, ObjectRef};

/// Root class name; every object is assignable to it
pub const OBJECT_CLASS: &str = "Object";

/// Class of type proxy objects
pub const TYPE_CLASS: &str = "moonlink.Type";

/// Class of event subscription handles
pub const EVENT_BINDING_CLASS: &str = "moonlink.EventBinding";

/// Bound on base/interface chain walks
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Registry of the native types known to a session
pub struct TypeCatalog {
    classes: RwLock<FxHashMap<Arc<str>, ClassRef>>,
    type_class: ClassRef,
    event_class: ClassRef,
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCatalog {
    /// Create a catalog holding only the built-in classes
    pub fn new() -> Self {
        let catalog = TypeCatalog {
            classes: RwLock::new(FxHashMap::default()),
            type_class: ClassInfo::builder(TYPE_CLASS).build(),
            event_class: event_binding_class(),
        };
        catalog.register(ClassInfo::builder(OBJECT_CLASS).build());
        catalog.register(catalog.type_class.clone());
        catalog.register(catalog.event_class.clone());
        catalog
    }

    /// Add or replace a class
    pub fn register(&self, class: ClassRef) {
        log::debug!("registered type {}", class.name());
        self.classes.write().insert(Arc::from(class.name()), class);
    }

    /// Look up a class by full name
    pub fn find(&self, name: &str) -> Option<ClassRef> {
        self.classes.read().get(name).cloned()
    }

    /// Number of known classes, built-ins included
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// True when no classes are registered
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// True if an instance of `class` can be used where `target` is expected
    pub fn is_assignable(&self, target: &str, class: &ClassInfo) -> bool {
        if target == OBJECT_CLASS || target == class.name() {
            return true;
        }
        let mut pending: Vec<Arc<str>> = class
            .base()
            .map(Arc::from)
            .into_iter()
            .chain(class.interfaces().iter().cloned())
            .collect();
        let mut steps = 0;
        while let Some(name) = pending.pop() {
            if &*name == target {
                return true;
            }
            steps += 1;
            if steps > MAX_HIERARCHY_DEPTH {
                break;
            }
            if let Some(parent) = self.find(&name) {
                pending.extend(parent.base().map(Arc::from));
                pending.extend(parent.interfaces().iter().cloned());
            }
        }
        false
    }

    /// Class chain starting at `class` and following base classes
    pub fn hierarchy(&self, class: &ClassRef) -> Vec<ClassRef> {
        let mut chain = vec![class.clone()];
        while chain.len() < MAX_HIERARCHY_DEPTH {
            let next = chain
                .last()
                .and_then(|c| c.base())
                .and_then(|base| self.find(base));
            match next {
                Some(parent) => chain.push(parent),
                None => break,
            }
        }
        chain
    }

    /// Array class for `element`, synthesized on first use
    pub fn array_class(&self, element: &NativeType) -> ClassRef {
        let name = NativeType::array(element.clone()).name();
        if let Some(existing) = self.find(&name) {
            return existing;
        }
        let class = ClassInfo::builder(&name)
            .property(
                "Length",
                NativeType::I32,
                false,
                Some(Arc::new(|target: Option<&ObjectRef>| -> NativeResult<NativeValue> {
                    target
                        .and_then(|t| t.array_items())
                        .map(|items| NativeValue::I32(items.read().len() as i32))
                        .ok_or_else(|| {
                            BridgeError::InvalidTarget("Length requires an array".into()).into()
                        })
                })),
                None,
            )
            .build();
        self.register(class.clone());
        class
    }

    /// Create an array object
    pub fn new_array(&self, element: NativeType, items: Vec<NativeValue>) -> ObjectRef {
        let class = self.array_class(&element);
        NativeObject::with_data(
            &class,
            ObjectData::Array {
                element,
                items: RwLock::new(items),
            },
        )
    }

    /// Create the object behind a type proxy for `target`
    pub fn type_object(&self, target: &ClassRef) -> ObjectRef {
        NativeObject::with_data(&self.type_class, ObjectData::Type(target.clone()))
    }

    /// Create an event subscription handle
    pub fn event_binding(&self, target: Option<ObjectRef>, event: Arc<EventInfo>) -> ObjectRef {
        NativeObject::with_data(
            &self.event_class,
            ObjectData::Event(EventBinding { target, event }),
        )
    }
}

/// `EventBinding` with `Add(function) -> delegate` and `Remove(delegate)`
fn event_binding_class() -> ClassRef {
    ClassInfo::builder(EVENT_BINDING_CLASS)
        .method(
            "Add",
            vec![ParamInfo::new("handler", NativeType::LuaFunction)],
            NativeType::class(OBJECT_CLASS),
            |inv| {
                let binding = inv.target().cloned().ok_or_else(not_a_binding)?;
                let ObjectData::Event(EventBinding { target, event }) = binding.data() else {
                    return Err(not_a_binding());
                };
                let NativeValue::Function(function) = inv.arg(0).clone() else {
                    return Err(BridgeError::TypeMismatch {
                        expected: "function".into(),
                        got: inv.arg(0).kind_name().into(),
                    }
                    .into());
                };
                let translator = ObjectTranslator::from_state(inv.state)?;
                let delegate_class =
                    translator.catalog().find(&event.delegate_type).ok_or_else(|| {
                        BridgeError::InvalidTarget(format!(
                            "unknown delegate type '{}'",
                            event.delegate_type
                        ))
                    })?;
                let handler = translator.proxies().delegate_for(&delegate_class, function)?;
                (event.add)(target.as_ref(), &handler)?;
                translator.track_event(&binding, &handler);
                Ok(NativeValue::Object(handler))
            },
        )
        .method(
            "Remove",
            vec![ParamInfo::new("handler", NativeType::class(OBJECT_CLASS))],
            NativeType::Void,
            |inv| {
                let binding = inv.target().cloned().ok_or_else(not_a_binding)?;
                let ObjectData::Event(EventBinding { target, event }) = binding.data() else {
                    return Err(not_a_binding());
                };
                let Some(handler) = inv.arg(0).as_object().cloned() else {
                    return Ok(NativeValue::Null);
                };
                (event.remove)(target.as_ref(), &handler)?;
                let translator = ObjectTranslator::from_state(inv.state)?;
                translator.untrack_event(&handler);
                Ok(NativeValue::Null)
            },
        )
        .display(|obj| match obj.data() {
            ObjectData::Event(binding) => format!("event {}", binding.event.name),
            _ => EVENT_BINDING_CLASS.to_string(),
        })
        .build()
}

fn not_a_binding() -> NativeException {
    BridgeError::InvalidTarget("target is not an event binding".into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let catalog = TypeCatalog::new();
        assert!(catalog.find(OBJECT_CLASS).is_some());
        assert!(catalog.find(TYPE_CLASS).is_some());
        assert!(catalog.find(EVENT_BINDING_CLASS).is_some());
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_assignability_walks_bases_and_interfaces() {
        let catalog = TypeCatalog::new();
        catalog.register(ClassInfo::builder("Demo.IShape").interface().build());
        catalog.register(ClassInfo::builder("Demo.Shape").implements("Demo.IShape").build());
        let square = ClassInfo::builder("Demo.Square").base("Demo.Shape").build();
        catalog.register(square.clone());

        assert!(catalog.is_assignable("Demo.Square", &square));
        assert!(catalog.is_assignable("Demo.Shape", &square));
        assert!(catalog.is_assignable("Demo.IShape", &square));
        assert!(catalog.is_assignable(OBJECT_CLASS, &square));
        assert!(!catalog.is_assignable("Demo.Circle", &square));
    }

    #[test]
    fn test_cyclic_hierarchy_terminates() {
        let catalog = TypeCatalog::new();
        catalog.register(ClassInfo::builder("A").base("B").build());
        catalog.register(ClassInfo::builder("B").base("A").build());
        let a = catalog.find("A").unwrap();
        assert!(!catalog.is_assignable("C", &a));
        assert!(catalog.hierarchy(&a).len() <= MAX_HIERARCHY_DEPTH);
    }

    #[test]
    fn test_array_class_is_cached() {
        let catalog = TypeCatalog::new();
        let a = catalog.array_class(&NativeType::I32);
        let b = catalog.array_class(&NativeType::I32);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "i32[]");

        let arr = catalog.new_array(NativeType::I32, vec![NativeValue::I32(1); 4]);
        assert_eq!(arr.array_items().map(|i| i.read().len()), Some(4));
    }

    #[test]
    fn test_type_object_display() {
        let catalog = TypeCatalog::new();
        let widget = ClassInfo::builder("Demo.Widget").build();
        let obj = catalog.type_object(&widget);
        assert_eq!(obj.display(), "ProxyType(Demo.Widget)");
        assert!(obj.type_target().is_some());
    }
}
