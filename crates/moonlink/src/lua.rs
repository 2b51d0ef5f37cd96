//! Marshaling session facade
//!
//! [`Lua`] owns one VM and the [`ObjectTranslator`] attached to it. It is the
//! entry point native callers use: exposing objects, binding methods,
//! translating values and calling into scripts.
//!
//! # Example
//!
//! ```ignore
//! let mut lua = Lua::new();
//! lua.register_type(counter_class());
//! lua.import_type("Demo.Counter")?;
//! lua.set_global("start", &NativeValue::I64(5))?;
//! let results = lua.call_global("main", &[])?;
//! ```

use std::rc::Rc;
use std::sync::Arc;

use moonlink_vm::{LuaValue, State, StateOptions, Status, MULTRET};

use crate::catalog::TypeCatalog;
use crate::config::BridgeOptions;
use crate::dispatch::{self, Binding, MethodWrapper};
use crate::error::{BridgeError, BridgeResult, NativeException, NativeResult};
use crate::error_bridge::{from_lua_error, raise_from_vm};
use crate::proxy::{DynamicProxyFactory, ProxyFactory};
use crate::registry::{ObjectId, ReferenceRegistry};
use crate::translator::{wrapper_function, ObjectTranslator};
use crate::types::{ClassRef, Member, NativeType};
use crate::value::{EventBinding, NativeValue, ObjectData, ObjectRef};

/// A VM together with its marshaling session
pub struct Lua {
    state: State,
    translator: Rc<ObjectTranslator>,
}

impl Default for Lua {
    fn default() -> Self {
        Self::new()
    }
}

impl Lua {
    /// Session with default options
    pub fn new() -> Self {
        Self::with_options(BridgeOptions::default())
    }

    /// Session with the given options
    pub fn with_options(options: BridgeOptions) -> Self {
        Self::with_proxy_factory(options, Arc::new(DynamicProxyFactory))
    }

    /// Session with a custom delegate/interface adapter factory
    pub fn with_proxy_factory(options: BridgeOptions, proxies: Arc<dyn ProxyFactory>) -> Self {
        let mut state = State::with_options(StateOptions {
            max_call_depth: options.max_call_depth,
            ..StateOptions::default()
        });
        let translator = ObjectTranslator::install(
            &mut state,
            Arc::new(TypeCatalog::new()),
            ReferenceRegistry::new(),
            options,
            proxies,
        );
        Lua { state, translator }
    }

    /// Session configured from a TOML document
    pub fn from_toml_str(config: &str) -> BridgeResult<Self> {
        Ok(Self::with_options(BridgeOptions::from_toml_str(config)?))
    }

    /// The VM
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The VM, mutably
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// Session translator
    pub fn translator(&self) -> &Rc<ObjectTranslator> {
        &self.translator
    }

    /// Loaded types
    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        self.translator.catalog()
    }

    /// Object id map
    pub fn registry(&self) -> &ReferenceRegistry {
        self.translator.registry()
    }

    /// Make a class known to the session
    pub fn register_type(&self, class: ClassRef) {
        self.catalog().register(class);
    }

    /// Bind the type proxy of `name` to a global named after its short name
    pub fn import_type(&mut self, name: &str) -> NativeResult<()> {
        let class = self.find_class(name)?;
        self.translator.push_type(&mut self.state, &class);
        self.state
            .set_global(class.short_name())
            .map_err(|e| from_lua_error(&mut self.state, e))
    }

    fn find_class(&self, name: &str) -> BridgeResult<ClassRef> {
        self.catalog()
            .find(name)
            .ok_or_else(|| BridgeError::InvalidTarget(format!("unknown type '{}'", name)))
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Id of `obj`, assigning one if needed
    pub fn expose(&self, obj: &ObjectRef) -> ObjectId {
        self.registry().expose(obj)
    }

    /// Object behind `id`, if still exposed
    pub fn resolve(&self, id: ObjectId) -> Option<ObjectRef> {
        self.registry().resolve(id)
    }

    /// Forget `id`. Revoking twice is harmless.
    pub fn revoke(&self, id: ObjectId) -> Option<ObjectRef> {
        self.registry().revoke(id)
    }

    // ========================================================================
    // Methods
    // ========================================================================

    /// Dispatcher over every overload of `name` on `class`. With a target
    /// the instance overloads are used and bound to it; without one, the
    /// static overloads.
    pub fn bind_method(
        &self,
        class: &ClassRef,
        name: &str,
        target: Option<ObjectRef>,
    ) -> BridgeResult<Rc<MethodWrapper>> {
        let is_static = target.is_none();
        let candidates: Vec<_> = self
            .catalog()
            .hierarchy(class)
            .iter()
            .flat_map(|c| c.members_named(name).cloned().collect::<Vec<_>>())
            .filter_map(|m| match m {
                Member::Method(method) if method.is_static == is_static => Some(method),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return Err(BridgeError::MemberNotFound {
                type_name: class.name().to_string(),
                member: name.to_string(),
            });
        }
        let (binding, bound) = match target {
            Some(obj) => (Binding::Instance, Some(obj)),
            None => (Binding::Static, None),
        };
        let wrapper = MethodWrapper::new(name, class.clone(), binding, candidates);
        Ok(Rc::new(match bound {
            Some(obj) => wrapper.bind(obj),
            None => wrapper,
        }))
    }

    /// Expose `wrapper` to scripts as global `name`
    pub fn register_function(&mut self, name: &str, wrapper: &Rc<MethodWrapper>) -> NativeResult<()> {
        self.state
            .push_value(LuaValue::Function(wrapper_function(wrapper)));
        self.state
            .set_global(name)
            .map_err(|e| from_lua_error(&mut self.state, e))
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Push a native value
    pub fn translate_to_vm(&mut self, value: &NativeValue) {
        self.translator.push(&mut self.state, value);
    }

    /// Convert the value at `idx`, generically or to `expected`
    pub fn translate_from_vm(
        &mut self,
        idx: i32,
        expected: Option<&NativeType>,
    ) -> BridgeResult<NativeValue> {
        match expected {
            None => Ok(self.translator.to_native(&mut self.state, idx)),
            Some(ty) => self
                .translator
                .get_as_type(&mut self.state, idx, ty)
                .ok_or_else(|| BridgeError::TypeMismatch {
                    expected: ty.name(),
                    got: self.state.type_of(idx).name().to_string(),
                }),
        }
    }

    /// Host exception for a raised VM value
    pub fn wrap_vm_error(&mut self, error: LuaValue) -> NativeException {
        raise_from_vm(&mut self.state, error)
    }

    /// Assign global `name`
    pub fn set_global(&mut self, name: &str, value: &NativeValue) -> NativeResult<()> {
        self.translate_to_vm(value);
        self.state
            .set_global(name)
            .map_err(|e| from_lua_error(&mut self.state, e))
    }

    /// Read global `name`
    pub fn get_global(&mut self, name: &str) -> NativeResult<NativeValue> {
        let top = self.state.get_top();
        if let Err(e) = self.state.get_global(name) {
            self.state.set_top(top);
            return Err(from_lua_error(&mut self.state, e));
        }
        let value = self.translator.to_native(&mut self.state, -1);
        self.state.set_top(top);
        Ok(value)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call a VM function (or any callable value) in protected mode and
    /// return all its results
    pub fn call_function(
        &mut self,
        function: &NativeValue,
        args: &[NativeValue],
    ) -> NativeResult<Vec<NativeValue>> {
        let top = self.state.get_top();
        self.translate_to_vm(function);
        for arg in args {
            self.translate_to_vm(arg);
        }
        if self.state.pcall(args.len() as i32, MULTRET) != Status::Ok {
            let error = self.state.pop_value();
            self.state.set_top(top);
            return Err(raise_from_vm(&mut self.state, error));
        }
        let results = (top + 1..=self.state.get_top())
            .map(|i| self.translator.to_native(&mut self.state, i))
            .collect();
        self.state.set_top(top);
        Ok(results)
    }

    /// Call global function `name`
    pub fn call_global(&mut self, name: &str, args: &[NativeValue]) -> NativeResult<Vec<NativeValue>> {
        let function = self.get_global(name)?;
        self.call_function(&function, args)
    }

    /// Call a delegate object
    pub fn invoke_delegate(
        &mut self,
        delegate: &ObjectRef,
        args: &mut [NativeValue],
    ) -> NativeResult<NativeValue> {
        dispatch::invoke_delegate(&mut self.state, delegate, args)
    }

    /// Run pending proxy finalizers and release dropped VM references.
    /// Returns the number of finalizers run.
    pub fn collect_garbage(&mut self) -> usize {
        let finalized = self.state.gc();
        self.translator.collect_released(&mut self.state);
        finalized
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        for (binding, handler) in self.translator.take_events() {
            let ObjectData::Event(EventBinding { target, event }) = binding.data() else {
                continue;
            };
            if let Err(e) = (event.remove)(target.as_ref(), &handler) {
                log::warn!("failed to remove handler for event {}: {}", event.name, e);
            }
        }
    }
}
