//! Dispatch wrappers
//!
//! A [`MethodWrapper`] is the VM-callable trampoline for one method group
//! (all overloads of a name), one constructor set, or one overload picked by
//! signature. Each call goes through:
//!
//! 1. Resolving: replay the cached [`InvocationPlan`] when the argument
//!    count matches, otherwise scan the candidates in declaration order
//! 2. Invoking: run the native body with the converted arguments
//! 3. Returning: push the return value, then every out/ref value
//!
//! A native failure is never retried; it is raised into the VM through the
//! error bridge.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use moonlink_vm::{native_fn, LuaError, LuaResult, NativeFn, State};

use crate::error::{BridgeError, BridgeResult, NativeException, NativeResult};
use crate::error_bridge::{raise_bridge, raise_from_native};
use crate::resolver::{resolve, InvocationPlan, ReplayError};
use crate::translator::ObjectTranslator;
use crate::types::{ClassRef, MethodRef};
use crate::value::{NativeValue, ObjectRef};

/// How a wrapper finds its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Instance method; the target is the bound object or VM argument 1
    Instance,
    /// Static method; no target
    Static,
    /// Constructor; no target
    Constructor,
}

/// VM-callable dispatcher for a set of overloads
pub struct MethodWrapper {
    name: Arc<str>,
    class: ClassRef,
    binding: Binding,
    candidates: Vec<MethodRef>,
    bound: Option<ObjectRef>,
    plan: RefCell<Option<InvocationPlan>>,
}

impl MethodWrapper {
    /// Dispatcher over `candidates`, tried in the given order
    pub fn new(name: &str, class: ClassRef, binding: Binding, candidates: Vec<MethodRef>) -> Self {
        MethodWrapper {
            name: Arc::from(name),
            class,
            binding,
            candidates,
            bound: None,
            plan: RefCell::new(None),
        }
    }

    /// Fix the target of an instance wrapper; calls then take no self
    /// argument
    pub fn bind(mut self, target: ObjectRef) -> Self {
        self.bound = Some(target);
        self
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class the member was looked up on
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Target binding
    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Overloads in resolution order
    pub fn candidates(&self) -> &[MethodRef] {
        &self.candidates
    }

    /// True when a resolved plan is cached
    pub fn has_cached_plan(&self) -> bool {
        self.plan.borrow().is_some()
    }

    /// Drop the cached plan
    pub fn invalidate(&self) {
        self.plan.borrow_mut().take();
    }

    /// Description used in error messages
    pub fn callable(&self) -> String {
        match (self.binding, self.candidates.as_slice()) {
            (_, [only]) => only.callable(),
            (Binding::Constructor, _) => format!("constructor of '{}'", self.class.name()),
            _ => format!("method '{}.{}'", self.class.name(), self.name),
        }
    }

    /// VM function running this wrapper
    pub fn into_function(self: Rc<Self>) -> NativeFn {
        native_fn(move |state| self.call(state))
    }

    /// Dispatch a VM call. The VM arguments are the whole current frame.
    pub fn call(&self, state: &mut State) -> LuaResult<usize> {
        let translator = ObjectTranslator::from_state(state).map_err(|e| raise_bridge(state, e))?;
        translator.collect_released(state);

        let (target, first) = self.target(state, &translator)?;
        let nargs = (state.get_top() - first + 1).max(0) as usize;

        let cached = self.plan.borrow_mut().take();
        let (plan, mut args) = match self.prepare(state, &translator, cached, first, nargs) {
            Ok(prepared) => prepared,
            Err(e) => return Err(raise_bridge(state, e)),
        };

        let outcome = plan
            .method()
            .invoke(state, &self.class, target.as_ref(), &mut args);
        let result = match outcome {
            Ok(ret) => Ok(push_results(state, &translator, &plan, &ret, &args)),
            Err(exception) => Err(raise_from_native(state, exception.innermost())),
        };
        *self.plan.borrow_mut() = Some(plan);
        result
    }

    fn target(
        &self,
        state: &mut State,
        translator: &ObjectTranslator,
    ) -> Result<(Option<ObjectRef>, i32), LuaError> {
        if self.binding != Binding::Instance {
            return Ok((None, 1));
        }
        if let Some(bound) = &self.bound {
            return Ok((Some(bound.clone()), 1));
        }
        let target = translator
            .get_net_object(state, 1)
            .filter(|obj| translator.catalog().is_assignable(self.class.name(), obj.class()));
        match target {
            Some(obj) => Ok((Some(obj), 2)),
            None => Err(raise_bridge(
                state,
                BridgeError::InvalidTarget(format!(
                    "instance method '{}' requires a non null target object",
                    self.name
                )),
            )),
        }
    }

    fn prepare(
        &self,
        state: &mut State,
        translator: &ObjectTranslator,
        cached: Option<InvocationPlan>,
        first: i32,
        nargs: usize,
    ) -> BridgeResult<(InvocationPlan, Vec<NativeValue>)> {
        if let Some(plan) = cached {
            match plan.replay(state, translator, first, nargs) {
                Ok(args) => {
                    log::trace!("plan hit for {}", self.callable());
                    return Ok((plan, args));
                }
                Err(ReplayError::InvalidArgument(position)) if self.candidates.len() == 1 => {
                    return Err(BridgeError::InvalidArgument {
                        callable: self.callable(),
                        position,
                    });
                }
                Err(reason) => log::trace!("plan miss for {}: {:?}", self.callable(), reason),
            }
        }
        resolve(state, translator, &self.candidates, first, nargs).ok_or_else(|| {
            log::debug!(
                "no overload of {} accepts {} argument(s)",
                self.callable(),
                nargs
            );
            BridgeError::NoOverloadMatch {
                callable: self.callable(),
            }
        })
    }
}

impl fmt::Debug for MethodWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodWrapper")
            .field("callable", &self.callable())
            .field("binding", &self.binding)
            .field("candidates", &self.candidates.len())
            .finish()
    }
}

fn push_results(
    state: &mut State,
    translator: &ObjectTranslator,
    plan: &InvocationPlan,
    ret: &NativeValue,
    args: &[NativeValue],
) -> usize {
    let mut pushed = 0;
    if !plan.returns_void() {
        translator.push(state, ret);
        pushed += 1;
    }
    for &slot in plan.out_slots() {
        translator.push(state, args.get(slot).unwrap_or(&NativeValue::Null));
        pushed += 1;
    }
    pushed
}

/// Call a delegate object from host code
pub fn invoke_delegate(
    state: &mut State,
    delegate: &ObjectRef,
    args: &mut [NativeValue],
) -> NativeResult<NativeValue> {
    let class = delegate.class().clone();
    let invoke = class.invoke_method().cloned().ok_or_else(|| {
        NativeException::from(BridgeError::InvalidTarget(format!(
            "'{}' is not a delegate",
            class.name()
        )))
    })?;
    invoke.invoke(state, &class, Some(delegate), args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua::Lua;
    use crate::types::{ClassInfo, NativeType, ParamInfo};
    use moonlink_vm::Status;

    fn calculator() -> ClassRef {
        ClassInfo::builder("Demo.Calc")
            .static_method(
                "Twice",
                vec![ParamInfo::new("x", NativeType::I32)],
                NativeType::I32,
                |inv| Ok(NativeValue::I32(inv.arg(0).as_i32().unwrap_or(0) * 2)),
            )
            .static_method(
                "Twice",
                vec![ParamInfo::new("s", NativeType::String)],
                NativeType::String,
                |inv| {
                    let s = inv.arg(0).as_str().unwrap_or("");
                    Ok(NativeValue::from(format!("{}{}", s, s)))
                },
            )
            .build()
    }

    fn wrapper(class: &ClassRef) -> Rc<MethodWrapper> {
        let candidates = class
            .members_named("Twice")
            .filter_map(|m| match m {
                crate::types::Member::Method(m) => Some(m.clone()),
                _ => None,
            })
            .collect();
        Rc::new(MethodWrapper::new("Twice", class.clone(), Binding::Static, candidates))
    }

    #[test]
    fn test_plan_cached_and_replaced() {
        let mut lua = Lua::new();
        let w = wrapper(&calculator());
        let state = lua.state_mut();

        state.push_function(w.clone().into_function());
        state.push_number(21.0);
        state.call(1, 1).unwrap();
        assert_eq!(state.to_number(-1), Some(42.0));
        assert!(w.has_cached_plan());
        state.pop(1);

        state.push_function(w.clone().into_function());
        state.push_string("ab");
        state.call(1, 1).unwrap();
        assert_eq!(state.value(-1).as_str(), Some("abab"));
        state.pop(1);
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn test_no_overload_reports_callable() {
        let mut lua = Lua::new();
        let w = wrapper(&calculator());
        let state = lua.state_mut();
        state.push_function(w.into_function());
        state.push_boolean(true);
        assert_eq!(state.pcall(1, 1), Status::RuntimeError);
        let message = state.tostring(-1).unwrap();
        assert_eq!(&*message, "invalid arguments to method 'Demo.Calc.Twice'");
        state.pop(1);
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn test_single_candidate_replay_failure_is_reported() {
        let mut lua = Lua::new();
        let class = ClassInfo::builder("Demo.Math")
            .static_method(
                "Neg",
                vec![ParamInfo::new("x", NativeType::F64)],
                NativeType::F64,
                |inv| Ok(NativeValue::F64(-inv.arg(0).as_f64().unwrap_or(0.0))),
            )
            .build();
        let crate::types::Member::Method(neg) = class.members()[0].clone() else {
            panic!("method expected");
        };
        let w = Rc::new(MethodWrapper::new("Neg", class, Binding::Static, vec![neg]));
        let state = lua.state_mut();

        state.push_function(w.clone().into_function());
        state.push_number(1.0);
        state.call(1, 1).unwrap();
        state.pop(1);

        state.push_function(w.into_function());
        state.push_string("x");
        assert_eq!(state.pcall(1, 1), Status::RuntimeError);
        let message = state.tostring(-1).unwrap();
        assert_eq!(
            &*message,
            "argument number 1 is invalid for method 'Demo.Math.Neg'"
        );
    }
}
