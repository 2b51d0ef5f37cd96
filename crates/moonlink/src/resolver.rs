//! Overload resolution and invocation plans
//!
//! Resolution walks the formal parameters of one candidate against the VM
//! arguments and records how each slot is filled. The result, an
//! [`InvocationPlan`], is replayed by later calls with the same argument
//! count without scanning the candidates again.
//!
//! Candidates are tried in declaration order and the first one that accepts
//! the arguments wins. There is no ranking by specificity.

use moonlink_vm::{LuaType, State};

use crate::extract::Extractor;
use crate::matcher::check_type;
use crate::translator::ObjectTranslator;
use crate::types::{MethodRef, NativeType, ParamMode};
use crate::value::NativeValue;

/// How one formal parameter receives its value
#[derive(Debug, Clone)]
enum SlotKind {
    /// One VM argument through one extractor
    Single(Extractor),
    /// A run of VM arguments collected into a params array
    Run {
        element: NativeType,
        extractors: Vec<Extractor>,
    },
    /// Params array with no VM arguments left
    EmptyArray(NativeType),
}

#[derive(Debug, Clone)]
struct ArgSlot {
    /// Formal parameter index
    param: usize,
    /// Offset of the first VM argument used, relative to the first argument
    vm_offset: usize,
    kind: SlotKind,
}

/// Why a replay could not produce arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayError {
    /// The call has a different number of VM arguments than the plan
    ArgCount,
    /// The VM argument at this 1-based position no longer converts
    InvalidArgument(usize),
}

/// Resolved description of how to call one method for one argument shape
#[derive(Debug, Clone)]
pub struct InvocationPlan {
    method: MethodRef,
    template: Vec<NativeValue>,
    slots: Vec<ArgSlot>,
    out_slots: Vec<usize>,
    returns_void: bool,
    vm_arg_count: usize,
}

impl InvocationPlan {
    /// The selected method or constructor
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Number of VM arguments the plan was built for
    pub fn vm_arg_count(&self) -> usize {
        self.vm_arg_count
    }

    /// Formal parameter indices copied back to the VM after the call
    pub fn out_slots(&self) -> &[usize] {
        &self.out_slots
    }

    /// True when the method has no return value
    pub fn returns_void(&self) -> bool {
        self.returns_void
    }

    /// Build the native argument array from the VM arguments starting at
    /// stack position `first`
    pub fn replay(
        &self,
        state: &mut State,
        translator: &ObjectTranslator,
        first: i32,
        nargs: usize,
    ) -> Result<Vec<NativeValue>, ReplayError> {
        if nargs != self.vm_arg_count {
            return Err(ReplayError::ArgCount);
        }
        let mut args = self.template.clone();
        for slot in &self.slots {
            let idx = first + slot.vm_offset as i32;
            let value = match &slot.kind {
                SlotKind::Single(extractor) => extractor
                    .extract(state, translator, idx)
                    .ok_or(ReplayError::InvalidArgument(slot.vm_offset + 1))?,
                SlotKind::Run {
                    element,
                    extractors,
                } => {
                    let mut items = Vec::with_capacity(extractors.len());
                    for (k, extractor) in extractors.iter().enumerate() {
                        let item = extractor
                            .extract(state, translator, idx + k as i32)
                            .ok_or(ReplayError::InvalidArgument(slot.vm_offset + k + 1))?;
                        items.push(item);
                    }
                    NativeValue::Object(translator.catalog().new_array(element.clone(), items))
                }
                SlotKind::EmptyArray(element) => {
                    NativeValue::Object(translator.catalog().new_array(element.clone(), Vec::new()))
                }
            };
            args[slot.param] = value;
        }
        Ok(args)
    }
}

/// Try to satisfy `method`'s parameters with the `nargs` VM arguments
/// starting at stack position `first`
pub fn match_parameters(
    state: &mut State,
    translator: &ObjectTranslator,
    method: &MethodRef,
    first: i32,
    nargs: usize,
) -> Option<InvocationPlan> {
    let mut template = Vec::with_capacity(method.params.len());
    let mut slots = Vec::new();
    let mut out_slots = Vec::new();
    let mut cursor = 0usize;

    for (i, param) in method.params.iter().enumerate() {
        template.push(param.ty.default_value());

        if param.mode == ParamMode::Out {
            out_slots.push(i);
            continue;
        }

        if cursor >= nargs {
            if let Some(default) = &param.default {
                template[i] = default.clone();
                continue;
            }
            if param.params_array {
                let element = param.element_type()?.clone();
                slots.push(ArgSlot {
                    param: i,
                    vm_offset: cursor,
                    kind: SlotKind::EmptyArray(element),
                });
                continue;
            }
            return None;
        }

        let idx = first + cursor as i32;
        if let Some(extractor) = check_type(state, translator, idx, &param.ty) {
            slots.push(ArgSlot {
                param: i,
                vm_offset: cursor,
                kind: SlotKind::Single(extractor),
            });
            cursor += 1;
            if param.mode == ParamMode::Ref {
                out_slots.push(i);
            }
            continue;
        }

        if param.params_array {
            if let Some(element) = param.element_type() {
                if let Some(slot) = match_params_array(state, translator, element, first, cursor, nargs) {
                    let consumed = match &slot {
                        SlotKind::Run { extractors, .. } => extractors.len(),
                        _ => 1,
                    };
                    slots.push(ArgSlot {
                        param: i,
                        vm_offset: cursor,
                        kind: slot,
                    });
                    cursor += consumed;
                    continue;
                }
            }
        }

        if let Some(default) = &param.default {
            template[i] = default.clone();
            continue;
        }
        return None;
    }

    (cursor == nargs).then(|| InvocationPlan {
        method: method.clone(),
        template,
        slots,
        out_slots,
        returns_void: method.ret == NativeType::Void,
        vm_arg_count: nargs,
    })
}

/// A single table converted into the array, or a run of arguments that
/// each match the element type
fn match_params_array(
    state: &mut State,
    translator: &ObjectTranslator,
    element: &NativeType,
    first: i32,
    cursor: usize,
    nargs: usize,
) -> Option<SlotKind> {
    let idx = first + cursor as i32;
    if state.type_of(idx) == LuaType::Table
        && translator.table_to_array(state, idx, element).is_some()
    {
        return Some(SlotKind::Single(Extractor::ArrayTable(element.clone())));
    }
    let mut extractors = Vec::new();
    while cursor + extractors.len() < nargs {
        let at = idx + extractors.len() as i32;
        match check_type(state, translator, at, element) {
            Some(extractor) => extractors.push(extractor),
            None => break,
        }
    }
    (!extractors.is_empty()).then(|| SlotKind::Run {
        element: element.clone(),
        extractors,
    })
}

/// First candidate, in declaration order, whose parameters accept the VM
/// arguments, together with the converted arguments
pub fn resolve(
    state: &mut State,
    translator: &ObjectTranslator,
    candidates: &[MethodRef],
    first: i32,
    nargs: usize,
) -> Option<(InvocationPlan, Vec<NativeValue>)> {
    candidates.iter().find_map(|candidate| {
        let plan = match_parameters(state, translator, candidate, first, nargs)?;
        let args = plan.replay(state, translator, first, nargs).ok()?;
        Some((plan, args))
    })
}
