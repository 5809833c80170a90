// This file is part of wvm.

// Copyright (C) 2021-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The host-function registry: the table of native functions a guest
//! module's imports resolve against.
//!
//! Mirrors `eosio::vm::registered_host_functions<Host, Allocator>` from
//! the original allocator/runtime this engine is modeled on —
//! `rhf_t::add<nullptr_t, &free_fn>(module, field)` for a free function
//! and `rhf_t::add<Host, &Host::method>(module, field)` for one that reads
//! or mutates shared host state. Rust has no template deduction over a
//! bare function pointer, so [`IntoHostFn`] plays that role: it is
//! implemented for every `Fn(&mut H, &LinearMemory, ...) -> R` up to four
//! guest-visible arguments, and derives the WASM-level [`Signature`] from
//! the argument and return types themselves rather than asking the
//! caller to spell it out.

use std::collections::HashMap;

use wvm_core::LinearMemory;
use wvm_errors::{LinkError, TrapKind};

use crate::value::{Value, ValueType};

/// The declared shape of one parameter slot in a host-function signature.
///
/// Every kind occupies exactly one WASM value slot — `GuestPtr` lowers to
/// a plain `i32` offset, same as the original's `array_ptr<T>`/
/// `null_terminated_ptr` adaptors, which also take an ordinary integer
/// offset and translate it against the bound memory only once the
/// adaptor's constructor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// An ordinary typed value.
    Value(ValueType),
    /// A guest linear-memory offset (WASM type `i32`), not yet translated
    /// to a host pointer. Paired with a length parameter and a call to
    /// [`guest_slice`]/[`guest_slice_mut`], this reproduces the bounded
    /// two-part translation `array_ptr<T>` does in the original.
    GuestPtr,
}

impl ParamKind {
    /// The WASM value type this parameter occupies on the stack.
    pub fn value_type(self) -> ValueType {
        match self {
            ParamKind::Value(v) => v,
            ParamKind::GuestPtr => ValueType::I32,
        }
    }
}

/// The WASM-visible signature of a registered host function: used both to
/// detect signature mismatches at link time and, for the registry's own
/// bookkeeping, to describe what a native closure expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Parameter kinds, in call order.
    pub params: Vec<ParamKind>,
    /// Result type, if any.
    pub result: Option<ValueType>,
}

impl Signature {
    /// Whether this signature matches a module import's declared WASM
    /// function type.
    pub fn matches(&self, params: &[ValueType], result: Option<ValueType>) -> bool {
        self.params.len() == params.len()
            && self
                .params
                .iter()
                .zip(params.iter())
                .all(|(k, v)| k.value_type() == *v)
            && self.result == result
    }
}

/// Implemented by Rust types that a host-function invoker can pop
/// straight off the operand stack.
pub trait HostArg: Sized {
    /// The parameter kind this type corresponds to.
    const KIND: ParamKind;
    /// Converts a popped [`Value`], trapping `type.mismatch` if its tag
    /// doesn't match `KIND`.
    fn from_value(value: Value) -> Result<Self, TrapKind>;
}

macro_rules! impl_host_arg {
    ($ty:ty, $kind:expr, $variant:ident) => {
        impl HostArg for $ty {
            const KIND: ParamKind = $kind;

            fn from_value(value: Value) -> Result<Self, TrapKind> {
                match value {
                    Value::$variant(v) => Ok(v as $ty),
                    _ => Err(TrapKind::TypeMismatch),
                }
            }
        }
    };
}

impl_host_arg!(i32, ParamKind::Value(ValueType::I32), I32);
impl_host_arg!(u32, ParamKind::Value(ValueType::I32), I32);
impl_host_arg!(i64, ParamKind::Value(ValueType::I64), I64);
impl_host_arg!(u64, ParamKind::Value(ValueType::I64), I64);
impl_host_arg!(f32, ParamKind::Value(ValueType::F32), F32);
impl_host_arg!(f64, ParamKind::Value(ValueType::F64), F64);

impl HostArg for bool {
    const KIND: ParamKind = ParamKind::Value(ValueType::I32);

    fn from_value(value: Value) -> Result<Self, TrapKind> {
        Ok(value.into_i32()? != 0)
    }
}

/// A guest linear-memory offset, not yet translated into a host pointer.
/// A host function that wants a bounded range calls [`guest_slice`] /
/// [`guest_slice_mut`] itself, passing the length it expects (usually
/// itself a paired `u32`/`GuestPtr` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestPtr(pub u32);

impl HostArg for GuestPtr {
    const KIND: ParamKind = ParamKind::GuestPtr;

    fn from_value(value: Value) -> Result<Self, TrapKind> {
        Ok(GuestPtr(value.into_i32()? as u32))
    }
}

/// Implemented by Rust types a host function may return to the guest.
pub trait HostResult {
    /// The result's WASM value type, or `None` for a void return.
    fn kind() -> Option<ValueType>;
    /// Converts into the stack-pushable form.
    fn into_value(self) -> Option<Value>;
}

impl HostResult for () {
    fn kind() -> Option<ValueType> {
        None
    }

    fn into_value(self) -> Option<Value> {
        None
    }
}

macro_rules! impl_host_result {
    ($ty:ty, $kind:expr, $variant:ident) => {
        impl HostResult for $ty {
            fn kind() -> Option<ValueType> {
                Some($kind)
            }

            fn into_value(self) -> Option<Value> {
                Some(Value::$variant(self as _))
            }
        }
    };
}

impl_host_result!(i32, ValueType::I32, I32);
impl_host_result!(u32, ValueType::I32, I32);
impl_host_result!(i64, ValueType::I64, I64);
impl_host_result!(u64, ValueType::I64, I64);
impl_host_result!(f32, ValueType::F32, F32);
impl_host_result!(f64, ValueType::F64, F64);

impl HostResult for bool {
    fn kind() -> Option<ValueType> {
        Some(ValueType::I32)
    }

    fn into_value(self) -> Option<Value> {
        Some(Value::I32(self as i32))
    }
}

type Invoker<H> =
    Box<dyn Fn(&mut H, &LinearMemory, &[Value]) -> Result<Option<Value>, TrapKind> + Send + Sync>;

/// One entry in a [`HostFunctionRegistry`]: a module/field pair, the
/// signature it exposes to the guest, and the boxed native closure that
/// runs on `call`.
pub struct HostFunction<H> {
    /// The import module name this function answers to.
    pub module: String,
    /// The import field name this function answers to.
    pub field: String,
    /// Its WASM-visible signature.
    pub signature: Signature,
    invoke: Invoker<H>,
}

/// Implemented for every native closure shape the registry can adopt
/// directly via [`HostFunctionRegistry::add`], deriving [`Signature`]
/// from `Self`'s own argument and return types. `Args` is a marker type
/// (the argument tuple) used only to let one native closure type
/// implement this trait at more than one arity unambiguously.
pub trait IntoHostFn<H, Args> {
    /// Derives the signature this closure exposes to the guest.
    fn signature() -> Signature;
    /// Boxes `self` into the registry's uniform invoker shape.
    fn into_invoker(self) -> Invoker<H>;
}

macro_rules! impl_into_host_fn {
    ($($arg:ident),*) => {
        impl<H, F, R, $($arg,)*> IntoHostFn<H, ($($arg,)*)> for F
        where
            F: Fn(&mut H, &LinearMemory, $($arg),*) -> R + Send + Sync + 'static,
            $($arg: HostArg,)*
            R: HostResult,
        {
            fn signature() -> Signature {
                Signature {
                    params: vec![$($arg::KIND),*],
                    result: R::kind(),
                }
            }

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn into_invoker(self) -> Invoker<H> {
                Box::new(move |host: &mut H, memory: &LinearMemory, args: &[Value]| {
                    let mut values = args.iter().copied();
                    $(
                        let $arg = <$arg as HostArg>::from_value(
                            values.next().ok_or(TrapKind::StackUnderflow)?,
                        )?;
                    )*
                    let result = self(host, memory, $($arg),*);
                    Ok(HostResult::into_value(result))
                })
            }
        }
    };
}

impl_into_host_fn!();
impl_into_host_fn!(A1);
impl_into_host_fn!(A1, A2);
impl_into_host_fn!(A1, A2, A3);
impl_into_host_fn!(A1, A2, A3, A4);

/// The table of native functions a guest module's imports resolve
/// against, generic over the host state type `H` threaded through every
/// call (the original's `Host` template parameter on
/// `registered_host_functions`).
pub struct HostFunctionRegistry<H> {
    functions: Vec<HostFunction<H>>,
    index: HashMap<(String, String), usize>,
}

impl<H> Default for HostFunctionRegistry<H> {
    fn default() -> Self {
        Self {
            functions: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<H> HostFunctionRegistry<H> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a native function under `(module, field)`, deriving its
    /// signature automatically from `F`'s argument and return types.
    ///
    /// Returns [`LinkError::Duplicate`] if that pair is already
    /// registered — the registry never silently shadows an earlier
    /// registration, matching `rhf_t::add`'s own "no duplicate (module,
    /// field) pair" contract.
    pub fn add<F, Args>(&mut self, module: &str, field: &str, f: F) -> Result<(), LinkError>
    where
        F: IntoHostFn<H, Args> + Send + Sync + 'static,
    {
        let key = (module.to_string(), field.to_string());
        if self.index.contains_key(&key) {
            return Err(LinkError::Duplicate {
                module: module.to_string(),
                field: field.to_string(),
            });
        }
        let signature = F::signature();
        let invoke = F::into_invoker(f);
        let idx = self.functions.len();
        self.functions.push(HostFunction {
            module: key.0.clone(),
            field: key.1.clone(),
            signature,
            invoke,
        });
        self.index.insert(key, idx);
        Ok(())
    }

    /// Resolves a module's declared imports against this registry,
    /// returning the registry index for each import in declaration order.
    ///
    /// An import with no matching `(module, field)` entry is
    /// [`LinkError::Unresolved`]; one that matches the name but not the
    /// signature is [`LinkError::Signature`] — the module decoder/loader
    /// calls this once per instantiation, before any guest code runs.
    pub fn resolve(
        &self,
        imports: impl IntoIterator<Item = (String, String, Signature)>,
    ) -> Result<Vec<usize>, LinkError> {
        imports
            .into_iter()
            .map(|(module, field, sig)| {
                let key = (module.clone(), field.clone());
                let idx = *self
                    .index
                    .get(&key)
                    .ok_or_else(|| LinkError::Unresolved { module: module.clone(), field: field.clone() })?;
                if !self.functions[idx].signature.matches(
                    &sig.params.iter().map(|p| p.value_type()).collect::<Vec<_>>(),
                    sig.result,
                ) {
                    return Err(LinkError::Signature { module, field });
                }
                Ok(idx)
            })
            .collect()
    }

    /// Invokes the registered function at `index` (as previously resolved
    /// by [`Self::resolve`]) with `args` already popped off the operand
    /// stack in call order.
    pub fn invoke(
        &self,
        index: usize,
        host: &mut H,
        memory: &LinearMemory,
        args: &[Value],
    ) -> Result<Option<Value>, TrapKind> {
        (self.functions[index].invoke)(host, memory, args)
    }

    /// The signature of the function registered at `index`.
    pub fn signature(&self, index: usize) -> &Signature {
        &self.functions[index].signature
    }
}

/// Translates a `(offset, length)` guest-memory range into a host slice,
/// bounds-checked against `memory`'s *currently committed* page count —
/// not merely the 4GiB reservation. A range that reaches past the
/// committed prefix is `trap.memory`, the same fault a direct guest
/// load/store past the end of memory would raise.
pub fn guest_slice<'m>(memory: &'m LinearMemory, offset: u32, len: u32) -> Result<&'m [u8], TrapKind> {
    let end = (offset as usize)
        .checked_add(len as usize)
        .ok_or(TrapKind::Memory)?;
    if end > memory.data_size() {
        return Err(TrapKind::Memory);
    }
    // SAFETY: `end <= memory.data_size()`, the committed and readable
    // prefix of `memory`'s mapping.
    unsafe { Ok(std::slice::from_raw_parts(memory.data_ptr().add(offset as usize), len as usize)) }
}

/// Mutable counterpart of [`guest_slice`].
pub fn guest_slice_mut<'m>(
    memory: &'m LinearMemory,
    offset: u32,
    len: u32,
) -> Result<&'m mut [u8], TrapKind> {
    let end = (offset as usize)
        .checked_add(len as usize)
        .ok_or(TrapKind::Memory)?;
    if end > memory.data_size() {
        return Err(TrapKind::Memory);
    }
    // SAFETY: same bound as `guest_slice`; `&mut` aliasing is the
    // caller's responsibility, same contract `LinearMemory::read`/`write`
    // already place on their callers.
    unsafe { Ok(std::slice::from_raw_parts_mut(memory.data_ptr().add(offset as usize), len as usize)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;

    #[test]
    fn add_derives_signature_from_native_fn_types() {
        let mut registry: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        registry
            .add("env", "add_one", |_host: &mut NoHost, _mem: &LinearMemory, x: i32| x + 1)
            .unwrap();
        assert_eq!(
            *registry.signature(0),
            Signature { params: vec![ParamKind::Value(ValueType::I32)], result: Some(ValueType::I32) }
        );
    }

    #[test]
    fn duplicate_module_field_pair_is_rejected() {
        let mut registry: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        registry.add("env", "f", |_: &mut NoHost, _: &LinearMemory| {}).unwrap();
        let err = registry.add("env", "f", |_: &mut NoHost, _: &LinearMemory| {}).unwrap_err();
        assert!(matches!(err, LinkError::Duplicate { .. }));
    }

    #[test]
    fn resolve_rejects_unknown_import() {
        let registry: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        let err = registry
            .resolve([("env".to_string(), "missing".to_string(), Signature { params: vec![], result: None })])
            .unwrap_err();
        assert!(matches!(err, LinkError::Unresolved { .. }));
    }

    #[test]
    fn resolve_rejects_signature_mismatch() {
        let mut registry: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        registry
            .add("env", "f", |_: &mut NoHost, _: &LinearMemory, _x: i32| {})
            .unwrap();
        let err = registry
            .resolve([("env".to_string(), "f".to_string(), Signature { params: vec![], result: None })])
            .unwrap_err();
        assert!(matches!(err, LinkError::Signature { .. }));
    }

    #[test]
    fn invoke_calls_through_to_the_native_closure() {
        let mut registry: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        registry
            .add("env", "double", |_: &mut NoHost, _: &LinearMemory, x: i32| x * 2)
            .unwrap();
        let memory = LinearMemory::new(1, 1).unwrap();
        let mut host = NoHost;
        let result = registry.invoke(0, &mut host, &memory, &[Value::I32(21)]).unwrap();
        assert_eq!(result, Some(Value::I32(42)));
    }

    #[test]
    fn guest_slice_rejects_range_past_committed_pages() {
        let memory = LinearMemory::new(1, 1).unwrap();
        assert!(guest_slice(&memory, 0, memory.data_size() as u32).is_ok());
        assert!(guest_slice(&memory, memory.data_size() as u32 - 1, 2).is_err());
    }
}
