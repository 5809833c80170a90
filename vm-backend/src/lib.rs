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

//! The embeddable WASM execution engine's public surface: decode a
//! module, bind a guest [`LinearMemory`], resolve its imports against a
//! [`HostFunctionRegistry`], and `call` an exported function by name.
//!
//! Mirrors `gear-core-backend`'s role in the gear-tech-gear lineage — the
//! crate an embedder depends on directly — but the backend here is this
//! engine's own interpreter rather than a wrapper around wasmtime or
//! gear's sandbox backends.

#![warn(missing_docs)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod context;
pub mod host;
pub mod interp;
pub mod module;
pub mod stack;
pub mod value;
pub mod watchdog;

use std::panic::AssertUnwindSafe;

use wvm_core::{fault_registry, LinearMemory};
use wvm_errors::{EngineError, LinkError, SystemError, TrapKind};

pub use context::{ExecutionContext, ExecutionState, ExitHandle};
pub use host::{HostFunctionRegistry, ParamKind, Signature};
pub use module::Module;
pub use value::{Value, ValueType};
pub use watchdog::Watchdog;

/// The embeddable backend: a decoded module plus the host-supplied
/// resources (linear memory, host-function registry) it needs to run.
///
/// `H` is the host-state type threaded through every host-function call,
/// the same `Host` type parameter [`HostFunctionRegistry`] is generic
/// over.
pub struct Backend<H> {
    module: Module,
    memory: Option<LinearMemory>,
    registry: Option<HostFunctionRegistry<H>>,
    context: ExecutionContext,
}

impl<H> Backend<H> {
    /// Decodes and validates `wasm_bytes`, failing with
    /// [`wvm_errors::ModuleError::Decode`] or
    /// [`wvm_errors::ModuleError::Validate`] (wrapped in
    /// [`EngineError::Module`]) if the bytes are not a valid module.
    pub fn new(wasm_bytes: &[u8]) -> Result<Self, EngineError> {
        let module = Module::decode(wasm_bytes).map_err(EngineError::Module)?;
        log::debug!(
            "wvm: decoded module with {} import(s), {} defined function(s), {} export(s)",
            module.imports.len(),
            module.defined.len(),
            module.exports.len()
        );
        Ok(Self { module, memory: None, registry: None, context: ExecutionContext::new() })
    }

    /// Binds a guest linear memory to this backend, required before
    /// [`Self::call`]. Any active data segments the module declares are
    /// written into `memory` immediately, reproducing WASM's
    /// instantiation-time data initialization.
    pub fn set_memory(&mut self, memory: LinearMemory) {
        for segment in &self.module.data {
            log::trace!(
                "wvm: writing {} byte data segment at offset {}",
                segment.bytes.len(),
                segment.offset
            );
            memory.write(segment.offset as usize, &segment.bytes);
        }
        self.memory = Some(memory);
    }

    /// Resolves the module's imports against `registry`, failing with
    /// [`EngineError::Link`] if any import is unresolved or
    /// signature-mismatched. On success, `registry` becomes this
    /// backend's host-function table for every subsequent [`Self::call`].
    pub fn resolve_imports(&mut self, registry: HostFunctionRegistry<H>) -> Result<(), EngineError> {
        let imports = self
            .module
            .imports
            .iter()
            .map(|import| {
                let func_type = &self.module.types[import.type_index as usize];
                let signature = Signature {
                    params: func_type.params.iter().copied().map(ParamKind::Value).collect(),
                    result: func_type.result,
                };
                (import.module.clone(), import.field.clone(), signature)
            })
            .collect::<Vec<_>>();
        registry.resolve(imports).map_err(EngineError::Link)?;
        self.registry = Some(registry);
        Ok(())
    }

    /// The execution context this backend's calls run through — an
    /// embedder obtains [`ExecutionContext::exit_handle`] from it to bind
    /// a [`Watchdog`] before invoking [`Self::call`].
    pub fn context(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    /// Invokes the function exported as `field`, passing `args` as its
    /// typed parameters.
    ///
    /// `module` is accepted for symmetry with the import side of the ABI
    /// (spec.md's `call(host_ref, module, field, args...)`) but this
    /// single-module engine only ever resolves exports against its own
    /// module, so it is not consulted.
    pub fn call(
        &mut self,
        host: &mut H,
        module: &str,
        field: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EngineError> {
        let _ = module;
        let memory = self.memory.as_ref().ok_or(EngineError::System(SystemError::ConstructorFailure))?;
        let registry = self.registry.as_ref().ok_or(EngineError::System(SystemError::ConstructorFailure))?;
        let function_index = self.module.export(field).ok_or_else(|| {
            EngineError::Link(LinkError::Unresolved { module: module.to_string(), field: field.to_string() })
        })?;

        self.context.begin();
        log::trace!("wvm: calling export `{field}` at function index {function_index}");

        let context = &mut self.context;
        let outcome = fault_registry::run_guarded(AssertUnwindSafe(|| {
            interp::call_function(context, &self.module, memory, registry, host, function_index, args)
        }));

        match outcome {
            Ok(Ok(value)) => {
                self.context.finish(ExecutionState::Done(value));
                Ok(value)
            }
            Ok(Err(trap)) => {
                log::warn!("wvm: export `{field}` trapped: {trap}");
                self.context.finish(ExecutionState::Trapped(trap.clone()));
                Err(EngineError::Trap(trap))
            }
            Err(()) => {
                log::warn!("wvm: export `{field}` faulted on an out-of-bounds memory access");
                self.context.finish(ExecutionState::Trapped(TrapKind::Memory));
                Err(EngineError::Trap(TrapKind::Memory))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;

    fn module_bytes() -> Vec<u8> {
        wat::parse_str(
            r#"(module
                (import "env" "double" (func $double (param i32) (result i32)))
                (func $apply (export "apply") (param i32) (result i32)
                    local.get 0
                    call $double)
            )"#,
        )
        .unwrap()
    }

    #[test]
    fn call_before_set_memory_is_a_constructor_failure() {
        let mut backend: Backend<NoHost> = Backend::new(&module_bytes()).unwrap();
        let mut registry = HostFunctionRegistry::new();
        registry.add("env", "double", |_: &mut NoHost, _: &LinearMemory, x: i32| x * 2).unwrap();
        backend.resolve_imports(registry).unwrap();
        let mut host = NoHost;
        let err = backend.call(&mut host, "", "apply", vec![Value::I32(3)]).unwrap_err();
        assert!(matches!(err, EngineError::System(SystemError::ConstructorFailure)));
    }

    #[test]
    fn end_to_end_call_resolves_import_and_returns_result() {
        let mut backend: Backend<NoHost> = Backend::new(&module_bytes()).unwrap();
        let mut registry = HostFunctionRegistry::new();
        registry.add("env", "double", |_: &mut NoHost, _: &LinearMemory, x: i32| x * 2).unwrap();
        backend.resolve_imports(registry).unwrap();
        backend.set_memory(LinearMemory::new(1, 1).unwrap());
        let mut host = NoHost;
        let result = backend.call(&mut host, "", "apply", vec![Value::I32(21)]).unwrap();
        assert_eq!(result, Some(Value::I32(42)));
    }

    #[test]
    fn unresolved_export_is_a_link_error() {
        let mut backend: Backend<NoHost> = Backend::new(&module_bytes()).unwrap();
        let mut registry = HostFunctionRegistry::new();
        registry.add("env", "double", |_: &mut NoHost, _: &LinearMemory, x: i32| x * 2).unwrap();
        backend.resolve_imports(registry).unwrap();
        backend.set_memory(LinearMemory::new(1, 1).unwrap());
        let mut host = NoHost;
        let err = backend.call(&mut host, "", "missing", vec![]).unwrap_err();
        assert!(matches!(err, EngineError::Link(LinkError::Unresolved { .. })));
    }
}
