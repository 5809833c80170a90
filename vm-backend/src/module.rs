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

//! Decodes and validates a guest module's bytes into an owned
//! representation this crate's interpreter can run directly, with no
//! lifetime tied back to the original byte slice.
//!
//! Payload iteration follows `gear-tech-gear/core/src/code/module.rs`'s
//! shape, section by section; unlike that module, every section is
//! converted into an owned type at decode time instead of borrowing from
//! the input, since [`Module`] outlives the buffer a [`crate::Backend`]
//! was constructed from. Function bodies are decoded the same way, via
//! [`crate::interp::decode_body`], rather than being kept as raw
//! `wasmparser::FunctionBody` readers.

use std::vec::Vec;

use wasmparser::{Encoding, ExternalKind, Parser, Payload, TypeRef, Validator, WasmFeatures};
use wvm_errors::ModuleError;

use crate::interp::{decode_body, Instr};
use crate::value::ValueType;

/// A function's parameter and result types. This engine's stack model
/// supports at most one result value per function, matching the
/// single-slot push convention of [`crate::stack::OperandStack`] and of
/// [`crate::host::HostResult`]; a module declaring a multi-value function
/// type fails with [`ModuleError::Validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    /// Parameter types, in call order.
    pub params: Vec<ValueType>,
    /// The single result type, if any.
    pub result: Option<ValueType>,
}

/// A function the module expects the host (or another module, were
/// multi-module linking in scope — it is not) to supply.
#[derive(Debug, Clone)]
pub struct ImportedFunc {
    /// Import's module namespace.
    pub module: String,
    /// Import's field name.
    pub field: String,
    /// Index into [`Module::types`].
    pub type_index: u32,
}

/// A function defined (and given a body) by the module itself.
#[derive(Debug, Clone)]
pub struct DefinedFunc {
    /// Index into [`Module::types`].
    pub type_index: u32,
    /// Local variable types declared after the parameters, in declaration
    /// order; the parameters themselves occupy locals `0..params.len()`.
    pub locals: Vec<ValueType>,
    /// The decoded instruction sequence, with branch targets already
    /// resolved to absolute indices into this `Vec`.
    pub body: Vec<Instr>,
}

/// A named export; this engine only resolves function exports, the only
/// kind `Backend::call` can invoke.
#[derive(Debug, Clone)]
pub struct Export {
    /// The name a host `call(..., field, ...)` looks this function up by.
    pub name: String,
    /// Index into the module's combined function index space (imports
    /// first, then defined functions, matching the WASM index space
    /// convention).
    pub function_index: u32,
}

/// The module's own declared memory limits, in pages. Informational only:
/// per spec.md's resource-ownership model the host supplies the bound
/// [`wvm_core::LinearMemory`] itself via `Backend::set_memory`, the module
/// never allocates its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Initial page count the module declares.
    pub initial: u32,
    /// Maximum page count the module declares, if any.
    pub maximum: Option<u32>,
}

/// An active data segment: a constant byte range the host should write
/// into linear memory at a constant offset before running any exported
/// function, reproducing WASM instantiation-time data initialization.
#[derive(Debug, Clone)]
pub struct DataSegment {
    /// Byte offset within linear memory the segment starts at.
    pub offset: u32,
    /// Bytes to write at `offset`.
    pub bytes: Vec<u8>,
}

/// A decoded, validated, owned WASM module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Every function type the module declares, in declaration order.
    pub types: Vec<FuncType>,
    /// Function imports, in declaration order; these occupy the low end
    /// of the function index space.
    pub imports: Vec<ImportedFunc>,
    /// Functions defined by the module itself, in declaration order;
    /// these occupy the function index space just past `imports`.
    pub defined: Vec<DefinedFunc>,
    /// Named function exports.
    pub exports: Vec<Export>,
    /// The module's own declared memory limits, if it declares a memory.
    pub memory: Option<MemoryLimits>,
    /// Active data segments to apply at instantiation.
    pub data: Vec<DataSegment>,
    /// The start function, if the module declares one.
    pub start: Option<u32>,
}

impl Module {
    /// Index of the first defined function in the combined function index
    /// space (i.e. the number of function imports).
    pub fn first_defined_index(&self) -> u32 {
        self.imports.len() as u32
    }

    /// Looks up a function type by function index across both imports and
    /// defined functions.
    pub fn type_of_function(&self, function_index: u32) -> Option<&FuncType> {
        let type_index = if (function_index as usize) < self.imports.len() {
            self.imports[function_index as usize].type_index
        } else {
            let defined_index = function_index as usize - self.imports.len();
            self.defined.get(defined_index)?.type_index
        };
        self.types.get(type_index as usize)
    }

    /// Looks up an export's function index by name.
    pub fn export(&self, name: &str) -> Option<u32> {
        self.exports.iter().find(|e| e.name == name).map(|e| e.function_index)
    }

    /// Decodes and validates `wasm`, producing an owned [`Module`].
    ///
    /// Validation runs first (`module.validate`); decoding a binary that
    /// fails validation is never attempted, mirroring spec.md §6's "parse
    /// and validate a module" contract for `Backend::new`.
    pub fn decode(wasm: &[u8]) -> Result<Self, ModuleError> {
        Validator::new_with_features(WasmFeatures::default())
            .validate_all(wasm)
            .map_err(|e| ModuleError::Validate(e.to_string()))?;

        let mut types: Vec<FuncType> = Vec::new();
        let mut imports: Vec<ImportedFunc> = Vec::new();
        let mut function_types: Vec<u32> = Vec::new();
        let mut exports: Vec<Export> = Vec::new();
        let mut memory: Option<MemoryLimits> = None;
        let mut data: Vec<DataSegment> = Vec::new();
        let mut start: Option<u32> = None;
        let mut bodies: Vec<Vec<Instr>> = Vec::new();
        let mut locals: Vec<Vec<ValueType>> = Vec::new();

        for payload in Parser::new(0).parse_all(wasm) {
            let payload = payload.map_err(|e| ModuleError::Decode(e.to_string()))?;
            match payload {
                Payload::Version { encoding, .. } => {
                    if encoding != Encoding::Module {
                        return Err(ModuleError::Decode("not a core WASM module".into()));
                    }
                }
                Payload::TypeSection(section) => {
                    for group in section.into_iter_err_on_gc_types() {
                        let func_type = group.map_err(|e| ModuleError::Decode(e.to_string()))?;
                        types.push(owned_func_type(&func_type)?);
                    }
                }
                Payload::ImportSection(section) => {
                    for import in section {
                        let import = import.map_err(|e| ModuleError::Decode(e.to_string()))?;
                        if let TypeRef::Func(type_index) = import.ty {
                            imports.push(ImportedFunc {
                                module: import.module.to_string(),
                                field: import.name.to_string(),
                                type_index,
                            });
                        }
                    }
                }
                Payload::FunctionSection(section) => {
                    for type_index in section {
                        function_types.push(type_index.map_err(|e| ModuleError::Decode(e.to_string()))?);
                    }
                }
                Payload::MemorySection(section) => {
                    if let Some(first) = section.into_iter().next() {
                        let first = first.map_err(|e| ModuleError::Decode(e.to_string()))?;
                        memory = Some(MemoryLimits {
                            initial: first.initial as u32,
                            maximum: first.maximum.map(|m| m as u32),
                        });
                    }
                }
                Payload::ExportSection(section) => {
                    for export in section {
                        let export = export.map_err(|e| ModuleError::Decode(e.to_string()))?;
                        if export.kind == ExternalKind::Func {
                            exports.push(Export { name: export.name.to_string(), function_index: export.index });
                        }
                    }
                }
                Payload::StartSection { func, .. } => {
                    start = Some(func);
                }
                Payload::CodeSectionEntry(body) => {
                    let mut func_locals = Vec::new();
                    let mut locals_reader =
                        body.get_locals_reader().map_err(|e| ModuleError::Decode(e.to_string()))?;
                    for _ in 0..locals_reader.get_count() {
                        let (count, val_type) =
                            locals_reader.read().map_err(|e| ModuleError::Decode(e.to_string()))?;
                        let value_type = owned_value_type(val_type)?;
                        for _ in 0..count {
                            func_locals.push(value_type);
                        }
                    }
                    let operators =
                        body.get_operators_reader().map_err(|e| ModuleError::Decode(e.to_string()))?;
                    let instrs = decode_body(operators)?;
                    locals.push(func_locals);
                    bodies.push(instrs);
                }
                Payload::DataSection(section) => {
                    for entry in section {
                        let entry = entry.map_err(|e| ModuleError::Decode(e.to_string()))?;
                        if let wasmparser::DataKind::Active { offset_expr, .. } = entry.kind {
                            let offset = const_i32(&offset_expr)?;
                            data.push(DataSegment { offset: offset as u32, bytes: entry.data.to_vec() });
                        }
                    }
                }
                _ => {}
            }
        }

        if function_types.len() != bodies.len() {
            return Err(ModuleError::Decode(
                "function and code section entry counts disagree".into(),
            ));
        }

        let defined = function_types
            .into_iter()
            .zip(locals)
            .zip(bodies)
            .map(|((type_index, locals), body)| DefinedFunc { type_index, locals, body })
            .collect();

        Ok(Self { types, imports, defined, exports, memory, data, start })
    }
}

fn owned_value_type(value_type: wasmparser::ValType) -> Result<ValueType, ModuleError> {
    match value_type {
        wasmparser::ValType::I32 => Ok(ValueType::I32),
        wasmparser::ValType::I64 => Ok(ValueType::I64),
        wasmparser::ValType::F32 => Ok(ValueType::F32),
        wasmparser::ValType::F64 => Ok(ValueType::F64),
        other => Err(ModuleError::Validate(format!("unsupported value type {other:?}"))),
    }
}

fn owned_func_type(func_type: &wasmparser::FuncType) -> Result<FuncType, ModuleError> {
    if func_type.results().len() > 1 {
        return Err(ModuleError::Validate("multi-value returns are not supported".into()));
    }
    let params = func_type
        .params()
        .iter()
        .map(|p| owned_value_type(*p))
        .collect::<Result<Vec<_>, _>>()?;
    let result = func_type.results().first().map(|r| owned_value_type(*r)).transpose()?;
    Ok(FuncType { params, result })
}

/// Evaluates a data segment's constant offset expression. Only a bare
/// `i32.const` initializer is supported — global-relative offsets are a
/// linking feature this embeddable engine has no module-linking surface
/// for.
fn const_i32(expr: &wasmparser::ConstExpr) -> Result<i32, ModuleError> {
    let mut reader = expr.get_operators_reader();
    let op = reader
        .read()
        .map_err(|e| ModuleError::Decode(e.to_string()))?;
    match op {
        wasmparser::Operator::I32Const { value } => Ok(value),
        other => Err(ModuleError::Validate(format!(
            "unsupported data segment offset expression {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wat(src: &str) -> Vec<u8> {
        wat::parse_str(src).unwrap()
    }

    #[test]
    fn decodes_types_and_exports() {
        let bytes = wat(
            r#"(module
                (func $add (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add)
            )"#,
        );
        let module = Module::decode(&bytes).unwrap();
        assert_eq!(module.defined.len(), 1);
        assert_eq!(module.export("add"), Some(0));
        let ty = module.type_of_function(0).unwrap();
        assert_eq!(ty.params, vec![ValueType::I32, ValueType::I32]);
        assert_eq!(ty.result, Some(ValueType::I32));
    }

    #[test]
    fn decodes_imports_ahead_of_defined_functions() {
        let bytes = wat(
            r#"(module
                (import "env" "print_num" (func $print_num (param i64)))
                (func $apply (export "apply") (param i64 i64 i64)
                    local.get 0
                    call $print_num)
            )"#,
        );
        let module = Module::decode(&bytes).unwrap();
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.first_defined_index(), 1);
        assert_eq!(module.export("apply"), Some(1));
    }

    #[test]
    fn decodes_active_data_segments() {
        let bytes = wat(
            r#"(module
                (memory (export "memory") 1)
                (data (i32.const 8) "hi")
            )"#,
        );
        let module = Module::decode(&bytes).unwrap();
        assert_eq!(module.data.len(), 1);
        assert_eq!(module.data[0].offset, 8);
        assert_eq!(module.data[0].bytes, b"hi");
    }

    #[test]
    fn rejects_malformed_bytes_as_decode_error() {
        let err = Module::decode(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, ModuleError::Validate(_) | ModuleError::Decode(_)));
    }
}
