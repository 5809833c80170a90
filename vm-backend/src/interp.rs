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

//! A minimal bytecode interpreter over the owned [`crate::module::Module`]
//! representation.
//!
//! The full WASM instruction set is, per this engine's own scope, an
//! external collaborator whose complete dispatch table this crate does
//! not claim to specify — this module covers the subset needed to run
//! the integer-arithmetic, structured-control, local-variable and
//! cross-function-call scenarios the engine is built to demonstrate
//! (locals, `i32`/`i64` arithmetic and comparisons, `block`/`loop`/`if`/
//! `else`, `br`/`br_if`, `call`). Linear-memory loads/stores and
//! floating-point arithmetic opcodes are not decoded; a module that uses
//! them fails to decode with [`ModuleError::Validate`] rather than
//! silently miscompiling.
//!
//! Function calls recurse through ordinary Rust calls — [`call`] is
//! mutually recursive with itself whenever guest bytecode calls another
//! defined function — exactly as `crate::stack`'s `ActivationFrame` doc
//! comment describes. Each call gets its own [`crate::stack::ControlStack`]
//! (swapped into the shared [`ExecutionContext`] for the duration of the
//! call) and its own locals vector; only the operand stack is shared
//! across nested activations, used the same way
//! [`crate::host::HostFunctionRegistry::invoke`] already pops arguments
//! and pushes results for host calls.

use std::mem;

use wvm_core::LinearMemory;
use wvm_errors::{ModuleError, TrapKind};

use crate::context::ExecutionContext;
use crate::host::HostFunctionRegistry;
use crate::module::Module;
use crate::stack::{ActivationFrame, BlockKind, ControlFrame, ControlStack};
use crate::value::{Value, ValueType};

/// One decoded instruction. Block/loop/if/else carry pre-resolved
/// absolute indices into the same function's `Vec<Instr>` rather than
/// relative offsets, so the dispatch loop never re-scans for a matching
/// `end`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Traps unconditionally.
    Unreachable,
    /// Does nothing.
    Nop,
    /// Discards the top operand.
    Drop,
    /// Reads local `_0`.
    LocalGet(u32),
    /// Writes local `_0` from the top operand.
    LocalSet(u32),
    /// Writes local `_0` from the top operand, leaving it on the stack.
    LocalTee(u32),
    /// Pushes a constant.
    I32Const(i32),
    /// Pushes a constant.
    I64Const(i64),
    /// Opens a block region; `_0` is the index of its matching `End`.
    Block(usize),
    /// Opens a loop region; `_0` is the index of the instruction just
    /// past the `Loop` itself — a branch to this label jumps here.
    Loop(usize),
    /// Pops an `i32` condition; `else_index` is the index of the matching
    /// `Else` (if any) and `end` of the matching `End`.
    If { else_index: Option<usize>, end: usize },
    /// Reached by straight-line execution when the `then` arm completes;
    /// `_0` is the index of the matching `End`.
    Else(usize),
    /// Closes the innermost open region, or — if none is open — returns
    /// from the function normally.
    End,
    /// Unconditional branch to the label `_0` levels up. A depth equal to
    /// the number of currently open regions names the implicit
    /// function-level label rather than any open `block`/`loop`/`if`,
    /// i.e. it behaves like [`Instr::Return`].
    Br(u32),
    /// Pops an `i32` condition and branches to the label `_0` levels up
    /// if it is non-zero, with the same implicit function-level label as
    /// [`Instr::Br`].
    BrIf(u32),
    /// Returns from the function immediately.
    Return,
    /// Calls the function at this index in the module's combined
    /// function index space (imports first, then defined functions).
    Call(u32),
    /// `i32` arithmetic/comparison: `a op b`, operands popped right then
    /// left, result pushed as `i32`.
    I32Binop(I32Op),
    /// `i64` arithmetic/comparison; result is `i32` for comparisons,
    /// `i64` for arithmetic (see [`I64Op::is_comparison`]).
    I64Binop(I64Op),
    /// Pops an `i32`, pushes `1` if it is zero else `0`.
    I32Eqz,
    /// Pops an `i64`, pushes `1i32` if it is zero else `0i32`.
    I64Eqz,
}

/// `i32` binary operators this interpreter dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I32Op {
    Add, Sub, Mul, And, Or, Xor,
    Eq, Ne, LtS, LtU, GtS, GtU, LeS, LeU, GeS, GeU,
}

/// `i64` binary operators this interpreter dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I64Op {
    Add, Sub, Mul, And, Or, Xor,
    Eq, Ne, LtS, LtU, GtS, GtU, LeS, LeU, GeS, GeU,
}

impl I32Op {
    fn apply(self, a: i32, b: i32) -> i32 {
        match self {
            I32Op::Add => a.wrapping_add(b),
            I32Op::Sub => a.wrapping_sub(b),
            I32Op::Mul => a.wrapping_mul(b),
            I32Op::And => a & b,
            I32Op::Or => a | b,
            I32Op::Xor => a ^ b,
            I32Op::Eq => (a == b) as i32,
            I32Op::Ne => (a != b) as i32,
            I32Op::LtS => (a < b) as i32,
            I32Op::LtU => ((a as u32) < (b as u32)) as i32,
            I32Op::GtS => (a > b) as i32,
            I32Op::GtU => ((a as u32) > (b as u32)) as i32,
            I32Op::LeS => (a <= b) as i32,
            I32Op::LeU => ((a as u32) <= (b as u32)) as i32,
            I32Op::GeS => (a >= b) as i32,
            I32Op::GeU => ((a as u32) >= (b as u32)) as i32,
        }
    }
}

impl I64Op {
    fn is_comparison(self) -> bool {
        !matches!(self, I64Op::Add | I64Op::Sub | I64Op::Mul | I64Op::And | I64Op::Or | I64Op::Xor)
    }

    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            I64Op::Add => a.wrapping_add(b),
            I64Op::Sub => a.wrapping_sub(b),
            I64Op::Mul => a.wrapping_mul(b),
            I64Op::And => a & b,
            I64Op::Or => a | b,
            I64Op::Xor => a ^ b,
            I64Op::Eq => (a == b) as i64,
            I64Op::Ne => (a != b) as i64,
            I64Op::LtS => (a < b) as i64,
            I64Op::LtU => ((a as u64) < (b as u64)) as i64,
            I64Op::GtS => (a > b) as i64,
            I64Op::GtU => ((a as u64) > (b as u64)) as i64,
            I64Op::LeS => (a <= b) as i64,
            I64Op::LeU => ((a as u64) <= (b as u64)) as i64,
            I64Op::GeS => (a >= b) as i64,
            I64Op::GeU => ((a as u64) >= (b as u64)) as i64,
        }
    }
}

/// What kind of open region [`decode_body`]'s forward scan is waiting to
/// close, and — for `if`/`else` — whether an `else` has been seen yet.
enum Open {
    Block,
    Loop,
    If { else_index: Option<usize> },
}

/// Decodes one function body's operator stream into an owned [`Instr`]
/// sequence with branch targets already resolved.
pub fn decode_body(mut operators: wasmparser::OperatorsReader) -> Result<Vec<Instr>, ModuleError> {
    use wasmparser::Operator as Op;

    let mut instrs = Vec::new();
    let mut open: Vec<(usize, Open)> = Vec::new();

    loop {
        if operators.eof() {
            break;
        }
        let op = operators.read().map_err(|e| ModuleError::Decode(e.to_string()))?;
        match op {
            Op::Block { .. } => {
                open.push((instrs.len(), Open::Block));
                instrs.push(Instr::Block(0));
            }
            Op::Loop { .. } => {
                let idx = instrs.len();
                instrs.push(Instr::Loop(idx + 1));
                open.push((idx, Open::Loop));
            }
            Op::If { .. } => {
                open.push((instrs.len(), Open::If { else_index: None }));
                instrs.push(Instr::If { else_index: None, end: 0 });
            }
            Op::Else => {
                let (idx, kind) = open
                    .last_mut()
                    .ok_or_else(|| ModuleError::Decode("else with no open if".into()))?;
                match kind {
                    Open::If { else_index } => *else_index = Some(instrs.len()),
                    _ => return Err(ModuleError::Decode("else inside a non-if region".into())),
                }
                if let Instr::If { else_index, .. } = &mut instrs[*idx] {
                    *else_index = Some(instrs.len());
                }
                instrs.push(Instr::Else(0));
            }
            Op::End => {
                if let Some((idx, kind)) = open.pop() {
                    let end_pos = instrs.len();
                    match kind {
                        Open::Block => {
                            if let Instr::Block(end) = &mut instrs[idx] {
                                *end = end_pos;
                            }
                        }
                        Open::Loop => {}
                        Open::If { else_index } => {
                            if let Instr::If { end, .. } = &mut instrs[idx] {
                                *end = end_pos;
                            }
                            if let Some(else_pos) = else_index {
                                if let Instr::Else(end) = &mut instrs[else_pos] {
                                    *end = end_pos;
                                }
                            }
                        }
                    }
                }
                instrs.push(Instr::End);
            }
            Op::Br { relative_depth } => instrs.push(Instr::Br(relative_depth)),
            Op::BrIf { relative_depth } => instrs.push(Instr::BrIf(relative_depth)),
            Op::Return => instrs.push(Instr::Return),
            Op::Call { function_index } => instrs.push(Instr::Call(function_index)),
            Op::Drop => instrs.push(Instr::Drop),
            Op::Nop => instrs.push(Instr::Nop),
            Op::Unreachable => instrs.push(Instr::Unreachable),
            Op::LocalGet { local_index } => instrs.push(Instr::LocalGet(local_index)),
            Op::LocalSet { local_index } => instrs.push(Instr::LocalSet(local_index)),
            Op::LocalTee { local_index } => instrs.push(Instr::LocalTee(local_index)),
            Op::I32Const { value } => instrs.push(Instr::I32Const(value)),
            Op::I64Const { value } => instrs.push(Instr::I64Const(value)),
            Op::I32Eqz => instrs.push(Instr::I32Eqz),
            Op::I64Eqz => instrs.push(Instr::I64Eqz),
            Op::I32Add => instrs.push(Instr::I32Binop(I32Op::Add)),
            Op::I32Sub => instrs.push(Instr::I32Binop(I32Op::Sub)),
            Op::I32Mul => instrs.push(Instr::I32Binop(I32Op::Mul)),
            Op::I32And => instrs.push(Instr::I32Binop(I32Op::And)),
            Op::I32Or => instrs.push(Instr::I32Binop(I32Op::Or)),
            Op::I32Xor => instrs.push(Instr::I32Binop(I32Op::Xor)),
            Op::I32Eq => instrs.push(Instr::I32Binop(I32Op::Eq)),
            Op::I32Ne => instrs.push(Instr::I32Binop(I32Op::Ne)),
            Op::I32LtS => instrs.push(Instr::I32Binop(I32Op::LtS)),
            Op::I32LtU => instrs.push(Instr::I32Binop(I32Op::LtU)),
            Op::I32GtS => instrs.push(Instr::I32Binop(I32Op::GtS)),
            Op::I32GtU => instrs.push(Instr::I32Binop(I32Op::GtU)),
            Op::I32LeS => instrs.push(Instr::I32Binop(I32Op::LeS)),
            Op::I32LeU => instrs.push(Instr::I32Binop(I32Op::LeU)),
            Op::I32GeS => instrs.push(Instr::I32Binop(I32Op::GeS)),
            Op::I32GeU => instrs.push(Instr::I32Binop(I32Op::GeU)),
            Op::I64Add => instrs.push(Instr::I64Binop(I64Op::Add)),
            Op::I64Sub => instrs.push(Instr::I64Binop(I64Op::Sub)),
            Op::I64Mul => instrs.push(Instr::I64Binop(I64Op::Mul)),
            Op::I64And => instrs.push(Instr::I64Binop(I64Op::And)),
            Op::I64Or => instrs.push(Instr::I64Binop(I64Op::Or)),
            Op::I64Xor => instrs.push(Instr::I64Binop(I64Op::Xor)),
            Op::I64Eq => instrs.push(Instr::I64Binop(I64Op::Eq)),
            Op::I64Ne => instrs.push(Instr::I64Binop(I64Op::Ne)),
            Op::I64LtS => instrs.push(Instr::I64Binop(I64Op::LtS)),
            Op::I64LtU => instrs.push(Instr::I64Binop(I64Op::LtU)),
            Op::I64GtS => instrs.push(Instr::I64Binop(I64Op::GtS)),
            Op::I64GtU => instrs.push(Instr::I64Binop(I64Op::GtU)),
            Op::I64LeS => instrs.push(Instr::I64Binop(I64Op::LeS)),
            Op::I64LeU => instrs.push(Instr::I64Binop(I64Op::LeU)),
            Op::I64GeS => instrs.push(Instr::I64Binop(I64Op::GeS)),
            Op::I64GeU => instrs.push(Instr::I64Binop(I64Op::GeU)),
            other => return Err(ModuleError::Validate(format!("unsupported opcode {other:?}"))),
        }
    }

    Ok(instrs)
}

fn zero_value(ty: ValueType) -> Value {
    match ty {
        ValueType::I32 => Value::I32(0),
        ValueType::I64 => Value::I64(0),
        ValueType::F32 => Value::F32(0.0),
        ValueType::F64 => Value::F64(0.0),
    }
}

/// Resolves a `br`/`br_if` target: truncates the operand stack to the
/// target region's entry height and pops every control frame *above* the
/// target, leaving the target frame itself in place. For a `block`/`if`
/// target, `branch_target` (set by `decode_body`) is the index of that
/// region's own `End`, which pops the remaining frame and advances `pc`
/// when it runs; for a `loop` target it is the index just past the
/// `loop`, so the frame stays open across repeated iterations. Either
/// way the frame count to keep is the same: everything from the target
/// down to the bottom of the stack. Returns the instruction index
/// execution resumes at.
fn branch(control_stack: &mut ControlStack, operand_stack: &mut crate::stack::OperandStack, depth: u32) -> Result<usize, TrapKind> {
    let frame = control_stack.label(depth)?;
    operand_stack.truncate(frame.stack_height);
    control_stack.truncate(control_stack.len() - depth as usize);
    Ok(frame.branch_target)
}

fn pop_result(
    operand_stack: &mut crate::stack::OperandStack,
    has_result: bool,
) -> Result<Option<Value>, TrapKind> {
    if has_result {
        Ok(Some(operand_stack.pop()?))
    } else {
        Ok(None)
    }
}

/// Runs one function activation to completion, recursing through
/// ordinary Rust calls for nested `call` instructions.
pub(crate) fn call_function<H>(
    ctx: &mut ExecutionContext,
    module: &Module,
    memory: &LinearMemory,
    registry: &HostFunctionRegistry<H>,
    host: &mut H,
    function_index: u32,
    args: Vec<Value>,
) -> Result<Option<Value>, TrapKind> {
    if (function_index as usize) < module.imports.len() {
        log::trace!("wvm: invoking host import at index {function_index}");
        return registry.invoke(function_index as usize, host, memory, &args);
    }

    let func_type = module
        .type_of_function(function_index)
        .ok_or(TrapKind::Unreachable)?;
    let has_result = func_type.result.is_some();
    let def = &module.defined[function_index as usize - module.imports.len()];

    let mut locals = args;
    locals.extend(def.locals.iter().map(|ty| zero_value(*ty)));

    let saved_control = mem::take(&mut ctx.control_stack);
    ctx.call_stack.push(ActivationFrame {
        function_index,
        locals_count: locals.len() as u32,
        has_result,
    });

    let result = run_body(ctx, module, memory, registry, host, &def.body, &mut locals, has_result);

    ctx.call_stack.pop();
    ctx.control_stack = saved_control;
    result
}

#[allow(clippy::too_many_arguments)]
fn run_body<H>(
    ctx: &mut ExecutionContext,
    module: &Module,
    memory: &LinearMemory,
    registry: &HostFunctionRegistry<H>,
    host: &mut H,
    body: &[Instr],
    locals: &mut [Value],
    has_result: bool,
) -> Result<Option<Value>, TrapKind> {
    let mut pc = 0usize;

    loop {
        if ctx.deadline_exceeded() {
            return Err(match ctx.take_exit_message() {
                Some(message) => TrapKind::Exit(message),
                None => TrapKind::DeadlineExceeded,
            });
        }

        let Some(instr) = body.get(pc) else {
            return pop_result(&mut ctx.operand_stack, has_result);
        };

        match instr {
            Instr::Unreachable => return Err(TrapKind::Unreachable),
            Instr::Nop => pc += 1,
            Instr::Drop => {
                ctx.operand_stack.pop()?;
                pc += 1;
            }
            Instr::LocalGet(index) => {
                let value = *locals.get(*index as usize).ok_or(TrapKind::Unreachable)?;
                ctx.operand_stack.push(value);
                pc += 1;
            }
            Instr::LocalSet(index) => {
                let value = ctx.operand_stack.pop()?;
                *locals.get_mut(*index as usize).ok_or(TrapKind::Unreachable)? = value;
                pc += 1;
            }
            Instr::LocalTee(index) => {
                let value = ctx.operand_stack.peek()?;
                *locals.get_mut(*index as usize).ok_or(TrapKind::Unreachable)? = value;
                pc += 1;
            }
            Instr::I32Const(value) => {
                ctx.operand_stack.push(Value::I32(*value));
                pc += 1;
            }
            Instr::I64Const(value) => {
                ctx.operand_stack.push(Value::I64(*value));
                pc += 1;
            }
            Instr::I32Eqz => {
                let v = ctx.operand_stack.pop_i32()?;
                ctx.operand_stack.push(Value::I32((v == 0) as i32));
                pc += 1;
            }
            Instr::I64Eqz => {
                let v = ctx.operand_stack.pop_i64()?;
                ctx.operand_stack.push(Value::I32((v == 0) as i32));
                pc += 1;
            }
            Instr::I32Binop(op) => {
                let b = ctx.operand_stack.pop_i32()?;
                let a = ctx.operand_stack.pop_i32()?;
                ctx.operand_stack.push(Value::I32(op.apply(a, b)));
                pc += 1;
            }
            Instr::I64Binop(op) => {
                let b = ctx.operand_stack.pop_i64()?;
                let a = ctx.operand_stack.pop_i64()?;
                if op.is_comparison() {
                    ctx.operand_stack.push(Value::I32(op.apply(a, b) as i32));
                } else {
                    ctx.operand_stack.push(Value::I64(op.apply(a, b)));
                }
                pc += 1;
            }
            Instr::Block(end) => {
                ctx.control_stack.push(ControlFrame {
                    kind: BlockKind::Block,
                    branch_target: *end,
                    stack_height: ctx.operand_stack.len(),
                });
                pc += 1;
            }
            Instr::Loop(body_start) => {
                ctx.control_stack.push(ControlFrame {
                    kind: BlockKind::Loop,
                    branch_target: *body_start,
                    stack_height: ctx.operand_stack.len(),
                });
                pc += 1;
            }
            Instr::If { else_index, end } => {
                let cond = ctx.operand_stack.pop()?.is_truthy()?;
                ctx.control_stack.push(ControlFrame {
                    kind: BlockKind::If,
                    branch_target: *end,
                    stack_height: ctx.operand_stack.len(),
                });
                pc = if cond {
                    pc + 1
                } else {
                    match else_index {
                        Some(else_pos) => else_pos + 1,
                        None => *end,
                    }
                };
            }
            Instr::Else(end) => pc = *end,
            Instr::End => {
                if ctx.control_stack.len() > 0 {
                    ctx.control_stack.pop()?;
                    pc += 1;
                } else {
                    return pop_result(&mut ctx.operand_stack, has_result);
                }
            }
            Instr::Br(depth) => {
                if *depth as usize == ctx.control_stack.len() {
                    return pop_result(&mut ctx.operand_stack, has_result);
                }
                pc = branch(&mut ctx.control_stack, &mut ctx.operand_stack, *depth)?;
            }
            Instr::BrIf(depth) => {
                if ctx.operand_stack.pop()?.is_truthy()? {
                    if *depth as usize == ctx.control_stack.len() {
                        return pop_result(&mut ctx.operand_stack, has_result);
                    }
                    pc = branch(&mut ctx.control_stack, &mut ctx.operand_stack, *depth)?;
                } else {
                    pc += 1;
                }
            }
            Instr::Return => return pop_result(&mut ctx.operand_stack, has_result),
            Instr::Call(function_index) => {
                let function_index = *function_index;
                let callee_type = module.type_of_function(function_index).ok_or(TrapKind::Unreachable)?;
                let arity = callee_type.params.len();
                let mut call_args = Vec::with_capacity(arity);
                for _ in 0..arity {
                    call_args.push(ctx.operand_stack.pop()?);
                }
                call_args.reverse();
                let result = call_function(ctx, module, memory, registry, host, function_index, call_args)?;
                if let Some(value) = result {
                    ctx.operand_stack.push(value);
                }
                pc += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostFunctionRegistry;
    use crate::module::Module;

    struct NoHost;

    fn registry() -> HostFunctionRegistry<NoHost> {
        HostFunctionRegistry::new()
    }

    #[test]
    fn add_two_locals() {
        let bytes = wat::parse_str(
            r#"(module
                (func $add (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add)
            )"#,
        )
        .unwrap();
        let module = Module::decode(&bytes).unwrap();
        let memory = LinearMemory::new(1, 1).unwrap();
        let reg = registry();
        let mut host = NoHost;
        let mut ctx = ExecutionContext::new();
        ctx.begin();
        let result = call_function(&mut ctx, &module, &memory, &reg, &mut host, 0, vec![Value::I32(2), Value::I32(3)])
            .unwrap();
        assert_eq!(result, Some(Value::I32(5)));
    }

    #[test]
    fn loop_counts_down_to_zero_via_br_if() {
        let bytes = wat::parse_str(
            r#"(module
                (func $countdown (export "countdown") (param i32) (result i32)
                    (block
                        (loop
                            local.get 0
                            i32.eqz
                            br_if 1
                            local.get 0
                            i32.const 1
                            i32.sub
                            local.set 0
                            br 0))
                    local.get 0)
            )"#,
        )
        .unwrap();
        let module = Module::decode(&bytes).unwrap();
        let memory = LinearMemory::new(1, 1).unwrap();
        let reg = registry();
        let mut host = NoHost;
        let mut ctx = ExecutionContext::new();
        ctx.begin();
        let result =
            call_function(&mut ctx, &module, &memory, &reg, &mut host, 0, vec![Value::I32(5)]).unwrap();
        assert_eq!(result, Some(Value::I32(0)));
    }

    #[test]
    fn call_reaches_an_imported_host_function() {
        let bytes = wat::parse_str(
            r#"(module
                (import "env" "double" (func $double (param i32) (result i32)))
                (func $apply (export "apply") (param i32) (result i32)
                    local.get 0
                    call $double)
            )"#,
        )
        .unwrap();
        let module = Module::decode(&bytes).unwrap();
        let memory = LinearMemory::new(1, 1).unwrap();
        let mut reg: HostFunctionRegistry<NoHost> = HostFunctionRegistry::new();
        reg.add("env", "double", |_: &mut NoHost, _: &LinearMemory, x: i32| x * 2).unwrap();
        let mut host = NoHost;
        let mut ctx = ExecutionContext::new();
        ctx.begin();
        let result = call_function(&mut ctx, &module, &memory, &reg, &mut host, 1, vec![Value::I32(21)]).unwrap();
        assert_eq!(result, Some(Value::I32(42)));
    }

    #[test]
    fn deadline_observed_at_next_boundary_traps_exit() {
        let bytes = wat::parse_str(
            r#"(module
                (func $spin (export "spin")
                    (loop
                        br 0))
            )"#,
        )
        .unwrap();
        let module = Module::decode(&bytes).unwrap();
        let memory = LinearMemory::new(1, 1).unwrap();
        let reg = registry();
        let mut host = NoHost;
        let mut ctx = ExecutionContext::new();
        ctx.begin();
        ctx.exit_handle().request_exit_with_message("nope");
        let result = call_function(&mut ctx, &module, &memory, &reg, &mut host, 0, vec![]);
        assert!(matches!(result, Err(TrapKind::Exit(ref m)) if m == "nope"));
    }
}
