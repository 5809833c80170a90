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

//! The interpreter's two run-time stacks: the typed operand stack, and
//! the control-flow bookkeeping stack used to resolve `br`/`br_if` and to
//! restore the operand stack's height on a structured block exit.
//!
//! Split into two `Vec`s rather than one `stack_elem`-style discriminated
//! union (the shape `include/eosio/vm/stack_elem.hpp` uses): a
//! single-threaded tree-walking-free interpreter has no need to interleave
//! operands and control frames in one physical stack, and keeping them
//! apart makes the typed accessors below infallible with respect to tag
//! confusion between the two kinds of entry.

use wvm_errors::TrapKind;

use crate::value::Value;

/// The WASM operand stack.
#[derive(Debug, Default)]
pub struct OperandStack {
    values: Vec<Value>,
}

impl OperandStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values currently on the stack.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the stack holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Discards every value, returning the stack to empty.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Truncates the stack to `height` values, discarding everything
    /// above. Used to restore the operand stack to a block's entry height
    /// on a branch or structured exit.
    pub fn truncate(&mut self, height: usize) {
        self.values.truncate(height);
    }

    /// Pushes one value.
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Pops one value, trapping `stack.underflow` if the stack is empty.
    pub fn pop(&mut self) -> Result<Value, TrapKind> {
        self.values.pop().ok_or(TrapKind::StackUnderflow)
    }

    /// Reads the top value without removing it.
    pub fn peek(&self) -> Result<Value, TrapKind> {
        self.values.last().copied().ok_or(TrapKind::StackUnderflow)
    }

    /// Pops and type-checks an `i32`.
    pub fn pop_i32(&mut self) -> Result<i32, TrapKind> {
        self.pop()?.into_i32()
    }

    /// Pops and type-checks an `i64`.
    pub fn pop_i64(&mut self) -> Result<i64, TrapKind> {
        self.pop()?.into_i64()
    }

    /// Pops and type-checks an `f32`.
    pub fn pop_f32(&mut self) -> Result<f32, TrapKind> {
        self.pop()?.into_f32()
    }

    /// Pops and type-checks an `f64`.
    pub fn pop_f64(&mut self) -> Result<f64, TrapKind> {
        self.pop()?.into_f64()
    }
}

/// What kind of structured control construct a [`ControlFrame`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A plain `block ... end`: branching to it jumps to just past `end`.
    Block,
    /// A `loop ... end`: branching to it jumps back to the `loop` itself.
    Loop,
    /// The `then` arm of an `if`.
    If,
    /// The `else` arm of an `if`.
    Else,
}

/// One entry of the control-flow stack: bookkeeping for a single open
/// `block`/`loop`/`if`/`else` region within the function currently being
/// interpreted.
#[derive(Debug, Clone, Copy)]
pub struct ControlFrame {
    /// What kind of region this is.
    pub kind: BlockKind,
    /// Absolute instruction index a branch to this frame jumps to.
    pub branch_target: usize,
    /// Operand stack height at the point this region was entered; a
    /// branch out of the region truncates the operand stack back to this
    /// height (this engine supports only zero-result-arity blocks).
    pub stack_height: usize,
}

/// Stack of currently-open `block`/`loop`/`if`/`else` regions for the
/// function activation being interpreted. Cleared back to the calling
/// activation's baseline whenever that activation returns.
#[derive(Debug, Default)]
pub struct ControlStack {
    frames: Vec<ControlFrame>,
}

impl ControlStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open regions.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Discards every open region.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Truncates to `height` open regions.
    pub fn truncate(&mut self, height: usize) {
        self.frames.truncate(height);
    }

    /// Opens a new region.
    pub fn push(&mut self, frame: ControlFrame) {
        self.frames.push(frame);
    }

    /// Closes the innermost region, trapping `stack.underflow` if none is
    /// open (a malformed module would do this; well-formed ones never do).
    pub fn pop(&mut self) -> Result<ControlFrame, TrapKind> {
        self.frames.pop().ok_or(TrapKind::StackUnderflow)
    }

    /// Looks up the frame `depth` levels up from the innermost one
    /// (`depth = 0` is the innermost), as used by `br`/`br_if`'s label
    /// index.
    pub fn label(&self, depth: u32) -> Result<ControlFrame, TrapKind> {
        let index = self
            .frames
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or(TrapKind::StackUnderflow)?;
        Ok(self.frames[index])
    }
}

/// Bookkeeping for one function activation (a `call` in progress).
/// Maintained purely for introspection and depth accounting — control
/// flow itself rides on the host's own call stack, since the interpreter
/// dispatches a `call` instruction as an ordinary recursive Rust call.
#[derive(Debug, Clone, Copy)]
pub struct ActivationFrame {
    /// Index of the function being executed.
    pub function_index: u32,
    /// Number of locals (including the spilled parameters) this
    /// activation owns.
    pub locals_count: u32,
    /// Whether the callee is expected to leave a value on the operand
    /// stack when it returns.
    pub has_result: bool,
}

/// Cross-function call stack, pushed to on `call`/`call_indirect` entry
/// and popped on return; not consulted for control flow (see
/// [`ActivationFrame`]), only for the `call.depth` this crate could in
/// principle expose to callers wanting to detect runaway recursion.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<ActivationFrame>,
}

impl CallStack {
    /// An empty call stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current call depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pushes a new activation.
    pub fn push(&mut self, frame: ActivationFrame) {
        self.frames.push(frame);
    }

    /// Pops the innermost activation.
    pub fn pop(&mut self) -> Option<ActivationFrame> {
        self.frames.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_empty_stack_traps_underflow_not_panic() {
        let mut stack = OperandStack::new();
        assert!(matches!(stack.pop(), Err(TrapKind::StackUnderflow)));
    }

    #[test]
    fn typed_pop_rejects_wrong_tag() {
        let mut stack = OperandStack::new();
        stack.push(Value::F64(1.0));
        assert!(matches!(stack.pop_i32(), Err(TrapKind::TypeMismatch)));
    }

    #[test]
    fn truncate_restores_height_after_simulated_branch() {
        let mut stack = OperandStack::new();
        stack.push(Value::I32(1));
        stack.push(Value::I32(2));
        let height = stack.len();
        stack.push(Value::I32(3));
        stack.truncate(height);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn control_label_zero_is_innermost() {
        let mut stack = ControlStack::new();
        stack.push(ControlFrame { kind: BlockKind::Block, branch_target: 10, stack_height: 0 });
        stack.push(ControlFrame { kind: BlockKind::Loop, branch_target: 2, stack_height: 0 });
        assert_eq!(stack.label(0).unwrap().branch_target, 2);
        assert_eq!(stack.label(1).unwrap().branch_target, 10);
        assert!(matches!(stack.label(2), Err(TrapKind::StackUnderflow)));
    }
}
