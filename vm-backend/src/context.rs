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

//! The state a single guest invocation carries from start to finish: its
//! operand and control stacks, call depth, the deadline flag a
//! [`crate::watchdog::Watchdog`] can reach in from another thread, and
//! the outcome once the invocation settles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wvm_errors::TrapKind;

use crate::stack::{CallStack, ControlStack, OperandStack};
use crate::value::Value;

/// Where a single `call` into the guest currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    /// No invocation has run yet.
    Ready,
    /// An invocation is in flight.
    Running,
    /// The invocation returned normally, with an optional result value.
    Done(Option<Value>),
    /// The invocation trapped.
    Trapped(TrapKind),
}

/// Per-invocation interpreter state.
///
/// A single `ExecutionContext` is reused across repeated calls into the
/// same module instance (mirroring `LinearMemory::reset`'s own
/// reuse-rather-than-reallocate posture): [`Self::begin`] clears the
/// stacks and rearms the deadline flag for each new call.
pub struct ExecutionContext {
    pub(crate) operand_stack: OperandStack,
    pub(crate) control_stack: ControlStack,
    pub(crate) call_stack: CallStack,
    deadline: Arc<AtomicBool>,
    exit_message: Arc<Mutex<Option<String>>>,
    state: ExecutionState,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// A freshly constructed, not-yet-run context.
    pub fn new() -> Self {
        Self {
            operand_stack: OperandStack::new(),
            control_stack: ControlStack::new(),
            call_stack: CallStack::new(),
            deadline: Arc::new(AtomicBool::new(false)),
            exit_message: Arc::new(Mutex::new(None)),
            state: ExecutionState::Ready,
        }
    }

    /// Clears all per-call state and marks the context `Running`, ready
    /// for a fresh `call`.
    pub fn begin(&mut self) {
        self.operand_stack.clear();
        self.control_stack.clear();
        self.deadline.store(false, Ordering::Release);
        *self.exit_message.lock() = None;
        self.state = ExecutionState::Running;
    }

    /// A cheap, clonable handle a [`crate::watchdog::Watchdog`] callback
    /// (or a host function, e.g. an `eosio_assert`-style intrinsic) can
    /// use to request that this invocation unwind at its next bytecode
    /// boundary. This is the *only* channel either is permitted to use to
    /// affect an in-flight invocation; it must never touch the stacks or
    /// memory directly, since a watchdog callback runs concurrently with
    /// the interpreter.
    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle { deadline: self.deadline.clone(), message: self.exit_message.clone() }
    }

    /// Whether an exit has been requested since the last [`Self::begin`].
    /// Checked by the interpreter at every instruction boundary.
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.load(Ordering::Acquire)
    }

    /// Takes the message an `exit_handle` call stored alongside the exit
    /// request, if any. `None` with [`Self::deadline_exceeded`] true means
    /// the exit was a plain watchdog deadline rather than a host-signalled
    /// named exit.
    pub fn take_exit_message(&self) -> Option<String> {
        self.exit_message.lock().take()
    }

    /// The outcome of the most recently completed (or in-flight) call.
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Records the outcome of the call that just finished.
    pub fn finish(&mut self, state: ExecutionState) {
        self.state = state;
    }
}

/// Cheap, clonable handle to an execution context's exit-request channel.
#[derive(Clone)]
pub struct ExitHandle {
    deadline: Arc<AtomicBool>,
    message: Arc<Mutex<Option<String>>>,
}

impl ExitHandle {
    /// Requests that the invocation this handle belongs to unwind with
    /// [`TrapKind::DeadlineExceeded`] at its next instruction boundary.
    pub fn request_exit(&self) {
        self.deadline.store(true, Ordering::Release);
    }

    /// Requests that the invocation unwind with a named
    /// [`TrapKind::Exit`], carrying `message` (e.g. an `eosio_assert`
    /// failure string) to the caller of `Backend::call`.
    pub fn request_exit_with_message(&self, message: impl Into<String>) {
        *self.message.lock() = Some(message.into());
        self.deadline.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_resets_stacks_and_deadline() {
        let mut ctx = ExecutionContext::new();
        ctx.operand_stack.push(Value::I32(1));
        ctx.exit_handle().request_exit();
        assert!(ctx.deadline_exceeded());
        ctx.begin();
        assert_eq!(ctx.operand_stack.len(), 0);
        assert!(!ctx.deadline_exceeded());
        assert_eq!(*ctx.state(), ExecutionState::Running);
    }

    #[test]
    fn exit_handle_is_observable_from_a_clone() {
        let ctx = ExecutionContext::new();
        let handle = ctx.exit_handle();
        assert!(!ctx.deadline_exceeded());
        handle.request_exit();
        assert!(ctx.deadline_exceeded());
    }

    #[test]
    fn request_exit_with_message_is_readable_once() {
        let ctx = ExecutionContext::new();
        ctx.exit_handle().request_exit_with_message("nope");
        assert!(ctx.deadline_exceeded());
        assert_eq!(ctx.take_exit_message().as_deref(), Some("nope"));
        assert_eq!(ctx.take_exit_message(), None);
    }
}
