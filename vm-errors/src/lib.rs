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

//! Error taxonomy shared across the allocator, stack, host-function and
//! execution-context crates of the engine.
//!
//! Every fallible operation resolves to one of five families: construction
//! failures that never touch guest bytecode ([`SystemError`]), malformed or
//! unvalidatable module bytes ([`ModuleError`]), link-time failures
//! resolving imports against a host registry ([`LinkError`]), misuse or
//! exhaustion of the memory subsystem ([`MemoryError`]), and faults raised
//! while a guest invocation is actually running ([`TrapKind`]).
//! [`EngineError`] unifies them for callers that don't care which family
//! produced the failure.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::string::String;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Failures that originate outside of any particular guest invocation:
/// constructing an allocator, arming a watchdog, or anything else that can
/// go wrong before bytecode starts running.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SystemError {
    /// A constructor (allocator, context, backend) could not bring its
    /// resource into a valid state, e.g. the initial `mmap` reservation
    /// failed.
    #[display("constructor failed to bring the resource into a valid state")]
    ConstructorFailure,
    /// The requested operation is a recognized but deliberately
    /// unimplemented capability (e.g. `free` on a growable arena).
    #[display("operation is not implemented")]
    Unimplemented,
}

/// Failures reported by an arena allocator or the linear memory built on
/// top of it.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryError {
    /// Allocation could not be satisfied: a bounded arena is full, or a
    /// growable arena's virtual reservation is exhausted.
    #[display("allocator has no space left for the requested allocation")]
    BadAlloc,
    /// `free` was called on an allocator that never handed out the given
    /// allocation, or was called a second time for the same allocation.
    #[display("double free or free of an allocation the arena never made")]
    DoubleFree,
}

/// Failures encountered while decoding or validating a guest module, before
/// any of its imports are resolved or any code runs.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModuleError {
    /// The binary could not be parsed as a WASM module.
    #[display("failed to decode module: {_0}")]
    Decode(String),
    /// The binary parsed but failed WASM validation.
    #[display("failed to validate module: {_0}")]
    Validate(String),
}

/// Failures encountered while resolving a module's imports against a host
/// function registry.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkError {
    /// No host function was registered for this `(module, field)` pair.
    #[display("unresolved import `{module}.{field}`")]
    Unresolved {
        /// Import's module namespace.
        module: String,
        /// Import's field name.
        field: String,
    },
    /// A host function was registered for `(module, field)`, but its
    /// derived signature doesn't match what the guest module imports.
    #[display("signature mismatch for import `{module}.{field}`")]
    Signature {
        /// Import's module namespace.
        module: String,
        /// Import's field name.
        field: String,
    },
    /// The same `(module, field)` pair was registered more than once.
    #[display("duplicate registration for `{module}.{field}`")]
    Duplicate {
        /// Import's module namespace.
        module: String,
        /// Import's field name.
        field: String,
    },
}

/// The reason a running execution context landed in the `Trapped` state.
///
/// Every variant here is reachable from guest bytecode (or the watchdog)
/// during a call; none of them can occur before a call starts.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrapKind {
    /// A host function (or the watchdog) asked execution to stop, e.g.
    /// `eosio_assert` failing.
    #[display("execution exited: {_0}")]
    Exit(String),
    /// A memory access faulted past the committed region and the
    /// signal-fault router recovered control back to the invocation.
    #[display("memory access trapped")]
    Memory,
    /// A typed stack pop observed a tag that didn't match what the
    /// operation required.
    #[display("operand stack type mismatch")]
    TypeMismatch,
    /// A typed stack pop was attempted against an empty stack.
    #[display("operand stack underflow")]
    StackUnderflow,
    /// Guest bytecode executed an `unreachable` instruction, or dispatch hit
    /// an opcode outside the engine's supported subset.
    #[display("unreachable instruction executed")]
    Unreachable,
    /// The watchdog's deadline elapsed before the call returned.
    #[display("execution deadline exceeded")]
    DeadlineExceeded,
}

/// Top-level error returned by any engine operation.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Display, derive_more::Error, derive_more::From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EngineError {
    /// See [`SystemError`].
    #[display("{_0}")]
    System(SystemError),
    /// See [`ModuleError`].
    #[display("{_0}")]
    Module(ModuleError),
    /// See [`MemoryError`].
    #[display("{_0}")]
    Memory(MemoryError),
    /// See [`LinkError`].
    #[display("{_0}")]
    Link(LinkError),
    /// See [`TrapKind`].
    #[display("{_0}")]
    Trap(TrapKind),
}

impl EngineError {
    /// Returns the trap kind this error carries, if it is a guest-visible
    /// trap rather than a system/link-time failure.
    pub fn as_trap(&self) -> Option<&TrapKind> {
        match self {
            Self::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn trap_display_is_stable() {
        assert_eq!(
            TrapKind::StackUnderflow.to_string(),
            "operand stack underflow"
        );
    }

    #[test]
    fn link_error_carries_both_names() {
        let err = LinkError::Unresolved {
            module: "env".into(),
            field: "print_num".into(),
        };
        assert_eq!(err.to_string(), "unresolved import `env.print_num`");
    }

    #[test]
    fn engine_error_from_conversions_roundtrip() {
        let err: EngineError = MemoryError::BadAlloc.into();
        assert!(matches!(err, EngineError::Memory(MemoryError::BadAlloc)));
    }
}
