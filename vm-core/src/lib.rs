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

//! wvm core.
//!
//! Memory-management substrate for the wvm WebAssembly execution engine:
//! bump allocators for decoder/module scratch space, and the guard-paged
//! guest linear memory with its process-wide signal-fault router. None of
//! these types know anything about WASM bytecode; they are the primitives
//! the interpreter in `wvm-backend` is built on top of.
//!
//! Unlike `gear-core`, this crate is never compiled to `wasm32` itself (it
//! is the host-side substrate a guest runs *inside*), so it is built
//! against `std` rather than `no_std`: the guard-page fault router needs
//! `std::panic::catch_unwind` and OS threads, and there is no embedded
//! target that would benefit from `no_std` here.
#![warn(missing_docs)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod arena;
pub mod fault_registry;
pub mod linear_memory;
pub mod pages;

pub use arena::{BoundedArena, GrowableArena};
pub use linear_memory::LinearMemory;
pub use pages::{WasmPage, MAX_PAGES, PAGE_SIZE};
