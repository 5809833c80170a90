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

//! Property-based tests for the arena and linear-memory invariants listed
//! in the engine specification's testable-properties section.

use proptest::prelude::*;
use wvm_core::{BoundedArena, LinearMemory};

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(config())]

    /// Every allocation out of a bounded arena is 16-byte aligned and lies
    /// strictly within `[base, base + capacity)`, for any sequence of
    /// requests that together stay within capacity.
    #[test]
    fn bounded_arena_allocations_stay_in_bounds(sizes in prop::collection::vec(1usize..64, 1..16)) {
        let capacity = 64 * 16;
        let total: usize = sizes.iter().map(|size| (size + 15) & !15).sum();
        prop_assume!(total <= capacity);

        let mut arena = BoundedArena::init(capacity).unwrap();
        let base = arena.base_address() as usize;
        let mut ends = Vec::new();
        for size in &sizes {
            let ptr = arena.alloc(*size).unwrap();
            let addr = ptr.as_ptr() as usize;
            prop_assert!(addr >= base);
            prop_assert!((addr - base) % 16 == 0);
            prop_assert!(addr + size <= base + capacity);
            ends.push(addr + size);
        }
        // No two allocations overlap: successive bump allocations are
        // monotonically increasing and disjoint by construction.
        for window in ends.windows(2) {
            prop_assert!(window[0] <= window[1]);
        }
    }

    /// `grow(0)` never changes the committed page count.
    #[test]
    fn grow_zero_is_a_no_op(initial in 1u32..8) {
        let mut mem = LinearMemory::new(initial, 16).unwrap();
        let before = mem.size_pages();
        mem.grow(0).unwrap();
        prop_assert_eq!(mem.size_pages(), before);
    }

    /// `grow(n)` followed by `size_pages()` yields `previous + n` whenever
    /// the grow succeeds.
    #[test]
    fn grow_n_advances_page_count_by_n(initial in 1u32..4, delta in 0u32..4) {
        let mut mem = LinearMemory::new(initial, 16).unwrap();
        let previous = mem.grow(delta).unwrap();
        prop_assert_eq!(u32::from(previous), initial);
        prop_assert_eq!(mem.size_pages(), initial + delta);
    }

    /// After `reset()`, a linear memory always reports exactly one page and
    /// an all-zero first page, regardless of what was grown or written
    /// before the reset.
    #[test]
    fn reset_always_yields_one_zeroed_page(initial in 1u32..4, delta in 0u32..4, fill in any::<u8>()) {
        let mut mem = LinearMemory::new(initial, 8).unwrap();
        mem.grow(delta).unwrap();
        mem.write(0, &[fill; 8]);
        mem.reset();
        prop_assert_eq!(mem.size_pages(), 1);
        let mut out = [0u8; 8];
        mem.read(0, &mut out);
        prop_assert_eq!(out, [0u8; 8]);
    }
}
