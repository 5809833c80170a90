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

//! The guest's own linear memory: a page-granular, guard-paged mapping
//! that lets an ordinary out-of-bounds load/store fault through the MMU
//! instead of needing a software bounds check on every access.
//!
//! A fixed 4GiB span is reserved with `PROT_NONE`; [`LinearMemory::grow`]
//! extends the committed (`PROT_READ | PROT_WRITE`) prefix one page at a
//! time. Everything past the committed prefix, up to the 4GiB reservation
//! ceiling, is left `PROT_NONE` and doubles as the guard region: a guest
//! access past the end of its memory always faults rather than reading
//! adjacent heap data.

use crate::fault_registry;
use crate::pages::{PageError, WasmPage, MAX_PAGES, PAGE_SIZE};
use wvm_errors::MemoryError;

/// Guard-paged linear memory for a single guest instance.
pub struct LinearMemory {
    base: *mut u8,
    pages: u32,
    max_pages: u32,
}

// SAFETY: `LinearMemory` owns its mapping exclusively; sharing the raw
// pointer across threads is only as unsafe as the caller's own access
// discipline, same as `Vec<u8>` crossing a thread boundary.
unsafe impl Send for LinearMemory {}

impl LinearMemory {
    /// Reserves a 4GiB address span and commits `initial_pages` of it
    /// read-write.
    pub fn new(initial_pages: u32, max_pages: u32) -> Result<Self, MemoryError> {
        let max_pages = max_pages.min(MAX_PAGES);
        if initial_pages > max_pages {
            return Err(MemoryError::BadAlloc);
        }

        let reservation = MAX_PAGES as usize * PAGE_SIZE;
        // SAFETY: fixed-size anonymous mapping; the address is chosen by
        // the kernel so it cannot alias any existing allocation.
        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                reservation,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::BadAlloc);
        }
        let base = base as *mut u8;

        if initial_pages > 0 {
            // SAFETY: `initial_pages <= max_pages <= MAX_PAGES`, all of
            // which lies inside the reservation made above.
            let rc = unsafe {
                libc::mprotect(
                    base as *mut _,
                    initial_pages as usize * PAGE_SIZE,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if rc == -1 {
                unsafe { libc::munmap(base as *mut _, reservation) };
                return Err(MemoryError::BadAlloc);
            }
        }

        fault_registry::register(base, reservation);
        log::debug!("wvm-core: reserved {reservation} bytes, committed {initial_pages} page(s)");

        Ok(Self {
            base,
            pages: initial_pages,
            max_pages,
        })
    }

    /// Commits `additional` more pages read-write, returning the page
    /// count before the grow.
    pub fn grow(&mut self, additional: u32) -> Result<WasmPage, MemoryError> {
        let previous = self.pages;
        let new_total = previous
            .checked_add(additional)
            .ok_or(MemoryError::BadAlloc)?;
        if new_total > self.max_pages {
            return Err(MemoryError::BadAlloc);
        }

        // SAFETY: `new_total <= self.max_pages <= MAX_PAGES`, which is
        // within the reservation made in `new`.
        let rc = unsafe {
            libc::mprotect(
                self.base.add(previous as usize * PAGE_SIZE) as *mut _,
                additional as usize * PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc == -1 {
            return Err(MemoryError::BadAlloc);
        }

        self.pages = new_total;
        log::debug!("wvm-core: grew linear memory from {previous} to {new_total} page(s)");
        WasmPage::new(previous).map_err(|_: PageError| MemoryError::BadAlloc)
    }

    /// Number of pages currently committed read-write.
    pub fn size_pages(&self) -> u32 {
        self.pages
    }

    /// Zeroes the committed region, decommits everything past the first
    /// page, and returns the memory to its just-constructed state: one
    /// zeroed, read-write page.
    ///
    /// Mirrors `wasm_allocator::reset` in the original eos-vm allocator:
    /// callers reuse one `LinearMemory` across repeated invocations of the
    /// same module instance rather than re-reserving the mapping each time.
    pub fn reset(&mut self) {
        let committed = self.pages as usize * PAGE_SIZE;
        // SAFETY: `committed` bytes starting at `self.base` are exactly the
        // region `new`/`grow` have mprotect'd read-write so far.
        unsafe {
            core::ptr::write_bytes(self.base, 0, committed);
            libc::mprotect(self.base as *mut _, committed, libc::PROT_NONE);
            libc::mprotect(self.base as *mut _, PAGE_SIZE, libc::PROT_READ | libc::PROT_WRITE);
        }
        self.pages = 1;
        log::debug!("wvm-core: reset linear memory to 1 zeroed page");
    }

    /// Byte length of the committed region.
    pub fn data_size(&self) -> usize {
        self.pages as usize * PAGE_SIZE
    }

    /// Base pointer of the committed region, in this process's address
    /// space.
    pub fn data_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Copies `buffer.len()` bytes out of the committed region starting at
    /// `offset`.
    ///
    /// Accesses past the committed prefix are not bounds-checked here by
    /// design: they are expected to fault through the guard pages and be
    /// caught by [`fault_registry::run_guarded`] around the calling
    /// invocation.
    pub fn read(&self, offset: usize, buffer: &mut [u8]) {
        // SAFETY: relies on the guard-page fault handler to turn an
        // out-of-bounds `offset` into a recoverable trap rather than UB;
        // within bounds this is an ordinary slice copy.
        unsafe {
            core::ptr::copy_nonoverlapping(self.base.add(offset), buffer.as_mut_ptr(), buffer.len());
        }
    }

    /// Copies `buffer` into the committed region starting at `offset`.
    ///
    /// Same guard-page caveat as [`Self::read`].
    pub fn write(&self, offset: usize, buffer: &[u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(buffer.as_ptr(), self.base.add(offset), buffer.len());
        }
    }
}

impl Drop for LinearMemory {
    fn drop(&mut self) {
        fault_registry::unregister(self.base);
        // SAFETY: `self.base` is exactly the reservation made in `new`,
        // sized `MAX_PAGES * PAGE_SIZE`.
        unsafe {
            libc::munmap(self.base as *mut _, MAX_PAGES as usize * PAGE_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_commits_exactly_the_requested_pages() {
        let mem = LinearMemory::new(2, 10).unwrap();
        assert_eq!(mem.size_pages(), 2);
        assert_eq!(mem.data_size(), 2 * PAGE_SIZE);
    }

    #[test]
    fn reset_zeroes_memory_and_returns_to_one_page() {
        let mut mem = LinearMemory::new(1, 4).unwrap();
        mem.grow(2).unwrap();
        mem.write(0, &[0xAB; 4]);
        mem.reset();
        assert_eq!(mem.size_pages(), 1);
        let mut out = [0u8; 4];
        mem.read(0, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn grow_beyond_max_pages_is_rejected() {
        let mut mem = LinearMemory::new(1, 2).unwrap();
        assert!(mem.grow(1).is_ok());
        assert!(matches!(mem.grow(1), Err(MemoryError::BadAlloc)));
    }

    #[test]
    fn write_then_read_round_trips_within_committed_pages() {
        let mem = LinearMemory::new(1, 1).unwrap();
        mem.write(0, &[1, 2, 3, 4]);
        let mut out = [0u8; 4];
        mem.read(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_bounds_write_traps_instead_of_corrupting_memory() {
        let mem = LinearMemory::new(1, 1).unwrap();
        let offset = mem.data_size();
        let result = fault_registry::run_guarded(std::panic::AssertUnwindSafe(|| {
            mem.write(offset, &[0xffu8]);
        }));
        assert!(result.is_err());
    }
}
