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

//! Scratch-memory arenas backing interpreter bookkeeping (call stacks,
//! host-side scratch buffers). These are deliberately simple bump
//! allocators; the guest's own linear memory is managed separately by
//! [`crate::linear_memory::LinearMemory`], which layers guard pages on top
//! of the same virtual-memory primitives.

use core::ptr::NonNull;
use wvm_errors::MemoryError;

/// Fixed-capacity bump allocator backed by a single heap buffer.
///
/// `alloc` always returns fresh space from the end of what has already been
/// handed out; there is no reuse of freed space within the lifetime of the
/// arena. `free` only tracks a live-allocation count so that redundant
/// frees are rejected rather than silently accepted.
pub struct BoundedArena {
    buf: Box<[u8]>,
    index: usize,
    live: usize,
}

impl BoundedArena {
    /// Byte alignment every allocation is rounded up to, same as
    /// [`GrowableArena::ALIGN`].
    pub const ALIGN: usize = 16;

    /// Creates a new arena with exactly `size` bytes of backing storage.
    pub fn init(size: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            buf: vec![0u8; size].into_boxed_slice(),
            index: 0,
            live: 0,
        })
    }

    fn align_offset(offset: usize) -> usize {
        (offset + Self::ALIGN - 1) & !(Self::ALIGN - 1)
    }

    /// Bumps the allocator by `size` bytes, rounded up to a 16-byte
    /// boundary, and returns a pointer to the start of the new region.
    ///
    /// Fails with [`MemoryError::BadAlloc`] if the arena has no room left;
    /// the arena's cursor and live count are left unchanged on failure.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        let aligned_size = Self::align_offset(size);
        let end = self.index.checked_add(aligned_size).ok_or(MemoryError::BadAlloc)?;
        if end > self.buf.len() {
            return Err(MemoryError::BadAlloc);
        }
        // SAFETY: `self.index` is always within `self.buf`'s bounds.
        let ptr = unsafe { self.buf.as_mut_ptr().add(self.index) };
        self.index = end;
        self.live += 1;
        Ok(NonNull::new(ptr).expect("boxed slice pointer is never null"))
    }

    /// Releases one outstanding allocation.
    ///
    /// This arena does not track individual allocation boundaries, only a
    /// live count: a `free` call with nothing outstanding is rejected as a
    /// double free.
    pub fn free(&mut self) -> Result<(), MemoryError> {
        if self.live == 0 {
            return Err(MemoryError::DoubleFree);
        }
        self.live -= 1;
        Ok(())
    }

    /// Rewinds the arena to empty, as if freshly constructed.
    pub fn reset(&mut self) {
        self.index = 0;
        self.live = 0;
    }

    /// Base address of the backing buffer.
    pub fn base_address(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    /// Capacity in bytes.
    pub fn max_size(&self) -> usize {
        self.buf.len()
    }
}

/// Virtual-memory-reservation allocator that commits pages incrementally.
///
/// A large span of address space is reserved up front with `PROT_NONE` and
/// never moves; `alloc` commits additional `chunk_size`-sized slices as the
/// bump cursor advances past what is already readable/writable. `free` is
/// intentionally unimplemented: there is no mechanism (nor any caller in
/// this engine) that gives back a growable-arena allocation before the
/// whole arena is reset or dropped.
pub struct GrowableArena {
    base: *mut u8,
    reserved: usize,
    committed: usize,
    offset: usize,
}

impl GrowableArena {
    /// Default virtual-address reservation: 1GiB.
    pub const MAX_MEMORY_SIZE: usize = 1024 * 1024 * 1024;
    /// Granularity at which additional pages are committed.
    pub const CHUNK_SIZE: usize = 128 * 1024;
    /// Byte alignment every allocation is rounded up to.
    pub const ALIGN: usize = 16;

    fn align_offset(offset: usize) -> usize {
        (offset + Self::ALIGN - 1) & !(Self::ALIGN - 1)
    }

    /// Reserves the arena's full virtual span and eagerly commits enough
    /// chunks to cover `initial_size` bytes.
    pub fn init(initial_size: usize) -> Result<Self, MemoryError> {
        // SAFETY: fixed-size anonymous, non-executable mapping; no aliasing
        // with any other allocation since the address is chosen by the OS.
        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                Self::MAX_MEMORY_SIZE,
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

        let mut committed = 0;
        if initial_size != 0 {
            let chunks = initial_size / Self::CHUNK_SIZE + 1;
            committed = chunks * Self::CHUNK_SIZE;
            // SAFETY: `committed` never exceeds `Self::MAX_MEMORY_SIZE` for
            // any `initial_size` a caller would plausibly request; callers
            // asking for more than the reservation get `BadAlloc` from the
            // first `alloc` call instead of from `init`.
            let rc = unsafe { libc::mprotect(base as *mut _, committed, libc::PROT_READ | libc::PROT_WRITE) };
            if rc == -1 {
                unsafe { libc::munmap(base as *mut _, Self::MAX_MEMORY_SIZE) };
                return Err(MemoryError::BadAlloc);
            }
        }

        Ok(Self {
            base,
            reserved: Self::MAX_MEMORY_SIZE,
            committed,
            offset: 0,
        })
    }

    /// Bumps the allocator by `size` bytes, committing more of the
    /// reservation if the cursor has outgrown what is already mapped
    /// read-write.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        let aligned = Self::align_offset(self.offset + size);
        if aligned >= self.committed {
            if aligned > self.reserved {
                return Err(MemoryError::BadAlloc);
            }
            let chunks_to_alloc = aligned / Self::CHUNK_SIZE + 1;
            let new_committed = (chunks_to_alloc * Self::CHUNK_SIZE).min(self.reserved);
            let grow_by = new_committed - self.committed;
            if grow_by > 0 {
                // SAFETY: `self.committed + grow_by <= self.reserved`, which
                // was reserved by `init`.
                let rc = unsafe {
                    libc::mprotect(
                        self.base.add(self.committed) as *mut _,
                        grow_by,
                        libc::PROT_READ | libc::PROT_WRITE,
                    )
                };
                if rc == -1 {
                    return Err(MemoryError::BadAlloc);
                }
                self.committed = new_committed;
                log::debug!("wvm-core: growable arena committed up to {new_committed} bytes");
            }
        }

        // SAFETY: `self.offset` is always within `self.committed`.
        let ptr = unsafe { self.base.add(self.offset) };
        self.offset = aligned;
        Ok(NonNull::new(ptr).expect("mmap base is never null after the MAP_FAILED check"))
    }

    /// Always fails: growable arenas cannot give back individual
    /// allocations.
    pub fn free(&mut self) -> Result<(), wvm_errors::SystemError> {
        Err(wvm_errors::SystemError::Unimplemented)
    }

    /// Rewinds the bump cursor to zero without decommitting any pages.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Base address of the reservation.
    pub fn base_address(&self) -> *const u8 {
        self.base
    }
}

impl Drop for GrowableArena {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`self.reserved` are exactly the mapping made
        // by `init` and never reassigned afterwards.
        unsafe {
            libc::munmap(self.base as *mut _, self.reserved);
        }
    }
}

// A `GrowableArena` owns its mapping exclusively and never hands out
// interior mutability to other threads; it is safe to move across threads
// the same way a `Box<[u8]>` would be.
unsafe impl Send for GrowableArena {}
