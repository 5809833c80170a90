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

//! Page-granular addressing for linear memory.

use core::num::NonZeroU32;

/// A WebAssembly page has a constant size of 64KiB.
pub const PAGE_SIZE: usize = 0x10000;

/// Hard ceiling on the number of pages a single linear memory may ever grow
/// to: exactly 4GiB of address space divided into 64KiB pages. The last
/// valid page *number* is `MAX_PAGES - 1`; `MAX_PAGES` itself is a page
/// count, not an addressable page index.
pub const MAX_PAGES: u32 = 0x1_0000;

static_assertions::const_assert!(PAGE_SIZE < u32::MAX as usize);
static_assertions::const_assert_ne!(PAGE_SIZE, 0);

/// Errors when doing checked arithmetic on [`WasmPage`] numbers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, derive_more::Error)]
pub enum PageError {
    /// Addition overflowed a `u32` page count.
    #[display("{_0} + {_1} overflows u32")]
    AddOverflow(u32, u32),
    /// Subtraction underflowed a `u32` page count.
    #[display("{_0} - {_1} underflows u32")]
    SubOverflow(u32, u32),
    /// The page number would address a byte beyond `u32::MAX`.
    #[display("page {_0} is too big to address with a {_1}-byte page size")]
    OutOfRange(u32, u32),
}

/// A single 64KiB page number within a linear memory.
///
/// All arithmetic on `WasmPage` is checked: a page number can never be
/// constructed such that `page.offset() + PAGE_SIZE - 1` overflows `u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WasmPage(u32);

impl WasmPage {
    /// The size of a page, as a `NonZeroU32`.
    pub fn size_non_zero() -> NonZeroU32 {
        // SAFETY: checked above by `const_assert_ne!`.
        unsafe { NonZeroU32::new_unchecked(PAGE_SIZE as u32) }
    }

    /// Builds a page number, rejecting numbers whose last byte would
    /// overflow `u32`.
    pub fn new(num: u32) -> Result<Self, PageError> {
        let page_begin = num
            .checked_mul(PAGE_SIZE as u32)
            .ok_or(PageError::OutOfRange(num, PAGE_SIZE as u32))?;
        page_begin
            .checked_add(PAGE_SIZE as u32 - 1)
            .ok_or(PageError::OutOfRange(num, PAGE_SIZE as u32))?;
        Ok(Self(num))
    }

    /// The zero page.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Raw page number.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Byte offset of this page's first byte.
    pub fn offset(&self) -> u32 {
        self.0 * PAGE_SIZE as u32
    }

    /// Byte offset of this page's last byte.
    pub fn end_offset(&self) -> u32 {
        self.offset() + (PAGE_SIZE as u32 - 1)
    }

    /// `self + other`, checked.
    pub fn add(&self, other: u32) -> Result<Self, PageError> {
        self.0
            .checked_add(other)
            .map(Self::new)
            .ok_or(PageError::AddOverflow(self.0, other))?
    }

    /// `self - other`, checked.
    pub fn sub(&self, other: u32) -> Result<Self, PageError> {
        self.0
            .checked_sub(other)
            .map(Self::new)
            .ok_or(PageError::SubOverflow(self.0, other))?
    }
}

impl From<WasmPage> for u32 {
    fn from(value: WasmPage) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets_are_page_size_apart() {
        let p0 = WasmPage::zero();
        let p1 = p0.add(1).unwrap();
        assert_eq!(p1.offset() - p0.offset(), PAGE_SIZE as u32);
    }

    #[test]
    fn new_rejects_pages_that_would_overflow_u32() {
        let too_far = u32::MAX / PAGE_SIZE as u32 + 1;
        assert!(WasmPage::new(too_far).is_err());
    }

    #[test]
    fn sub_underflow_is_an_error_not_a_panic() {
        assert!(matches!(
            WasmPage::zero().sub(1),
            Err(PageError::SubOverflow(0, 1))
        ));
    }
}
