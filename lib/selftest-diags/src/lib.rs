// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Portable reference diagnostics.
//!
//! These implement [`selftest_api::Diagnostic`] over abstract memory, so the
//! same code runs against a real RAM bank on the target and against a
//! simulated one on the host. Each keeps the state it needs to resume
//! between steps in complement-checked storage owned by the caller; a
//! corrupted cursor is reported as [`selftest_api::Defect::Integrity`]
//! rather than being trusted.

#![cfg_attr(not(test), no_std)]

mod image;
mod ram;
mod storage;

pub use image::{image_crc, ImageCursor, ProgramImageTest};
pub use ram::{RamPatternTest, RegionCursor};
pub use storage::SafeStorageTest;

/// Word-addressable memory under test.
pub trait WordRegion {
    /// Number of words in the region.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads word `index`. Panics if `index` is out of range.
    fn read(&self, index: usize) -> u32;

    /// Writes word `index`. Panics if `index` is out of range.
    fn write(&mut self, index: usize, value: u32);
}

impl WordRegion for [u32] {
    fn len(&self) -> usize {
        <[u32]>::len(self)
    }

    fn read(&self, index: usize) -> u32 {
        let word: *const u32 = &self[index];
        // Safety: `word` was just derived from a valid reference.
        unsafe { core::ptr::read_volatile(word) }
    }

    fn write(&mut self, index: usize, value: u32) {
        let word: *mut u32 = &mut self[index];
        // Safety: `word` was just derived from a valid, unique reference.
        unsafe { core::ptr::write_volatile(word, value) }
    }
}
