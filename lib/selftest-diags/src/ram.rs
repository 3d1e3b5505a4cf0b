// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-destructive RAM pattern test.

use complement_store::{checked_group, CheckedGroup};
use irq_guard::masked;
use selftest_api::{
    Defect, Diagnostic, Schedule, Slice, StepControl, StepResult, TestKind,
};

use crate::WordRegion;

checked_group! {
    /// Bounds and progress of a RAM pattern test, in words.
    pub struct RegionCursor {
        pub start: usize,
        pub end: usize,
        /// Next word to test.
        pub cursor: usize,
    }
}

impl RegionCursor {
    /// Covers words `start..end`, beginning at `start`.
    pub fn span(start: usize, end: usize) -> Self {
        Self::new(start, end, start)
    }
}

const PATTERNS: [u32; 4] =
    [0x0000_0000, 0xffff_ffff, 0x5555_5555, 0xaaaa_aaaa];

/// A pattern that differs for every word, so that a word answering for its
/// neighbour does not pass.
fn address_pattern(index: usize) -> u32 {
    (index as u32).wrapping_mul(0x0101_0101) ^ 0xa5a5_a5a5
}

/// Walks a region a chunk at a time, checking that every word can hold each
/// of a set of patterns, and putting the original contents back.
///
/// A step touches at most `chunk_words` words, with interrupts masked only
/// for the few accesses to one word at a time.
pub struct RamPatternTest<'a, R: WordRegion + ?Sized> {
    kind: TestKind,
    schedule: Schedule,
    region: &'a mut R,
    cursor: &'a RegionCursor,
    chunk_words: usize,
    rest_slices: Slice,
}

impl<'a, R: WordRegion + ?Sized> RamPatternTest<'a, R> {
    /// `rest_slices` is the pause between the end of one pass and the start
    /// of the next; zero keeps the normal step interval.
    pub fn new(
        kind: TestKind,
        schedule: Schedule,
        region: &'a mut R,
        cursor: &'a RegionCursor,
        chunk_words: usize,
        rest_slices: Slice,
    ) -> Self {
        assert!(chunk_words != 0);
        Self {
            kind,
            schedule,
            region,
            cursor,
            chunk_words,
            rest_slices,
        }
    }

    /// Reads the cursor group, rejecting it if any half is disturbed or the
    /// values are inconsistent with the region.
    fn bounds(&self) -> Option<(usize, usize, usize)> {
        let start = self.cursor.start.get().ok()?;
        let end = self.cursor.end.get().ok()?;
        let cursor = self.cursor.cursor.get().ok()?;
        let sane = start <= cursor && cursor <= end && end <= self.region.len();
        sane.then_some((start, end, cursor))
    }

    /// Whether the cursor group is intact.
    pub fn cursor_intact(&self) -> bool {
        self.cursor.validate()
    }

    fn word_holds_patterns(&mut self, index: usize) -> bool {
        let region = &mut *self.region;
        masked(|| {
            let saved = region.read(index);
            let holds = PATTERNS
                .into_iter()
                .chain([address_pattern(index)])
                .all(|p| {
                    region.write(index, p);
                    region.read(index) == p
                });
            region.write(index, saved);
            holds
        })
    }
}

impl<R: WordRegion + ?Sized> Diagnostic for RamPatternTest<'_, R> {
    fn kind(&self) -> TestKind {
        self.kind
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn run_step(
        &mut self,
        _now_us: u32,
        ctl: &mut StepControl<'_>,
    ) -> StepResult {
        let Some((start, end, mut cursor)) = self.bounds() else {
            return StepResult::Failure(Defect::Integrity);
        };
        if cursor == end {
            self.configure_for_next_cycle();
            cursor = start;
        }

        let stop = end.min(cursor.saturating_add(self.chunk_words));
        for index in cursor..stop {
            if !self.word_holds_patterns(index) {
                return StepResult::Failure(Defect::PatternMismatch);
            }
        }
        self.cursor.cursor.store(stop);

        if stop < end {
            return StepResult::InProgress;
        }
        if self.rest_slices != 0 {
            ctl.reschedule_in(self.rest_slices);
        }
        StepResult::LoopComplete
    }

    fn is_step_complete(&self) -> bool {
        matches!(self.bounds(), Some((_, end, cursor)) if cursor == end)
    }

    fn configure_for_next_cycle(&mut self) {
        // Corruption is left in place for the next step to report.
        if let Some((start, _, _)) = self.bounds() {
            self.cursor.cursor.store(start);
        }
    }
}
