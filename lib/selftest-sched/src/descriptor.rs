// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use complement_store::{checked_group, CheckedGroup, Corrupted};
use selftest_api::{Schedule, Slice, TestKind};

checked_group! {
    /// The fields the scheduler acts on. A flipped bit in any of these could
    /// make a diagnostic run late or never, so they are complement-checked.
    #[derive(Debug)]
    pub(crate) struct Timing {
        /// Next slice at which the diagnostic is due.
        pub trigger: Slice,
        pub step: Slice,
        pub timeout: Slice,
        /// Slice of the most recent `LoopComplete`, or the scheduler's
        /// starting slice if there has been none yet.
        pub last_complete: Slice,
    }
}

/// Scheduling bookkeeping for one registered diagnostic.
///
/// The scheduler owns these; everyone else gets shared references, and
/// reads them through [`Descriptor::snapshot`].
#[derive(Debug)]
pub struct Descriptor {
    kind: TestKind,
    pub(crate) timing: Timing,
    max_observed_slices: Slice,
    has_completed_once: bool,
    pub(crate) duration_us: u32,
    pub(crate) runs: u32,
    completions: u32,
}

/// Plain copy of a [`Descriptor`], as stored.
///
/// The checked fields are copied without being checked; `intact` says
/// whether they were all consistent at the time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    pub kind: TestKind,
    pub trigger_slice: Slice,
    pub step_slices: Slice,
    pub timeout_slices: Slice,
    pub last_complete_slice: Slice,
    /// Largest gap seen between two completions. Telemetry only.
    pub max_observed_slices: Slice,
    pub has_completed_once: bool,
    /// Wall time of the most recent step.
    pub duration_us: u32,
    pub runs: u32,
    pub completions: u32,
    pub intact: bool,
}

impl Descriptor {
    pub(crate) fn new(kind: TestKind, schedule: Schedule, start: Slice) -> Self {
        Self {
            kind,
            timing: Timing::new(
                start.wrapping_add(schedule.first_trigger),
                schedule.step_slices,
                schedule.timeout_slices,
                start,
            ),
            max_observed_slices: 0,
            has_completed_once: false,
            duration_us: 0,
            runs: 0,
            completions: 0,
        }
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    /// Whether every checked field still matches its complement.
    pub fn is_intact(&self) -> bool {
        self.timing.validate()
    }

    pub fn snapshot(&self) -> Snapshot {
        let t = &self.timing;
        Snapshot {
            kind: self.kind,
            trigger_slice: t.trigger.raw().0,
            step_slices: t.step.raw().0,
            timeout_slices: t.timeout.raw().0,
            last_complete_slice: t.last_complete.raw().0,
            max_observed_slices: self.max_observed_slices,
            has_completed_once: self.has_completed_once,
            duration_us: self.duration_us,
            runs: self.runs,
            completions: self.completions,
            intact: self.is_intact(),
        }
    }

    pub fn slices_since_completion(
        &self,
        slice: Slice,
    ) -> Result<Slice, Corrupted> {
        Ok(slice.wrapping_sub(self.timing.last_complete.get()?))
    }

    pub fn is_overdue(&self, slice: Slice) -> Result<bool, Corrupted> {
        Ok(self.slices_since_completion(slice)? > self.timing.timeout.get()?)
    }

    pub(crate) fn trigger(&self) -> Result<Slice, Corrupted> {
        self.timing.trigger.get()
    }

    /// Moves the trigger on by one period.
    pub(crate) fn advance(&self) -> Result<(), Corrupted> {
        let next = self.trigger()?.wrapping_add(self.timing.step.get()?);
        self.timing.trigger.store(next);
        Ok(())
    }

    /// Defers a diagnostic that lost `slice` to a higher-priority one.
    pub(crate) fn bump(&self, slice: Slice) {
        self.timing.trigger.store(slice.wrapping_add(1));
    }

    pub(crate) fn record_completion(
        &mut self,
        slice: Slice,
    ) -> Result<(), Corrupted> {
        let since = self.slices_since_completion(slice)?;
        // The first completion has nothing meaningful to measure against:
        // the gap back to start-up includes the initial trigger offset.
        if self.has_completed_once && since > self.max_observed_slices {
            self.max_observed_slices = since;
        }
        self.has_completed_once = true;
        self.timing.last_complete.store(slice);
        self.completions = self.completions.wrapping_add(1);
        Ok(())
    }
}
