// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use complement_store::CheckedGroup;
use selftest_api::{
    Defect, Diagnostic, Schedule, StepControl, StepResult, TestKind,
};

/// Audits a fixed list of complement-checked groups, one group per step.
pub struct SafeStorageTest<'a, const G: usize> {
    schedule: Schedule,
    groups: [&'a dyn CheckedGroup; G],
    next: usize,
    corrupt: Option<(&'static str, &'static str)>,
}

impl<'a, const G: usize> SafeStorageTest<'a, G> {
    pub fn new(schedule: Schedule, groups: [&'a dyn CheckedGroup; G]) -> Self {
        Self {
            schedule,
            groups,
            next: 0,
            corrupt: None,
        }
    }

    /// Group and field names of the corruption found, if any.
    pub fn corrupt(&self) -> Option<(&'static str, &'static str)> {
        self.corrupt
    }
}

impl<const G: usize> Diagnostic for SafeStorageTest<'_, G> {
    fn kind(&self) -> TestKind {
        TestKind::SafeStorage
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn run_step(
        &mut self,
        _now_us: u32,
        _ctl: &mut StepControl<'_>,
    ) -> StepResult {
        if self.is_step_complete() {
            self.configure_for_next_cycle();
        }
        let Some(group) = self.groups.get(self.next) else {
            return StepResult::LoopComplete;
        };
        if let Some(field) = group.first_corrupt() {
            self.corrupt = Some((group.group_name(), field));
            return StepResult::Failure(Defect::Integrity);
        }
        self.next += 1;
        if self.is_step_complete() {
            StepResult::LoopComplete
        } else {
            StepResult::InProgress
        }
    }

    fn is_step_complete(&self) -> bool {
        self.next >= G
    }

    fn configure_for_next_cycle(&mut self) {
        self.next = 0;
    }
}
