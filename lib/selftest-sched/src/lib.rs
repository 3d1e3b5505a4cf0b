// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative self-test scheduler.
//!
//! The control loop calls [`SchedulerContext::run_slice`] once per cycle.
//! Each call is one *slice*: at most one step of one diagnostic runs in it,
//! so the worst-case cost a slice adds to the control loop is the worst-case
//! cost of a single step.
//!
//! Priority is registration order. When several diagnostics are due in the
//! same slice, the first one runs and every later one that was due is pushed
//! back by exactly one slice. Each of them keeps its average period and just
//! runs a slice late this once.
//!
//! On a coarser cadence the scheduler also runs the completion watchdog (see
//! the `watchdog` module), which fails the system if any diagnostic has gone
//! longer than its timeout without finishing a pass.
//!
//! Any failure is terminal. The context latches the first [`Fault`] it sees
//! and returns it from every later call without touching its state again;
//! what happens next is up to the platform's fatal handler.

#![cfg_attr(not(test), no_std)]

mod descriptor;
#[cfg(test)]
mod fake;
mod watchdog;

pub use descriptor::{Descriptor, Snapshot};

use complement_store::{Checked, Corrupted};
use selftest_api::{
    Clock, Diagnostic, Fault, Slice, StepControl, StepResult, TestKind,
};

/// What happened in one slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SliceReport {
    pub slice: Slice,
    /// The completion watchdog ran (and passed) in this slice.
    pub checked: bool,
    pub ran: Option<Ran>,
}

/// The step that ran in a slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ran {
    pub index: u8,
    pub kind: TestKind,
    /// Never `Failure`; failures come back as `Err`.
    pub result: StepResult,
    pub duration_us: u32,
    /// Number of lower-priority diagnostics pushed back a slice.
    pub bumped: u8,
}

struct Slot<'a> {
    desc: Descriptor,
    test: &'a mut dyn Diagnostic,
}

/// The scheduler and its registry of `N` diagnostics.
pub struct SchedulerContext<'a, const N: usize> {
    slice: Checked<Slice>,
    last_check_slice: Checked<Slice>,
    check_interval: Slice,
    fault: Option<Fault>,
    slots: [Slot<'a>; N],
}

fn integrity(index: usize, kind: TestKind) -> impl Fn(Corrupted) -> Fault {
    move |_| Fault::Integrity {
        index: index as u8,
        kind,
    }
}

fn scheduler_state(_: Corrupted) -> Fault {
    Fault::SchedulerState
}

impl<'a, const N: usize> SchedulerContext<'a, N> {
    // Registry indices travel in faults as a `u8`.
    const REGISTRY_FITS: () = assert!(N <= u8::MAX as usize);

    /// Registers `tests`, highest priority first, starting at slice zero.
    /// The completion watchdog runs every `check_interval` slices.
    pub fn new(
        tests: [&'a mut dyn Diagnostic; N],
        check_interval: Slice,
    ) -> Self {
        Self::starting_at(0, tests, check_interval)
    }

    /// As [`SchedulerContext::new`], with the slice counter starting at
    /// `start`.
    pub fn starting_at(
        start: Slice,
        tests: [&'a mut dyn Diagnostic; N],
        check_interval: Slice,
    ) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::REGISTRY_FITS;

        Self {
            slice: Checked::new(start),
            last_check_slice: Checked::new(start),
            check_interval,
            fault: None,
            slots: tests.map(|test| Slot {
                desc: Descriptor::new(test.kind(), test.schedule(), start),
                test,
            }),
        }
    }

    /// The slice the next call to `run_slice` will execute, as stored.
    pub fn slice(&self) -> Slice {
        self.slice.raw().0
    }

    /// The latched fault, if the scheduler has stopped.
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    pub fn descriptor(&self, index: usize) -> Option<&Descriptor> {
        self.slots.get(index).map(|s| &s.desc)
    }

    /// Descriptors in priority order.
    pub fn descriptors(
        &self,
    ) -> impl Iterator<Item = &Descriptor> + use<'_, 'a, N> {
        self.slots.iter().map(|s| &s.desc)
    }

    /// Executes one slice.
    ///
    /// Once this has returned an error it returns the same error forever,
    /// and neither the scheduler's state nor any diagnostic is touched.
    pub fn run_slice(
        &mut self,
        clock: &impl Clock,
    ) -> Result<SliceReport, Fault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        self.execute(clock).map_err(|fault| {
            self.fault = Some(fault);
            fault
        })
    }

    fn execute(&mut self, clock: &impl Clock) -> Result<SliceReport, Fault> {
        let slice = self.slice.get().map_err(scheduler_state)?;
        let last_check = self.last_check_slice.get().map_err(scheduler_state)?;

        let checked = slice.wrapping_sub(last_check) >= self.check_interval;
        if checked {
            self.last_check_slice.store(slice);
            self.check_completions()?;
        }

        let mut due = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let trigger = slot
                .desc
                .trigger()
                .map_err(integrity(index, slot.desc.kind()))?;
            if trigger == slice {
                due = Some(index);
                break;
            }
        }
        let Some(index) = due else {
            self.slice.store(slice.wrapping_add(1));
            return Ok(SliceReport {
                slice,
                checked,
                ran: None,
            });
        };

        let Slot { desc, test } = &mut self.slots[index];
        let kind = desc.kind();

        // Reschedule before the step runs, so that a diagnostic adjusting its
        // own trigger from inside the step has the last word.
        desc.advance().map_err(integrity(index, kind))?;

        let start = clock.now_us();
        let result = {
            let mut ctl = StepControl::new(slice, &desc.timing.trigger);
            test.run_step(start, &mut ctl)
        };
        desc.duration_us = clock.now_us().wrapping_sub(start);
        desc.runs = desc.runs.wrapping_add(1);
        let duration_us = desc.duration_us;

        match result {
            StepResult::LoopComplete => desc
                .record_completion(slice)
                .map_err(integrity(index, kind))?,
            StepResult::InProgress => (),
            StepResult::Failure(defect) => {
                return Err(Fault::from_failure(index as u8, kind, defect));
            }
        }

        let mut bumped = 0;
        for (later, slot) in self.slots.iter().enumerate().skip(index + 1) {
            let trigger = slot
                .desc
                .trigger()
                .map_err(integrity(later, slot.desc.kind()))?;
            if trigger == slice {
                slot.desc.bump(slice);
                bumped += 1;
            }
        }

        self.slice.store(slice.wrapping_add(1));

        Ok(SliceReport {
            slice,
            checked,
            ran: Some(Ran {
                index: index as u8,
                kind,
                result,
                duration_us,
                bumped,
            }),
        })
    }
}
