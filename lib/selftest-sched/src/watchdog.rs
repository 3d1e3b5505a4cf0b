// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Completion watchdog.
//!
//! The scheduler will happily keep calling a diagnostic that never finishes
//! a pass, or keep bumping one that never gets a slice at all. This is the
//! backstop for both: every diagnostic must report `LoopComplete` at least
//! once per `timeout_slices`.

use complement_store::Corrupted;
use selftest_api::Fault;

use crate::{integrity, scheduler_state, SchedulerContext};

impl<const N: usize> SchedulerContext<'_, N> {
    /// Checks every registered diagnostic against its completion deadline
    /// at the current slice, reporting the highest-priority offender.
    ///
    /// This also audits each descriptor's checked fields, including those
    /// of diagnostics that are not due for a while.
    pub fn check_completions(&self) -> Result<(), Fault> {
        let slice = self.slice.get().map_err(scheduler_state)?;
        for (index, desc) in self.descriptors().enumerate() {
            let kind = desc.kind();
            if !desc.is_intact() {
                return Err(integrity(index, kind)(Corrupted));
            }
            if desc.is_overdue(slice).map_err(integrity(index, kind))? {
                return Err(Fault::Timeout {
                    index: index as u8,
                    kind,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::fake::{Fake, Plan, TickClock};
    use crate::SchedulerContext;
    use selftest_api::{Fault, Schedule, StepResult, TestKind};

    #[test]
    fn deadline_is_inclusive() {
        let clock = TickClock::default();
        let mut stuck = Fake::new(
            TestKind::CpuRegisters,
            Schedule::new(0, 1, 10),
            Plan::Always(StepResult::InProgress),
        );
        let mut ctx = SchedulerContext::new([&mut stuck], 1);

        // Slices 0 through 10: at most 10 slices since start-up.
        for _ in 0..=10 {
            ctx.run_slice(&clock).unwrap();
        }
        assert_eq!(
            ctx.run_slice(&clock),
            Err(Fault::Timeout {
                index: 0,
                kind: TestKind::CpuRegisters
            })
        );
        assert_eq!(ctx.slice(), 11);
    }

    #[test]
    fn only_checked_on_its_own_cadence() {
        let clock = TickClock::default();
        let mut stuck = Fake::new(
            TestKind::Dma,
            Schedule::new(0, 1, 2),
            Plan::Always(StepResult::InProgress),
        );
        let mut ctx = SchedulerContext::new([&mut stuck], 5);

        // Overdue from slice 3 on, but nobody looks until slice 5.
        for _ in 0..5 {
            let report = ctx.run_slice(&clock).unwrap();
            assert!(!report.checked);
        }
        assert!(ctx.check_completions().is_err());
        assert_eq!(
            ctx.run_slice(&clock),
            Err(Fault::Timeout {
                index: 0,
                kind: TestKind::Dma
            })
        );
    }

    #[test]
    fn completions_keep_it_quiet() {
        let clock = TickClock::default();
        let mut ok = Fake::new(
            TestKind::DataRam,
            Schedule::new(0, 3, 3),
            Plan::Always(StepResult::LoopComplete),
        );
        let mut ctx = SchedulerContext::new([&mut ok], 1);

        for _ in 0..100 {
            ctx.run_slice(&clock).unwrap();
        }
        let desc = ctx.descriptor(0).unwrap().snapshot();
        assert_eq!(desc.max_observed_slices, 3);
        assert_eq!(desc.completions, 34);
    }

    #[test]
    fn reports_first_offender_once() {
        let clock = TickClock::default();
        let mut a = Fake::new(
            TestKind::DataRam,
            Schedule::new(0, 2, 4),
            Plan::Always(StepResult::InProgress),
        );
        let mut b = Fake::new(
            TestKind::StackRam,
            Schedule::new(1, 2, 4),
            Plan::Always(StepResult::InProgress),
        );
        let mut ctx = SchedulerContext::new([&mut a, &mut b], 1);

        let mut faults = vec![];
        for _ in 0..10 {
            if let Err(f) = ctx.run_slice(&clock) {
                faults.push(f);
                break;
            }
        }
        assert_eq!(
            faults,
            [Fault::Timeout {
                index: 0,
                kind: TestKind::DataRam
            }]
        );
    }

    #[test]
    fn audits_descriptors_that_are_not_due() {
        let clock = TickClock::default();
        let mut soon = Fake::new(
            TestKind::DataRam,
            Schedule::new(0, 1, 100),
            Plan::Always(StepResult::LoopComplete),
        );
        let mut later = Fake::new(
            TestKind::ProgramMemory,
            Schedule::new(1000, 1000, 5000),
            Plan::Always(StepResult::LoopComplete),
        );
        let mut ctx = SchedulerContext::new([&mut soon, &mut later], 4);
        for _ in 0..3 {
            ctx.run_slice(&clock).unwrap();
        }
        ctx.slots[1].desc.timing.timeout.upset_value(12);
        assert!(!ctx.descriptor(1).unwrap().is_intact());

        // Slice 3 still runs; the audit at slice 4 catches it.
        assert!(ctx.run_slice(&clock).is_ok());
        assert_eq!(
            ctx.run_slice(&clock),
            Err(Fault::Integrity {
                index: 1,
                kind: TestKind::ProgramMemory
            })
        );
    }
}
