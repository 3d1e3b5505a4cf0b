// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted diagnostics and a fake clock for exercising the scheduler.

use std::cell::Cell;
use std::collections::VecDeque;

use selftest_api::{
    Clock, Diagnostic, Schedule, Slice, StepControl, StepResult, TestKind,
};

/// Clock that advances a little on every read, so step durations are
/// non-zero and predictable.
#[derive(Default)]
pub struct TickClock {
    now: Cell<u32>,
}

impl TickClock {
    pub const TICK_US: u32 = 3;

    pub fn starting_at(now: u32) -> Self {
        Self {
            now: Cell::new(now),
        }
    }
}

impl Clock for TickClock {
    fn now_us(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(Self::TICK_US));
        now
    }
}

pub enum Plan {
    Always(StepResult),
    /// Plays these back in order, then reports `InProgress` forever.
    Script(VecDeque<StepResult>),
}

pub struct Fake {
    kind: TestKind,
    schedule: Schedule,
    plan: Plan,
    /// When set, every step pushes its own next trigger this far out.
    pub reschedule: Option<Slice>,
    pub ran_at: Vec<Slice>,
    pub started_at: Vec<u32>,
    pub rewinds: u32,
}

impl Fake {
    pub fn new(kind: TestKind, schedule: Schedule, plan: Plan) -> Self {
        Self {
            kind,
            schedule,
            plan,
            reschedule: None,
            ran_at: vec![],
            started_at: vec![],
            rewinds: 0,
        }
    }

    pub fn script(
        kind: TestKind,
        schedule: Schedule,
        results: impl IntoIterator<Item = StepResult>,
    ) -> Self {
        Self::new(kind, schedule, Plan::Script(results.into_iter().collect()))
    }
}

impl Diagnostic for Fake {
    fn kind(&self) -> TestKind {
        self.kind
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn run_step(
        &mut self,
        now_us: u32,
        ctl: &mut StepControl<'_>,
    ) -> StepResult {
        self.ran_at.push(ctl.slice());
        self.started_at.push(now_us);
        if let Some(n) = self.reschedule {
            ctl.reschedule_in(n);
        }
        let result = match &mut self.plan {
            Plan::Always(r) => *r,
            Plan::Script(q) => q.pop_front().unwrap_or(StepResult::InProgress),
        };
        if result == StepResult::LoopComplete {
            self.configure_for_next_cycle();
        }
        result
    }

    fn is_step_complete(&self) -> bool {
        false
    }

    fn configure_for_next_cycle(&mut self) {
        self.rewinds += 1;
    }
}
