// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use selftest_api::{
    Clock, Defect, Diagnostic, FatalHandler, Fault, Schedule, StepControl,
    StepResult, TestKind,
};
use selftest_diags::image_crc;
use task_selftest::{config, slot, CheckedState, Diagnostics, SelfTest, Trace};

struct FakeClock(Cell<u32>);

impl FakeClock {
    fn new() -> Self {
        Self(Cell::new(0))
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u32 {
        let now = self.0.get();
        self.0.set(now.wrapping_add(7));
        now
    }
}

struct PanicOnFatal;

impl FatalHandler for PanicOnFatal {
    fn fatal(&mut self, code: u32) -> ! {
        panic!("fatal {code:#010x}");
    }
}

fn program_image() -> Vec<u8> {
    (0..4096u32).map(|i| (i * 31 % 251) as u8).collect()
}

/// Enough slices for every reference diagnostic to finish a few passes over
/// the regions used here, whatever the configured tuning.
fn plenty() -> usize {
    let longest = [config::SAFE_STORAGE, config::DATA_RAM, config::PROGRAM_IMAGE]
        .iter()
        .map(|s| s.first_trigger + s.timeout_slices)
        .max()
        .unwrap();
    3 * longest as usize
}

#[test]
fn healthy_system_runs_quietly() {
    let image = program_image();
    let mut ram = vec![0x5a5a_0000u32; 256];
    let state = CheckedState::new(ram.len(), &image);
    let mut diags =
        Diagnostics::new(&state, &mut ram[..], &image, image_crc(&image));
    let mut st = SelfTest::new(diags.registry(), FakeClock::new(), PanicOnFatal);

    let mut checks = 0;
    for expected in 0..plenty() {
        let report = st.run_slice();
        assert_eq!(report.slice as usize, expected);
        checks += report.checked as usize;
    }
    assert!(checks > 0);

    for desc in st.scheduler().descriptors() {
        let d = desc.snapshot();
        assert!(d.intact);
        assert!(d.completions >= 2, "{d:?}");
        assert!(d.max_observed_slices <= d.timeout_slices, "{d:?}");
    }
    assert_eq!(st.trace().len(), config::TRACE_DEPTH);
    assert!(!st
        .trace()
        .iter()
        .any(|e| matches!(e.payload, Trace::Fault(_))));
}

#[test]
fn ram_is_left_as_found() {
    let image = program_image();
    let original: Vec<u32> = (0..100).map(|i| i * 0x0102_0304).collect();
    let mut ram = original.clone();
    let state = CheckedState::new(ram.len(), &image);
    {
        let mut diags =
            Diagnostics::new(&state, &mut ram[..], &image, image_crc(&image));
        let mut st =
            SelfTest::new(diags.registry(), FakeClock::new(), PanicOnFatal);
        for _ in 0..plenty() {
            st.run_slice();
        }
    }
    assert_eq!(ram, original);
}

#[test]
#[should_panic(expected = "fatal 0xa1020202")]
fn tampered_image_is_fatal() {
    let image = program_image();
    let mut ram = vec![0u32; 16];
    let state = CheckedState::new(ram.len(), &image);
    let mut tampered = image.clone();
    tampered[1234] ^= 0x40;
    let mut diags =
        Diagnostics::new(&state, &mut ram[..], &tampered, image_crc(&image));
    let mut st = SelfTest::new(diags.registry(), FakeClock::new(), PanicOnFatal);
    for _ in 0..plenty() {
        st.run_slice();
    }
}

#[test]
fn corrupted_cursor_is_traced_then_fatal() {
    let image = program_image();
    let mut ram = vec![0u32; 64];
    let state = CheckedState::new(ram.len(), &image);
    let mut diags =
        Diagnostics::new(&state, &mut ram[..], &image, image_crc(&image));
    let mut st = SelfTest::new(diags.registry(), FakeClock::new(), PanicOnFatal);

    for _ in 0..10 {
        st.run_slice();
    }
    state.ram.cursor.upset_value(2);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for _ in 0..plenty() {
            st.run_slice();
        }
    }));
    let message = outcome.unwrap_err();
    let message = message.downcast_ref::<String>().unwrap();

    // Either the RAM test trips over its own cursor, or the safe-storage
    // audit gets to it first. Both name the culprit as an integrity fault.
    let fault = st.scheduler().fault().unwrap();
    assert!(matches!(
        fault,
        Fault::Integrity {
            index: slot::SAFE_STORAGE | slot::DATA_RAM,
            ..
        }
    ));
    assert_eq!(message, &format!("fatal {:#010x}", fault.code()));
    assert_eq!(st.trace().last().unwrap().payload, Trace::Fault(fault));
}

/// Never finishes a pass.
struct Treadmill;

impl Diagnostic for Treadmill {
    fn kind(&self) -> TestKind {
        TestKind::CpuRegisters
    }

    fn schedule(&self) -> Schedule {
        Schedule::new(0, 1, 5)
    }

    fn run_step(&mut self, _: u32, _: &mut StepControl<'_>) -> StepResult {
        StepResult::InProgress
    }

    fn is_step_complete(&self) -> bool {
        false
    }

    fn configure_for_next_cycle(&mut self) {}
}

#[test]
#[should_panic(expected = "fatal 0xa2000400")]
fn stalled_diagnostic_times_out() {
    let mut t = Treadmill;
    let mut st = SelfTest::new([&mut t], FakeClock::new(), PanicOnFatal);
    for _ in 0..(10 + 2 * config::COMPLETION_CHECK_INTERVAL) {
        st.run_slice();
    }
}

/// Fails on its first step.
struct Broken;

impl Diagnostic for Broken {
    fn kind(&self) -> TestKind {
        TestKind::Dma
    }

    fn schedule(&self) -> Schedule {
        Schedule::new(3, 1, 100)
    }

    fn run_step(&mut self, _: u32, _: &mut StepControl<'_>) -> StepResult {
        StepResult::Failure(Defect::DmaTransfer)
    }

    fn is_step_complete(&self) -> bool {
        false
    }

    fn configure_for_next_cycle(&mut self) {}
}

#[test]
fn fatal_handler_is_called_once_with_the_fault() {
    struct Recorder<'a>(&'a Cell<u32>);

    impl FatalHandler for Recorder<'_> {
        fn fatal(&mut self, code: u32) -> ! {
            assert_eq!(self.0.replace(self.0.get() + 1), 0);
            panic!("fatal {code:#010x}");
        }
    }

    let calls = Cell::new(0);
    let mut b = Broken;
    let mut st = SelfTest::new([&mut b], FakeClock::new(), Recorder(&calls));
    for _ in 0..3 {
        st.run_slice();
    }
    let outcome = catch_unwind(AssertUnwindSafe(|| st.run_slice()));
    assert!(outcome.is_err());
    assert_eq!(calls.get(), 1);
    assert_eq!(
        st.scheduler().fault(),
        Some(Fault::TestFailed {
            index: 0,
            kind: TestKind::Dma,
            defect: Defect::DmaTransfer,
        })
    );
}

/// Finishes a pass on every step.
struct OneShot {
    kind: TestKind,
    schedule: Schedule,
}

impl Diagnostic for OneShot {
    fn kind(&self) -> TestKind {
        self.kind
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn run_step(&mut self, _: u32, _: &mut StepControl<'_>) -> StepResult {
        StepResult::LoopComplete
    }

    fn is_step_complete(&self) -> bool {
        true
    }

    fn configure_for_next_cycle(&mut self) {}
}

#[test]
fn collision_is_traced_in_order() {
    // Both are first due on the slice the watchdog first runs.
    let at = config::COMPLETION_CHECK_INTERVAL;
    let mut first = OneShot {
        kind: TestKind::CpuRegisters,
        schedule: Schedule::new(at, 50, at + 1000),
    };
    let mut second = OneShot {
        kind: TestKind::Dma,
        schedule: Schedule::new(at, 50, at + 1000),
    };
    let mut st = SelfTest::new(
        [&mut first, &mut second],
        FakeClock::new(),
        PanicOnFatal,
    );

    for _ in 0..at {
        st.run_slice();
    }
    assert!(st.trace().is_empty());

    st.run_slice();
    st.run_slice();

    // One clock read either side of the step.
    let payloads: Vec<Trace> = st.trace().iter().map(|e| e.payload).collect();
    assert_eq!(
        payloads,
        [
            Trace::Checked { slice: at },
            Trace::Step {
                slice: at,
                index: 0,
                kind: TestKind::CpuRegisters,
                duration_us: 7,
            },
            Trace::LoopComplete {
                index: 0,
                kind: TestKind::CpuRegisters,
            },
            Trace::Bumped { count: 1 },
            Trace::Step {
                slice: at + 1,
                index: 1,
                kind: TestKind::Dma,
                duration_us: 7,
            },
            Trace::LoopComplete {
                index: 1,
                kind: TestKind::Dma,
            },
        ]
    );
}
