// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime self-test, as seen from the control loop.
//!
//! [`SelfTest`] ties a scheduler to a clock, a fatal handler and a trace
//! ring. The control loop calls [`SelfTest::run_slice`] once per cycle and
//! otherwise forgets about it: on a fault, the fault is traced and handed to
//! the fatal handler, which does not return.
//!
//! Scheduling parameters are compiled in from `selftest.toml` (or from
//! `$SELFTEST_CONFIG`, if set) and show up in [`config`]. The reference
//! diagnostics are assembled by [`Diagnostics`] in their fixed priority
//! order; a platform with its own diagnostics can build the registry by hand
//! and pass it to [`SelfTest::new`] instead.

#![cfg_attr(not(test), no_std)]

use complement_store::CheckedGroup;
use selftest_api::{Clock, Diagnostic, FatalHandler, Fault, TestKind};
use selftest_diags::{
    ImageCursor, ProgramImageTest, RamPatternTest, RegionCursor,
    SafeStorageTest, WordRegion,
};
use selftest_sched::{SchedulerContext, SliceReport};
use trace_ring::Ringbuf;

pub use selftest_api::Slice;

/// Compiled-in configuration.
pub mod config {
    use selftest_api::{Schedule, Slice};

    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    /// The completion watchdog ran and found nothing wrong.
    Checked { slice: Slice },
    Step {
        slice: Slice,
        index: u8,
        kind: TestKind,
        duration_us: u32,
    },
    LoopComplete { index: u8, kind: TestKind },
    /// Lower-priority diagnostics pushed back by the step before this.
    Bumped { count: u8 },
    Fault(Fault),
}

pub type TraceRing = Ringbuf<Trace, { config::TRACE_DEPTH }>;

/// The self-test machinery driven by the control loop.
pub struct SelfTest<'a, C: Clock, F: FatalHandler, const N: usize> {
    sched: SchedulerContext<'a, N>,
    clock: C,
    fatal: F,
    trace: TraceRing,
}

impl<'a, C: Clock, F: FatalHandler, const N: usize> SelfTest<'a, C, F, N> {
    /// Registers `tests`, highest priority first.
    pub fn new(
        tests: [&'a mut dyn Diagnostic; N],
        clock: C,
        fatal: F,
    ) -> Self {
        Self {
            sched: SchedulerContext::new(
                tests,
                config::COMPLETION_CHECK_INTERVAL,
            ),
            clock,
            fatal,
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// Runs one slice. Call once per control-loop cycle.
    ///
    /// Does not return if the slice turns up a fault.
    pub fn run_slice(&mut self) -> SliceReport {
        match self.sched.run_slice(&self.clock) {
            Ok(report) => {
                self.record(&report);
                report
            }
            Err(fault) => {
                self.trace.entry(self.clock.now_us(), Trace::Fault(fault));
                self.fatal.fatal(fault.code())
            }
        }
    }

    fn record(&mut self, report: &SliceReport) {
        let now = self.clock.now_us();
        if report.checked {
            self.trace.entry(
                now,
                Trace::Checked {
                    slice: report.slice,
                },
            );
        }
        let Some(ran) = report.ran else {
            return;
        };
        self.trace.entry(
            now,
            Trace::Step {
                slice: report.slice,
                index: ran.index,
                kind: ran.kind,
                duration_us: ran.duration_us,
            },
        );
        if ran.result == selftest_api::StepResult::LoopComplete {
            self.trace.entry(
                now,
                Trace::LoopComplete {
                    index: ran.index,
                    kind: ran.kind,
                },
            );
        }
        if ran.bumped != 0 {
            self.trace.entry(now, Trace::Bumped { count: ran.bumped });
        }
    }

    pub fn scheduler(&self) -> &SchedulerContext<'a, N> {
        &self.sched
    }

    pub fn trace(&self) -> &TraceRing {
        &self.trace
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// Complement-checked state behind the reference diagnostics.
///
/// This must outlive the diagnostics, which borrow it.
pub struct CheckedState {
    pub ram: RegionCursor,
    pub image: ImageCursor,
}

impl CheckedState {
    /// State for testing all of `ram_words` words of RAM and all of `image`.
    pub fn new(ram_words: usize, image: &[u8]) -> Self {
        Self {
            ram: RegionCursor::span(0, ram_words),
            image: ImageCursor::covering(image),
        }
    }

    /// Groups audited by the safe-storage diagnostic.
    pub fn groups(&self) -> [&dyn CheckedGroup; 2] {
        [&self.ram, &self.image]
    }
}

/// The reference diagnostics, configured from [`config`].
pub struct Diagnostics<'a, R: WordRegion + ?Sized> {
    pub storage: SafeStorageTest<'a, 2>,
    pub ram: RamPatternTest<'a, R>,
    pub image: ProgramImageTest<'a>,
}

/// Registry positions of the reference diagnostics.
pub mod slot {
    pub const SAFE_STORAGE: u8 = 0;
    pub const DATA_RAM: u8 = 1;
    pub const PROGRAM_IMAGE: u8 = 2;
}

impl<'a, R: WordRegion + ?Sized> Diagnostics<'a, R> {
    /// `image_crc` is the CRC-32 of `image` recorded at build time; see
    /// [`selftest_diags::image_crc`].
    pub fn new(
        state: &'a CheckedState,
        ram: &'a mut R,
        image: &'a [u8],
        image_crc: u32,
    ) -> Self {
        Self {
            storage: SafeStorageTest::new(
                config::SAFE_STORAGE,
                state.groups(),
            ),
            ram: RamPatternTest::new(
                TestKind::DataRam,
                config::DATA_RAM,
                ram,
                &state.ram,
                config::DATA_RAM_CHUNK_WORDS,
                config::DATA_RAM_REST_SLICES,
            ),
            image: ProgramImageTest::new(
                config::PROGRAM_IMAGE,
                image,
                image_crc,
                &state.image,
                config::PROGRAM_IMAGE_CHUNK_BYTES,
            ),
        }
    }

    /// The registry, in priority order.
    pub fn registry(&mut self) -> [&mut dyn Diagnostic; 3] {
        [&mut self.storage, &mut self.ram, &mut self.image]
    }
}
