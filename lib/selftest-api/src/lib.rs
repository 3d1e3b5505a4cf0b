// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contract between the self-test scheduler and the diagnostics it runs.
//!
//! A diagnostic is anything that implements [`Diagnostic`]: it declares its
//! scheduling parameters once, then performs its check in bounded steps, one
//! step per call to [`Diagnostic::run_step`]. The scheduler never looks
//! inside a diagnostic; it only reads the [`StepResult`] and keeps the
//! bookkeeping.
//!
//! Every failure in this system is fatal. A [`Fault`] is what eventually
//! reaches the platform's [`FatalHandler`], packed into a `u32` code.

#![cfg_attr(not(test), no_std)]

use complement_store::{Checked, Corrupted};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Scheduler time unit. Slice arithmetic always wraps.
pub type Slice = u32;

/// Which physical resource a diagnostic exercises.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum TestKind {
    DataRam = 0,
    StackRam = 1,
    ProgramMemory = 2,
    SafeStorage = 3,
    CpuRegisters = 4,
    Dma = 5,
}

/// What a diagnostic found wrong, carried by [`StepResult::Failure`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Defect {
    /// A written pattern did not read back.
    PatternMismatch = 1,
    /// Memory contents differ from their reference image.
    ImageMismatch = 2,
    /// A complement-checked value no longer matches its complement.
    Integrity = 3,
    /// A register did not hold a written value.
    RegisterStuck = 4,
    /// A DMA transfer did not deliver what was sent.
    DmaTransfer = 5,
}

/// Outcome of one bounded step of a diagnostic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// More steps remain before the current pass is done.
    InProgress,
    /// A full pass over the checked resource just finished.
    LoopComplete,
    /// The checked resource is defective. This ends the process.
    Failure(Defect),
}

/// Scheduling parameters of a diagnostic, fixed at construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Schedule {
    /// First trigger, as an offset from the scheduler's starting slice.
    pub first_trigger: Slice,
    /// Interval between successive steps. Never zero.
    pub step_slices: Slice,
    /// Longest permitted gap between completed passes.
    pub timeout_slices: Slice,
}

impl Schedule {
    pub const fn new(
        first_trigger: Slice,
        step_slices: Slice,
        timeout_slices: Slice,
    ) -> Self {
        assert!(step_slices != 0);
        Self {
            first_trigger,
            step_slices,
            timeout_slices,
        }
    }
}

/// A diagnostic's handle on its own scheduling state during a step.
///
/// By the time a step runs, the scheduler has already advanced the trigger
/// by `step_slices`. Whatever the step sets here is final for this run.
pub struct StepControl<'a> {
    slice: Slice,
    trigger: &'a Checked<Slice>,
}

impl<'a> StepControl<'a> {
    pub fn new(slice: Slice, trigger: &'a Checked<Slice>) -> Self {
        Self { slice, trigger }
    }

    /// Slice in which this step is running.
    pub fn slice(&self) -> Slice {
        self.slice
    }

    /// Slice at which the diagnostic will next run.
    pub fn next_trigger(&self) -> Result<Slice, Corrupted> {
        self.trigger.get()
    }

    /// Runs the diagnostic again `slices` after the current one. Zero is
    /// treated as one, since the current slice is already spent.
    pub fn reschedule_in(&mut self, slices: Slice) {
        self.trigger.store(self.slice.wrapping_add(slices.max(1)));
    }
}

/// The contract every diagnostic implements.
pub trait Diagnostic {
    /// Resource exercised by this diagnostic.
    fn kind(&self) -> TestKind;

    /// Scheduling parameters. Read once, when the diagnostic is registered.
    fn schedule(&self) -> Schedule;

    /// Performs one bounded unit of work.
    ///
    /// This runs inside the control loop's own cycle, so it must return
    /// quickly; each implementation documents its own bound. `now_us` is the
    /// clock reading taken just before the call.
    fn run_step(&mut self, now_us: u32, ctl: &mut StepControl<'_>)
        -> StepResult;

    /// Whether the current pass has covered the whole resource. Used by the
    /// diagnostic itself between phases, never by the scheduler.
    fn is_step_complete(&self) -> bool;

    /// Rewinds internal cursors to begin a new pass.
    fn configure_for_next_cycle(&mut self);
}

/// Source of wall-clock time, in microseconds, wrapping at `u32::MAX`.
pub trait Clock {
    fn now_us(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }
}

/// Platform hook that puts the system in its safe state. Never returns.
pub trait FatalHandler {
    fn fatal(&mut self, code: u32) -> !;
}

/// An unrecoverable condition detected by the self-test machinery.
///
/// `index` is the diagnostic's position in the scheduler's registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// A diagnostic found its resource defective.
    TestFailed {
        index: u8,
        kind: TestKind,
        defect: Defect,
    },
    /// A diagnostic did not complete a pass within its timeout.
    Timeout { index: u8, kind: TestKind },
    /// Complement-checked state belonging to a diagnostic, or to its
    /// scheduling descriptor, is corrupted.
    Integrity { index: u8, kind: TestKind },
    /// The scheduler's own slice counters are corrupted.
    SchedulerState,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
enum FaultClass {
    TestFailed = 0xa1,
    Timeout = 0xa2,
    Integrity = 0xa3,
    SchedulerState = 0xa4,
}

impl Fault {
    /// Maps a failed step onto the fault it represents.
    pub fn from_failure(index: u8, kind: TestKind, defect: Defect) -> Self {
        match defect {
            Defect::Integrity => Fault::Integrity { index, kind },
            _ => Fault::TestFailed {
                index,
                kind,
                defect,
            },
        }
    }

    /// Registry index and kind of the diagnostic at fault, if the fault
    /// belongs to one.
    pub fn culprit(&self) -> Option<(u8, TestKind)> {
        match *self {
            Fault::TestFailed { index, kind, .. }
            | Fault::Timeout { index, kind }
            | Fault::Integrity { index, kind } => Some((index, kind)),
            Fault::SchedulerState => None,
        }
    }

    /// Packs the fault for the fatal handler.
    ///
    /// Layout, most significant byte first: class, registry index, test
    /// kind, defect. Bytes that do not apply are zero.
    pub fn code(&self) -> u32 {
        let (class, defect) = match *self {
            Fault::TestFailed { defect, .. } => {
                (FaultClass::TestFailed, defect as u8)
            }
            Fault::Timeout { .. } => (FaultClass::Timeout, 0),
            Fault::Integrity { .. } => (FaultClass::Integrity, 0),
            Fault::SchedulerState => (FaultClass::SchedulerState, 0),
        };
        let (index, kind) =
            self.culprit().map_or((0, 0), |(index, kind)| (index, kind as u8));
        u32::from_be_bytes([class as u8, index, kind, defect])
    }

    /// Unpacks a code produced by [`Fault::code`].
    pub fn from_code(code: u32) -> Option<Self> {
        let [class, index, kind, defect] = code.to_be_bytes();
        let class = FaultClass::from_u8(class)?;
        if class == FaultClass::SchedulerState {
            let clean = code & 0x00ff_ffff == 0;
            return clean.then_some(Fault::SchedulerState);
        }
        let kind = TestKind::from_u8(kind)?;
        match class {
            FaultClass::TestFailed => {
                let defect = Defect::from_u8(defect)?;
                if defect == Defect::Integrity {
                    return None;
                }
                Some(Fault::TestFailed {
                    index,
                    kind,
                    defect,
                })
            }
            FaultClass::Timeout if defect == 0 => {
                Some(Fault::Timeout { index, kind })
            }
            FaultClass::Integrity if defect == 0 => {
                Some(Fault::Integrity { index, kind })
            }
            _ => None,
        }
    }
}
