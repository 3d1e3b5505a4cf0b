// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scoped interrupt masking.
//!
//! Diagnostics that write patterns into live memory must not be interrupted
//! between the write and the restore, or an interrupt handler could observe
//! (or clobber) the test pattern. This crate wraps the platform's interrupt
//! mask primitive, as provided to the `critical-section` crate by the board
//! support, in a guard that restores the previous mask state when it goes out
//! of scope. That covers every way out of a test step, including early
//! returns on failure and unwinding in host builds.
//!
//! Keep the guarded region as small as possible: everything inside it adds
//! directly to interrupt latency for the control loop.

#![cfg_attr(not(test), no_std)]

use core::marker::PhantomData;
use critical_section::RestoreState;

/// Interrupts stay masked for as long as one of these is alive.
///
/// Guards may nest; each restores the state it found. They must be dropped
/// in reverse order of acquisition, which ordinary scoping guarantees. Do not
/// `mem::forget` one.
#[must_use = "interrupts are unmasked again as soon as the guard is dropped"]
pub struct IrqGuard {
    restore: RestoreState,
    // The mask state belongs to the current execution context.
    _not_send: PhantomData<*mut ()>,
}

impl IrqGuard {
    /// Masks interrupts, remembering the previous state.
    pub fn acquire() -> Self {
        // Safety: the matching release happens in `Drop`, and the guard is
        // neither `Send` nor `Clone`, so releases nest properly.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        // Safety: `restore` came from the `acquire` in `IrqGuard::acquire`.
        unsafe { critical_section::release(self.restore) }
    }
}

/// Runs `body` with interrupts masked.
pub fn masked<R>(body: impl FnOnce() -> R) -> R {
    let _guard = IrqGuard::acquire();
    body()
}
