// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring for post-mortem analysis of the self-test scheduler
//!
//! This contains an implementation of a fixed-capacity ring buffer of
//! timestamped events. It is meant to be owned by whatever drives the
//! control loop and left in production images: when the system ends up in
//! its safe state, the ring holds the last `N` things the self-test
//! machinery did, and can be read out with a debugger.
//!
//! ## Constraints
//!
//! The payload type must implement `Copy`. Writing an entry never allocates,
//! never blocks and never fails; once the ring is full, each new entry
//! overwrites the oldest one.
//!
//! ## Using a trace ring
//!
//! ```ignore
//! let mut trace: Ringbuf<Event, 32> = Ringbuf::new(Event::None);
//! trace.entry(clock.now_us(), Event::Started);
//! ```
//!
//! ## Inspecting a trace ring via GDB
//!
//! Assuming symbols are loaded, `print` the owning structure. The `last`
//! field names the most recently written slot; every slot carries a
//! `generation` that counts how many times it has been written, which makes
//! it easy to spot the wrap point in a raw dump:
//!
//! ```console
//! (gdb) print selftest.trace
//! $1 = trace_ring::Ringbuf<task_selftest::Trace, 64> {
//!   last: core::option::Option<usize>::Some(3),
//!   wrapped: true,
//!   buffer: [
//!     trace_ring::RingbufEntry<task_selftest::Trace> {
//!       timestamp: 1250117,
//!       generation: 9,
//!       payload: task_selftest::Trace::Step { index: 1, ... }
//!     },...
//! ```

#![cfg_attr(not(test), no_std)]

///
/// The structure of a single [`Ringbuf`] entry: the time at which it was
/// recorded, in the clock's microseconds, and a payload of arbitrary type.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy> {
    pub timestamp: u32,
    pub generation: u16,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy, const N: usize> {
    last: Option<usize>,
    wrapped: bool,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring, with every slot initialized to `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            wrapped: false,
            buffer: [RingbufEntry {
                timestamp: 0,
                generation: 0,
                payload: init,
            }; N],
        }
    }

    /// Records `payload` at `timestamp`, overwriting the oldest entry if the
    /// ring is full.
    #[cfg(not(feature = "disabled"))]
    pub fn entry(&mut self, timestamp: u32, payload: T) {
        if N == 0 {
            return;
        }

        // If `last` were somehow corrupted to point out of range, the modulo
        // still lands us on a valid slot and we simply carry on from there.
        let ndx = match self.last {
            Some(last) => last.wrapping_add(1) % N,
            None => 0,
        };

        if ndx == 0 && self.last.is_some() {
            self.wrapped = true;
        }

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            timestamp,
            payload,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    #[cfg(feature = "disabled")]
    pub fn entry(&mut self, timestamp: u32, payload: T) {
        let _ = (timestamp, payload);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        match self.last {
            None => 0,
            Some(_) if self.wrapped => N,
            Some(last) => last + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the most recently recorded entry.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|ndx| self.buffer.get(ndx))
    }

    /// Iterates over the live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let len = self.len();
        let first = match self.last {
            Some(last) if self.wrapped => last.wrapping_add(1) % N,
            _ => 0,
        };
        (0..len).map(move |i| &self.buffer[(first + i) % N])
    }
}
