// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Program image CRC test.

use complement_store::checked_group;
use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use selftest_api::{
    Defect, Diagnostic, Schedule, StepControl, StepResult, TestKind,
};

static IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of a whole image, computed the same way the test computes it.
/// This is what the reference value recorded at build time must be.
pub fn image_crc(image: &[u8]) -> u32 {
    IMAGE_CRC.checksum(image)
}

checked_group! {
    /// Progress of a program image test, in bytes.
    pub struct ImageCursor {
        pub offset: usize,
        pub len: usize,
    }
}

impl ImageCursor {
    pub fn covering(image: &[u8]) -> Self {
        Self::new(0, image.len())
    }
}

/// Recomputes the CRC of a read-only image, `chunk_bytes` per step, and
/// compares it against the reference at the end of each pass.
pub struct ProgramImageTest<'a> {
    schedule: Schedule,
    image: &'a [u8],
    expected: u32,
    cursor: &'a ImageCursor,
    chunk_bytes: usize,
    digest: Digest<'static, u32>,
}

impl<'a> ProgramImageTest<'a> {
    pub fn new(
        schedule: Schedule,
        image: &'a [u8],
        expected: u32,
        cursor: &'a ImageCursor,
        chunk_bytes: usize,
    ) -> Self {
        assert!(chunk_bytes != 0);
        Self {
            schedule,
            image,
            expected,
            cursor,
            chunk_bytes,
            digest: IMAGE_CRC.digest(),
        }
    }

    fn position(&self) -> Option<(usize, usize)> {
        let offset = self.cursor.offset.get().ok()?;
        let len = self.cursor.len.get().ok()?;
        (len == self.image.len() && offset <= len).then_some((offset, len))
    }
}

impl Diagnostic for ProgramImageTest<'_> {
    fn kind(&self) -> TestKind {
        TestKind::ProgramMemory
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn run_step(
        &mut self,
        _now_us: u32,
        _ctl: &mut StepControl<'_>,
    ) -> StepResult {
        let Some((mut offset, len)) = self.position() else {
            return StepResult::Failure(Defect::Integrity);
        };
        if offset == len {
            self.configure_for_next_cycle();
            offset = 0;
        }

        let stop = len.min(offset.saturating_add(self.chunk_bytes));
        self.digest.update(&self.image[offset..stop]);
        self.cursor.offset.store(stop);
        if stop < len {
            return StepResult::InProgress;
        }

        let digest = core::mem::replace(&mut self.digest, IMAGE_CRC.digest());
        if digest.finalize() == self.expected {
            StepResult::LoopComplete
        } else {
            StepResult::Failure(Defect::ImageMismatch)
        }
    }

    fn is_step_complete(&self) -> bool {
        matches!(self.position(), Some((offset, len)) if offset == len)
    }

    fn configure_for_next_cycle(&mut self) {
        if self.position().is_some() {
            self.cursor.offset.store(0);
        }
        self.digest = IMAGE_CRC.digest();
    }
}
