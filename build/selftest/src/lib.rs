// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time model of the self-test configuration: the TOML schema, the
//! checks a configuration must pass, and the constants generated from it.

use anyhow::{bail, Result};
use proc_macro2::TokenStream;
use quote::{quote, ToTokens, TokenStreamExt};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub slice_period_us: u32,
    pub completion_check_interval: u32,
    pub trace_depth: usize,
    pub safe_storage: ScheduleConfig,
    pub data_ram: RamConfig,
    pub program_image: ImageConfig,
}

#[derive(Copy, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ScheduleConfig {
    pub first_trigger: u32,
    pub step_slices: u32,
    pub timeout_slices: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RamConfig {
    pub first_trigger: u32,
    pub step_slices: u32,
    pub timeout_slices: u32,
    pub chunk_words: usize,
    #[serde(default)]
    pub rest_slices: u32,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ImageConfig {
    pub first_trigger: u32,
    pub step_slices: u32,
    pub timeout_slices: u32,
    pub chunk_bytes: usize,
}

// `serde(flatten)` does not mix with `deny_unknown_fields`, so the tables
// repeat the schedule keys and are narrowed here.

impl RamConfig {
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            first_trigger: self.first_trigger,
            step_slices: self.step_slices,
            timeout_slices: self.timeout_slices,
        }
    }
}

impl ImageConfig {
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            first_trigger: self.first_trigger,
            step_slices: self.step_slices,
            timeout_slices: self.timeout_slices,
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Check routines.

fn check_schedule(name: &str, s: &ScheduleConfig) -> Result<()> {
    if s.step_slices == 0 {
        bail!("{name}: step-slices must be at least 1");
    }
    // Completion is measured from slice 0, so the first run and one more
    // step must both land inside the timeout.
    let earliest = u64::from(s.first_trigger) + u64::from(s.step_slices);
    if earliest > u64::from(s.timeout_slices) {
        bail!(
            "{name}: timeout-slices ({}) expires before first-trigger ({}) \
             plus one step ({})",
            s.timeout_slices,
            s.first_trigger,
            s.step_slices
        );
    }
    Ok(())
}

impl Config {
    /// Rejects configurations that cannot run without tripping the
    /// completion watchdog, or that would not run at all.
    pub fn check(&self) -> Result<()> {
        if self.slice_period_us == 0 {
            bail!("slice-period-us must be non-zero");
        }
        if self.completion_check_interval == 0 {
            bail!("completion-check-interval must be at least 1");
        }
        if self.trace_depth == 0 {
            bail!("trace-depth must be at least 1");
        }
        check_schedule("safe-storage", &self.safe_storage)?;
        check_schedule("data-ram", &self.data_ram.schedule())?;
        check_schedule("program-image", &self.program_image.schedule())?;
        if self.data_ram.chunk_words == 0 {
            bail!("data-ram: chunk-words must be at least 1");
        }
        if self.data_ram.rest_slices >= self.data_ram.timeout_slices {
            bail!(
                "data-ram: rest-slices ({}) must be shorter than \
                 timeout-slices ({})",
                self.data_ram.rest_slices,
                self.data_ram.timeout_slices
            );
        }
        if self.program_image.chunk_bytes == 0 {
            bail!("program-image: chunk-bytes must be at least 1");
        }
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
// Code generation.
//
// Every generated item is a `pub const`; the including module is expected to
// have `Schedule` and `Slice` in scope.

impl ToTokens for ScheduleConfig {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let ScheduleConfig {
            first_trigger,
            step_slices,
            timeout_slices,
        } = self;
        tokens.append_all(quote! {
            Schedule::new(#first_trigger, #step_slices, #timeout_slices)
        });
    }
}

impl ToTokens for Config {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        let slice_period_us = self.slice_period_us;
        let check_interval = self.completion_check_interval;
        let trace_depth = self.trace_depth;
        let safe_storage = &self.safe_storage;
        let data_ram = self.data_ram.schedule();
        let chunk_words = self.data_ram.chunk_words;
        let rest_slices = self.data_ram.rest_slices;
        let program_image = self.program_image.schedule();
        let chunk_bytes = self.program_image.chunk_bytes;

        tokens.append_all(quote! {
            /// Wall-clock length of one slice.
            pub const SLICE_PERIOD_US: u32 = #slice_period_us;
            /// Slices between completion watchdog checks.
            pub const COMPLETION_CHECK_INTERVAL: Slice = #check_interval;
            pub const TRACE_DEPTH: usize = #trace_depth;

            pub const SAFE_STORAGE: Schedule = #safe_storage;

            pub const DATA_RAM: Schedule = #data_ram;
            pub const DATA_RAM_CHUNK_WORDS: usize = #chunk_words;
            pub const DATA_RAM_REST_SLICES: Slice = #rest_slices;

            pub const PROGRAM_IMAGE: Schedule = #program_image;
            pub const PROGRAM_IMAGE_CHUNK_BYTES: usize = #chunk_bytes;
        });
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = include_str!("../../../task/selftest/selftest.toml");

    fn with(table: &str, key: &str, value: u32) -> Config {
        let mut out = String::new();
        let mut current = "";
        for line in SHIPPED.lines() {
            if let Some(name) = line.strip_prefix('[') {
                current = name.trim_end_matches(']');
            }
            if current == table && line.starts_with(&format!("{key} =")) {
                out.push_str(&format!("{key} = {value}\n"));
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        build_util::parse(&out).unwrap()
    }

    fn shipped() -> Config {
        build_util::parse(SHIPPED).unwrap()
    }

    #[test]
    fn shipped_config_passes() {
        shipped().check().unwrap();
    }

    #[test]
    fn first_trigger_past_timeout_is_rejected() {
        let c = with("safe-storage", "first-trigger", 500);
        let err = c.check().unwrap_err().to_string();
        assert!(err.starts_with("safe-storage:"), "{err}");
    }

    #[test]
    fn first_step_must_fit_before_timeout() {
        // 396 + 4 still fits in 400; 397 + 4 does not.
        with("safe-storage", "first-trigger", 396).check().unwrap();
        assert!(with("safe-storage", "first-trigger", 397).check().is_err());
    }

    #[test]
    fn rest_as_long_as_timeout_is_rejected() {
        let c = with("data-ram", "rest-slices", 2000);
        let err = c.check().unwrap_err().to_string();
        assert!(err.contains("rest-slices"), "{err}");
        with("data-ram", "rest-slices", 1999).check().unwrap();
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(with("program-image", "step-slices", 0).check().is_err());
    }

    #[test]
    fn generates_every_constant() {
        let text = shipped().to_token_stream().to_string();
        for name in [
            "SLICE_PERIOD_US",
            "COMPLETION_CHECK_INTERVAL",
            "TRACE_DEPTH",
            "SAFE_STORAGE",
            "DATA_RAM_CHUNK_WORDS",
            "DATA_RAM_REST_SLICES",
            "PROGRAM_IMAGE_CHUNK_BYTES",
        ] {
            assert!(text.contains(name), "{name} missing from {text}");
        }
    }
}
