// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by build scripts.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::path::{Path, PathBuf};

/// Returns `OUT_DIR` as a path.
pub fn out_dir() -> Result<PathBuf> {
    Ok(env::var_os("OUT_DIR")
        .context("OUT_DIR not set; is this a build script?")?
        .into())
}

/// Pulls a configuration for a build script.
///
/// If the environment variable `var` is set, its contents are parsed as
/// TOML. Otherwise `default` (relative to the crate's manifest directory)
/// is read instead. Either way, Cargo is told to re-run the build script
/// when the source changes, including when `var` appears or goes away.
///
/// Thanks to Serde, `T` only needs to describe the parts of the document
/// that the build script cares about; whether to `deny_unknown_fields` is
/// up to `T`.
pub fn config_from_env_or_file<T: DeserializeOwned>(
    var: &str,
    default: impl AsRef<Path>,
) -> Result<T> {
    // Emit this whether or not the var is present, so that we'll be re-run
    // if it becomes present.
    println!("cargo:rerun-if-env-changed={var}");

    match env::var(var) {
        Ok(text) => {
            println!("--- toml for ${var} ---");
            println!("{text}");
            parse(&text).with_context(|| format!("parsing ${var}"))
        }
        Err(_) => {
            let dir = env::var_os("CARGO_MANIFEST_DIR")
                .context("CARGO_MANIFEST_DIR not set")?;
            let path = Path::new(&dir).join(default);
            println!("--- var ${var} not present, using {} ---", path.display());
            println!("cargo:rerun-if-changed={}", path.display());
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse(&text).with_context(|| format!("parsing {}", path.display()))
        }
    }
}

/// Parses a TOML document into `T`.
pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(toml::from_str(text)?)
}
