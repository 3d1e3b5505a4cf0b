// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use build_selftest::Config;
use quote::ToTokens;
use std::io::Write;

fn main() -> Result<()> {
    let config: Config = build_util::config_from_env_or_file(
        "SELFTEST_CONFIG",
        "selftest.toml",
    )?;
    config.check()?;

    let dest = build_util::out_dir()?.join("config.rs");
    let mut out = std::fs::File::create(&dest)?;
    writeln!(out, "{}", config.to_token_stream())?;

    Ok(())
}
