// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use selftest_api::{Clock, FatalHandler, Fault};
use selftest_diags::image_crc;
use task_selftest::{config, CheckedState, Diagnostics, SelfTest, TraceRing};

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "Run the self-test scheduler against simulated memory"
)]
struct Args {
    /// Number of slices to run
    #[clap(short, long, default_value_t = 10_000)]
    slices: u32,
    /// Size of the simulated data RAM, in 32-bit words
    #[clap(long, default_value_t = 4096)]
    ram_words: usize,
    /// Size of the simulated program image, in bytes
    #[clap(long, default_value_t = 65536)]
    image_bytes: usize,
    /// Flip a bit in the data RAM test's cursor just before this slice
    #[clap(long)]
    corrupt_at: Option<u32>,
    /// Print the trace ring when done
    #[clap(short, long)]
    trace: bool,
}

/// Microsecond clock that costs a little to read and is moved to the next
/// slice boundary by the driver loop.
#[derive(Default)]
struct SimClock {
    now: Cell<u32>,
}

impl SimClock {
    const READ_US: u32 = 2;

    fn next_slice(&self) {
        let period = config::SLICE_PERIOD_US;
        let now = self.now.get();
        self.now.set((now / period).wrapping_add(1).wrapping_mul(period));
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(Self::READ_US));
        now
    }
}

/// Payload of the panic used to get from the fatal handler back out to
/// `main`, where the trace ring can still be printed.
struct FatalCode(u32);

struct SimFatal;

impl FatalHandler for SimFatal {
    fn fatal(&mut self, code: u32) -> ! {
        panic::panic_any(FatalCode(code))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.slices == 0 {
        bail!("nothing to do with zero slices");
    }

    let image: Vec<u8> = (0..args.image_bytes as u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect();
    let mut ram: Vec<u32> =
        (0..args.ram_words as u32).map(|i| i ^ 0x5a5a_0000).collect();

    let state = CheckedState::new(ram.len(), &image);
    let mut diags =
        Diagnostics::new(&state, &mut ram[..], &image, image_crc(&image));
    let mut st = SelfTest::new(diags.registry(), SimClock::default(), SimFatal);

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if !info.payload().is::<FatalCode>() {
            default_hook(info);
        }
    }));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        for slice in 0..args.slices {
            if args.corrupt_at == Some(slice) {
                println!("{} data RAM cursor, slice {slice}", "upset:".yellow());
                state.ram.cursor.upset_value(slice);
            }
            st.run_slice();
            st.clock().next_slice();
        }
    }));

    print_stats(&st);
    if args.trace {
        print_trace(st.trace());
    }

    match outcome {
        Ok(()) => {
            println!("{} {} slices, no faults", "ok:".green().bold(), args.slices);
            Ok(())
        }
        Err(payload) => match payload.downcast::<FatalCode>() {
            Ok(code) => {
                let code = code.0;
                match Fault::from_code(code) {
                    Some(fault) => println!(
                        "{} {fault:?} (code {code:#010x})",
                        "fatal:".red().bold()
                    ),
                    None => println!(
                        "{} undecodable code {code:#010x}",
                        "fatal:".red().bold()
                    ),
                }
                std::process::exit(1);
            }
            Err(other) => panic::resume_unwind(other),
        },
    }
}

fn print_stats<const N: usize>(st: &SelfTest<'_, SimClock, SimFatal, N>) {
    println!(
        "{:>3} {:<14} {:>8} {:>6} {:>8} {:>8} {:>6}",
        "IDX", "KIND", "RUNS", "PASSES", "MAXGAP", "TIMEOUT", "US"
    );
    for (index, desc) in st.scheduler().descriptors().enumerate() {
        let d = desc.snapshot();
        let line = format!(
            "{index:>3} {:<14} {:>8} {:>6} {:>8} {:>8} {:>6}",
            format!("{:?}", d.kind),
            d.runs,
            d.completions,
            d.max_observed_slices,
            d.timeout_slices,
            d.duration_us,
        );
        if d.intact {
            println!("{line}");
        } else {
            println!("{}", line.red());
        }
    }
}

fn print_trace(trace: &TraceRing) {
    let header = format!(
        "trace, {} of {} entries, oldest first:",
        trace.len(),
        trace.capacity()
    );
    println!("{}", header.bold());
    for entry in trace.iter() {
        println!(
            "{:>10} {:>5} {:?}",
            entry.timestamp, entry.generation, entry.payload
        );
    }
}
