#![deny(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::must_use_candidate
)]
// now allow a few rules which are denied by the above's statement
#![allow(clippy::multiple_crate_versions)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::all)]

//! serialoscd: bridges monome-family grid/encoder USB-serial hardware to
//! networked applications via OSC.
//!
//! One binary plays all three process roles described by the protocol
//! (supervisor, detector, device server); `--mode` selects which.

mod cli;
mod detector;
mod device;
mod device_server;
mod ipc;
mod supervisor;

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Mode};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let args = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    // Log messages from the log crate as well.
    tracing_log::LogTracer::init()?;

    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(supervisor::default_config_dir);

    match args.mode {
        Mode::Supervisor => supervisor::run(&config_dir),
        Mode::Detector => detector::run(&mut io::stdout()),
        Mode::Device => {
            let devnode = args
                .devnode
                .as_ref()
                .context("--mode device requires a devnode argument")?;
            let mut handle = device::open_device(&devnode.to_string_lossy())
                .context("failed to open device")?;
            device_server::run(handle.as_mut(), &config_dir)
        }
    }
}
