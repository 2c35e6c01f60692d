//! This module implements the CLI interface.
//!
//! One binary backs all three process roles (spec §6); `--mode` picks which
//! one this invocation plays. The supervisor re-executes itself with
//! `--mode detector` and `--mode device <devnode>` instead of forking, so
//! this same parsing path is shared across all three.
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Enable verbose logging. Can be specified multiple times to
    /// increase verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Which of the three process roles to run.
    #[arg(long, value_enum, default_value = "supervisor")]
    pub mode: Mode,

    /// Device node to open, e.g. `/dev/ttyUSB0`. Required for `--mode device`,
    /// ignored otherwise.
    #[arg(required_if_eq("mode", "device"))]
    pub devnode: Option<PathBuf>,

    /// Directory holding per-device configuration files. Defaults to a
    /// platform-specific config directory (see `supervisor::default_config_dir`).
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Root process: owns the device table and the supervisor OSC port.
    Supervisor,
    /// Watches for device arrivals and reports them upstream.
    Detector,
    /// Owns one device and its OSC endpoint.
    Device,
}
