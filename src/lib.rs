//! # Glitcher Core Library
//!
//! Drives a voltage/clock fault-injection ("glitching") FPGA over a serial
//! link and sweeps its parameter space:
//! - Wire protocol encoder for mode bytes and glitch parameter packets
//! - Combo sources (grid, seeded random subset, explicit list)
//! - Device session sequencing reset, config, trigger and result reads
//! - Sweep controller with per-combo repeats and transient fault recovery
//! - JSON-lines result recording
//!
//! ## Example
//!
//! ```rust,no_run
//! use glitcher_core::{
//!     run_sweep, DeviceSession, GridSweep, JsonLinesSink, ParamRange, SerialChannel,
//!     SerialConfig, SessionConfig,
//! };
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let channel = SerialChannel::open(SerialConfig::new("/dev/ttyUSB0", 28800))?;
//!     let mut session = DeviceSession::new(channel, SessionConfig::new().crowbar(true));
//!     let mut sink = JsonLinesSink::open("params.log")?;
//!
//!     let grid = GridSweep::new(
//!         ParamRange::single(0),
//!         ParamRange::new(100, 2000).step(10),
//!         ParamRange::new(1, 20),
//!     )?;
//!
//!     let cancel = Arc::new(AtomicBool::new(false));
//!     let summary = run_sweep(&mut session, &mut sink, &grid, cancel).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::AppConfig;
pub use crate::core::combo::{Combo, ComboList, ComboSource, GridSweep, ParamRange, RandomSweep};
pub use crate::core::error::GlitchError;
pub use crate::core::protocol::{encode_config_packet, encode_mode, ModeFlags};
pub use crate::core::results::{JsonLinesSink, MemorySink, ResultRecord, ResultSink, RunResult};
pub use crate::core::session::{DeviceSession, SessionConfig};
pub use crate::core::sweep::{
    run_sweep, AttemptOutcome, SkipReason, StopReason, SweepController, SweepSummary,
};
pub use crate::core::transport::{
    Channel, HitPredicate, SerialChannel, SerialConfig, SimulatedDevice, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
