//! Transport layer for the glitch device link
//!
//! Supports:
//! - Serial ports (USB-Serial adapters wired to the glitcher FPGA)
//! - A simulated device speaking the same wire protocol, for tests and dry runs

mod serial;
mod simulated;

pub use serial::{list_ports, SerialChannel, SerialConfig, DEFAULT_BAUD_RATE};
pub use simulated::{HitPredicate, SimulatedDevice, WireEvent};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// Duplex byte channel to the glitch device.
///
/// Reads are always bounded by both a byte cap and a timeout, so no call
/// blocks indefinitely. Implementations report their nominal throughput so
/// callers can pace writes to what the firmware can consume.
#[async_trait]
pub trait Channel: Send {
    /// Write all bytes to the channel
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_bytes`, returning whatever arrived before `timeout` (possibly nothing)
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Flush buffered output to the device
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Nominal throughput in bytes per second
    fn throughput(&self) -> u32;

    /// Get connection info string
    fn connection_info(&self) -> String;
}

/// Time the firmware needs to consume `len` bytes at `throughput` bytes/s.
pub fn pacing_delay(len: usize, throughput: u32) -> Duration {
    if throughput == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / f64::from(throughput))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_delay() {
        assert_eq!(pacing_delay(7, 2880), Duration::from_secs_f64(7.0 / 2880.0));
        assert_eq!(pacing_delay(0, 2880), Duration::ZERO);
        assert_eq!(pacing_delay(7, 0), Duration::ZERO);
    }
}
