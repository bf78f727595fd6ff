//! Serial port transport implementation

use super::{Channel, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Baud rate the glitcher firmware UART runs at
pub const DEFAULT_BAUD_RATE: u32 = 28800;

/// Start bit + 8 data bits + stop bit
const BITS_PER_FRAME: u32 = 10;

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a new serial configuration
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE)
    }
}

/// Serial port channel, 8N1 without flow control
pub struct SerialChannel {
    config: SerialConfig,
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Open the port described by `config`
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        tracing::info!("Opened {} @ {} baud", config.port, config.baud_rate);

        Ok(Self { config, port })
    }
}

#[async_trait]
impl Channel for SerialChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data).map_err(TransportError::IoError)
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut received = BytesMut::new();
        let mut buffer = vec![0u8; 4096];

        while received.len() < max_bytes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port
                .set_timeout(remaining)
                .map_err(|e| TransportError::IoError(e.into()))?;

            let want = buffer.len().min(max_bytes - received.len());
            match self.port.read(&mut buffer[..want]) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buffer[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(TransportError::IoError(e)),
            }
        }

        Ok(received.freeze())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.port.flush().map_err(TransportError::IoError)
    }

    fn throughput(&self) -> u32 {
        self.config.baud_rate / BITS_PER_FRAME
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.config.port, self.config.baud_rate)
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
