//! Error taxonomy for glitch attempts

use super::transport::TransportError;
use thiserror::Error;

/// Errors raised while configuring or driving a glitch attempt
#[derive(Error, Debug)]
pub enum GlitchError {
    /// A combo field lies outside its wire bit-width range
    #[error("{field} = {value} out of range ({min}..={max})")]
    InvalidParameterRange {
        /// Offending field name
        field: &'static str,
        /// Supplied value
        value: u32,
        /// Smallest accepted value
        min: u32,
        /// Largest accepted value
        max: u32,
    },

    /// I/O failure on the device channel
    #[error("transport fault: {0}")]
    TransportFault(#[from] TransportError),

    /// Encoder produced a frame the firmware would misparse. Programming error.
    #[error("encoding invariant violated: {0}")]
    EncodingInvariantViolation(String),
}

impl GlitchError {
    /// Whether the sweep can skip this attempt and continue
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EncodingInvariantViolation(_))
    }
}
