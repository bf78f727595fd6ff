//! CLI Exit Codes
//!
//! Exit codes for sweeps run from scripts and automation.

use crate::config::ConfigError;
use crate::core::error::GlitchError;
use crate::core::results::SinkError;
use crate::core::sweep::{StopReason, SweepSummary};
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Sweep stopped on repeated transport faults
    pub const FAULT_LIMIT: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Map how a sweep ended onto an exit code
    pub fn from_summary(summary: &SweepSummary) -> Self {
        match summary.stop_reason {
            StopReason::Completed if summary.safe_reset_failed => {
                Self::Error(ExitCodes::CONNECTION_FAILED, summary.to_string())
            }
            StopReason::Completed => Self::success_with_message(summary.to_string()),
            StopReason::Cancelled => Self::Error(ExitCodes::CANCELLED, summary.to_string()),
            StopReason::FaultLimit => Self::Error(ExitCodes::FAULT_LIMIT, summary.to_string()),
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) => Some(msg),
            Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::ConnectionFailed(_) | TransportError::Disconnected => {
                ExitCodes::CONNECTION_FAILED
            }
            TransportError::IoError(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<GlitchError> for CliResult {
    fn from(err: GlitchError) -> Self {
        match err {
            GlitchError::TransportFault(e) => e.into(),
            GlitchError::InvalidParameterRange { .. } => {
                Self::Error(ExitCodes::INVALID_ARGS, err.to_string())
            }
            GlitchError::EncodingInvariantViolation(_) => {
                Self::Error(ExitCodes::INTERNAL_ERROR, err.to_string())
            }
        }
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                Self::Error(ExitCodes::FILE_NOT_FOUND, err.to_string())
            }
            _ => Self::Error(ExitCodes::CONFIG_ERROR, err.to_string()),
        }
    }
}

impl From<SinkError> for CliResult {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Io(ref e) => {
                let code = match e.kind() {
                    std::io::ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
                    std::io::ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
                    _ => ExitCodes::ERROR,
                };
                Self::Error(code, err.to_string())
            }
            _ => Self::Error(ExitCodes::ERROR, err.to_string()),
        }
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Transport fault limit reached",
        11 => "Operation cancelled",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 6, 7, 8, 9, 11, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
