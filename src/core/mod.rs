//! Core module containing the main functionality of Glitcher
//!
//! This module provides:
//! - Transport layer (serial port, simulated device)
//! - Glitch protocol codec
//! - Combo data model and sources
//! - Device session
//! - Sweep controller
//! - Result recording

pub mod combo;
pub mod error;
pub mod protocol;
pub mod results;
pub mod session;
pub mod sweep;
pub mod transport;
