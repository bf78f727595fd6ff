//! Protocol implementations
//!
//! Provides the encoder for the glitcher FPGA control protocol: mode bytes
//! and the 7-byte glitch parameter packet, plus decoders used by the
//! simulated device.

pub mod glitch;

pub use glitch::{
    decode_config_packet, decode_mode, encode_config_packet, encode_mode, encode_reset,
    encode_trigger_enable, ModeFlags, CONFIG_PACKET_LEN,
};
