//! Simulated glitch device
//!
//! Parses host traffic the way the FPGA firmware does and answers an armed
//! trigger with a canned response when the active combo falls inside a hit
//! window. Write faults can be injected to exercise recovery paths.

use super::{Channel, TransportError};
use crate::core::combo::{Combo, ParamRange};
use crate::core::protocol::glitch::{decode_config_packet, decode_mode, ModeFlags, CONFIG_PACKET_LEN};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::time::Duration;

/// Throughput reported by the simulator; high enough that pacing is negligible
const SIMULATED_THROUGHPUT: u32 = 1_000_000;

/// Combos for which the simulated target "glitches"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitPredicate {
    /// Accepted trigger counts
    pub trigger_counts: ParamRange,
    /// Accepted delays
    pub delays: ParamRange,
    /// Accepted durations
    pub durations: ParamRange,
}

impl HitPredicate {
    /// Window over delay and duration, any trigger count
    pub fn window(delays: ParamRange, durations: ParamRange) -> Self {
        Self {
            trigger_counts: ParamRange::new(0, u32::MAX),
            delays,
            durations,
        }
    }

    /// Matches every combo
    pub fn any() -> Self {
        Self::window(ParamRange::new(0, u32::MAX), ParamRange::new(0, u32::MAX))
    }

    /// Whether `combo` lies inside the window
    pub fn matches(&self, combo: &Combo) -> bool {
        let within = |r: &ParamRange, v: u32| (r.start..=r.end).contains(&v);
        within(&self.trigger_counts, combo.trigger_count)
            && within(&self.delays, combo.delay)
            && within(&self.durations, combo.duration)
    }
}

/// Decoded host traffic, in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    /// A control byte
    Mode(ModeFlags),
    /// A complete config packet
    Config {
        /// Power flag in the packet header
        power: bool,
        /// Decoded parameters
        combo: Combo,
    },
}

/// In-process stand-in for the glitcher hardware
#[derive(Debug)]
pub struct SimulatedDevice {
    hit: Option<HitPredicate>,
    response: Bytes,
    throughput: u32,
    frame: Vec<u8>,
    active: Option<Combo>,
    inbound: BytesMut,
    events: Vec<WireEvent>,
    writes: usize,
    failing_writes: HashSet<usize>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Device that never reports a glitch
    pub fn new() -> Self {
        Self {
            hit: None,
            response: Bytes::from_static(b"GLITCHED\n"),
            throughput: SIMULATED_THROUGHPUT,
            frame: Vec::with_capacity(CONFIG_PACKET_LEN),
            active: None,
            inbound: BytesMut::new(),
            events: Vec::new(),
            writes: 0,
            failing_writes: HashSet::new(),
        }
    }

    /// Answer triggers whose combo matches `hit`
    #[must_use]
    pub fn with_hit(mut self, hit: HitPredicate) -> Self {
        self.hit = Some(hit);
        self
    }

    /// Bytes sent back on a hit
    #[must_use]
    pub fn with_response(mut self, response: &[u8]) -> Self {
        self.response = Bytes::copy_from_slice(response);
        self
    }

    /// Override the reported throughput
    #[must_use]
    pub fn with_throughput(mut self, throughput: u32) -> Self {
        self.throughput = throughput;
        self
    }

    /// Make the `n`-th write call (1-based) fail with an I/O error
    #[must_use]
    pub fn fail_write(mut self, n: usize) -> Self {
        self.failing_writes.insert(n);
        self
    }

    /// Queue bytes as if the target had sent them
    pub fn inject_input(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Everything decoded from host traffic so far
    pub fn events(&self) -> &[WireEvent] {
        &self.events
    }

    /// Config packets received so far
    pub fn configs(&self) -> Vec<Combo> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WireEvent::Config { combo, .. } => Some(*combo),
                WireEvent::Mode(_) => None,
            })
            .collect()
    }

    /// The most recent control byte
    pub fn last_mode(&self) -> Option<ModeFlags> {
        self.events.iter().rev().find_map(|e| match e {
            WireEvent::Mode(mode) => Some(*mode),
            WireEvent::Config { .. } => None,
        })
    }

    /// Number of write calls seen, failed ones included
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Bytes waiting to be read by the host
    pub fn pending_input(&self) -> usize {
        self.inbound.len()
    }

    fn feed(&mut self, byte: u8) {
        if let Some(mode) = decode_mode(byte) {
            self.frame.clear();
            self.frame.push(byte);
            self.events.push(WireEvent::Mode(mode));
            if mode.trigger {
                self.fire();
            }
            return;
        }

        // Data bytes outside a config frame are dropped by the firmware
        if self.frame.is_empty() {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == CONFIG_PACKET_LEN {
            if let Some((power, combo)) = decode_config_packet(&self.frame) {
                self.active = Some(combo);
                self.events.push(WireEvent::Config { power, combo });
            }
            self.frame.clear();
        }
    }

    fn fire(&mut self) {
        let hit = match (&self.hit, &self.active) {
            (Some(predicate), Some(combo)) => predicate.matches(combo),
            _ => false,
        };
        if hit {
            let response = self.response.clone();
            self.inbound.extend_from_slice(&response);
        }
    }
}

#[async_trait]
impl Channel for SimulatedDevice {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.writes += 1;
        if self.failing_writes.contains(&self.writes) {
            return Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write fault",
            )));
        }
        for &byte in data {
            self.feed(byte);
        }
        Ok(())
    }

    async fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Bytes, TransportError> {
        let n = max_bytes.min(self.inbound.len());
        Ok(self.inbound.split_to(n).freeze())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn throughput(&self) -> u32 {
        self.throughput
    }

    fn connection_info(&self) -> String {
        match &self.hit {
            Some(hit) => format!(
                "simulated device (hits: delay {} duration {})",
                hit.delays, hit.durations
            ),
            None => "simulated device".to_string(),
        }
    }
}
