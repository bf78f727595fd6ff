//! Device session
//!
//! A `DeviceSession` owns the channel to the glitcher and sequences the
//! writes and reads a single attempt needs. Every write is flushed and then
//! paced so the firmware has consumed it before the next one goes out.

use super::combo::Combo;
use super::error::GlitchError;
use super::protocol::glitch::{encode_config_packet, encode_reset, encode_trigger_enable};
use super::transport::{pacing_delay, Channel};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on bytes discarded by one drain
pub const DRAIN_CAP: usize = 1_000_000;

/// Upper bound on bytes read by one result check
pub const CHECK_CAP: usize = 4096;

/// Default read timeout for drains and checks
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Session settings, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Glitch output shorts supply to ground; resting state is unshorted
    pub crowbar: bool,
    /// Cut target power between attempts. Implied by `crowbar`.
    pub power_reset: bool,
    /// Shuffle the combo order once before the sweep
    pub randomize: bool,
    /// Attempts per combo
    pub repeats_per_combo: u32,
    /// Combos between progress reports
    pub progress_interval: u32,
    /// Shuffle seed; fresh entropy when unset
    pub seed: Option<u64>,
    /// Stop the sweep after this many back-to-back transport faults
    pub max_consecutive_faults: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            crowbar: false,
            power_reset: false,
            randomize: false,
            repeats_per_combo: 3,
            progress_interval: 10,
            seed: None,
            max_consecutive_faults: None,
        }
    }
}

impl SessionConfig {
    /// Default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set crowbar wiring
    #[must_use]
    pub fn crowbar(mut self, enable: bool) -> Self {
        self.crowbar = enable;
        self
    }

    /// Set power reset between attempts
    #[must_use]
    pub fn power_reset(mut self, enable: bool) -> Self {
        self.power_reset = enable;
        self
    }

    /// Set combo shuffling
    #[must_use]
    pub fn randomize(mut self, enable: bool) -> Self {
        self.randomize = enable;
        self
    }

    /// Set attempts per combo
    #[must_use]
    pub fn repeats_per_combo(mut self, repeats: u32) -> Self {
        self.repeats_per_combo = repeats;
        self
    }

    /// Set combos between progress reports
    #[must_use]
    pub fn progress_interval(mut self, interval: u32) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set shuffle seed
    #[must_use]
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Set the consecutive fault limit
    #[must_use]
    pub fn max_consecutive_faults(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_faults = limit;
        self
    }

    /// Whether power is cut between attempts, accounting for crowbar wiring
    pub fn resets_power(&self) -> bool {
        self.crowbar || self.power_reset
    }

    /// Power flag of the idle state between attempts
    pub fn resting_power(&self) -> bool {
        !self.resets_power()
    }

    /// Power flag that leaves the target unglitched once the session ends
    pub fn safe_power(&self) -> bool {
        !self.crowbar
    }
}

/// Stateful operations against one glitch device
pub struct DeviceSession<C: Channel> {
    channel: C,
    config: SessionConfig,
    read_timeout: Duration,
}

impl<C: Channel> DeviceSession<C> {
    /// Take ownership of `channel` for the session's lifetime
    pub fn new(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the timeout for drains and checks
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Release the channel
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Load `combo` into the device.
    ///
    /// The combo is encoded before anything is written, so an invalid combo
    /// leaves the channel untouched.
    pub async fn apply(&mut self, combo: &Combo) -> Result<(), GlitchError> {
        let packet = encode_config_packet(combo, self.config.resting_power())?;

        self.reset().await?;
        self.drain_input().await?;
        tracing::debug!("config {} -> {}", combo, hex::encode(packet));
        self.write(&packet).await
    }

    /// Arm the trigger
    pub async fn arm_trigger(&mut self) -> Result<(), GlitchError> {
        self.write(&[encode_trigger_enable(self.config.crowbar)]).await
    }

    /// Return to idle with the resting power state
    pub async fn reset(&mut self) -> Result<(), GlitchError> {
        self.reset_with_power(self.config.resting_power()).await
    }

    /// Return to idle with an explicit power state
    pub async fn reset_with_power(&mut self, power: bool) -> Result<(), GlitchError> {
        self.write(&[encode_reset(power)]).await
    }

    /// Final reset leaving the target in its safe, unglitched state
    pub async fn shutdown(&mut self) -> Result<(), GlitchError> {
        self.reset().await?;
        self.reset_with_power(self.config.safe_power()).await?;
        tracing::info!(
            "Device reset to safe idle (power={}) on {}",
            self.config.safe_power(),
            self.channel.connection_info()
        );
        Ok(())
    }

    /// Discard stale inbound bytes; returns how many were dropped
    pub async fn drain_input(&mut self) -> Result<usize, GlitchError> {
        let stale = self.channel.read(DRAIN_CAP, self.read_timeout).await?;
        if !stale.is_empty() {
            tracing::debug!("drained {} stale bytes", stale.len());
        }
        Ok(stale.len())
    }

    /// Read whatever the target reported for this attempt
    pub async fn check(&mut self) -> Result<Bytes, GlitchError> {
        Ok(self.channel.read(CHECK_CAP, self.read_timeout).await?)
    }

    async fn write(&mut self, packet: &[u8]) -> Result<(), GlitchError> {
        self.channel.write(packet).await?;
        self.channel.flush().await?;
        let pause = pacing_delay(packet.len(), self.channel.throughput());
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::glitch::ModeFlags;
    use crate::core::transport::{SimulatedDevice, TransportError, WireEvent};
    use async_trait::async_trait;
    use mockall::{mock, Sequence};

    mock! {
        Link {}

        #[async_trait]
        impl Channel for Link {
            async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
            async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Bytes, TransportError>;
            async fn flush(&mut self) -> Result<(), TransportError>;
            fn throughput(&self) -> u32;
            fn connection_info(&self) -> String;
        }
    }

    fn quiet_link() -> MockLink {
        let mut link = MockLink::new();
        link.expect_flush().returning(|| Ok(()));
        link.expect_throughput().return_const(1_000_000u32);
        link.expect_connection_info().return_const("mock".to_string());
        link
    }

    #[test]
    fn test_crowbar_implies_power_reset() {
        let config = SessionConfig::new().crowbar(true);
        assert!(config.resets_power());
        assert!(!config.resting_power());
        assert!(!config.safe_power());

        let config = SessionConfig::new();
        assert!(config.resting_power());
        assert!(config.safe_power());
    }

    #[tokio::test]
    async fn test_apply_sequence() {
        let mut link = quiet_link();
        let mut seq = Sequence::new();

        link.expect_write()
            .withf(|data: &[u8]| data == &[0x81][..])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        link.expect_read()
            .withf(|max, _| *max == DRAIN_CAP)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Bytes::from_static(b"stale")));
        link.expect_write()
            .withf(|data: &[u8]| data == &[0x81, 99, 0, 0, 9, 5, 0][..])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut session = DeviceSession::new(link, SessionConfig::new());
        session.apply(&Combo::new(5, 100, 10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_combo_writes_nothing() {
        let mut link = quiet_link();
        link.expect_write().never();
        link.expect_read().never();

        let mut session = DeviceSession::new(link, SessionConfig::new());
        let err = session.apply(&Combo::new(5, 0, 10)).await.unwrap_err();
        assert!(matches!(err, GlitchError::InvalidParameterRange { field: "delay", .. }));
    }

    #[tokio::test]
    async fn test_write_fault_surfaces_as_transport_fault() {
        let mut link = quiet_link();
        link.expect_write().returning(|_| {
            Err(TransportError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gone",
            )))
        });

        let mut session = DeviceSession::new(link, SessionConfig::new());
        let err = session.arm_trigger().await.unwrap_err();
        assert!(matches!(err, GlitchError::TransportFault(_)));
    }

    #[tokio::test]
    async fn test_power_polarity_follows_wiring() {
        let config = SessionConfig::new().power_reset(true);
        let mut session = DeviceSession::new(SimulatedDevice::new(), config);
        session.apply(&Combo::new(0, 1, 1)).await.unwrap();
        session.arm_trigger().await.unwrap();

        let events = session.channel().events().to_vec();
        assert_eq!(events[0], WireEvent::Mode(ModeFlags::power(false)));
        assert_eq!(
            events[2],
            WireEvent::Config {
                power: false,
                combo: Combo::new(0, 1, 1)
            }
        );
        assert_eq!(
            events[3],
            WireEvent::Mode(ModeFlags {
                trigger: true,
                ..ModeFlags::default()
            })
        );
    }

    #[tokio::test]
    async fn test_crowbar_shutdown_leaves_unshorted() {
        let config = SessionConfig::new().crowbar(true);
        let mut session = DeviceSession::new(SimulatedDevice::new(), config);
        session.arm_trigger().await.unwrap();
        assert!(session.channel().last_mode().unwrap().power);

        session.shutdown().await.unwrap();
        assert_eq!(session.channel().last_mode(), Some(ModeFlags::power(false)));
    }

    #[tokio::test]
    async fn test_drain_then_check() {
        let mut device = SimulatedDevice::new();
        device.inject_input(b"leftover");
        let mut session = DeviceSession::new(device, SessionConfig::new());

        assert_eq!(session.drain_input().await.unwrap(), 8);
        assert!(session.check().await.unwrap().is_empty());
    }
}
