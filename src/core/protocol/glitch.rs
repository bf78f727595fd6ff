//! Glitcher wire protocol
//!
//! The firmware parses two kinds of bytes. A control byte has bit 7 set
//! and carries the mode flags in bits 4..0. Data bytes have bit 7 clear
//! and carry 7 payload bits each. A config packet is one control byte
//! followed by six data bytes:
//!
//! | byte | content                    |
//! |------|----------------------------|
//! | 0    | mode (power flag only)     |
//! | 1..4 | `delay - 1`, 7 bits each, least significant first |
//! | 4    | `duration - 1`             |
//! | 5..7 | `trigger_count`, 7 bits each, least significant first |
//!
//! `delay` and `duration` go out minus one because the firmware spends one
//! cycle processing before it starts counting.

use crate::core::combo::Combo;
use crate::core::error::GlitchError;

/// Marks a control byte
pub const CONTROL_BIT: u8 = 0x80;
/// Payload bits of a data byte
pub const DATA_MASK: u8 = 0x7F;
/// Length of a config packet
pub const CONFIG_PACKET_LEN: usize = 7;

/// Mode flags carried by a control byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ModeFlags {
    /// Glitch output asserted
    pub power: bool,
    /// Trigger armed
    pub trigger: bool,
    /// Re-arm after each glitch
    pub retrigger: bool,
    /// Trigger already fired
    pub triggered: bool,
    /// Keep the trigger active after firing
    pub trigger_stay_active: bool,
}

impl ModeFlags {
    /// Flags with only `power` set as given
    pub fn power(power: bool) -> Self {
        Self {
            power,
            ..Self::default()
        }
    }

    /// Pack into a control byte
    pub fn encode(&self) -> u8 {
        encode_mode(
            self.power,
            self.trigger,
            self.retrigger,
            self.triggered,
            self.trigger_stay_active,
        )
    }
}

/// Pack mode flags into a control byte
#[allow(clippy::fn_params_excessive_bools)]
pub fn encode_mode(
    power: bool,
    trigger: bool,
    retrigger: bool,
    triggered: bool,
    trigger_stay_active: bool,
) -> u8 {
    CONTROL_BIT
        | u8::from(trigger_stay_active) << 4
        | u8::from(triggered) << 3
        | u8::from(retrigger) << 2
        | u8::from(trigger) << 1
        | u8::from(power)
}

/// Unpack a control byte. Returns `None` for data bytes.
pub fn decode_mode(byte: u8) -> Option<ModeFlags> {
    if byte & CONTROL_BIT == 0 {
        return None;
    }
    Some(ModeFlags {
        power: byte & 0x01 != 0,
        trigger: byte & 0x02 != 0,
        retrigger: byte & 0x04 != 0,
        triggered: byte & 0x08 != 0,
        trigger_stay_active: byte & 0x10 != 0,
    })
}

/// Encode the config packet for `combo`.
///
/// Out-of-range fields are rejected, never truncated.
pub fn encode_config_packet(
    combo: &Combo,
    power: bool,
) -> Result<[u8; CONFIG_PACKET_LEN], GlitchError> {
    combo.validate()?;

    let delay = combo.delay - 1;
    let duration = combo.duration - 1;
    let trigger_count = combo.trigger_count;

    let packet = [
        ModeFlags::power(power).encode(),
        seven_bits(delay),
        seven_bits(delay >> 7),
        seven_bits(delay >> 14),
        seven_bits(duration),
        seven_bits(trigger_count),
        seven_bits(trigger_count >> 7),
    ];

    if packet[0] & CONTROL_BIT == 0 || packet[1..].iter().any(|b| b & CONTROL_BIT != 0) {
        return Err(GlitchError::EncodingInvariantViolation(format!(
            "bad framing for {}: {}",
            combo,
            hex::encode(packet)
        )));
    }

    Ok(packet)
}

/// Control byte arming the trigger; `power` follows the crowbar wiring
pub fn encode_trigger_enable(crowbar: bool) -> u8 {
    ModeFlags {
        power: crowbar,
        trigger: true,
        ..ModeFlags::default()
    }
    .encode()
}

/// Control byte returning the device to idle with the given power state
pub fn encode_reset(power: bool) -> u8 {
    ModeFlags::power(power).encode()
}

/// Decode a config packet back into its power flag and combo
pub fn decode_config_packet(packet: &[u8]) -> Option<(bool, Combo)> {
    if packet.len() != CONFIG_PACKET_LEN {
        return None;
    }
    let mode = decode_mode(packet[0])?;
    if packet[1..].iter().any(|b| b & CONTROL_BIT != 0) {
        return None;
    }

    let field = |bytes: &[u8]| {
        bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| acc << 7 | u32::from(b & DATA_MASK))
    };

    let combo = Combo::new(
        field(&packet[5..7]),
        field(&packet[1..4]) + 1,
        field(&packet[4..5]) + 1,
    );
    Some((mode.power, combo))
}

fn seven_bits(value: u32) -> u8 {
    (value & u32::from(DATA_MASK)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::combo::{DELAY_MAX, DURATION_MAX, TRIGGER_COUNT_MAX};

    #[test]
    fn test_mode_bit_placement() {
        assert_eq!(encode_mode(false, false, false, false, false), 0x80);
        assert_eq!(encode_mode(true, false, false, false, false), 0x81);
        assert_eq!(encode_mode(false, true, false, false, false), 0x82);
        assert_eq!(encode_mode(false, false, true, false, false), 0x84);
        assert_eq!(encode_mode(false, false, false, true, false), 0x88);
        assert_eq!(encode_mode(false, false, false, false, true), 0x90);
        assert_eq!(encode_mode(true, true, true, true, true), 0x9F);
    }

    #[test]
    fn test_decode_mode() {
        assert_eq!(decode_mode(0x7F), None);
        for byte in 0x80..=0x9Fu8 {
            assert_eq!(decode_mode(byte).map(|m| m.encode()), Some(byte));
        }
    }

    #[test]
    fn test_trigger_and_reset_bytes() {
        assert_eq!(encode_trigger_enable(false), 0x82);
        assert_eq!(encode_trigger_enable(true), 0x83);
        assert_eq!(encode_reset(false), 0x80);
        assert_eq!(encode_reset(true), 0x81);
    }

    #[test]
    fn test_example_packet() {
        let combo = Combo::new(5, 100, 10);
        // delay-1 = 99 fits in the low group
        let expected_tail: [u8; 6] = [99, 0, 0, 9, 5, 0];

        let packet = encode_config_packet(&combo, true).unwrap();
        assert_eq!(packet[0], 0x81);
        assert_eq!(packet[1..], expected_tail);

        let packet = encode_config_packet(&combo, false).unwrap();
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1..], expected_tail);
    }

    #[test]
    fn test_minimums_serialize_as_zero() {
        let packet = encode_config_packet(&Combo::new(0, 1, 1), false).unwrap();
        assert_eq!(packet, [0x80, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_maximums_fill_all_bits() {
        let combo = Combo::new(TRIGGER_COUNT_MAX, DELAY_MAX, DURATION_MAX);
        let packet = encode_config_packet(&combo, false).unwrap();
        assert_eq!(packet, [0x80, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F, 0x7F]);
    }

    #[test]
    fn test_data_bytes_never_look_like_control() {
        let delays = [1, 2, 127, 128, 129, 16_383, 16_384, 16_385, 1_000_000, DELAY_MAX];
        let durations = [1, 2, 64, 127, DURATION_MAX];
        let triggers = [0, 1, 127, 128, 8_191, TRIGGER_COUNT_MAX];

        for &delay in &delays {
            for &duration in &durations {
                for &trigger_count in &triggers {
                    let combo = Combo::new(trigger_count, delay, duration);
                    let packet = encode_config_packet(&combo, false).unwrap();
                    assert_eq!(packet.len(), CONFIG_PACKET_LEN);
                    assert!(packet[1..].iter().all(|b| b & CONTROL_BIT == 0));

                    let (power, decoded) = decode_config_packet(&packet).unwrap();
                    assert!(!power);
                    assert_eq!(decoded, combo);
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        let bad = [
            Combo::new(0, 0, 1),
            Combo::new(0, DELAY_MAX + 1, 1),
            Combo::new(0, 1, 0),
            Combo::new(0, 1, 129),
            Combo::new(1 << 14, 1, 1),
        ];
        for combo in &bad {
            assert!(matches!(
                encode_config_packet(combo, false),
                Err(GlitchError::InvalidParameterRange { .. })
            ));
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode_config_packet(&[0x80, 0, 0]), None);
        assert_eq!(decode_config_packet(&[0x00, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(decode_config_packet(&[0x80, 0, 0x80, 0, 0, 0, 0]), None);
    }
}
