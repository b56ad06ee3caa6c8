//! Sony SIRC frame encoding.
//!
//! Frames are produced as alternating mark/space durations in microseconds,
//! starting with a mark. The transmitter modulates marks onto the carrier and
//! idles low afterwards, so a frame always ends on a mark.

use thiserror::Error;

use crate::config::CameraRemoteConfig;

pub const SIRC_CARRIER_KHZ: u32 = 40;
pub const SIRC_UNIT_US: u16 = 600;
pub const SIRC_HEADER_MARK_US: u16 = 4 * SIRC_UNIT_US;
pub const SIRC_ONE_MARK_US: u16 = 2 * SIRC_UNIT_US;
pub const SIRC_ZERO_MARK_US: u16 = SIRC_UNIT_US;
pub const SIRC_SPACE_US: u16 = SIRC_UNIT_US;
/// Start-to-start spacing of repeated frames.
pub const SIRC_FRAME_PERIOD_MS: u64 = 45;

const COMMAND_BITS: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SircError {
    #[error("unsupported SIRC bit length {0} (expected 12, 15 or 20)")]
    BitLength(u8),
    #[error("SIRC command {0:#x} does not fit in 7 bits")]
    Command(u8),
    #[error("SIRC address {address:#x} does not fit in {bits} bits")]
    Address { address: u16, bits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SircCode {
    address: u16,
    command: u8,
    bits: u8,
}

impl SircCode {
    pub fn new(address: u16, command: u8, bits: u8) -> Result<Self, SircError> {
        if !matches!(bits, 12 | 15 | 20) {
            return Err(SircError::BitLength(bits));
        }
        if command >= 1 << COMMAND_BITS {
            return Err(SircError::Command(command));
        }

        let address_bits = bits - COMMAND_BITS;
        if u32::from(address) >= 1_u32 << address_bits {
            return Err(SircError::Address {
                address,
                bits: address_bits,
            });
        }

        Ok(Self {
            address,
            command,
            bits,
        })
    }

    pub fn from_config(camera: &CameraRemoteConfig) -> Result<Self, SircError> {
        Self::new(camera.address, camera.command, camera.bits)
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Bits on the wire, sent least significant first: command, then address.
    pub fn payload(&self) -> u32 {
        (u32::from(self.address) << COMMAND_BITS) | u32::from(self.command)
    }

    pub fn frame_timings(&self) -> Vec<u16> {
        let mut timings = Vec::with_capacity(2 + usize::from(self.bits) * 2);
        timings.push(SIRC_HEADER_MARK_US);
        timings.push(SIRC_SPACE_US);

        let payload = self.payload();
        for bit in 0..self.bits {
            if bit > 0 {
                timings.push(SIRC_SPACE_US);
            }
            timings.push(if payload & (1 << bit) != 0 {
                SIRC_ONE_MARK_US
            } else {
                SIRC_ZERO_MARK_US
            });
        }

        timings
    }

    pub fn frame_duration_us(&self) -> u64 {
        self.frame_timings().iter().map(|&us| u64::from(us)).sum()
    }

    /// Idle time after a frame before the next repeat starts.
    pub fn repeat_gap_ms(&self) -> u64 {
        let frame_ms = self.frame_duration_us().div_ceil(1_000);
        SIRC_FRAME_PERIOD_MS.saturating_sub(frame_ms)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode(timings: &[u16]) -> u32 {
        timings[2..]
            .iter()
            .step_by(2)
            .enumerate()
            .fold(0, |acc, (bit, &mark)| {
                if mark == SIRC_ONE_MARK_US {
                    acc | (1 << bit)
                } else {
                    acc
                }
            })
    }

    #[test]
    fn camera_code_encodes_lsb_first() {
        let code = SircCode::from_config(&CameraRemoteConfig::default()).unwrap();
        let timings = code.frame_timings();

        assert_eq!(code.payload(), (0x1E3A << 7) | 0x2D);
        assert_eq!(timings.len(), 2 + 20 * 2 - 1);
        assert_eq!(&timings[..2], &[2_400, 600]);
        assert_eq!(decode(&timings), code.payload());
        // 0x2D = 0b010_1101: first bits on the wire are 1, 0, 1, 1.
        assert_eq!(&timings[2..9], &[1_200, 600, 600, 600, 1_200, 600, 1_200]);
    }

    #[test]
    fn spaces_are_one_unit() {
        let timings = SircCode::new(0x01, 0x15, 12).unwrap().frame_timings();

        for space in timings.iter().skip(1).step_by(2) {
            assert_eq!(*space, SIRC_SPACE_US);
        }
        assert_eq!(timings.len() % 2, 1);
    }

    #[test]
    fn repeat_gap_fills_frame_period() {
        let code = SircCode::new(0x01, 0x15, 12).unwrap();
        // Payload 0x95: header 3000 us, 4 one-marks, 8 zero-marks, 11 spaces.
        assert_eq!(code.frame_duration_us(), 3_000 + 4 * 1_200 + 8 * 600 + 11 * 600);
        assert_eq!(code.repeat_gap_ms(), 45 - 20);

        let camera = SircCode::from_config(&CameraRemoteConfig::default()).unwrap();
        let frame_ms = camera.frame_duration_us().div_ceil(1_000);
        assert_eq!(frame_ms + camera.repeat_gap_ms(), SIRC_FRAME_PERIOD_MS);
    }

    #[test]
    fn rejects_codes_that_do_not_fit() {
        assert_eq!(SircCode::new(0, 0, 16), Err(SircError::BitLength(16)));
        assert_eq!(SircCode::new(0, 0x80, 12), Err(SircError::Command(0x80)));
        assert_eq!(
            SircCode::new(0x20, 0x01, 12),
            Err(SircError::Address {
                address: 0x20,
                bits: 5
            })
        );
        assert_eq!(
            SircCode::new(0x2000, 0x01, 20),
            Err(SircError::Address {
                address: 0x2000,
                bits: 13
            })
        );
        assert!(SircCode::new(0xFF, 0x7F, 15).is_ok());
    }
}
