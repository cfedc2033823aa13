//! Headset memory protocol.
//!
//! Kraken-family headsets speak a register protocol instead of the 90-byte
//! command format: a 37-byte output report (id 0x04) addressing RAM or
//! EEPROM, answered on a 33-byte input report (id 0x05). Effects are a bit
//! field at a RAM address that differs per hardware generation.

use std::time::Duration;

use crate::color::Color;
use crate::error::{Error, Result};
use crate::hardware::HeadsetVariant;
use crate::protocol::effects::EffectArgs;

use super::Driver;

pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(25);

pub const REPORT_OUT_ID: u8 = 0x04;
pub const REPORT_OUT_LEN: usize = 37;
pub const REPORT_IN_ID: u8 = 0x05;
pub const REPORT_IN_LEN: usize = 33;

/// Destination selector on byte 0 of the command.
pub const READ_RAM: u8 = 0x00;
pub const READ_EEPROM: u8 = 0x20;
pub const WRITE_RAM: u8 = 0x40;

// EEPROM
const ADDR_FIRMWARE_VERSION: u16 = 0x0030;
const ADDR_SERIAL_NUMBER: u16 = 0x7F00;

// RAM, per variant
const ADDR_KYLIE_LED_MODE: u16 = 0x172D;
const ADDR_KYLIE_BREATHING1: u16 = 0x1741;
const ADDR_RAINIE_LED_MODE: u16 = 0x1008;
const ADDR_RAINIE_BREATHING1: u16 = 0x15DE;

/// The effect mode on this hardware is a single bit-packed byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EffectBits {
    pub on: bool,
    pub breathe_single: bool,
    pub spectrum: bool,
    pub sync: bool,
    pub breathe_double: bool,
    pub breathe_triple: bool,
}

impl EffectBits {
    pub fn value(self) -> u8 {
        (self.on as u8)
            | (self.breathe_single as u8) << 1
            | (self.spectrum as u8) << 2
            | (self.sync as u8) << 3
            | (self.breathe_double as u8) << 4
            | (self.breathe_triple as u8) << 5
    }

    pub fn from_value(value: u8) -> Self {
        EffectBits {
            on: value & 0x01 != 0,
            breathe_single: value & 0x02 != 0,
            spectrum: value & 0x04 != 0,
            sync: value & 0x08 != 0,
            breathe_double: value & 0x10 != 0,
            breathe_triple: value & 0x20 != 0,
        }
    }

    fn for_colors(count: usize) -> Self {
        let mut bits = EffectBits {
            on: true,
            sync: true,
            ..Default::default()
        };
        match count {
            1 => bits.breathe_single = true,
            2 => bits.breathe_double = true,
            _ => bits.breathe_triple = true,
        }
        bits
    }
}

impl Driver {
    fn headset_variant(&self) -> Result<HeadsetVariant> {
        self.descriptor()
            .headset_variant
            .ok_or_else(|| Error::unsupported("device is not a headset"))
    }

    fn led_mode_addr(&self) -> Result<u16> {
        Ok(match self.headset_variant()? {
            HeadsetVariant::Kylie => ADDR_KYLIE_LED_MODE,
            HeadsetVariant::Rainie => ADDR_RAINIE_LED_MODE,
        })
    }

    fn breathing_addr(&self) -> Result<u16> {
        Ok(match self.headset_variant()? {
            HeadsetVariant::Kylie => ADDR_KYLIE_BREATHING1,
            HeadsetVariant::Rainie => ADDR_RAINIE_BREATHING1,
        })
    }

    /// Command layout: `[report id, destination, length, addr hi, addr lo,
    /// data...]` padded to the output report size.
    fn headset_report(destination: u8, length: u8, address: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; REPORT_OUT_LEN];
        buf[0] = REPORT_OUT_ID;
        buf[1] = destination;
        buf[2] = length;
        buf[3..5].copy_from_slice(&address.to_be_bytes());
        let end = (5 + data.len()).min(REPORT_OUT_LEN);
        buf[5..end].copy_from_slice(&data[..end - 5]);
        buf
    }

    async fn headset_read(&self, destination: u8, length: u8, address: u16) -> Result<Vec<u8>> {
        self.ensure_online()?;
        let mut op = self.transport().with_device().await;

        let request = Self::headset_report(destination, length, address, &[]);
        op.write_output(&request).await?;

        let raw = op.read_input(REPORT_IN_LEN).await?;
        if raw.first() != Some(&REPORT_IN_ID) {
            return Err(Error::protocol(format!(
                "unexpected headset report id {:02x?}",
                raw.first()
            )));
        }
        let end = (1 + length as usize).min(raw.len());
        Ok(raw[1..end].to_vec())
    }

    async fn headset_write(&self, address: u16, data: &[u8]) -> Result<()> {
        self.ensure_online()?;
        let mut op = self.transport().with_device().await;
        let report = Self::headset_report(WRITE_RAM, data.len() as u8, address, data);
        op.write_output(&report).await
    }

    pub(super) async fn headset_get_serial(&self) -> Result<String> {
        let raw = self.headset_read(READ_EEPROM, 0x16, ADDR_SERIAL_NUMBER).await?;
        let serial: String = raw
            .iter()
            .take_while(|b| **b != 0)
            .filter(|b| b.is_ascii_alphanumeric())
            .map(|b| *b as char)
            .collect();
        self.update_state(|s| s.serial = Some(serial.clone()));
        Ok(serial)
    }

    pub(super) async fn headset_get_firmware(&self) -> Result<(u8, u8)> {
        let raw = self
            .headset_read(READ_EEPROM, 0x02, ADDR_FIRMWARE_VERSION)
            .await?;
        if raw.len() < 2 {
            return Err(Error::protocol("firmware response too short"));
        }
        let version = (raw[0], raw[1]);
        self.update_state(|s| s.firmware = Some(version));
        Ok(version)
    }

    async fn headset_set_led_mode(&self, bits: EffectBits) -> Result<()> {
        let addr = self.led_mode_addr()?;
        self.headset_write(addr, &[bits.value()]).await
    }

    async fn headset_set_colors(&self, colors: &[Color]) -> Result<()> {
        let addr = self.breathing_addr()?;
        let mut data = Vec::with_capacity(colors.len() * 4);
        for color in colors {
            let [r, g, b] = color.to_rgb8();
            // intensity byte followed by the RGB triplet
            data.extend_from_slice(&[0xFF, r, g, b]);
        }
        self.headset_write(addr, &data).await
    }

    pub(super) async fn headset_set_effect(&self, name: &str, args: &EffectArgs) -> Result<()> {
        if !self.descriptor().supports_effect(name) {
            return Err(Error::unsupported(format!(
                "effect {name} not supported on {}",
                self.descriptor().name
            )));
        }

        match name {
            "disable" => {
                self.headset_set_led_mode(EffectBits {
                    spectrum: true,
                    ..Default::default()
                })
                .await?
            }
            "spectrum" => {
                self.headset_set_led_mode(EffectBits {
                    on: true,
                    spectrum: true,
                    ..Default::default()
                })
                .await?
            }
            "static" => {
                let color = args.colors.first().copied().unwrap_or(Color::GREEN);
                self.headset_set_colors(&[color]).await?;
                self.headset_set_led_mode(EffectBits {
                    on: true,
                    ..Default::default()
                })
                .await?;
            }
            "breathe" => {
                let colors: Vec<Color> = if args.colors.is_empty() {
                    vec![Color::RED, Color::GREEN, Color::BLUE]
                } else {
                    args.colors.clone()
                };
                self.headset_set_colors(&colors).await?;
                self.headset_set_led_mode(EffectBits::for_colors(colors.len()))
                    .await?;
            }
            other => {
                return Err(Error::unsupported(format!(
                    "effect {other} not supported on headsets"
                )));
            }
        }

        self.update_state(|s| {
            s.current_effect = if name == "disable" {
                None
            } else {
                Some((name.to_string(), args.clone()))
            };
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_bits_round_trip() {
        let bits = EffectBits {
            on: true,
            sync: true,
            breathe_double: true,
            ..Default::default()
        };
        assert_eq!(bits.value(), 0b0001_1001);
        assert_eq!(EffectBits::from_value(bits.value()), bits);
    }

    #[test]
    fn report_layout() {
        let report = Driver::headset_report(WRITE_RAM, 0x04, 0x1741, &[0xFF, 1, 2, 3]);
        assert_eq!(report.len(), REPORT_OUT_LEN);
        assert_eq!(report[0], REPORT_OUT_ID);
        assert_eq!(report[1], WRITE_RAM);
        assert_eq!(report[2], 0x04);
        assert_eq!(report[3], 0x17);
        assert_eq!(report[4], 0x41);
        assert_eq!(&report[5..9], &[0xFF, 1, 2, 3]);
    }
}
