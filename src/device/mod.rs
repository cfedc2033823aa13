//! Device drivers: live device state and command execution.

pub mod driver;
pub mod headset;
pub mod laptop;
pub mod thermal;
pub mod wireless;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::hardware::Led;
use crate::protocol::effects::EffectArgs;

pub use driver::Driver;
pub use thermal::{SysfsThermal, ThermalSource};

/// LED blink/pulse modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedMode {
    #[default]
    Static,
    Blink,
    Pulse,
    Spectrum,
}

impl LedMode {
    pub fn hardware_id(self) -> u8 {
        match self {
            LedMode::Static => 0x00,
            LedMode::Blink => 0x01,
            LedMode::Pulse => 0x02,
            LedMode::Spectrum => 0x04,
        }
    }
}

/// Cached state of one LED.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LedState {
    pub color: Color,
    pub on: bool,
    /// Percent, 0-100.
    pub brightness: f32,
    pub mode: LedMode,
}

impl Default for LedState {
    fn default() -> Self {
        LedState {
            color: Color::GREEN,
            on: true,
            brightness: 100.0,
            mode: LedMode::Static,
        }
    }
}

/// The subset of LED state touched by one `set_led` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedSettings {
    pub color: Option<Color>,
    pub on: Option<bool>,
    pub brightness: Option<f32>,
    pub mode: Option<LedMode>,
}

/// Wireless telemetry with staleness tracking. The cached values survive the
/// device going offline so property reads can keep answering.
#[derive(Clone, Copy, Debug, Default)]
pub struct Telemetry {
    pub battery: Option<f32>,
    pub charging: Option<bool>,
    pub stale: bool,
}

/// Mutable driver state, readable as a snapshot.
#[derive(Clone, Debug, Default)]
pub struct DeviceState {
    pub brightness: f32,
    pub suspended: bool,
    pub saved_brightness: f32,
    pub leds: HashMap<Led, LedState>,
    pub current_effect: Option<(String, EffectArgs)>,
    pub telemetry: Telemetry,
    pub serial: Option<String>,
    pub firmware: Option<(u8, u8)>,
}

/// Convert a 0-100 percentage to the hardware byte.
pub fn brightness_to_byte(pct: f32) -> u8 {
    let scaled = (pct.clamp(0.0, 100.0) as f64) * 2.55;
    scaled.round_ties_even() as u8
}

/// Convert the hardware byte back to a 0-100 percentage.
pub fn byte_to_brightness(byte: u8) -> f32 {
    (byte as f64 / 2.55) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_scaling_matches_hardware() {
        assert_eq!(brightness_to_byte(0.0), 0);
        assert_eq!(brightness_to_byte(100.0), 255);
        // round(75 * 2.55) = round(191.25) = 191
        assert_eq!(brightness_to_byte(75.0), 191);
        assert_eq!(brightness_to_byte(50.0), 128);
    }

    #[test]
    fn brightness_round_trips_within_one_percent() {
        for pct in 0..=100 {
            let byte = brightness_to_byte(pct as f32);
            let back = byte_to_brightness(byte);
            assert!(
                (back - pct as f32).abs() <= 1.0,
                "pct {pct} -> byte {byte} -> {back}"
            );
        }
    }

    #[test]
    fn led_mode_ids() {
        assert_eq!(LedMode::Static.hardware_id(), 0x00);
        assert_eq!(LedMode::Blink.hardware_id(), 0x01);
        assert_eq!(LedMode::Pulse.hardware_id(), 0x02);
        assert_eq!(LedMode::Spectrum.hardware_id(), 0x04);
    }
}
