//! The closed registry of hardware commands.
//!
//! Commands are organized by class:
//! - `0x00` device info & control
//! - `0x03` standard LED / effects / matrix frames
//! - `0x07` power & battery
//! - `0x0D` laptop fan/power (EC control)
//! - `0x0F` extended matrix effects
//!
//! A command dispatched against a profile outside its allowed set fails
//! with `Unsupported` before any transport I/O happens.

use crate::error::{Error, Result};
use crate::protocol::profile::ProfileId;

/// Definition of a single hardware command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandDef {
    pub name: &'static str,
    pub command_class: u8,
    pub command_id: u8,
    /// Fixed argument/response size on the wire, or `None` for variable
    /// commands where the caller supplies the size.
    pub data_size: Option<u8>,
    /// Profiles allowed to issue this command. Empty means all.
    pub profiles: &'static [ProfileId],
}

impl CommandDef {
    const fn new(
        name: &'static str,
        command_class: u8,
        command_id: u8,
        data_size: Option<u8>,
        profiles: &'static [ProfileId],
    ) -> Self {
        CommandDef {
            name,
            command_class,
            command_id,
            data_size,
            profiles,
        }
    }

    pub fn supports(&self, profile: ProfileId) -> bool {
        self.profiles.is_empty() || self.profiles.contains(&profile)
    }

    /// Gate this command on the active profile.
    pub fn check_profile(&self, profile: ProfileId) -> Result<()> {
        if self.supports(profile) {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "command {} not available on {:?} protocol",
                self.name, profile
            )))
        }
    }
}

const ALL: &[ProfileId] = &[];
const LEGACY_CLASS: &[ProfileId] = &[ProfileId::Legacy, ProfileId::Special];
const EXTENDED_CLASS: &[ProfileId] = &[
    ProfileId::Extended,
    ProfileId::Modern,
    ProfileId::WirelessKeyboard,
];

// ── class 0x00: device info & control ───────────────────────────────────

pub const GET_FIRMWARE: CommandDef = CommandDef::new("GET_FIRMWARE", 0x00, 0x81, Some(0x02), ALL);
pub const GET_SERIAL: CommandDef = CommandDef::new("GET_SERIAL", 0x00, 0x82, Some(0x16), ALL);
pub const SET_DEVICE_MODE: CommandDef =
    CommandDef::new("SET_DEVICE_MODE", 0x00, 0x04, Some(0x02), ALL);
pub const GET_DEVICE_MODE: CommandDef =
    CommandDef::new("GET_DEVICE_MODE", 0x00, 0x84, Some(0x02), ALL);

// ── class 0x03: standard LED / effects / frames ─────────────────────────

pub const SET_LED_STATE: CommandDef = CommandDef::new("SET_LED_STATE", 0x03, 0x00, Some(0x02), ALL);
pub const GET_LED_STATE: CommandDef = CommandDef::new("GET_LED_STATE", 0x03, 0x80, Some(0x02), ALL);
pub const SET_LED_COLOR: CommandDef = CommandDef::new("SET_LED_COLOR", 0x03, 0x01, Some(0x04), ALL);
pub const GET_LED_COLOR: CommandDef = CommandDef::new("GET_LED_COLOR", 0x03, 0x81, Some(0x04), ALL);
pub const SET_LED_MODE: CommandDef = CommandDef::new("SET_LED_MODE", 0x03, 0x02, Some(0x02), ALL);
pub const GET_LED_MODE: CommandDef = CommandDef::new("GET_LED_MODE", 0x03, 0x82, Some(0x02), ALL);
pub const SET_LED_BRIGHTNESS: CommandDef =
    CommandDef::new("SET_LED_BRIGHTNESS", 0x03, 0x03, Some(0x02), ALL);
pub const GET_LED_BRIGHTNESS: CommandDef =
    CommandDef::new("GET_LED_BRIGHTNESS", 0x03, 0x83, Some(0x02), ALL);

pub const SET_EFFECT: CommandDef = CommandDef::new("SET_EFFECT", 0x03, 0x0A, None, LEGACY_CLASS);
pub const SET_FRAME_MATRIX: CommandDef = CommandDef::new("SET_FRAME_MATRIX", 0x03, 0x0B, None, ALL);
pub const SET_FRAME_SINGLE: CommandDef = CommandDef::new("SET_FRAME_SINGLE", 0x03, 0x0C, None, ALL);

// ── class 0x07: power & battery ─────────────────────────────────────────

pub const GET_BATTERY_LEVEL: CommandDef =
    CommandDef::new("GET_BATTERY_LEVEL", 0x07, 0x80, Some(0x02), EXTENDED_CLASS);
pub const GET_CHARGING_STATUS: CommandDef =
    CommandDef::new("GET_CHARGING_STATUS", 0x07, 0x84, Some(0x02), EXTENDED_CLASS);
pub const SET_IDLE_TIME: CommandDef =
    CommandDef::new("SET_IDLE_TIME", 0x07, 0x03, Some(0x02), EXTENDED_CLASS);
pub const GET_IDLE_TIME: CommandDef =
    CommandDef::new("GET_IDLE_TIME", 0x07, 0x83, Some(0x02), EXTENDED_CLASS);

// ── class 0x0D: laptop fan / power (EC) ─────────────────────────────────
// Command ids in this class are partially researched; the thermal safety
// overlay in the laptop driver applies regardless.

pub const SET_FAN_MODE: CommandDef = CommandDef::new("SET_FAN_MODE", 0x0D, 0x02, Some(0x04), ALL);
pub const GET_FAN_MODE: CommandDef = CommandDef::new("GET_FAN_MODE", 0x0D, 0x82, Some(0x04), ALL);
pub const GET_FAN_SPEED: CommandDef = CommandDef::new("GET_FAN_SPEED", 0x0D, 0x81, Some(0x03), ALL);
pub const SET_BOOST: CommandDef = CommandDef::new("SET_BOOST", 0x0D, 0x0D, None, ALL);
pub const GET_BOOST: CommandDef = CommandDef::new("GET_BOOST", 0x0D, 0x8D, None, ALL);

// ── class 0x0F: extended matrix effects ─────────────────────────────────

pub const SET_EFFECT_EXTENDED: CommandDef =
    CommandDef::new("SET_EFFECT_EXTENDED", 0x0F, 0x02, None, EXTENDED_CLASS);
pub const SET_FRAME_EXTENDED: CommandDef =
    CommandDef::new("SET_FRAME_EXTENDED", 0x0F, 0x03, None, EXTENDED_CLASS);
pub const SET_BRIGHTNESS_EXTENDED: CommandDef =
    CommandDef::new("SET_BRIGHTNESS_EXTENDED", 0x0F, 0x04, Some(0x03), EXTENDED_CLASS);
pub const GET_BRIGHTNESS_EXTENDED: CommandDef =
    CommandDef::new("GET_BRIGHTNESS_EXTENDED", 0x0F, 0x84, Some(0x03), EXTENDED_CLASS);
