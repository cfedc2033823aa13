//! Static hardware catalog.
//!
//! Every supported model is described by an immutable [`DeviceDescriptor`]
//! keyed on (vendor id, product id). The store is built once at startup and
//! only queried afterwards; it never mutates runtime state. Records parsed
//! from an external source can be merged in before the store is sealed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::ProfileId;

pub const RAZER_VENDOR_ID: u16 = 0x1532;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Mousepad,
    Headset,
    Keypad,
    Laptop,
}

impl DeviceKind {
    /// USB interface carrying the control endpoint for this kind.
    pub fn control_interface(self) -> u8 {
        match self {
            DeviceKind::Headset => 3,
            DeviceKind::Keyboard | DeviceKind::Keypad | DeviceKind::Laptop => 2,
            DeviceKind::Mouse | DeviceKind::Mousepad => 1,
        }
    }
}

/// Per-model quirks and feature gates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityFlag {
    Wireless,
    Hyperpolling,
    NoLed,
    SingleLed,
    ExtendedFx,
    LogoLedBrightness,
    ScrollWheelBrightness,
    CustomFrameAlt,
    SoftwareEffectsOnly,
    CrcSkipOnOk,
    KeyInput,
    SystemControl,
}

/// Addressable LEDs and their hardware ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Led {
    ScrollWheel,
    Battery,
    Logo,
    Backlight,
    Macro,
    Game,
    ProfileRed,
    ProfileGreen,
    ProfileBlue,
}

impl Led {
    pub fn hardware_id(self) -> u8 {
        match self {
            Led::ScrollWheel => 0x01,
            Led::Battery => 0x03,
            Led::Logo => 0x04,
            Led::Backlight => 0x05,
            Led::Macro => 0x07,
            Led::Game => 0x08,
            Led::ProfileRed => 0x0E,
            Led::ProfileGreen => 0x0C,
            Led::ProfileBlue => 0x0D,
        }
    }

    pub fn from_name(name: &str) -> Option<Led> {
        Some(match name {
            "scroll_wheel" => Led::ScrollWheel,
            "battery" => Led::Battery,
            "logo" => Led::Logo,
            "backlight" => Led::Backlight,
            "macro" => Led::Macro,
            "game" => Led::Game,
            "profile_red" => Led::ProfileRed,
            "profile_green" => Led::ProfileGreen,
            "profile_blue" => Led::ProfileBlue,
            _ => return None,
        })
    }
}

/// A cell on the lighting matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub row: u8,
    pub col: u8,
}

impl Point {
    pub const fn new(row: u8, col: u8) -> Self {
        Point { row, col }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub height: usize,
    pub width: usize,
}

impl Dimensions {
    pub const fn new(height: usize, width: usize) -> Self {
        Dimensions { height, width }
    }
}

/// Manual fan control band for laptop models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanLimits {
    pub min_manual_rpm: u32,
    pub max_rpm: u32,
    pub dual_fan: bool,
}

impl Default for FanLimits {
    fn default() -> Self {
        FanLimits {
            min_manual_rpm: 3500,
            max_rpm: 5000,
            dual_fan: false,
        }
    }
}

/// Headset hardware generations with distinct memory maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadsetVariant {
    Rainie,
    Kylie,
}

/// Immutable description of a single device model.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub name: &'static str,
    pub kind: DeviceKind,
    pub vendor_id: u16,
    pub product_id: u16,
    pub dimensions: Option<Dimensions>,
    pub supported_leds: Vec<Led>,
    pub supported_effects: Vec<&'static str>,
    pub capabilities: Vec<CapabilityFlag>,
    pub key_mapping: HashMap<&'static str, Vec<Point>>,
    pub key_row_offsets: Vec<u8>,
    pub profile: ProfileId,
    pub fan_limits: Option<FanLimits>,
    pub headset_variant: Option<HeadsetVariant>,
}

impl DeviceDescriptor {
    pub fn has_capability(&self, flag: CapabilityFlag) -> bool {
        self.capabilities.contains(&flag)
    }

    pub fn has_matrix(&self) -> bool {
        self.dimensions.is_some()
    }

    pub fn supports_led(&self, led: Led) -> bool {
        self.supported_leds.contains(&led)
    }

    pub fn supports_effect(&self, name: &str) -> bool {
        self.supported_effects
            .iter()
            .any(|e| e.eq_ignore_ascii_case(name))
    }

    /// The LED that carries the overall device brightness. A few models
    /// route it through the logo or scroll wheel LED instead of the
    /// backlight.
    pub fn brightness_led(&self) -> Led {
        if self.has_capability(CapabilityFlag::ScrollWheelBrightness) {
            Led::ScrollWheel
        } else if self.has_capability(CapabilityFlag::LogoLedBrightness) {
            Led::Logo
        } else {
            Led::Backlight
        }
    }

    /// Matrix cells lit by a keycode, empty when unmapped.
    pub fn coords_of(&self, keycode: &str) -> Vec<Point> {
        self.key_mapping.get(keycode).cloned().unwrap_or_default()
    }
}

const MATRIX_KEYBOARD_FX: &[&str] = &[
    "disable",
    "wave",
    "reactive",
    "breathe",
    "spectrum",
    "static",
    "starlight",
    "custom_frame",
];

const BLADE_FX: &[&str] = &[
    "disable",
    "wave",
    "reactive",
    "breathe",
    "spectrum",
    "static",
    "starlight",
    "custom_frame",
    "gradient",
    "sweep",
    "circle",
    "highlight",
    "morph",
    "fire",
    "ripple",
    "ripple_solid",
];

const MOUSE_FX: &[&str] = &[
    "disable",
    "wave",
    "reactive",
    "breathe",
    "spectrum",
    "static",
    "custom_frame",
];

const MOUSEPAD_FX: &[&str] = &["disable", "wave", "spectrum", "static"];

const HEADSET_FX: &[&str] = &["disable", "breathe", "spectrum", "static"];

/// Main-block key map for the standard 6x22 full-size layout. Row 0 is the
/// function row; the alphanumeric block starts at row 1.
fn full_size_key_mapping() -> HashMap<&'static str, Vec<Point>> {
    let mut map: HashMap<&'static str, Vec<Point>> = HashMap::new();

    let rows: [(&[&str], u8, u8); 5] = [
        (
            &[
                "KEY_GRAVE",
                "KEY_1",
                "KEY_2",
                "KEY_3",
                "KEY_4",
                "KEY_5",
                "KEY_6",
                "KEY_7",
                "KEY_8",
                "KEY_9",
                "KEY_0",
                "KEY_MINUS",
                "KEY_EQUAL",
                "KEY_BACKSPACE",
            ],
            2,
            1,
        ),
        (
            &[
                "KEY_TAB",
                "KEY_Q",
                "KEY_W",
                "KEY_E",
                "KEY_R",
                "KEY_T",
                "KEY_Y",
                "KEY_U",
                "KEY_I",
                "KEY_O",
                "KEY_P",
                "KEY_LEFTBRACE",
                "KEY_RIGHTBRACE",
                "KEY_BACKSLASH",
            ],
            3,
            1,
        ),
        (
            &[
                "KEY_CAPSLOCK",
                "KEY_A",
                "KEY_S",
                "KEY_D",
                "KEY_F",
                "KEY_G",
                "KEY_H",
                "KEY_J",
                "KEY_K",
                "KEY_L",
                "KEY_SEMICOLON",
                "KEY_APOSTROPHE",
                "KEY_ENTER",
            ],
            4,
            1,
        ),
        (
            &[
                "KEY_LEFTSHIFT",
                "KEY_Z",
                "KEY_X",
                "KEY_C",
                "KEY_V",
                "KEY_B",
                "KEY_N",
                "KEY_M",
                "KEY_COMMA",
                "KEY_DOT",
                "KEY_SLASH",
                "KEY_RIGHTSHIFT",
            ],
            5,
            1,
        ),
        (
            &[
                "KEY_ESC",
                "KEY_F1",
                "KEY_F2",
                "KEY_F3",
                "KEY_F4",
                "KEY_F5",
                "KEY_F6",
                "KEY_F7",
                "KEY_F8",
                "KEY_F9",
                "KEY_F10",
                "KEY_F11",
                "KEY_F12",
            ],
            0,
            1,
        ),
    ];

    for (keys, row, start_col) in rows {
        for (i, key) in keys.iter().enumerate() {
            map.insert(key, vec![Point::new(row, start_col + i as u8)]);
        }
    }
    map.insert("KEY_SPACE", vec![Point::new(5, 7)]);
    map
}

fn keyboard(
    name: &'static str,
    product_id: u16,
    dims: Dimensions,
    profile: ProfileId,
    extra_caps: &[CapabilityFlag],
) -> DeviceDescriptor {
    let mut capabilities = vec![CapabilityFlag::KeyInput];
    capabilities.extend_from_slice(extra_caps);
    DeviceDescriptor {
        name,
        kind: DeviceKind::Keyboard,
        vendor_id: RAZER_VENDOR_ID,
        product_id,
        dimensions: Some(dims),
        supported_leds: vec![Led::Backlight, Led::Logo, Led::Macro, Led::Game],
        supported_effects: MATRIX_KEYBOARD_FX.to_vec(),
        capabilities,
        key_mapping: full_size_key_mapping(),
        key_row_offsets: Vec::new(),
        profile,
        fan_limits: None,
        headset_variant: None,
    }
}

fn builtin_catalog() -> Vec<DeviceDescriptor> {
    vec![
        // keyboards
        keyboard(
            "BlackWidow Chroma",
            0x0203,
            Dimensions::new(6, 22),
            ProfileId::Legacy,
            &[],
        ),
        keyboard(
            "BlackWidow Chroma Tournament Edition",
            0x0209,
            Dimensions::new(6, 22),
            ProfileId::Legacy,
            &[],
        ),
        keyboard(
            "Ornata Chroma",
            0x021E,
            Dimensions::new(6, 22),
            ProfileId::Extended,
            &[CapabilityFlag::ExtendedFx],
        ),
        keyboard(
            "BlackWidow V3 Pro",
            0x025A,
            Dimensions::new(6, 22),
            ProfileId::WirelessKeyboard,
            &[CapabilityFlag::Wireless],
        ),
        // laptops
        DeviceDescriptor {
            name: "Blade Stealth (Late 2016)",
            kind: DeviceKind::Laptop,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0220,
            dimensions: Some(Dimensions::new(6, 25)),
            supported_leds: vec![Led::Backlight, Led::Logo],
            supported_effects: BLADE_FX.to_vec(),
            capabilities: vec![
                CapabilityFlag::KeyInput,
                CapabilityFlag::CustomFrameAlt,
                CapabilityFlag::SystemControl,
            ],
            key_mapping: full_size_key_mapping(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Legacy,
            fan_limits: Some(FanLimits {
                min_manual_rpm: 3500,
                max_rpm: 4500,
                dual_fan: false,
            }),
            headset_variant: None,
        },
        DeviceDescriptor {
            name: "Blade 15 Advanced",
            kind: DeviceKind::Laptop,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0253,
            dimensions: Some(Dimensions::new(6, 16)),
            supported_leds: vec![Led::Backlight, Led::Logo],
            supported_effects: BLADE_FX.to_vec(),
            capabilities: vec![
                CapabilityFlag::KeyInput,
                CapabilityFlag::CustomFrameAlt,
                CapabilityFlag::SystemControl,
            ],
            key_mapping: full_size_key_mapping(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Modern,
            fan_limits: Some(FanLimits {
                min_manual_rpm: 3500,
                max_rpm: 5000,
                dual_fan: true,
            }),
            headset_variant: None,
        },
        // mice
        DeviceDescriptor {
            name: "Mamba (Wireless)",
            kind: DeviceKind::Mouse,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0045,
            dimensions: Some(Dimensions::new(1, 15)),
            supported_leds: vec![Led::Backlight, Led::Logo, Led::ScrollWheel, Led::Battery],
            supported_effects: MOUSE_FX.to_vec(),
            capabilities: vec![CapabilityFlag::Wireless],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Extended,
            fan_limits: None,
            headset_variant: None,
        },
        DeviceDescriptor {
            name: "DeathAdder Elite",
            kind: DeviceKind::Mouse,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x005C,
            dimensions: None,
            supported_leds: vec![Led::Logo, Led::ScrollWheel],
            supported_effects: MOUSE_FX.to_vec(),
            capabilities: vec![],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Extended,
            fan_limits: None,
            headset_variant: None,
        },
        DeviceDescriptor {
            name: "Naga X",
            kind: DeviceKind::Mouse,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0096,
            dimensions: None,
            supported_leds: vec![Led::Backlight],
            supported_effects: MOUSE_FX.to_vec(),
            capabilities: vec![CapabilityFlag::SingleLed],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Special,
            fan_limits: None,
            headset_variant: None,
        },
        // mousepad
        DeviceDescriptor {
            name: "Firefly",
            kind: DeviceKind::Mousepad,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0C00,
            dimensions: Some(Dimensions::new(1, 15)),
            supported_leds: vec![Led::Backlight],
            supported_effects: MOUSEPAD_FX.to_vec(),
            capabilities: vec![],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Legacy,
            fan_limits: None,
            headset_variant: None,
        },
        // headsets
        DeviceDescriptor {
            name: "Kraken 7.1",
            kind: DeviceKind::Headset,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0504,
            dimensions: None,
            supported_leds: vec![Led::Logo],
            supported_effects: HEADSET_FX.to_vec(),
            capabilities: vec![],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Legacy,
            fan_limits: None,
            headset_variant: Some(HeadsetVariant::Rainie),
        },
        DeviceDescriptor {
            name: "Kraken 7.1 V2",
            kind: DeviceKind::Headset,
            vendor_id: RAZER_VENDOR_ID,
            product_id: 0x0510,
            dimensions: None,
            supported_leds: vec![Led::Logo],
            supported_effects: HEADSET_FX.to_vec(),
            capabilities: vec![],
            key_mapping: HashMap::new(),
            key_row_offsets: Vec::new(),
            profile: ProfileId::Legacy,
            fan_limits: None,
            headset_variant: Some(HeadsetVariant::Kylie),
        },
    ]
}

/// Typed, in-memory catalog of device descriptors.
pub struct HardwareStore {
    by_id: HashMap<(u16, u16), Arc<DeviceDescriptor>>,
}

impl HardwareStore {
    /// Build the store from the built-in catalog.
    pub fn builtin() -> Self {
        Self::from_records(builtin_catalog())
    }

    /// Build the store from externally parsed records. Later records win on
    /// duplicate (vendor, product) keys.
    pub fn from_records(records: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        let mut by_id = HashMap::new();
        for record in records {
            by_id.insert((record.vendor_id, record.product_id), Arc::new(record));
        }
        HardwareStore { by_id }
    }

    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<Arc<DeviceDescriptor>> {
        self.by_id.get(&(vendor_id, product_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let store = HardwareStore::builtin();
        assert!(!store.is_empty());

        let bw = store.lookup(RAZER_VENDOR_ID, 0x0203).unwrap();
        assert_eq!(bw.kind, DeviceKind::Keyboard);
        assert_eq!(bw.dimensions, Some(Dimensions::new(6, 22)));
        assert_eq!(bw.profile, ProfileId::Legacy);
        assert!(bw.has_capability(CapabilityFlag::KeyInput));
    }

    #[test]
    fn lookup_miss_returns_none() {
        let store = HardwareStore::builtin();
        assert!(store.lookup(RAZER_VENDOR_ID, 0xDEAD).is_none());
        assert!(store.lookup(0x1234, 0x0203).is_none());
    }

    #[test]
    fn led_hardware_ids() {
        assert_eq!(Led::ScrollWheel.hardware_id(), 0x01);
        assert_eq!(Led::Battery.hardware_id(), 0x03);
        assert_eq!(Led::Logo.hardware_id(), 0x04);
        assert_eq!(Led::Backlight.hardware_id(), 0x05);
        assert_eq!(Led::ProfileGreen.hardware_id(), 0x0C);
    }

    #[test]
    fn brightness_led_follows_capabilities() {
        let store = HardwareStore::builtin();
        let bw = store.lookup(RAZER_VENDOR_ID, 0x0203).unwrap();
        assert_eq!(bw.brightness_led(), Led::Backlight);

        let mut custom = (*bw).clone();
        custom.capabilities.push(CapabilityFlag::LogoLedBrightness);
        assert_eq!(custom.brightness_led(), Led::Logo);
    }

    #[test]
    fn key_mapping_resolves_known_keys() {
        let store = HardwareStore::builtin();
        let kb = store.lookup(RAZER_VENDOR_ID, 0x0203).unwrap();
        assert_eq!(kb.coords_of("KEY_A"), vec![Point::new(4, 2)]);
        assert!(kb.coords_of("KEY_UNMAPPED").is_empty());
    }

    #[test]
    fn control_interfaces_per_kind() {
        assert_eq!(DeviceKind::Headset.control_interface(), 3);
        assert_eq!(DeviceKind::Keyboard.control_interface(), 2);
        assert_eq!(DeviceKind::Mouse.control_interface(), 1);
    }
}
