//! Protocol generations.
//!
//! Every device speaks one of a small set of protocol generations that
//! differ in the transaction id routed on byte 1, the command class used for
//! effects, and timing tolerances. The profile is resolved once from the
//! device descriptor and never changes at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileId {
    Legacy,
    Extended,
    Modern,
    WirelessKeyboard,
    Special,
}

impl ProfileId {
    pub const ALL: [ProfileId; 5] = [
        ProfileId::Legacy,
        ProfileId::Extended,
        ProfileId::Modern,
        ProfileId::WirelessKeyboard,
        ProfileId::Special,
    ];
}

/// Wire-level behavior shared by all devices of one generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolProfile {
    pub id: ProfileId,
    pub transaction_id: u8,
    pub uses_extended_effect_class: bool,
    pub inter_command_delay: Duration,
    pub crc_skip_on_ok: bool,
}

// A small delay between commands is required or the firmware answers BUSY.
const DEFAULT_CMD_DELAY: Duration = Duration::from_millis(7);

pub const LEGACY: ProtocolProfile = ProtocolProfile {
    id: ProfileId::Legacy,
    transaction_id: 0xFF,
    uses_extended_effect_class: false,
    inter_command_delay: DEFAULT_CMD_DELAY,
    crc_skip_on_ok: false,
};

pub const EXTENDED: ProtocolProfile = ProtocolProfile {
    id: ProfileId::Extended,
    transaction_id: 0x3F,
    uses_extended_effect_class: true,
    inter_command_delay: DEFAULT_CMD_DELAY,
    crc_skip_on_ok: false,
};

pub const MODERN: ProtocolProfile = ProtocolProfile {
    id: ProfileId::Modern,
    transaction_id: 0x1F,
    uses_extended_effect_class: true,
    inter_command_delay: DEFAULT_CMD_DELAY,
    crc_skip_on_ok: false,
};

pub const WIRELESS_KEYBOARD: ProtocolProfile = ProtocolProfile {
    id: ProfileId::WirelessKeyboard,
    transaction_id: 0x9F,
    uses_extended_effect_class: true,
    inter_command_delay: DEFAULT_CMD_DELAY,
    crc_skip_on_ok: false,
};

pub const SPECIAL: ProtocolProfile = ProtocolProfile {
    id: ProfileId::Special,
    transaction_id: 0x08,
    uses_extended_effect_class: false,
    inter_command_delay: DEFAULT_CMD_DELAY,
    crc_skip_on_ok: false,
};

impl ProtocolProfile {
    pub fn get(id: ProfileId) -> ProtocolProfile {
        match id {
            ProfileId::Legacy => LEGACY,
            ProfileId::Extended => EXTENDED,
            ProfileId::Modern => MODERN,
            ProfileId::WirelessKeyboard => WIRELESS_KEYBOARD,
            ProfileId::Special => SPECIAL,
        }
    }

    /// Apply descriptor-level overrides that sit outside the generation
    /// itself (firmware quirks recorded per model).
    pub fn with_crc_skip(mut self, skip: bool) -> ProtocolProfile {
        self.crc_skip_on_ok = skip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids() {
        assert_eq!(LEGACY.transaction_id, 0xFF);
        assert_eq!(EXTENDED.transaction_id, 0x3F);
        assert_eq!(MODERN.transaction_id, 0x1F);
        assert_eq!(WIRELESS_KEYBOARD.transaction_id, 0x9F);
        assert_eq!(SPECIAL.transaction_id, 0x08);
    }

    #[test]
    fn effect_class_selection() {
        assert!(!LEGACY.uses_extended_effect_class);
        assert!(!SPECIAL.uses_extended_effect_class);
        assert!(EXTENDED.uses_extended_effect_class);
        assert!(MODERN.uses_extended_effect_class);
        assert!(WIRELESS_KEYBOARD.uses_extended_effect_class);
    }

    #[test]
    fn lookup_matches_constants() {
        for id in ProfileId::ALL {
            assert_eq!(ProtocolProfile::get(id).id, id);
        }
    }
}
