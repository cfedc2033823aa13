//! Built-in effect registry.
//!
//! Effects are double-keyed: the same name maps to different ids under the
//! legacy command class (0x03/0x0A) and the extended class (0x0F/0x02). The
//! active profile selects the column; a missing column means the effect is
//! unsupported on that generation.

use crate::color::Color;
use crate::error::{Error, Result};

pub const VARSTORE: u8 = 0x01;
pub const NOSTORE: u8 = 0x00;

/// Directions for effects which pan across the device. The chase variants
/// spin around an illuminated trackpad where one exists.
pub const DIRECTION_RIGHT: u8 = 0x01;
pub const DIRECTION_LEFT: u8 = 0x02;
pub const DIRECTION_LEFT_CHASE: u8 = 0x03;
pub const DIRECTION_RIGHT_CHASE: u8 = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectDef {
    pub name: &'static str,
    pub legacy_id: Option<u8>,
    pub extended_id: Option<u8>,
    pub max_colors: usize,
    pub has_speed: bool,
    pub has_direction: bool,
}

impl EffectDef {
    pub fn id_for(&self, uses_extended: bool) -> Option<u8> {
        if uses_extended {
            self.extended_id
        } else {
            self.legacy_id
        }
    }
}

/// The authoritative id mapping. The universally supported effects must
/// reproduce these ids byte-for-byte.
pub static EFFECTS: &[EffectDef] = &[
    EffectDef {
        name: "disable",
        legacy_id: Some(0x00),
        extended_id: Some(0x00),
        max_colors: 0,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "wave",
        legacy_id: Some(0x01),
        extended_id: Some(0x04),
        max_colors: 0,
        has_speed: false,
        has_direction: true,
    },
    EffectDef {
        name: "reactive",
        legacy_id: Some(0x02),
        extended_id: Some(0x05),
        max_colors: 1,
        has_speed: true,
        has_direction: false,
    },
    EffectDef {
        name: "breathe",
        legacy_id: Some(0x03),
        extended_id: Some(0x02),
        max_colors: 2,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "spectrum",
        legacy_id: Some(0x04),
        extended_id: Some(0x03),
        max_colors: 0,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "custom_frame",
        legacy_id: Some(0x05),
        extended_id: Some(0x08),
        max_colors: 0,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "static",
        legacy_id: Some(0x06),
        extended_id: Some(0x01),
        max_colors: 1,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "starlight",
        legacy_id: Some(0x19),
        extended_id: Some(0x07),
        max_colors: 2,
        has_speed: true,
        has_direction: false,
    },
    // legacy-only effects, mostly found on Blade keyboards
    EffectDef {
        name: "gradient",
        legacy_id: Some(0x0A),
        extended_id: None,
        max_colors: 0,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "sweep",
        legacy_id: Some(0x0C),
        extended_id: None,
        max_colors: 2,
        has_speed: true,
        has_direction: true,
    },
    EffectDef {
        name: "circle",
        legacy_id: Some(0x0D),
        extended_id: None,
        max_colors: 1,
        has_speed: true,
        has_direction: false,
    },
    EffectDef {
        name: "highlight",
        legacy_id: Some(0x10),
        extended_id: None,
        max_colors: 0,
        has_speed: false,
        has_direction: false,
    },
    EffectDef {
        name: "morph",
        legacy_id: Some(0x11),
        extended_id: None,
        max_colors: 2,
        has_speed: true,
        has_direction: false,
    },
    EffectDef {
        name: "fire",
        legacy_id: Some(0x12),
        extended_id: None,
        max_colors: 1,
        has_speed: true,
        has_direction: false,
    },
    EffectDef {
        name: "ripple_solid",
        legacy_id: Some(0x13),
        extended_id: None,
        max_colors: 1,
        has_speed: true,
        has_direction: false,
    },
    EffectDef {
        name: "ripple",
        legacy_id: Some(0x14),
        extended_id: None,
        max_colors: 1,
        has_speed: true,
        has_direction: false,
    },
];

pub fn find(name: &str) -> Option<&'static EffectDef> {
    EFFECTS.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}

/// Arguments accepted by `set_effect`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EffectArgs {
    pub colors: Vec<Color>,
    pub speed: Option<u8>,
    pub direction: Option<u8>,
}

impl EffectArgs {
    pub fn with_color(color: Color) -> Self {
        EffectArgs {
            colors: vec![color],
            ..Default::default()
        }
    }
}

/// Build the argument block for an effect, excluding the extended-class
/// `[varstore, led]` header which the driver prepends.
///
/// The parameter order matches the legacy layout for both classes; for the
/// extended class the same parameters follow the effect id.
pub fn build_args(def: &EffectDef, args: &EffectArgs) -> Result<Vec<u8>> {
    if args.colors.len() > def.max_colors {
        return Err(Error::invalid(format!(
            "effect {} accepts at most {} color(s)",
            def.name, def.max_colors
        )));
    }
    if args.speed.is_some() && !def.has_speed {
        return Err(Error::invalid(format!(
            "effect {} does not accept a speed",
            def.name
        )));
    }
    if args.direction.is_some() && !def.has_direction {
        return Err(Error::invalid(format!(
            "effect {} does not accept a direction",
            def.name
        )));
    }

    let mut out = Vec::new();
    match def.name {
        "disable" | "spectrum" | "gradient" | "highlight" => {}
        "custom_frame" => out.push(VARSTORE),
        "static" => {
            let color = args.colors.first().copied().unwrap_or(Color::GREEN);
            out.extend_from_slice(&color.to_rgb8());
        }
        "wave" => {
            let dir = args.direction.unwrap_or(DIRECTION_RIGHT);
            if !(DIRECTION_RIGHT..=DIRECTION_RIGHT_CHASE).contains(&dir) {
                return Err(Error::invalid(format!("invalid wave direction {dir}")));
            }
            out.push(dir);
        }
        "reactive" => {
            let speed = args.speed.unwrap_or(1);
            if !(1..=4).contains(&speed) {
                return Err(Error::invalid("reactive speed must be 1-4"));
            }
            out.push(speed);
            let color = args.colors.first().copied().unwrap_or(Color::BLUE);
            out.extend_from_slice(&color.to_rgb8());
        }
        // breathe and starlight take a mode byte equal to the number of
        // supplied colors; zero colors means random
        "breathe" => {
            out.push(args.colors.len() as u8);
            for color in &args.colors {
                out.extend_from_slice(&color.to_rgb8());
            }
        }
        "starlight" => {
            out.push(args.colors.len() as u8);
            let speed = args.speed.unwrap_or(1);
            if !(1..=4).contains(&speed) {
                return Err(Error::invalid("starlight speed must be 1-4"));
            }
            out.push(speed);
            for color in &args.colors {
                out.extend_from_slice(&color.to_rgb8());
            }
        }
        "sweep" => {
            out.push(args.direction.unwrap_or(DIRECTION_RIGHT));
            out.push(args.speed.unwrap_or(15));
            for color in &args.colors {
                out.extend_from_slice(&color.to_rgb8());
            }
        }
        "morph" => {
            out.push(0x04);
            out.push(args.speed.unwrap_or(2));
            for color in &args.colors {
                out.extend_from_slice(&color.to_rgb8());
            }
        }
        "fire" => {
            out.push(0x01);
            out.push(args.speed.unwrap_or(0x40));
            let color = args.colors.first().copied().unwrap_or(Color::RED);
            out.extend_from_slice(&color.to_rgb8());
        }
        "ripple" | "ripple_solid" => {
            out.push(0x01);
            out.push(args.speed.unwrap_or(3).saturating_mul(10));
            let color = args.colors.first().copied().unwrap_or(Color::GREEN);
            out.extend_from_slice(&color.to_rgb8());
        }
        "circle" => {
            out.push(args.speed.unwrap_or(1));
            for color in &args.colors {
                out.extend_from_slice(&color.to_rgb8());
            }
        }
        other => {
            return Err(Error::unsupported(format!("unknown effect {other}")));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn universal_ids_are_fixed() {
        let expect = [
            ("disable", Some(0x00), Some(0x00)),
            ("static", Some(0x06), Some(0x01)),
            ("wave", Some(0x01), Some(0x04)),
            ("reactive", Some(0x02), Some(0x05)),
            ("breathe", Some(0x03), Some(0x02)),
            ("spectrum", Some(0x04), Some(0x03)),
            ("starlight", Some(0x19), Some(0x07)),
            ("custom_frame", Some(0x05), Some(0x08)),
        ];
        for (name, legacy, extended) in expect {
            let def = find(name).unwrap();
            assert_eq!(def.legacy_id, legacy, "{name} legacy id");
            assert_eq!(def.extended_id, extended, "{name} extended id");
        }
    }

    #[test]
    fn legacy_only_effects_have_no_extended_column() {
        for name in ["gradient", "sweep", "fire", "ripple", "ripple_solid"] {
            let def = find(name).unwrap();
            assert!(def.id_for(false).is_some());
            assert!(def.id_for(true).is_none(), "{name}");
        }
    }

    #[test]
    fn static_args_are_rgb() {
        let def = find("static").unwrap();
        let args = build_args(&def.clone(), &EffectArgs::with_color(Color::RED)).unwrap();
        assert_eq!(args, vec![0xFF, 0x00, 0x00]);
    }

    #[test]
    fn starlight_mode_counts_colors() {
        let def = find("starlight").unwrap();
        let two = EffectArgs {
            colors: vec![Color::RED, Color::GREEN],
            speed: Some(2),
            direction: None,
        };
        let args = build_args(def, &two).unwrap();
        assert_eq!(args[0], 2);
        assert_eq!(args[1], 2);
        assert_eq!(args.len(), 2 + 6);

        let random = build_args(def, &EffectArgs::default()).unwrap();
        assert_eq!(random, vec![0, 1]);
    }

    #[test]
    fn reactive_speed_validated() {
        let def = find("reactive").unwrap();
        let bad = EffectArgs {
            colors: vec![],
            speed: Some(9),
            direction: None,
        };
        assert!(matches!(
            build_args(def, &bad),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn too_many_colors_rejected() {
        let def = find("static").unwrap();
        let args = EffectArgs {
            colors: vec![Color::RED, Color::GREEN],
            speed: None,
            direction: None,
        };
        assert!(matches!(
            build_args(def, &args),
            Err(Error::InvalidArgument(_))
        ));
    }
}
