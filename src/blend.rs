//! Blend modes for layer compositing.
//!
//! All modes operate component-wise on the RGB channels; alpha is composited
//! separately by the caller with a standard over operation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Normal,
    #[default]
    Screen,
    SoftLight,
    LightenOnly,
    DarkenOnly,
    Dodge,
    Multiply,
    HardLight,
    Addition,
    Difference,
    Subtract,
    GrainExtract,
    GrainMerge,
    Divide,
}

impl BlendMode {
    pub const ALL: [BlendMode; 14] = [
        BlendMode::Normal,
        BlendMode::Screen,
        BlendMode::SoftLight,
        BlendMode::LightenOnly,
        BlendMode::DarkenOnly,
        BlendMode::Dodge,
        BlendMode::Multiply,
        BlendMode::HardLight,
        BlendMode::Addition,
        BlendMode::Difference,
        BlendMode::Subtract,
        BlendMode::GrainExtract,
        BlendMode::GrainMerge,
        BlendMode::Divide,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Screen => "screen",
            BlendMode::SoftLight => "soft_light",
            BlendMode::LightenOnly => "lighten_only",
            BlendMode::DarkenOnly => "darken_only",
            BlendMode::Dodge => "dodge",
            BlendMode::Multiply => "multiply",
            BlendMode::HardLight => "hard_light",
            BlendMode::Addition => "addition",
            BlendMode::Difference => "difference",
            BlendMode::Subtract => "subtract",
            BlendMode::GrainExtract => "grain_extract",
            BlendMode::GrainMerge => "grain_merge",
            BlendMode::Divide => "divide",
        }
    }

    /// Apply this blend mode to a single base/layer channel pair.
    #[inline(always)]
    pub fn apply(self, base: f32, layer: f32) -> f32 {
        match self {
            BlendMode::Normal => layer,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - layer),
            BlendMode::SoftLight => {
                (1.0 - base) * base * layer + base * (1.0 - (1.0 - base) * (1.0 - layer))
            }
            BlendMode::LightenOnly => base.max(layer),
            BlendMode::DarkenOnly => base.min(layer),
            BlendMode::Dodge => (base / (1.0 - layer)).min(1.0),
            BlendMode::Multiply => (base * layer).clamp(0.0, 1.0),
            BlendMode::HardLight => {
                if layer > 0.5 {
                    (1.0 - (1.0 - base) * (1.0 - (layer - 0.5) * 2.0)).min(1.0)
                } else {
                    (base * (layer * 2.0)).min(1.0)
                }
            }
            BlendMode::Addition => base + layer,
            BlendMode::Difference => (base - layer).abs(),
            BlendMode::Subtract => base - layer,
            BlendMode::GrainExtract => (base - layer + 0.5).clamp(0.0, 1.0),
            BlendMode::GrainMerge => (base + layer - 0.5).clamp(0.0, 1.0),
            BlendMode::Divide => ((256.0 / 255.0 * base) / (1.0 / 255.0 + layer)).min(1.0),
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlendMode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown blend mode: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_formula() {
        assert_eq!(BlendMode::Screen.apply(0.0, 0.0), 0.0);
        assert_eq!(BlendMode::Screen.apply(1.0, 0.0), 1.0);
        assert!((BlendMode::Screen.apply(0.5, 0.5) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn hard_light_branches_at_half() {
        // multiply-like below the threshold
        assert!((BlendMode::HardLight.apply(0.5, 0.25) - 0.25).abs() < 1e-6);
        // screen-like above it
        assert!((BlendMode::HardLight.apply(0.5, 0.75) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn grain_modes_clamp() {
        assert_eq!(BlendMode::GrainExtract.apply(0.0, 1.0), 0.0);
        assert_eq!(BlendMode::GrainMerge.apply(1.0, 1.0), 1.0);
    }

    #[test]
    fn dodge_handles_full_layer() {
        // division by zero saturates at 1.0
        assert_eq!(BlendMode::Dodge.apply(0.5, 1.0), 1.0);
    }

    #[test]
    fn names_round_trip() {
        for mode in BlendMode::ALL {
            assert_eq!(mode.name().parse::<BlendMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<BlendMode>().is_err());
    }
}
