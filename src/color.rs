//! Linear RGBA color and the small set of color tools the renderers use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A color with four linear channels in `[0, 1]`.
///
/// Alpha is carried through the compositing pipeline; hardware payloads are
/// 24-bit RGB produced by [`Color::to_rgb8`] after gamut clamping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Color { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Color { r, g, b, a: 1.0 }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Color::rgb(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
    }

    /// Gamut-clamp and scale to the 8-bit hardware triplet.
    ///
    /// Rounding is to-nearest with ties-to-even so repeated conversions do
    /// not drift.
    pub fn to_rgb8(self) -> [u8; 3] {
        [
            scale_channel(self.r),
            scale_channel(self.g),
            scale_channel(self.b),
        ]
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Color { a, ..self }
    }

    /// Build a color from hue/saturation/value, all in `[0, 1]`.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = (h.rem_euclid(1.0)) * 6.0;
        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));

        let (r, g, b) = match i as u32 % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        Color::rgb(r, g, b)
    }
}

/// Round-to-nearest, ties-to-even on the 0..255 scale.
fn scale_channel(v: f32) -> u8 {
    let clamped = v.clamp(0.0, 1.0) as f64 * 255.0;
    let rounded = clamped.round_ties_even();
    rounded as u8
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.to_rgb8();
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

/// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional).
impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if !hex.is_ascii() {
            return Err(format!("invalid color: {s}"));
        }
        let parse = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("invalid color: {s}"))
        };
        match hex.len() {
            6 => Ok(Color::from_rgb8(parse(0)?, parse(2)?, parse(4)?)),
            8 => Ok(Color::from_rgb8(parse(0)?, parse(2)?, parse(4)?)
                .with_alpha(parse(6)? as f32 / 255.0)),
            _ => Err(format!("invalid color: {s}")),
        }
    }
}

/// A named color scheme renderers can offer as a preset choice.
#[derive(Clone, Copy, Debug)]
pub struct Scheme {
    pub name: &'static str,
    pub colors: &'static [Color],
}

/// Default plasma palette: deep violet through magenta and amber to cyan.
pub const NEBULA: [Color; 4] = [
    Color::new(0.10, 0.00, 0.45, 1.0),
    Color::new(0.85, 0.10, 0.50, 1.0),
    Color::new(1.00, 0.65, 0.15, 1.0),
    Color::new(0.15, 0.80, 0.95, 1.0),
];

const AURORA: [Color; 4] = [
    Color::new(0.00, 0.10, 0.25, 1.0),
    Color::new(0.05, 0.75, 0.45, 1.0),
    Color::new(0.30, 0.95, 0.70, 1.0),
    Color::new(0.55, 0.30, 0.85, 1.0),
];

const EMBERS: [Color; 4] = [
    Color::new(0.12, 0.01, 0.00, 1.0),
    Color::new(0.65, 0.12, 0.02, 1.0),
    Color::new(0.95, 0.45, 0.05, 1.0),
    Color::new(1.00, 0.85, 0.40, 1.0),
];

const OCEAN: [Color; 4] = [
    Color::new(0.00, 0.05, 0.20, 1.0),
    Color::new(0.00, 0.25, 0.50, 1.0),
    Color::new(0.05, 0.55, 0.75, 1.0),
    Color::new(0.70, 0.95, 1.00, 1.0),
];

/// The named schemes shipped with the built-in renderers.
pub const SCHEMES: &[Scheme] = &[
    Scheme {
        name: "nebula",
        colors: &NEBULA,
    },
    Scheme {
        name: "aurora",
        colors: &AURORA,
    },
    Scheme {
        name: "embers",
        colors: &EMBERS,
    },
    Scheme {
        name: "ocean",
        colors: &OCEAN,
    },
];

pub fn scheme(name: &str) -> Option<&'static Scheme> {
    SCHEMES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Evenly interpolated gradient through the given stops, wrapping back to
/// the first stop. Length is clamped to at least two entries.
pub fn gradient(length: usize, stops: &[Color]) -> Vec<Color> {
    let length = length.max(2);
    if stops.is_empty() {
        return vec![Color::BLACK; length];
    }
    if stops.len() == 1 {
        return vec![stops[0]; length];
    }

    let mut out = Vec::with_capacity(length);
    let segments = stops.len();
    for i in 0..length {
        let pos = i as f32 / length as f32 * segments as f32;
        let seg = (pos.floor() as usize) % segments;
        let next = (seg + 1) % segments;
        let t = pos - pos.floor();
        let a = stops[seg];
        let b = stops[next];
        out.push(Color::new(
            a.r + (b.r - a.r) * t,
            a.g + (b.g - a.g) * t,
            a.b + (b.b - a.b) * t,
            a.a + (b.a - a.a) * t,
        ));
    }
    out
}

/// Endless hue rotation used by renderers that want "random" bright colors.
pub struct RainbowGenerator {
    hue: f32,
    step: f32,
}

impl RainbowGenerator {
    pub fn new() -> Self {
        RainbowGenerator {
            hue: 0.0,
            // golden-ratio increment keeps successive colors far apart
            step: 0.618_034,
        }
    }

    pub fn next_color(&mut self) -> Color {
        self.hue = (self.hue + self.step).rem_euclid(1.0);
        Color::from_hsv(self.hue, 1.0, 1.0)
    }
}

impl Default for RainbowGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for RainbowGenerator {
    type Item = Color;

    fn next(&mut self) -> Option<Color> {
        Some(self.next_color())
    }
}
