//! Configurable renderer traits.
//!
//! Every renderer declares its knobs as typed descriptors with a range and a
//! default. Assignments are validated against the descriptor; an
//! out-of-range assignment fails and leaves the prior value in place. The
//! catalog is the closed union of the kinds below.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::color::{Color, Scheme};
use crate::error::{Error, Result};

/// The declared type, constraint, and default of one trait.
#[derive(Clone, Debug)]
pub enum TraitDef {
    Float {
        default: f64,
        min: f64,
        max: f64,
    },
    Int {
        default: i64,
        min: i64,
        max: i64,
    },
    Bool {
        default: bool,
    },
    /// Enumerated string choice.
    Enum {
        default: &'static str,
        choices: &'static [&'static str],
    },
    /// Unconstrained string.
    Text {
        default: &'static str,
    },
    Color {
        default: Color,
    },
    ColorList {
        default: &'static [Color],
        min_len: usize,
    },
    /// A named enum whose values are color lists; the selected value is a
    /// scheme name and resolves to its colors through
    /// [`TraitDescriptor::resolve_preset`].
    Preset {
        default: Option<&'static str>,
        choices: &'static [Scheme],
    },
}

/// A trait name plus its definition.
#[derive(Clone, Debug)]
pub struct TraitDescriptor {
    pub name: &'static str,
    pub def: TraitDef,
}

impl TraitDescriptor {
    pub const fn new(name: &'static str, def: TraitDef) -> Self {
        TraitDescriptor { name, def }
    }

    pub fn default_value(&self) -> TraitValue {
        match &self.def {
            TraitDef::Float { default, .. } => TraitValue::Float(*default),
            TraitDef::Int { default, .. } => TraitValue::Int(*default),
            TraitDef::Bool { default } => TraitValue::Bool(*default),
            TraitDef::Enum { default, .. } => TraitValue::Str((*default).to_string()),
            TraitDef::Text { default } => TraitValue::Str((*default).to_string()),
            TraitDef::Color { default } => TraitValue::Color(*default),
            TraitDef::ColorList { default, .. } => TraitValue::ColorList(default.to_vec()),
            TraitDef::Preset { default, .. } => {
                TraitValue::Str(default.unwrap_or_default().to_string())
            }
        }
    }

    /// Validate a candidate value against this descriptor.
    pub fn validate(&self, value: &TraitValue) -> Result<()> {
        match (&self.def, value) {
            (TraitDef::Float { min, max, .. }, TraitValue::Float(v)) => {
                if v < min || v > max {
                    Err(Error::invalid(format!(
                        "{}: {v} outside [{min}, {max}]",
                        self.name
                    )))
                } else {
                    Ok(())
                }
            }
            // integers are accepted where floats are declared
            (TraitDef::Float { min, max, .. }, TraitValue::Int(v)) => {
                let v = *v as f64;
                if v < *min || v > *max {
                    Err(Error::invalid(format!(
                        "{}: {v} outside [{min}, {max}]",
                        self.name
                    )))
                } else {
                    Ok(())
                }
            }
            (TraitDef::Int { min, max, .. }, TraitValue::Int(v)) => {
                if v < min || v > max {
                    Err(Error::invalid(format!(
                        "{}: {v} outside [{min}, {max}]",
                        self.name
                    )))
                } else {
                    Ok(())
                }
            }
            (TraitDef::Bool { .. }, TraitValue::Bool(_)) => Ok(()),
            (TraitDef::Enum { choices, .. }, TraitValue::Str(s)) => {
                if choices.iter().any(|c| c.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(Error::invalid(format!("{}: unknown choice {s}", self.name)))
                }
            }
            (TraitDef::Text { .. }, TraitValue::Str(_)) => Ok(()),
            (TraitDef::Color { .. }, TraitValue::Color(_)) => Ok(()),
            (TraitDef::Color { .. }, TraitValue::Str(s)) => {
                s.parse::<Color>().map(|_| ()).map_err(Error::invalid)
            }
            (TraitDef::ColorList { min_len, .. }, TraitValue::ColorList(list)) => {
                if list.len() < *min_len {
                    Err(Error::invalid(format!(
                        "{}: needs at least {min_len} color(s)",
                        self.name
                    )))
                } else {
                    Ok(())
                }
            }
            (TraitDef::Preset { choices, .. }, TraitValue::Str(s)) => {
                if choices.iter().any(|p| p.name.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(Error::invalid(format!("{}: unknown preset {s}", self.name)))
                }
            }
            _ => Err(Error::invalid(format!(
                "{}: value has the wrong type",
                self.name
            ))),
        }
    }

    /// Resolve a preset selection to the color list it names. Returns
    /// `None` for non-preset traits and for names outside the choice set.
    pub fn resolve_preset(&self, name: &str) -> Option<&'static [Color]> {
        match &self.def {
            TraitDef::Preset { choices, .. } => choices
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .map(|s| s.colors),
            _ => None,
        }
    }
}

/// A runtime trait value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", untagged)]
pub enum TraitValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Color(Color),
    ColorList(Vec<Color>),
}

impl TraitValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TraitValue::Float(v) => Some(*v),
            TraitValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TraitValue::Int(v) => Some(*v),
            TraitValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TraitValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TraitValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            TraitValue::Color(c) => Some(*c),
            TraitValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_color_list(&self) -> Option<Vec<Color>> {
        match self {
            TraitValue::ColorList(list) => Some(list.clone()),
            TraitValue::Color(c) => Some(vec![*c]),
            _ => None,
        }
    }
}

pub type TraitMap = HashMap<String, TraitValue>;

/// Find a descriptor by name in a catalog.
pub fn find_descriptor<'a>(
    catalog: &'a [TraitDescriptor],
    name: &str,
) -> Option<&'a TraitDescriptor> {
    catalog.iter().find(|d| d.name == name)
}
