//! Classic demoscene plasma built from layered sine waves.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::f64::consts::PI;

use crate::color::{self, gradient, Color, NEBULA};
use crate::error::Result;
use crate::input::InputQueue;
use crate::layer::Layer;
use crate::traits::{TraitDef, TraitDescriptor, TraitValue};

use super::{FrameInfo, Renderer, RendererInfo, RendererMeta};

static TRAITS: [TraitDescriptor; 4] = [
    TraitDescriptor::new(
        "speed",
        TraitDef::Float {
            default: 1.0,
            min: 0.1,
            max: 2.0,
        },
    ),
    TraitDescriptor::new(
        "gradient_length",
        TraitDef::Int {
            default: 360,
            min: 2,
            max: 720,
        },
    ),
    TraitDescriptor::new(
        "color_scheme",
        TraitDef::ColorList {
            default: &NEBULA,
            min_len: 2,
        },
    ),
    TraitDescriptor::new(
        "preset",
        TraitDef::Preset {
            default: Some("nebula"),
            choices: color::SCHEMES,
        },
    ),
];

pub static INFO: RendererInfo = RendererInfo {
    name: "plasma",
    meta: RendererMeta {
        display_name: "Plasma",
        description: "Colorful moving blobs of plasma",
        author: "chromad developers",
        version: "1.0",
    },
    traits: &TRAITS,
    requires_key_input: false,
    factory: || Box::new(Plasma::new()),
};

pub struct Plasma {
    speed: f64,
    gradient_length: usize,
    scheme: Vec<Color>,
    gradient: Vec<Color>,
    start: Option<f64>,
}

impl Plasma {
    pub fn new() -> Self {
        Plasma {
            speed: 1.0,
            gradient_length: 360,
            scheme: NEBULA.to_vec(),
            gradient: Vec::new(),
            start: None,
        }
    }

    fn regen_gradient(&mut self) {
        self.gradient = gradient(self.gradient_length.max(2), &self.scheme);
    }
}

impl Default for Plasma {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for Plasma {
    fn init(&mut self, _frame: &FrameInfo) -> bool {
        self.start = None;
        self.regen_gradient();
        true
    }

    fn draw<'a>(
        &'a mut self,
        layer: &'a mut Layer,
        timestamp: f64,
        _input: Option<&'a mut InputQueue>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let start = *self.start.get_or_insert(timestamp);
            let duration = (timestamp - start) * self.speed;

            let glen = self.gradient.len();
            if glen == 0 {
                return Ok(false);
            }

            let width = layer.width() as f64;
            let height = layer.height() as f64;

            let sin_d2 = (duration / 2.0).sin();
            let cos_d3 = (duration / 3.0).cos();
            let sin_d5 = (duration / 5.0).sin();
            let aspect = width / height;
            let inv_height_aspect = 1.0 / (height * aspect);
            let inv_width = 1.0 / width;

            for row in 0..layer.height() {
                let y = row as f64 * inv_height_aspect;
                let cy = y * cos_d3;

                for col in 0..layer.width() {
                    let x = col as f64 * inv_width;

                    let val1 = (2.0 * (x * sin_d2 + cy) + duration).sin();

                    let cx = x * sin_d5;
                    let val2 = ((20.0 * (cx * cx + cy * cy) + 1.0).sqrt() + duration).sin();

                    let val = val1 + val2;
                    let pos = glen as f64 * ((1.0 + (PI * val).sin()) / 2.0);
                    let idx = (pos as usize).saturating_sub(1).min(glen - 1);

                    layer.put(row, col, self.gradient[idx].with_alpha(1.0));
                }
            }
            Ok(true)
        }
        .boxed()
    }

    fn finish(&mut self) {
        self.gradient.clear();
    }

    fn set_trait(&mut self, name: &str, value: &TraitValue) {
        match name {
            "speed" => {
                if let Some(v) = value.as_f64() {
                    self.speed = v;
                }
            }
            "gradient_length" => {
                if let Some(v) = value.as_i64() {
                    self.gradient_length = v.max(2) as usize;
                    self.regen_gradient();
                }
            }
            "color_scheme" => {
                if let Some(colors) = value.as_color_list() {
                    self.scheme = colors;
                    self.regen_gradient();
                }
            }
            // choosing a preset overwrites the scheme with the named colors
            "preset" => {
                if let Some(scheme) = value.as_str().and_then(color::scheme) {
                    self.scheme = scheme.colors.to_vec();
                    self.regen_gradient();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plasma_fills_the_layer() {
        let mut plasma = Plasma::new();
        assert!(plasma.init(&FrameInfo {
            width: 22,
            height: 6
        }));

        let mut layer = Layer::new(22, 6);
        let drawn = plasma.draw(&mut layer, 1.25, None).await.unwrap();
        assert!(drawn);

        // every pixel is set and opaque
        for row in 0..6 {
            for col in 0..22 {
                assert_eq!(layer.get(row, col).unwrap().a, 1.0);
            }
        }
    }

    #[tokio::test]
    async fn scheme_change_rebuilds_gradient() {
        let mut plasma = Plasma::new();
        plasma.init(&FrameInfo {
            width: 4,
            height: 4,
        });
        let before = plasma.gradient.clone();
        plasma.set_trait(
            "color_scheme",
            &TraitValue::ColorList(vec![Color::RED, Color::BLUE]),
        );
        assert_ne!(before, plasma.gradient);
    }

    #[tokio::test]
    async fn preset_selects_a_named_scheme() {
        let mut plasma = Plasma::new();
        plasma.init(&FrameInfo {
            width: 4,
            height: 4,
        });
        let before = plasma.gradient.clone();

        plasma.set_trait("preset", &TraitValue::Str("embers".into()));
        assert_eq!(plasma.scheme, color::scheme("embers").unwrap().colors);
        assert_ne!(before, plasma.gradient);

        // unknown names leave the current scheme alone
        let kept = plasma.scheme.clone();
        plasma.set_trait("preset", &TraitValue::Str("disco".into()));
        assert_eq!(plasma.scheme, kept);
    }
}
