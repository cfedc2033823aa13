//! Scrolling rainbow of hues staggered across rows.

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::color::Color;
use crate::error::Result;
use crate::input::InputQueue;
use crate::layer::Layer;
use crate::traits::{TraitDef, TraitDescriptor, TraitValue};

use super::{FrameInfo, Renderer, RendererInfo, RendererMeta};

static TRAITS: [TraitDescriptor; 3] = [
    TraitDescriptor::new(
        "stagger",
        TraitDef::Int {
            default: 4,
            min: 0,
            max: 100,
        },
    ),
    TraitDescriptor::new(
        "length",
        TraitDef::Int {
            default: 75,
            min: 20,
            max: 360,
        },
    ),
    TraitDescriptor::new(
        "speed",
        TraitDef::Float {
            default: 1.0,
            min: 0.0,
            max: 4.0,
        },
    ),
];

pub static INFO: RendererInfo = RendererInfo {
    name: "rainbow",
    meta: RendererMeta {
        display_name: "Rainbow",
        description: "Rainbow of hues",
        author: "chromad developers",
        version: "1.0",
    },
    traits: &TRAITS,
    requires_key_input: false,
    factory: || Box::new(Rainbow::new()),
};

pub struct Rainbow {
    stagger: i64,
    length: i64,
    speed: f64,
}

impl Rainbow {
    pub fn new() -> Self {
        Rainbow {
            stagger: 4,
            length: 75,
            speed: 1.0,
        }
    }
}

impl Default for Rainbow {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for Rainbow {
    fn init(&mut self, _frame: &FrameInfo) -> bool {
        true
    }

    fn draw<'a>(
        &'a mut self,
        layer: &'a mut Layer,
        timestamp: f64,
        _input: Option<&'a mut InputQueue>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let length = self.length.max(1) as f64;
            let phase = timestamp * self.speed * 10.0;

            for row in 0..layer.height() {
                let row_shift = (row as i64 * self.stagger) as f64;
                for col in 0..layer.width() {
                    let hue = ((col as f64 + row_shift + phase) / length).rem_euclid(1.0);
                    layer.put(row, col, Color::from_hsv(hue as f32, 1.0, 1.0));
                }
            }
            Ok(true)
        }
        .boxed()
    }

    fn finish(&mut self) {}

    fn set_trait(&mut self, name: &str, value: &TraitValue) {
        match name {
            "stagger" => {
                if let Some(v) = value.as_i64() {
                    self.stagger = v;
                }
            }
            "length" => {
                if let Some(v) = value.as_i64() {
                    self.length = v;
                }
            }
            "speed" => {
                if let Some(v) = value.as_f64() {
                    self.speed = v;
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
    async fn rainbow_covers_every_cell() {
        let mut rainbow = Rainbow::new();
        rainbow.init(&FrameInfo {
            width: 15,
            height: 1,
        });
        let mut layer = Layer::new(15, 1);
        assert!(rainbow.draw(&mut layer, 0.5, None).await.unwrap());
        for col in 0..15 {
            assert_eq!(layer.get(0, col).unwrap().a, 1.0);
        }
    }

    #[tokio::test]
    async fn stagger_shifts_rows() {
        let mut rainbow = Rainbow::new();
        rainbow.set_trait("stagger", &TraitValue::Int(10));
        rainbow.init(&FrameInfo {
            width: 8,
            height: 2,
        });
        let mut layer = Layer::new(8, 2);
        rainbow.draw(&mut layer, 0.0, None).await.unwrap();
        assert_ne!(layer.get(0, 0), layer.get(1, 0));
    }
}
