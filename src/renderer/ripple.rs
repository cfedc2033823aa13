//! Rings of color expanding from pressed keys.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::color::{self, Color, RainbowGenerator};
use crate::error::Result;
use crate::input::InputQueue;
use crate::layer::Layer;
use crate::traits::{TraitDef, TraitDescriptor, TraitValue};

use super::{FrameInfo, Renderer, RendererInfo, RendererMeta};

const COLOR_KEY: &str = "ripple_color";

// events stay alive for speed * this many seconds
const EXPIRE_TIME_FACTOR: f64 = 0.15;

static TRAITS: [TraitDescriptor; 4] = [
    TraitDescriptor::new(
        "ripple_width",
        TraitDef::Int {
            default: 3,
            min: 1,
            max: 5,
        },
    ),
    TraitDescriptor::new(
        "speed",
        TraitDef::Int {
            default: 5,
            min: 1,
            max: 9,
        },
    ),
    TraitDescriptor::new(
        "color",
        TraitDef::Color {
            default: Color::TRANSPARENT,
        },
    ),
    TraitDescriptor::new(
        "preset",
        TraitDef::Preset {
            default: None,
            choices: color::SCHEMES,
        },
    ),
];

pub static INFO: RendererInfo = RendererInfo {
    name: "ripple",
    meta: RendererMeta {
        display_name: "Ripples",
        description: "Ripples of color when keys are pressed",
        author: "chromad developers",
        version: "1.0",
    },
    traits: &TRAITS,
    requires_key_input: true,
    factory: || Box::new(Ripple::new()),
};

pub struct Ripple {
    ripple_width: i64,
    speed: i64,
    /// Fixed ripple color; transparent means pick one per key press.
    color: Color,
    /// Colors cycled per key press when a preset scheme is selected.
    scheme: Option<Vec<Color>>,
    scheme_index: usize,
    generator: RainbowGenerator,
    max_distance: f32,
}

impl Ripple {
    pub fn new() -> Self {
        Ripple {
            ripple_width: 3,
            speed: 5,
            color: Color::TRANSPARENT,
            scheme: None,
            scheme_index: 0,
            generator: RainbowGenerator::new(),
            max_distance: 1.0,
        }
    }

    /// Color for the next fresh key press: explicit color first, then the
    /// selected scheme in rotation, then random hues.
    fn next_ring_color(&mut self) -> Color {
        if self.color.a > 0.0 {
            return self.color;
        }
        if let Some(scheme) = &self.scheme {
            let color = scheme[self.scheme_index % scheme.len()];
            self.scheme_index += 1;
            return color;
        }
        self.generator.next_color()
    }

    fn expire_time(&self) -> Duration {
        Duration::from_secs_f64(self.speed as f64 * EXPIRE_TIME_FACTOR)
    }

    /// Quintic ease-out for the ring falloff.
    fn ease(n: f32) -> f32 {
        let n = n.clamp(0.0, 1.0) * 2.0;
        if n < 1.0 {
            0.5 * n.powi(5)
        } else {
            let n = n - 2.0;
            0.5 * (n.powi(5) + 2.0)
        }
    }
}

impl Default for Ripple {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for Ripple {
    fn init(&mut self, frame: &FrameInfo) -> bool {
        let w = frame.width as f32;
        let h = frame.height as f32;
        self.max_distance = (w * w + h * h).sqrt();
        true
    }

    fn draw<'a>(
        &'a mut self,
        layer: &'a mut Layer,
        _timestamp: f64,
        input: Option<&'a mut InputQueue>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let Some(queue) = input else {
                return Ok(false);
            };
            queue.set_expire_time(self.expire_time());

            let events = queue.events_nowait();
            if events.is_empty() {
                return Ok(false);
            }

            let ttl = self.expire_time();
            let now = Instant::now();
            let mut drew = false;

            for event in &events {
                if event.coords.is_empty() {
                    continue;
                }

                let color = match event.payload.get(COLOR_KEY).and_then(|v| v.as_color()) {
                    Some(c) => c,
                    None => {
                        let c = self.next_ring_color();
                        queue.set_payload(&event.keycode, COLOR_KEY, TraitValue::Color(c));
                        c
                    }
                };

                let remaining = event
                    .expire_at
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or(Duration::ZERO);
                let progress =
                    1.0 - (remaining.as_secs_f32() / ttl.as_secs_f32()).clamp(0.0, 1.0);
                let radius = progress * self.max_distance;

                for ring in 0..self.ripple_width {
                    let ring_radius = radius - ring as f32;
                    if ring_radius < 0.0 {
                        continue;
                    }
                    let falloff = Self::ease(1.0 - ring_radius / self.max_distance);
                    let ring_color = color.with_alpha(color.a * falloff);
                    for coord in &event.coords {
                        layer.ellipse(
                            coord.row as i64,
                            coord.col as i64,
                            ring_radius / 1.33,
                            ring_radius,
                            ring_color,
                            false,
                            1.0,
                        );
                    }
                    drew = true;
                }
            }

            Ok(drew)
        }
        .boxed()
    }

    fn finish(&mut self) {}

    fn set_trait(&mut self, name: &str, value: &TraitValue) {
        match name {
            "ripple_width" => {
                if let Some(v) = value.as_i64() {
                    self.ripple_width = v;
                }
            }
            "speed" => {
                if let Some(v) = value.as_i64() {
                    self.speed = v;
                }
            }
            "color" => {
                if let Some(c) = value.as_color() {
                    self.color = c;
                }
            }
            "preset" => {
                if let Some(scheme) = value.as_str().and_then(color::scheme) {
                    self.scheme = Some(scheme.colors.to_vec());
                    self.scheme_index = 0;
                }
            }
            _ => {}
        }
    }
}
