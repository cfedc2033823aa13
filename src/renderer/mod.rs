//! Renderer contract and execution.
//!
//! A renderer is an animation unit producing successive frames into a
//! [`Layer`]. Each runs as an independent cooperative task paced by its own
//! FPS, cycling two buffers through an avail/active queue pair shared with
//! the compositor. The set of renderers is closed at build time and
//! registered in [`REGISTRY`].

pub mod plasma;
pub mod rainbow;
pub mod ripple;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blend::BlendMode;
use crate::color::Color;
use crate::error::Result;
use crate::input::InputQueue;
use crate::layer::Layer;
use crate::traits::{TraitDescriptor, TraitValue};

/// Buffers per renderer. One cycles through the renderer while the
/// compositor holds the other for sticky re-composition.
pub const NUM_BUFFERS: usize = 2;

pub const MAX_FPS: f64 = 30.0;
pub const MIN_FPS: f64 = 1.0;
pub const DEFAULT_FPS: f64 = 15.0;

/// Immutable renderer metadata.
#[derive(Clone, Copy, Debug)]
pub struct RendererMeta {
    pub display_name: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub version: &'static str,
}

/// Dimensions a renderer is configured against.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub width: usize,
    pub height: usize,
}

/// The renderer contract.
///
/// `draw` returns `true` to submit the layer for composition and `false` to
/// skip the tick. Errors terminate the renderer; `finish` runs on every exit
/// path.
pub trait Renderer: Send {
    /// Prepare internal state from the frame dimensions. Returning false
    /// aborts activation.
    fn init(&mut self, frame: &FrameInfo) -> bool;

    /// Produce one frame into `layer`.
    fn draw<'a>(
        &'a mut self,
        layer: &'a mut Layer,
        timestamp: f64,
        input: Option<&'a mut InputQueue>,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Release resources.
    fn finish(&mut self);

    /// Apply a renderer-specific trait. Values arrive pre-validated against
    /// the declared descriptors; derived state must be refreshed before the
    /// next draw.
    fn set_trait(&mut self, name: &str, value: &TraitValue);
}

/// A registered built-in renderer.
pub struct RendererInfo {
    pub name: &'static str,
    pub meta: RendererMeta,
    /// Renderer-specific traits; the common traits below apply to all.
    pub traits: &'static [TraitDescriptor],
    pub requires_key_input: bool,
    pub factory: fn() -> Box<dyn Renderer>,
}

/// Traits shared by every renderer.
pub static COMMON_TRAITS: &[TraitDescriptor] = &[
    TraitDescriptor::new(
        "fps",
        crate::traits::TraitDef::Float {
            default: DEFAULT_FPS,
            min: MIN_FPS,
            max: MAX_FPS,
        },
    ),
    TraitDescriptor::new(
        "blend_mode",
        crate::traits::TraitDef::Enum {
            default: "screen",
            choices: &[
                "normal",
                "screen",
                "soft_light",
                "lighten_only",
                "darken_only",
                "dodge",
                "multiply",
                "hard_light",
                "addition",
                "difference",
                "subtract",
                "grain_extract",
                "grain_merge",
                "divide",
            ],
        },
    ),
    TraitDescriptor::new(
        "opacity",
        crate::traits::TraitDef::Float {
            default: 1.0,
            min: 0.0,
            max: 1.0,
        },
    ),
    TraitDescriptor::new(
        "background_color",
        crate::traits::TraitDef::Color {
            default: Color::TRANSPARENT,
        },
    ),
];

/// The closed set of built-in renderers.
pub static REGISTRY: &[&RendererInfo] = &[&plasma::INFO, &ripple::INFO, &rainbow::INFO];

pub fn find(name: &str) -> Option<&'static RendererInfo> {
    REGISTRY
        .iter()
        .copied()
        .find(|r| r.name.eq_ignore_ascii_case(name))
}

/// Look up a trait descriptor for a renderer, checking its specific traits
/// first and the common set second.
pub fn descriptor_for(info: &RendererInfo, name: &str) -> Option<&'static TraitDescriptor> {
    info.traits
        .iter()
        .find(|d| d.name == name)
        .or_else(|| COMMON_TRAITS.iter().find(|d| d.name == name))
}

/// Runner-held state for the common traits.
#[derive(Clone, Copy, Debug)]
pub struct RunnerConfig {
    pub fps: f64,
    pub blend_mode: BlendMode,
    pub opacity: f32,
    pub background: Option<Color>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            fps: DEFAULT_FPS,
            blend_mode: BlendMode::Screen,
            opacity: 1.0,
            background: None,
        }
    }
}

impl RunnerConfig {
    /// Absorb a common trait; returns false when the name is not a common
    /// trait and should go to the renderer instead.
    pub fn apply(&mut self, name: &str, value: &TraitValue) -> bool {
        match name {
            "fps" => {
                if let Some(v) = value.as_f64() {
                    self.fps = v.clamp(MIN_FPS, MAX_FPS);
                }
            }
            "blend_mode" => {
                if let Some(s) = value.as_str() {
                    if let Ok(mode) = s.parse() {
                        self.blend_mode = mode;
                    }
                }
            }
            "opacity" => {
                if let Some(v) = value.as_f64() {
                    self.opacity = (v as f32).clamp(0.0, 1.0);
                }
            }
            "background_color" => {
                if let Some(c) = value.as_color() {
                    self.background = if c.a > 0.0 { Some(c) } else { None };
                }
            }
            _ => return false,
        }
        true
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.clamp(MIN_FPS, MAX_FPS))
    }
}

/// Channels and task handle for one running renderer, owned by the
/// compositor.
pub struct RendererHandle {
    pub info: &'static RendererInfo,
    pub avail_tx: mpsc::Sender<Layer>,
    pub active_rx: mpsc::Receiver<Layer>,
    pub trait_tx: mpsc::UnboundedSender<(String, TraitValue)>,
    shutdown_tx: watch::Sender<bool>,
    pub task: JoinHandle<()>,
    failure: Arc<StdMutex<Option<String>>>,
}

impl RendererHandle {
    pub fn take_failure(&self) -> Option<String> {
        self.failure.lock().expect("failure slot poisoned").take()
    }

    /// Cancel the task at its next suspension point and wait for `finish`
    /// to run. Dropping `self` afterwards drains both queues.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the cooperative task driving one renderer.
///
/// The renderer must already be initialized. Two layers sized to the frame
/// are primed onto the avail queue before the loop starts.
pub fn spawn(
    mut renderer: Box<dyn Renderer>,
    info: &'static RendererInfo,
    frame: FrameInfo,
    mut config: RunnerConfig,
    mut input: Option<InputQueue>,
    epoch: Instant,
) -> RendererHandle {
    let (avail_tx, mut avail_rx) = mpsc::channel::<Layer>(NUM_BUFFERS);
    let (active_tx, active_rx) = mpsc::channel::<Layer>(NUM_BUFFERS);
    let (trait_tx, mut trait_rx) = mpsc::unbounded_channel::<(String, TraitValue)>();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let failure: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));

    for _ in 0..NUM_BUFFERS {
        avail_tx
            .try_send(Layer::new(frame.width, frame.height))
            .expect("fresh avail queue cannot be full");
    }

    let runner_avail_tx = avail_tx.clone();
    let failure_slot = failure.clone();

    let task = tokio::spawn(async move {
        debug!(renderer = info.name, "renderer task starting");

        'run: loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let tick_start = Instant::now();

            // block until a free buffer comes back from the compositor
            let mut layer = tokio::select! {
                _ = shutdown_rx.changed() => break 'run,
                buf = avail_rx.recv() => match buf {
                    Some(layer) => layer,
                    None => break 'run,
                },
            };

            // trait changes take effect by the next draw
            while let Ok((name, value)) = trait_rx.try_recv() {
                if !config.apply(&name, &value) {
                    renderer.set_trait(&name, &value);
                }
            }

            layer.reset(config.background, config.blend_mode, config.opacity);

            let timestamp = epoch.elapsed().as_secs_f64();
            let outcome = {
                let fut = renderer.draw(&mut layer, timestamp, input.as_mut());
                tokio::pin!(fut);
                tokio::select! {
                    _ = shutdown_rx.changed() => None,
                    result = &mut fut => Some(result),
                }
            };

            match outcome {
                // cancelled mid-draw: put the buffer back and exit
                None => {
                    let _ = runner_avail_tx.try_send(layer);
                    break 'run;
                }
                Some(Ok(true)) => {
                    layer.locked = true;
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            break 'run;
                        }
                        sent = active_tx.send(layer) => {
                            if sent.is_err() {
                                break 'run;
                            }
                        }
                    }
                }
                Some(Ok(false)) => {
                    // nothing to show this tick, return the buffer unused
                    if runner_avail_tx.send(layer).await.is_err() {
                        break 'run;
                    }
                }
                Some(Err(err)) => {
                    warn!(renderer = info.name, error = %err, "renderer draw failed");
                    *failure_slot.lock().expect("failure slot poisoned") =
                        Some(err.to_string());
                    break 'run;
                }
            }

            let elapsed = tick_start.elapsed();
            let period = config.period();
            if elapsed < period {
                tokio::select! {
                    _ = shutdown_rx.changed() => break 'run,
                    _ = tokio::time::sleep(period - elapsed) => {}
                }
            }
        }

        renderer.finish();
        debug!(renderer = info.name, "renderer task finished");
    });

    RendererHandle {
        info,
        avail_tx,
        active_rx,
        trait_tx,
        shutdown_tx,
        task,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_builtins() {
        assert!(find("plasma").is_some());
        assert!(find("ripple").is_some());
        assert!(find("rainbow").is_some());
        assert!(find("nonexistent").is_none());
    }

    #[test]
    fn ripple_requires_key_input() {
        assert!(find("ripple").unwrap().requires_key_input);
        assert!(!find("plasma").unwrap().requires_key_input);
    }

    #[test]
    fn common_traits_resolve_for_all_renderers() {
        for info in REGISTRY.iter().copied() {
            assert!(descriptor_for(info, "fps").is_some(), "{}", info.name);
            assert!(
                descriptor_for(info, "blend_mode").is_some(),
                "{}",
                info.name
            );
        }
    }

    #[test]
    fn config_clamps_fps() {
        let mut config = RunnerConfig::default();
        config.apply("fps", &TraitValue::Float(90.0));
        assert_eq!(config.fps, MAX_FPS);
        config.apply("fps", &TraitValue::Float(0.1));
        assert_eq!(config.fps, MIN_FPS);
    }

    #[test]
    fn config_parses_blend_mode() {
        let mut config = RunnerConfig::default();
        assert!(config.apply("blend_mode", &TraitValue::Str("multiply".into())));
        assert_eq!(config.blend_mode, BlendMode::Multiply);
        // unknown names are not a common trait miss, just ignored
        assert!(config.apply("blend_mode", &TraitValue::Str("bogus".into())));
        assert_eq!(config.blend_mode, BlendMode::Multiply);
    }

    #[test]
    fn renderer_specific_traits_fall_through() {
        let mut config = RunnerConfig::default();
        assert!(!config.apply("speed", &TraitValue::Float(1.0)));
    }
}
