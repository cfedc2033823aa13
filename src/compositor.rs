//! Per-device animation compositor.
//!
//! Collects the output of one or more renderers and displays the composited
//! image. The loop is fully asynchronous: renderers block or yield buffers
//! at their own pace, the compositor waits until at least one active queue
//! has output, sweeps the rest without blocking, keeps the previous layer
//! for renderers that produced nothing this round, and commits the blended
//! result at no more than the global frame cap. It does not wake up while
//! nothing is being produced.

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::device::Driver;
use crate::error::{Error, Result};
use crate::input::InputRouter;
use crate::layer::Layer;
use crate::renderer::{self, descriptor_for, FrameInfo, RendererHandle, RunnerConfig};
use crate::traits::TraitMap;

/// Global cap on committed frames per device: 1/MAX_FPS.
const FRAME_PERIOD: Duration = Duration::from_millis(33);

/// Commit failures tolerated before the device is marked offline.
const MAX_COMMIT_FAILURES: u32 = 3;

/// Notifications emitted to observers of a device's animation state.
#[derive(Clone, Debug)]
pub enum CompositorEvent {
    LayersChanged,
    RendererFailed { zindex: i32, reason: String },
    Paused(bool),
    DeviceOffline,
}

/// A running renderer and its place in the stack.
struct Slot {
    zindex: i32,
    handle: RendererHandle,
    traits: TraitMap,
    /// Last submitted layer, kept for sticky re-composition.
    current: Option<Layer>,
}

/// Description of one active layer for remote clients.
#[derive(Clone, Debug)]
pub struct LayerInfo {
    pub zindex: i32,
    pub renderer: &'static str,
    pub traits: TraitMap,
}

enum Command {
    Add {
        name: String,
        zindex: Option<i32>,
        traits: TraitMap,
        reply: oneshot::Sender<Result<i32>>,
    },
    Remove {
        zindex: i32,
        reply: oneshot::Sender<Result<()>>,
    },
    SetTraits {
        zindex: i32,
        traits: TraitMap,
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        paused: bool,
        reply: oneshot::Sender<bool>,
    },
    StopAll {
        reply: oneshot::Sender<Result<()>>,
    },
    List {
        reply: oneshot::Sender<Vec<LayerInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a device's compositor task.
pub struct Compositor {
    control_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl Compositor {
    pub fn new(
        driver: Arc<Driver>,
        input: Option<Arc<InputRouter>>,
        events: broadcast::Sender<CompositorEvent>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(driver, input, events, control_rx));
        Compositor { control_tx, task }
    }

    pub async fn add_renderer(
        &self,
        name: &str,
        zindex: Option<i32>,
        traits: TraitMap,
    ) -> Result<i32> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::Add {
                name: name.to_string(),
                zindex,
                traits,
                reply,
            })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))?
    }

    pub async fn remove_renderer(&self, zindex: i32) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::Remove { zindex, reply })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))?
    }

    pub async fn set_layer_traits(&self, zindex: i32, traits: TraitMap) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::SetTraits {
                zindex,
                traits,
                reply,
            })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))?
    }

    /// Pause or resume composition; renderer tasks stay alive and block on
    /// queue backpressure. Returns the new paused state.
    pub async fn pause(&self, paused: bool) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::Pause { paused, reply })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))
    }

    /// Remove every renderer and reset the device.
    pub async fn stop_all(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::StopAll { reply })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))?
    }

    pub async fn list_layers(&self) -> Result<Vec<LayerInfo>> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Command::List { reply })
            .map_err(|_| Error::DeviceOffline(None))?;
        rx.await.map_err(|_| Error::DeviceOffline(None))
    }

    /// Tear the compositor down, cancelling all renderers first.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.control_tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Wake {
    Cmd(Command),
    Layer(usize, Option<Layer>),
    Tick,
    Closed,
}

async fn run_loop(
    driver: Arc<Driver>,
    input: Option<Arc<InputRouter>>,
    events: broadcast::Sender<CompositorEvent>,
    mut control_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut slots: Vec<Slot> = Vec::new();
    let mut paused = false;
    let mut pending_commit = false;
    let mut commit_failures = 0u32;
    let mut next_tick = Instant::now();
    let epoch = std::time::Instant::now();

    info!(device = driver.descriptor().name, "compositor starting");

    loop {
        let wake = if paused || (slots.is_empty() && !pending_commit) {
            match control_rx.recv().await {
                Some(cmd) => Wake::Cmd(cmd),
                None => Wake::Closed,
            }
        } else {
            let gather = async {
                tokio::time::sleep_until(next_tick).await;
                if pending_commit {
                    return Wake::Tick;
                }
                let waiters: Vec<_> = slots
                    .iter_mut()
                    .map(|slot| Box::pin(slot.handle.active_rx.recv()))
                    .collect();
                let (layer, index, _) = select_all(waiters).await;
                Wake::Layer(index, layer)
            };
            tokio::pin!(gather);
            tokio::select! {
                cmd = control_rx.recv() => match cmd {
                    Some(cmd) => Wake::Cmd(cmd),
                    None => Wake::Closed,
                },
                wake = &mut gather => wake,
            }
        };

        match wake {
            Wake::Closed => break,
            Wake::Cmd(cmd) => match cmd {
                Command::Add {
                    name,
                    zindex,
                    traits,
                    reply,
                } => {
                    let result =
                        add_renderer(&driver, &input, &mut slots, &name, zindex, traits, epoch);
                    if result.is_ok() {
                        let _ = events.send(CompositorEvent::LayersChanged);
                    }
                    let _ = reply.send(result);
                }
                Command::Remove { zindex, reply } => {
                    let result = remove_renderer(&mut slots, zindex).await;
                    if result.is_ok() {
                        let _ = events.send(CompositorEvent::LayersChanged);
                    }
                    let _ = reply.send(result);
                }
                Command::SetTraits {
                    zindex,
                    traits,
                    reply,
                } => {
                    let _ = reply.send(set_layer_traits(&mut slots, zindex, traits));
                }
                Command::Pause {
                    paused: requested,
                    reply,
                } => {
                    if paused != requested {
                        paused = requested;
                        debug!(paused, "compositor pause state changed");
                        let _ = events.send(CompositorEvent::Paused(paused));
                    }
                    let _ = reply.send(paused);
                }
                Command::StopAll { reply } => {
                    while let Some(slot) = slots.pop() {
                        stop_slot(slot).await;
                    }
                    let _ = events.send(CompositorEvent::LayersChanged);
                    let result = driver.reset().await;
                    let _ = reply.send(result);
                }
                Command::List { reply } => {
                    let mut infos: Vec<LayerInfo> = slots
                        .iter()
                        .map(|slot| LayerInfo {
                            zindex: slot.zindex,
                            renderer: slot.handle.info.name,
                            traits: slot.traits.clone(),
                        })
                        .collect();
                    infos.sort_by_key(|info| info.zindex);
                    let _ = reply.send(infos);
                }
                Command::Shutdown { reply } => {
                    while let Some(slot) = slots.pop() {
                        stop_slot(slot).await;
                    }
                    let _ = reply.send(());
                    break;
                }
            },
            Wake::Layer(index, Some(layer)) => {
                accept_layer(&mut slots[index], layer);

                // non-blocking sweep of every other renderer
                for slot in slots.iter_mut() {
                    while let Ok(layer) = slot.handle.active_rx.try_recv() {
                        accept_layer(slot, layer);
                    }
                }

                commit(
                    &driver,
                    &mut slots,
                    &events,
                    &mut pending_commit,
                    &mut commit_failures,
                    &mut paused,
                )
                .await;
                next_tick = Instant::now() + FRAME_PERIOD;
            }
            Wake::Layer(index, None) => {
                // the renderer task ended on its own: a draw error
                let slot = slots.remove(index);
                let zindex = slot.zindex;
                let reason = slot
                    .handle
                    .take_failure()
                    .unwrap_or_else(|| "renderer exited".to_string());
                warn!(
                    renderer = slot.handle.info.name,
                    zindex,
                    reason = %reason,
                    "removing failed renderer"
                );
                stop_slot(slot).await;
                let _ = events.send(CompositorEvent::RendererFailed { zindex, reason });
                let _ = events.send(CompositorEvent::LayersChanged);
            }
            Wake::Tick => {
                commit(
                    &driver,
                    &mut slots,
                    &events,
                    &mut pending_commit,
                    &mut commit_failures,
                    &mut paused,
                )
                .await;
                next_tick = Instant::now() + FRAME_PERIOD;
            }
        }
    }

    while let Some(slot) = slots.pop() {
        stop_slot(slot).await;
    }
    info!(device = driver.descriptor().name, "compositor stopped");
}

/// Swap a freshly produced layer into the slot, returning the previous one
/// to the renderer's avail queue.
fn accept_layer(slot: &mut Slot, layer: Layer) {
    if let Some(mut old) = slot.current.take() {
        old.locked = false;
        let _ = slot.handle.avail_tx.try_send(old);
    }
    slot.current = Some(layer);
}

/// Blend all current layers in z-order and push the result to hardware.
async fn commit(
    driver: &Arc<Driver>,
    slots: &mut [Slot],
    events: &broadcast::Sender<CompositorEvent>,
    pending_commit: &mut bool,
    commit_failures: &mut u32,
    paused: &mut bool,
) {
    if slots.iter().all(|slot| slot.current.is_none()) {
        *pending_commit = false;
        return;
    }

    let Some(frame_lock) = driver.frame() else {
        *pending_commit = false;
        return;
    };

    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by_key(|i| slots[*i].zindex);

    let mut frame = frame_lock.lock().await;
    frame.clear(None);
    for index in order {
        let slot = &slots[index];
        if let Some(layer) = &slot.current {
            frame.blit(layer, layer.blend_mode, layer.opacity);
        }
    }

    match driver.commit_matrix(&frame).await {
        Ok(()) => {
            frame.mark_committed();
            *pending_commit = false;
            *commit_failures = 0;
        }
        Err(err) => {
            // layers stay intact; the next tick retries
            *pending_commit = true;
            *commit_failures += 1;
            warn!(failures = *commit_failures, error = %err, "frame commit failed");
            if *commit_failures >= MAX_COMMIT_FAILURES {
                error!("repeated commit failures, marking device offline");
                driver.mark_offline();
                *paused = true;
                *pending_commit = false;
                let _ = events.send(CompositorEvent::DeviceOffline);
            }
        }
    }
}

fn add_renderer(
    driver: &Arc<Driver>,
    input: &Option<Arc<InputRouter>>,
    slots: &mut Vec<Slot>,
    name: &str,
    zindex: Option<i32>,
    traits: TraitMap,
    epoch: std::time::Instant,
) -> Result<i32> {
    let info = renderer::find(name)
        .ok_or_else(|| Error::unsupported(format!("unknown renderer {name}")))?;

    if info.requires_key_input && input.is_none() {
        return Err(Error::unsupported(format!(
            "renderer {name} needs key input, which {} does not produce",
            driver.descriptor().name
        )));
    }

    let dims = driver
        .descriptor()
        .dimensions
        .ok_or_else(|| Error::unsupported("device has no matrix"))?;

    let zindex = match zindex {
        Some(z) => {
            if z < 0 {
                return Err(Error::invalid(format!("z-index {z} must be non-negative")));
            }
            if slots.iter().any(|slot| slot.zindex == z) {
                return Err(Error::Conflict(z));
            }
            z
        }
        None => slots.iter().map(|slot| slot.zindex + 1).max().unwrap_or(0),
    };

    // validate every trait against its descriptor before touching anything
    let mut config = RunnerConfig::default();
    let mut specific: Vec<(&str, &crate::traits::TraitValue)> = Vec::new();
    for (key, value) in &traits {
        let descriptor = descriptor_for(info, key)
            .ok_or_else(|| Error::invalid(format!("renderer {name} has no trait {key}")))?;
        descriptor.validate(value)?;
        if !config.apply(key, value) {
            specific.push((key, value));
        }
    }

    let mut renderer = (info.factory)();
    for (key, value) in specific {
        renderer.set_trait(key, value);
    }

    let frame_info = FrameInfo {
        width: dims.width,
        height: dims.height,
    };
    if !renderer.init(&frame_info) {
        return Err(Error::RendererFailed(format!(
            "{name} failed to initialize"
        )));
    }

    let queue = if info.requires_key_input {
        input.as_ref().map(|router| router.attach())
    } else {
        None
    };

    let handle = renderer::spawn(renderer, info, frame_info, config, queue, epoch);
    info!(renderer = name, zindex, "layer created");

    slots.push(Slot {
        zindex,
        handle,
        traits,
        current: None,
    });
    Ok(zindex)
}

async fn remove_renderer(slots: &mut Vec<Slot>, zindex: i32) -> Result<()> {
    let index = slots
        .iter()
        .position(|slot| slot.zindex == zindex)
        .ok_or_else(|| Error::invalid(format!("no renderer at z-index {zindex}")))?;
    let slot = slots.remove(index);
    info!(zindex, "layer removed");
    stop_slot(slot).await;
    Ok(())
}

/// Cancel the renderer task and wait for it to finish; dropping the handle
/// drains both queues and frees the layers.
async fn stop_slot(slot: Slot) {
    let Slot { handle, current, .. } = slot;
    drop(current);
    handle.stop().await;
}

fn set_layer_traits(slots: &mut [Slot], zindex: i32, traits: TraitMap) -> Result<()> {
    let slot = slots
        .iter_mut()
        .find(|slot| slot.zindex == zindex)
        .ok_or_else(|| Error::invalid(format!("no renderer at z-index {zindex}")))?;

    for (key, value) in &traits {
        let descriptor = descriptor_for(slot.handle.info, key).ok_or_else(|| {
            Error::invalid(format!(
                "renderer {} has no trait {key}",
                slot.handle.info.name
            ))
        })?;
        descriptor.validate(value)?;
    }

    for (key, value) in traits {
        slot.traits.insert(key.clone(), value.clone());
        let _ = slot.handle.trait_tx.send((key, value));
    }
    Ok(())
}
