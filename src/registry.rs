//! The remote object model.
//!
//! Transport adapters (D-Bus or otherwise) are pure clients of this module:
//! a [`DeviceRegistry`] listing live devices and emitting lifecycle events,
//! and a [`DeviceHandle`] per device exposing readable properties and
//! operations. Property changes are emitted in the order the underlying
//! state transitions complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::compositor::{Compositor, CompositorEvent, LayerInfo};
use crate::device::{DeviceState, Driver, LedSettings};
use crate::error::{Error, Result};
use crate::frame::FrameSnapshot;
use crate::hardware::{CapabilityFlag, DeviceDescriptor, DeviceKind, Led};
use crate::input::InputRouter;
use crate::protocol::effects::{self, EffectArgs};
use crate::renderer;
use crate::traits::TraitMap;

/// Remote operations that enter the compositor path must return within this
/// long or fail with `Deadline`.
const REMOTE_DEADLINE: Duration = Duration::from_secs(2);

pub type DeviceId = String;

#[derive(Clone, Debug)]
pub enum DeviceEvent {
    Added(DeviceId),
    Removed(DeviceId),
    PropertyChanged { device: DeviceId, property: String },
}

/// Battery reading as exposed to clients: the last observed value plus a
/// staleness flag that flips once the device stops answering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryReading {
    pub percent: Option<f32>,
    pub stale: bool,
}

/// One device as seen by remote clients.
pub struct DeviceHandle {
    id: DeviceId,
    driver: Arc<Driver>,
    compositor: Option<Arc<Compositor>>,
    input: Option<Arc<InputRouter>>,
    events: broadcast::Sender<DeviceEvent>,
    compositor_events: broadcast::Sender<CompositorEvent>,
}

impl DeviceHandle {
    pub fn new(
        id: DeviceId,
        driver: Arc<Driver>,
        compositor: Option<Arc<Compositor>>,
        input: Option<Arc<InputRouter>>,
        events: broadcast::Sender<DeviceEvent>,
        compositor_events: broadcast::Sender<CompositorEvent>,
    ) -> Self {
        DeviceHandle {
            id,
            driver,
            compositor,
            input,
            events,
            compositor_events,
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn input_router(&self) -> Option<&Arc<InputRouter>> {
        self.input.as_ref()
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        self.driver.descriptor()
    }

    pub fn subscribe_animation(&self) -> broadcast::Receiver<CompositorEvent> {
        self.compositor_events.subscribe()
    }

    /// Tear down the device: cancel the compositor (which cancels every
    /// renderer) and drop the transport path.
    pub async fn shutdown(&self) {
        if let Some(compositor) = &self.compositor {
            compositor.shutdown().await;
        }
        self.driver.mark_offline();
    }

    fn notify(&self, property: &str) {
        let _ = self.events.send(DeviceEvent::PropertyChanged {
            device: self.id.clone(),
            property: property.to_string(),
        });
    }

    fn compositor(&self) -> Result<&Arc<Compositor>> {
        self.compositor
            .as_ref()
            .ok_or_else(|| Error::unsupported("device has no animation support"))
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(REMOTE_DEADLINE, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Deadline),
        }
    }

    // ── readable properties ─────────────────────────────────────────────

    pub fn state(&self) -> DeviceState {
        self.driver.state()
    }

    pub fn is_offline(&self) -> bool {
        self.driver.is_offline()
    }

    /// Built-in effects available under this device's protocol generation.
    pub fn available_effects(&self) -> Vec<&'static str> {
        let extended = self.driver.profile().uses_extended_effect_class;
        self.descriptor()
            .supported_effects
            .iter()
            .copied()
            .filter(|name| {
                effects::find(name)
                    .map(|def| def.id_for(extended).is_some())
                    // headset effects bypass the effect table
                    .unwrap_or(false)
                    || self.descriptor().kind == DeviceKind::Headset
            })
            .collect()
    }

    /// Renderers this device can run.
    pub fn available_renderers(&self) -> Vec<&'static str> {
        let has_input = self.descriptor().has_capability(CapabilityFlag::KeyInput);
        renderer::REGISTRY
            .iter()
            .copied()
            .filter(|info| has_input || !info.requires_key_input)
            .map(|info| info.name)
            .collect()
    }

    /// Last observed battery level. Never touches the hardware.
    pub fn battery(&self) -> Result<BatteryReading> {
        if !self.descriptor().has_capability(CapabilityFlag::Wireless) {
            return Err(Error::unsupported("device is not wireless"));
        }
        let telemetry = self.driver.state().telemetry;
        Ok(BatteryReading {
            percent: telemetry.battery,
            stale: telemetry.stale,
        })
    }

    pub fn charging(&self) -> Result<Option<bool>> {
        if !self.descriptor().has_capability(CapabilityFlag::Wireless) {
            return Err(Error::unsupported("device is not wireless"));
        }
        Ok(self.driver.state().telemetry.charging)
    }

    /// The last composited frame with its sequence number and timestamp.
    pub async fn get_current_frame(&self) -> Result<FrameSnapshot> {
        let frame = self
            .driver
            .frame()
            .ok_or_else(|| Error::unsupported("device has no matrix"))?;
        Ok(frame.lock().await.snapshot())
    }

    // ── operations ──────────────────────────────────────────────────────

    pub async fn set_brightness(&self, pct: f32) -> Result<()> {
        self.driver.set_brightness(pct).await?;
        self.notify("brightness");
        Ok(())
    }

    pub async fn get_brightness(&self) -> Result<f32> {
        self.driver.get_brightness().await
    }

    pub async fn set_suspend(&self, suspend: bool) -> Result<()> {
        self.driver.set_suspend(suspend).await?;
        self.notify("suspended");
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        if let Some(compositor) = &self.compositor {
            self.with_deadline(compositor.stop_all()).await?;
        } else {
            self.driver.reset().await?;
        }
        self.notify("current_effect");
        Ok(())
    }

    pub async fn set_led(&self, led_name: &str, settings: LedSettings) -> Result<()> {
        let led = Led::from_name(led_name)
            .ok_or_else(|| Error::invalid(format!("unknown led {led_name}")))?;
        self.driver.set_led(led, settings).await?;
        self.notify("leds");
        Ok(())
    }

    pub async fn set_effect(&self, name: &str, args: EffectArgs) -> Result<()> {
        self.driver.set_effect(name, args).await?;
        self.notify("current_effect");
        Ok(())
    }

    pub async fn add_renderer(
        &self,
        name: &str,
        zindex: Option<i32>,
        traits: TraitMap,
    ) -> Result<i32> {
        let compositor = self.compositor()?;
        let z = self
            .with_deadline(compositor.add_renderer(name, zindex, traits))
            .await?;
        self.notify("active_layers");
        Ok(z)
    }

    pub async fn remove_renderer(&self, zindex: i32) -> Result<()> {
        let compositor = self.compositor()?;
        self.with_deadline(compositor.remove_renderer(zindex))
            .await?;
        self.notify("active_layers");
        Ok(())
    }

    pub async fn set_layer_traits(&self, zindex: i32, traits: TraitMap) -> Result<()> {
        let compositor = self.compositor()?;
        self.with_deadline(compositor.set_layer_traits(zindex, traits))
            .await
    }

    pub async fn active_layers(&self) -> Result<Vec<LayerInfo>> {
        let compositor = self.compositor()?;
        self.with_deadline(compositor.list_layers()).await
    }

    pub async fn pause_animation(&self) -> Result<bool> {
        let compositor = self.compositor()?;
        let paused = self.with_deadline(compositor.pause(true)).await?;
        self.notify("animation_paused");
        Ok(paused)
    }

    pub async fn resume_animation(&self) -> Result<bool> {
        let compositor = self.compositor()?;
        let paused = self.with_deadline(compositor.pause(false)).await?;
        self.notify("animation_paused");
        Ok(paused)
    }

    pub async fn stop_animation(&self) -> Result<()> {
        let compositor = self.compositor()?;
        self.with_deadline(compositor.stop_all()).await?;
        self.notify("active_layers");
        Ok(())
    }

    // ── laptop extensions ───────────────────────────────────────────────

    pub async fn set_fan_auto(&self) -> Result<()> {
        self.driver.set_fan_auto().await?;
        self.notify("fan_mode");
        Ok(())
    }

    pub async fn set_fan_rpm(
        &self,
        rpm: u32,
        rpm2: Option<u32>,
    ) -> Result<crate::device::laptop::FanOutcome> {
        let outcome = self.driver.set_fan_rpm(rpm, rpm2).await?;
        self.notify("fan_mode");
        Ok(outcome)
    }

    pub async fn get_fan_rpm(&self) -> Result<(u32, Option<u32>)> {
        self.driver.get_fan_rpm().await
    }

    pub async fn set_power_mode(&self, mode: &str) -> Result<()> {
        let mode = crate::device::laptop::PowerMode::from_name(mode)
            .ok_or_else(|| Error::invalid(format!("unknown power mode {mode}")))?;
        self.driver.set_power_mode(mode).await?;
        self.notify("power_mode");
        Ok(())
    }

    pub fn get_temperatures(&self) -> Result<std::collections::HashMap<String, f32>> {
        self.driver.get_temperatures()
    }
}

/// The daemon object: live devices and lifecycle events.
pub struct DeviceRegistry {
    devices: StdMutex<HashMap<DeviceId, Arc<DeviceHandle>>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        DeviceRegistry {
            devices: StdMutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<DeviceEvent> {
        self.events.clone()
    }

    pub fn list_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<Arc<DeviceHandle>> {
        self.devices
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn insert(&self, handle: Arc<DeviceHandle>) {
        let id = handle.id().clone();
        self.devices
            .lock()
            .expect("registry lock poisoned")
            .insert(id.clone(), handle);
        let _ = self.events.send(DeviceEvent::Added(id));
    }

    pub fn remove(&self, id: &str) -> Option<Arc<DeviceHandle>> {
        let removed = self
            .devices
            .lock()
            .expect("registry lock poisoned")
            .remove(id);
        if removed.is_some() {
            let _ = self.events.send(DeviceEvent::Removed(id.to_string()));
        }
        removed
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
