//! USB hotplug discovery and device lifecycle.
//!
//! The manager enumerates hidraw nodes through udev, resolves each against
//! the hardware catalog, and brings matching devices up: transport, driver,
//! input router, compositor, registry entry. A netlink monitor thread feeds
//! hotplug events into the async world; wireless devices get a heartbeat
//! probe that drives the offline transition.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::compositor::Compositor;
use crate::device::{Driver, SysfsThermal};
use crate::hardware::{CapabilityFlag, DeviceKind, HardwareStore, RAZER_VENDOR_ID};
use crate::hid::HidrawDevice;
use crate::input::InputRouter;
use crate::prefs::{DevicePreferences, PreferenceStore};
use crate::registry::{DeviceHandle, DeviceRegistry};

/// One retry after this long when the transport fails to open.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Budget for the initial firmware/serial identification.
const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// Wireless devices are probed this often; a failed probe marks them
/// offline.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Plain description of a discovered hidraw node, extracted on the udev
/// thread so nothing FFI-backed crosses into the async world.
#[derive(Clone, Debug)]
struct DiscoveredDevice {
    syspath: String,
    devnode: PathBuf,
    vendor_id: u16,
    product_id: u16,
    interface: u8,
    input_nodes: Vec<PathBuf>,
}

enum HotplugEvent {
    Added(DiscoveredDevice),
    Removed { syspath: String },
}

pub struct DeviceManager {
    store: Arc<HardwareStore>,
    registry: Arc<DeviceRegistry>,
    prefs: Arc<PreferenceStore>,
    /// hidraw syspath → registry id for currently tracked devices.
    tracked: StdMutex<HashMap<String, String>>,
    next_index: AtomicU32,
}

impl DeviceManager {
    pub fn new(
        store: Arc<HardwareStore>,
        registry: Arc<DeviceRegistry>,
        prefs: Arc<PreferenceStore>,
    ) -> Arc<Self> {
        Arc::new(DeviceManager {
            store,
            registry,
            prefs,
            tracked: StdMutex::new(HashMap::new()),
            next_index: AtomicU32::new(0),
        })
    }

    /// Initial scan plus the hotplug monitor loop. Runs until the monitor
    /// thread dies or the process shuts down.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_monitor_thread(tx.clone())?;

        let scan_tx = tx.clone();
        tokio::task::spawn_blocking(move || {
            for found in enumerate_hidraw() {
                let _ = scan_tx.send(HotplugEvent::Added(found));
            }
        });

        while let Some(event) = rx.recv().await {
            match event {
                HotplugEvent::Added(found) => self.handle_added(found).await,
                HotplugEvent::Removed { syspath } => self.handle_removed(&syspath).await,
            }
        }
        Ok(())
    }

    async fn handle_added(&self, found: DiscoveredDevice) {
        if found.vendor_id != RAZER_VENDOR_ID {
            return;
        }
        if self
            .tracked
            .lock()
            .expect("tracked lock poisoned")
            .contains_key(&found.syspath)
        {
            return;
        }

        let Some(descriptor) = self.store.lookup(found.vendor_id, found.product_id) else {
            debug!(
                vendor = format_args!("{:04x}", found.vendor_id),
                product = format_args!("{:04x}", found.product_id),
                "no descriptor for device, ignoring"
            );
            return;
        };

        // each kind exposes the control endpoint on a fixed interface
        if found.interface != descriptor.kind.control_interface() {
            return;
        }

        info!(
            name = descriptor.name,
            node = %found.devnode.display(),
            "device discovered"
        );

        // one retry on open failure, then give up
        let dev = match HidrawDevice::open(&found.devnode) {
            Ok(dev) => dev,
            Err(first) => {
                tokio::time::sleep(OPEN_RETRY_DELAY).await;
                match HidrawDevice::open(&found.devnode) {
                    Ok(dev) => dev,
                    Err(_) => {
                        warn!(
                            node = %found.devnode.display(),
                            error = %first,
                            "failed to open transport, giving up"
                        );
                        return;
                    }
                }
            }
        };

        let mut driver = Driver::new(descriptor.clone(), Arc::new(dev));
        if descriptor.has_capability(CapabilityFlag::SystemControl) {
            driver = driver.with_thermal(Box::new(SysfsThermal::new()));
        }
        let driver = Arc::new(driver);

        // identify the device; unresponsive hardware is deferred as offline
        let identify = async {
            driver.get_firmware().await?;
            driver.get_serial().await
        };
        match tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await {
            Ok(Ok(serial)) => debug!(serial = %serial, "device identified"),
            Ok(Err(err)) => {
                warn!(error = %err, "device identification failed, deferring");
                driver.mark_offline();
            }
            Err(_) => {
                warn!("device unresponsive, deferring initialization");
                driver.mark_offline();
            }
        }

        if descriptor.kind == DeviceKind::Keyboard && !driver.is_offline() {
            // put the keyboard back into normal mode
            if let Err(err) = driver.set_device_mode(0x00, 0x00).await {
                debug!(error = %err, "device mode reset failed");
            }
        }

        let input = if descriptor.has_capability(CapabilityFlag::KeyInput) {
            Some(Arc::new(if found.input_nodes.is_empty() {
                InputRouter::detached(descriptor.clone())
            } else {
                InputRouter::new(descriptor.clone(), found.input_nodes.clone())
            }))
        } else {
            None
        };

        let (compositor_events, _) = broadcast::channel(64);
        let compositor = descriptor.dimensions.map(|_| {
            Arc::new(Compositor::new(
                driver.clone(),
                input.clone(),
                compositor_events.clone(),
            ))
        });

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "{:04x}:{:04x}.{:02}",
            found.vendor_id, found.product_id, index
        );

        let handle = Arc::new(DeviceHandle::new(
            id.clone(),
            driver.clone(),
            compositor,
            input,
            self.registry.event_sender(),
            compositor_events,
        ));

        self.tracked
            .lock()
            .expect("tracked lock poisoned")
            .insert(found.syspath.clone(), id.clone());
        self.registry.insert(handle.clone());

        if !driver.is_offline() {
            self.restore_preferences(&handle).await;
        }

        if descriptor.has_capability(CapabilityFlag::Wireless) {
            spawn_heartbeat(self.registry.clone(), id.clone());
        }

        info!(id = %id, name = descriptor.name, "device added");
    }

    async fn handle_removed(&self, syspath: &str) {
        let id = {
            let mut tracked = self.tracked.lock().expect("tracked lock poisoned");
            tracked.remove(syspath)
        };
        let Some(id) = id else { return };

        if let Some(handle) = self.registry.remove(&id) {
            self.save_preferences(&handle).await;
            handle.shutdown().await;
            info!(id = %id, "device removed");
        }
    }

    /// Reapply the saved record for this device's serial.
    async fn restore_preferences(&self, handle: &Arc<DeviceHandle>) {
        let Some(serial) = handle.state().serial else {
            return;
        };
        let prefs = self.prefs.load(&serial);

        if let Some(brightness) = prefs.brightness {
            if let Err(err) = handle.set_brightness(brightness).await {
                warn!(error = %err, "failed to restore brightness");
            }
        }
        if let Some((name, args)) = &prefs.effect {
            if let Err(err) = handle.set_effect(name, args.clone()).await {
                warn!(effect = name.as_str(), error = %err, "failed to restore effect");
            }
        }
        for layer in &prefs.layers {
            if let Err(err) = handle
                .add_renderer(&layer.renderer, Some(layer.zindex), layer.traits.clone())
                .await
            {
                warn!(renderer = layer.renderer.as_str(), error = %err, "failed to restore layer");
            }
        }
    }

    async fn save_preferences(&self, handle: &Arc<DeviceHandle>) {
        let state = handle.state();
        let Some(serial) = state.serial else { return };

        let layers = handle.active_layers().await.unwrap_or_default();
        let record = DevicePreferences {
            brightness: Some(state.brightness),
            effect: state.current_effect.clone(),
            leds: state
                .leds
                .iter()
                .map(|(led, led_state)| (format!("{led:?}").to_lowercase(), *led_state))
                .collect(),
            layers: layers
                .into_iter()
                .map(|info| crate::prefs::LayerPreference {
                    renderer: info.renderer.to_string(),
                    zindex: info.zindex,
                    traits: info.traits,
                })
                .collect(),
        };

        if let Err(err) = self.prefs.save(&serial, &record) {
            warn!(error = %err, "failed to persist preferences");
        }
    }
}

/// Probe battery on an interval; failures flip the device offline, a
/// successful probe brings it back. Exits when the device leaves the
/// registry.
fn spawn_heartbeat(registry: Arc<DeviceRegistry>, id: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            let Some(handle) = registry.get(&id) else {
                break;
            };

            let driver = handle.driver().clone();
            let was_offline = driver.is_offline();
            // lift the flag for the probe itself so reconnection is noticed
            driver.set_offline_flag(false);
            match driver.get_battery().await {
                Ok(_) => {
                    if was_offline {
                        info!(id = %id, "wireless device reconnected");
                    }
                }
                Err(err) => {
                    debug!(id = %id, error = %err, "heartbeat probe failed");
                    driver.set_offline_flag(true);
                }
            }
        }
    });
}

fn spawn_monitor_thread(tx: mpsc::UnboundedSender<HotplugEvent>) -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;

    let socket = udev::MonitorBuilder::new()?
        .match_subsystem("hidraw")?
        .listen()?;

    thread::spawn(move || {
        let fd = socket.as_raw_fd();
        let mut socket = socket;

        loop {
            let mut pollfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pollfd, 1, 1000) };
            if ret < 0 {
                warn!("udev monitor poll failed");
                break;
            }
            if tx.is_closed() {
                break;
            }
            if ret == 0 {
                continue;
            }

            for event in socket.iter() {
                match event.event_type() {
                    udev::EventType::Add => {
                        if let Some(found) = probe_device(&event) {
                            let _ = tx.send(HotplugEvent::Added(found));
                        }
                    }
                    udev::EventType::Remove => {
                        let syspath = event.syspath().to_string_lossy().into_owned();
                        let _ = tx.send(HotplugEvent::Removed { syspath });
                    }
                    _ => {}
                }
            }
        }
    });

    Ok(())
}

/// Walk all current hidraw nodes.
fn enumerate_hidraw() -> Vec<DiscoveredDevice> {
    let mut found = Vec::new();

    let Ok(mut enumerator) = udev::Enumerator::new() else {
        return found;
    };
    if enumerator.match_subsystem("hidraw").is_err() {
        return found;
    }
    let Ok(devices) = enumerator.scan_devices() else {
        return found;
    };

    for device in devices {
        if let Some(discovered) = probe_device(&device) {
            found.push(discovered);
        }
    }
    found
}

/// Extract everything the manager needs from a hidraw udev device.
fn probe_device(device: &udev::Device) -> Option<DiscoveredDevice> {
    let devnode = device.devnode()?.to_path_buf();
    let syspath = device.syspath().to_string_lossy().into_owned();

    let usb_iface = device
        .parent_with_subsystem_devtype("usb", "usb_interface")
        .ok()??;
    let interface = parse_hex(usb_iface.attribute_value("bInterfaceNumber")?)? as u8;

    let usb_device = device
        .parent_with_subsystem_devtype("usb", "usb_device")
        .ok()??;
    let vendor_id = parse_hex(usb_device.attribute_value("idVendor")?)? as u16;
    let product_id = parse_hex(usb_device.attribute_value("idProduct")?)? as u16;

    if vendor_id != RAZER_VENDOR_ID {
        return None;
    }

    let input_nodes = input_nodes_under(usb_device.syspath().to_string_lossy().as_ref());

    Some(DiscoveredDevice {
        syspath,
        devnode,
        vendor_id,
        product_id,
        interface,
        input_nodes,
    })
}

/// Event device nodes belonging to the same USB device.
fn input_nodes_under(usb_syspath: &str) -> Vec<PathBuf> {
    let mut nodes = Vec::new();

    let Ok(mut enumerator) = udev::Enumerator::new() else {
        return nodes;
    };
    if enumerator.match_subsystem("input").is_err() {
        return nodes;
    }
    let Ok(devices) = enumerator.scan_devices() else {
        return nodes;
    };

    for device in devices {
        if !device.syspath().to_string_lossy().starts_with(usb_syspath) {
            continue;
        }
        if let Some(devnode) = device.devnode() {
            if devnode.to_string_lossy().contains("/event") {
                nodes.push(devnode.to_path_buf());
            }
        }
    }
    nodes
}

fn parse_hex(value: &std::ffi::OsStr) -> Option<u32> {
    u32::from_str_radix(value.to_string_lossy().trim(), 16).ok()
}
