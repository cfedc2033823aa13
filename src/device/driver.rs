//! The device driver: one live peripheral.
//!
//! A driver owns the HID transport, the frame buffer, and all mutable device
//! state. Every public operation is atomic with respect to the others on the
//! same device: the transport lock is held for the whole request/response
//! sequence of one logical command, retries included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::hardware::{CapabilityFlag, DeviceDescriptor, DeviceKind, Led};
use crate::hid::{FeatureDevice, Transport, TransportOp};
use crate::protocol::commands::{self, CommandDef};
use crate::protocol::effects::{self, EffectArgs, NOSTORE, VARSTORE};
use crate::protocol::report::{Request, Response, Status, REPORT_SIZE};
use crate::protocol::{ProfileId, ProtocolProfile};

use super::thermal::ThermalSource;
use super::{brightness_to_byte, byte_to_brightness, DeviceState, LedSettings, LedState};

/// BUSY responses are retried with these growing intervals, then surface
/// `DeviceBusy`.
const BUSY_RETRY_MS: [u64; 3] = [7, 14, 28];

/// Column budget per matrix-frame segment under the standard encoding.
const MAX_COLUMNS: usize = 24;

/// Column budget with the `custom_frame_alt` capability: the widest segment
/// whose 3-byte row header plus RGB payload fits the 80-byte argument area.
const MAX_COLUMNS_ALT: usize = 25;

pub struct Driver {
    descriptor: Arc<DeviceDescriptor>,
    profile: ProtocolProfile,
    transport: Transport,
    frame: Option<Mutex<Frame>>,
    state: StdMutex<DeviceState>,
    offline: AtomicBool,
    pub(super) thermal: Option<Box<dyn ThermalSource>>,
    /// Set while the thermal overlay is refusing manual fan control.
    pub(super) thermal_hold: AtomicBool,
}

impl Driver {
    pub fn new(descriptor: Arc<DeviceDescriptor>, dev: Arc<dyn FeatureDevice>) -> Self {
        let profile = ProtocolProfile::get(descriptor.profile)
            .with_crc_skip(descriptor.has_capability(CapabilityFlag::CrcSkipOnOk));

        let delay = if descriptor.kind == DeviceKind::Headset {
            super::headset::INTER_COMMAND_DELAY
        } else {
            profile.inter_command_delay
        };

        let frame = descriptor
            .dimensions
            .map(|d| Mutex::new(Frame::new(d.width, d.height)));

        let mut state = DeviceState {
            brightness: 100.0,
            saved_brightness: 100.0,
            ..Default::default()
        };
        for led in &descriptor.supported_leds {
            state.leds.insert(*led, LedState::default());
        }

        Driver {
            descriptor,
            profile,
            transport: Transport::new(dev, delay),
            frame,
            state: StdMutex::new(state),
            offline: AtomicBool::new(false),
            thermal: None,
            thermal_hold: AtomicBool::new(false),
        }
    }

    pub fn with_thermal(mut self, thermal: Box<dyn ThermalSource>) -> Self {
        self.thermal = Some(thermal);
        self
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    pub fn profile(&self) -> &ProtocolProfile {
        &self.profile
    }

    pub(super) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn frame(&self) -> Option<&Mutex<Frame>> {
        self.frame.as_ref()
    }

    /// Snapshot of the mutable device state.
    pub fn state(&self) -> DeviceState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    pub(super) fn update_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock().expect("state lock poisoned"))
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    pub fn mark_offline(&self) {
        if !self.offline.swap(true, Ordering::Relaxed) {
            warn!(device = self.descriptor.name, "device went offline");
            self.update_state(|s| s.telemetry.stale = true);
        }
    }

    pub fn mark_online(&self) {
        if self.offline.swap(false, Ordering::Relaxed) {
            info!(device = self.descriptor.name, "device back online");
        }
    }

    /// Flip the offline flag without logging, for heartbeat probes that
    /// need to bypass the online check.
    pub(crate) fn set_offline_flag(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
        if offline {
            self.update_state(|s| s.telemetry.stale = true);
        }
    }

    pub(super) fn ensure_online(&self) -> Result<()> {
        if self.is_offline() {
            Err(Error::DeviceOffline(None))
        } else {
            Ok(())
        }
    }

    // ── command plumbing ────────────────────────────────────────────────

    /// Build a request for a registered command, gating on the active
    /// profile first.
    pub(super) fn request(&self, cmd: &CommandDef) -> Result<Request> {
        cmd.check_profile(self.profile.id)?;
        let mut req = Request::new(self.profile.transaction_id, cmd.command_class, cmd.command_id);
        req.data_size = cmd.data_size;
        Ok(req)
    }

    /// Run one request through the response state machine, holding the
    /// device for the duration.
    pub(super) async fn run_request(&self, req: &Request) -> Result<Response> {
        self.ensure_online()?;
        let mut op = self.transport.with_device().await;
        self.run_request_locked(&mut op, req).await
    }

    /// The request/response state machine on an already-acquired transport:
    /// BUSY is resent up to three times with growing delays, TIMEOUT earns a
    /// single retry, everything else surfaces immediately.
    pub(super) async fn run_request_locked(
        &self,
        op: &mut TransportOp<'_>,
        req: &Request,
    ) -> Result<Response> {
        let packed = req.pack();
        let mut busy_retries = 0usize;
        let mut timeout_retried = false;

        loop {
            op.send_feature(&packed).await?;

            // multi-packet transfers: intermediate packets get no response
            if req.remaining_packets > 0 {
                return Ok(Response::unpack(&synthetic_ok(req), true));
            }

            let raw = match op.read_feature(REPORT_SIZE).await {
                Ok(raw) => raw,
                Err(Error::Timeout) => {
                    if timeout_retried {
                        return Err(Error::Timeout);
                    }
                    timeout_retried = true;
                    debug!(command = ?(req.command_class, req.command_id), "read timed out, retrying once");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let buf: [u8; REPORT_SIZE] = raw
                .try_into()
                .map_err(|_| Error::protocol("response framing: wrong report length"))?;
            let rsp = Response::unpack(&buf, self.profile.crc_skip_on_ok);

            match rsp.status {
                Status::Ok => {
                    if !rsp.crc_ok {
                        return Err(Error::protocol("response CRC mismatch"));
                    }
                    return Ok(rsp);
                }
                Status::Busy => {
                    if busy_retries >= BUSY_RETRY_MS.len() {
                        return Err(Error::DeviceBusy);
                    }
                    let delay = Duration::from_millis(BUSY_RETRY_MS[busy_retries]);
                    busy_retries += 1;
                    debug!(attempt = busy_retries, "device busy, backing off");
                    tokio::time::sleep(delay).await;
                }
                Status::Timeout => {
                    if timeout_retried {
                        return Err(Error::Timeout);
                    }
                    timeout_retried = true;
                }
                Status::Unsupported => {
                    return Err(Error::unsupported(format!(
                        "command {:02x},{:02x} rejected by device",
                        req.command_class, req.command_id
                    )));
                }
                Status::Fail | Status::Unknown => {
                    return Err(Error::protocol(format!(
                        "command {:02x},{:02x} failed",
                        req.command_class, req.command_id
                    )));
                }
            }
        }
    }

    // ── device info ─────────────────────────────────────────────────────

    pub async fn get_firmware(&self) -> Result<(u8, u8)> {
        if self.descriptor.kind == DeviceKind::Headset {
            return self.headset_get_firmware().await;
        }

        let req = self.request(&commands::GET_FIRMWARE)?;
        let rsp = self.run_request(&req).await?;
        if rsp.payload.len() < 2 {
            return Err(Error::protocol("firmware response too short"));
        }
        let version = (rsp.payload[0], rsp.payload[1]);
        self.update_state(|s| s.firmware = Some(version));
        Ok(version)
    }

    pub async fn get_serial(&self) -> Result<String> {
        if self.descriptor.kind == DeviceKind::Headset {
            return self.headset_get_serial().await;
        }

        let req = self.request(&commands::GET_SERIAL)?;
        let rsp = self.run_request(&req).await?;
        let serial = decode_serial(&rsp.payload);
        self.update_state(|s| s.serial = Some(serial.clone()));
        Ok(serial)
    }

    pub async fn set_device_mode(&self, mode: u8, param: u8) -> Result<()> {
        let mut req = self.request(&commands::SET_DEVICE_MODE)?;
        req.put_u8(mode).put_u8(param);
        self.run_request(&req).await?;
        Ok(())
    }

    // ── brightness ──────────────────────────────────────────────────────

    pub async fn set_brightness(&self, pct: f32) -> Result<()> {
        if !(0.0..=100.0).contains(&pct) {
            return Err(Error::invalid(format!("brightness {pct} outside 0-100")));
        }
        self.write_brightness(pct).await?;
        self.update_state(|s| {
            s.brightness = pct;
            if !s.suspended {
                s.saved_brightness = pct;
            }
        });
        Ok(())
    }

    async fn write_brightness(&self, pct: f32) -> Result<()> {
        let led = self.descriptor.brightness_led();
        let byte = brightness_to_byte(pct);

        let req = if self.descriptor.has_capability(CapabilityFlag::ExtendedFx) {
            let mut req = self.request(&commands::SET_BRIGHTNESS_EXTENDED)?;
            req.put_u8(VARSTORE).put_u8(led.hardware_id()).put_u8(byte);
            req
        } else {
            let mut req = self.request(&commands::SET_LED_BRIGHTNESS)?;
            req.put_u8(led.hardware_id()).put_u8(byte);
            req
        };
        self.run_request(&req).await?;
        Ok(())
    }

    pub async fn get_brightness(&self) -> Result<f32> {
        {
            let state = self.state();
            if state.suspended {
                return Ok(state.saved_brightness);
            }
        }

        let led = self.descriptor.brightness_led();
        let (req, value_at) = if self.descriptor.has_capability(CapabilityFlag::ExtendedFx) {
            let mut req = self.request(&commands::GET_BRIGHTNESS_EXTENDED)?;
            req.put_u8(VARSTORE).put_u8(led.hardware_id());
            (req, 2)
        } else {
            let mut req = self.request(&commands::GET_LED_BRIGHTNESS)?;
            req.put_u8(led.hardware_id());
            (req, 1)
        };

        let rsp = self.run_request(&req).await?;
        let byte = rsp
            .payload
            .get(value_at)
            .copied()
            .ok_or_else(|| Error::protocol("brightness response too short"))?;
        let pct = byte_to_brightness(byte);
        self.update_state(|s| s.brightness = pct);
        Ok(pct)
    }

    // ── suspend / resume ────────────────────────────────────────────────

    /// Suspend saves the brightness and dims to zero; the logical level is
    /// retained for reads. Resume restores it.
    pub async fn set_suspend(&self, suspend: bool) -> Result<()> {
        let (already, saved) = {
            let state = self.state();
            (state.suspended, state.saved_brightness)
        };
        if suspend == already {
            return Ok(());
        }

        if suspend {
            let current = self.state().brightness;
            self.write_brightness(0.0).await?;
            self.update_state(|s| {
                s.saved_brightness = current;
                s.suspended = true;
            });
        } else {
            self.update_state(|s| s.suspended = false);
            self.set_brightness(saved).await?;
        }
        Ok(())
    }

    // ── per-LED control ─────────────────────────────────────────────────

    /// Apply a subset of LED settings. Fails with `Unsupported` before any
    /// report is sent when the LED is not in the descriptor's set.
    pub async fn set_led(&self, led: Led, settings: LedSettings) -> Result<()> {
        if !self.descriptor.supports_led(led) {
            return Err(Error::unsupported(format!(
                "led {led:?} not present on {}",
                self.descriptor.name
            )));
        }
        self.ensure_online()?;

        let id = led.hardware_id();
        let mut op = self.transport.with_device().await;

        if let Some(on) = settings.on {
            let mut req = self.request(&commands::SET_LED_STATE)?;
            req.put_u8(id).put_u8(on as u8);
            self.run_request_locked(&mut op, &req).await?;
        }
        if let Some(color) = settings.color {
            let mut req = self.request(&commands::SET_LED_COLOR)?;
            req.put_u8(id).put_rgb(color.to_rgb8());
            self.run_request_locked(&mut op, &req).await?;
        }
        if let Some(pct) = settings.brightness {
            if !(0.0..=100.0).contains(&pct) {
                return Err(Error::invalid(format!("brightness {pct} outside 0-100")));
            }
            let mut req = self.request(&commands::SET_LED_BRIGHTNESS)?;
            req.put_u8(id).put_u8(brightness_to_byte(pct));
            self.run_request_locked(&mut op, &req).await?;
        }
        if let Some(mode) = settings.mode {
            let mut req = self.request(&commands::SET_LED_MODE)?;
            req.put_u8(id).put_u8(mode.hardware_id());
            self.run_request_locked(&mut op, &req).await?;
        }

        self.update_state(|s| {
            let entry = s.leds.entry(led).or_default();
            if let Some(color) = settings.color {
                entry.color = color;
            }
            if let Some(on) = settings.on {
                entry.on = on;
            }
            if let Some(brightness) = settings.brightness {
                entry.brightness = brightness;
            }
            if let Some(mode) = settings.mode {
                entry.mode = mode;
            }
        });
        Ok(())
    }

    /// Re-read one LED's state from the hardware and refresh the cache.
    pub async fn refresh_led(&self, led: Led) -> Result<LedState> {
        if !self.descriptor.supports_led(led) {
            return Err(Error::unsupported(format!(
                "led {led:?} not present on {}",
                self.descriptor.name
            )));
        }
        self.ensure_online()?;

        let id = led.hardware_id();
        let mut op = self.transport.with_device().await;

        let mut get = |cmd: &'static CommandDef| {
            let mut req = self.request(cmd)?;
            req.put_u8(id);
            Ok::<Request, Error>(req)
        };

        let state_req = get(&commands::GET_LED_STATE)?;
        let color_req = get(&commands::GET_LED_COLOR)?;
        let bright_req = get(&commands::GET_LED_BRIGHTNESS)?;
        let mode_req = get(&commands::GET_LED_MODE)?;

        let on = self.run_request_locked(&mut op, &state_req).await?;
        let color = self.run_request_locked(&mut op, &color_req).await?;
        let brightness = self.run_request_locked(&mut op, &bright_req).await?;
        let mode = self.run_request_locked(&mut op, &mode_req).await?;

        let refreshed = LedState {
            on: on.payload.get(1).copied() == Some(0x01),
            color: match color.payload.get(1..4) {
                Some([r, g, b]) => crate::color::Color::from_rgb8(*r, *g, *b),
                _ => LedState::default().color,
            },
            brightness: byte_to_brightness(brightness.payload.get(1).copied().unwrap_or(0)),
            mode: match mode.payload.get(1).copied() {
                Some(0x01) => super::LedMode::Blink,
                Some(0x02) => super::LedMode::Pulse,
                Some(0x04) => super::LedMode::Spectrum,
                _ => super::LedMode::Static,
            },
        };

        self.update_state(|s| {
            s.leds.insert(led, refreshed);
        });
        Ok(refreshed)
    }

    // ── effects ─────────────────────────────────────────────────────────

    /// Activate a built-in effect by name.
    pub async fn set_effect(&self, name: &str, args: EffectArgs) -> Result<()> {
        if self.descriptor.kind == DeviceKind::Headset {
            return self.headset_set_effect(name, &args).await;
        }

        if !self.descriptor.supports_effect(name) {
            return Err(Error::unsupported(format!(
                "effect {name} not supported on {}",
                self.descriptor.name
            )));
        }
        let def = effects::find(name)
            .ok_or_else(|| Error::unsupported(format!("unknown effect {name}")))?;

        self.ensure_online()?;
        let mut op = self.transport.with_device().await;
        self.send_effect_locked(&mut op, def, &args).await?;

        self.update_state(|s| {
            s.current_effect = if def.name == "disable" {
                None
            } else {
                Some((def.name.to_string(), args.clone()))
            };
        });
        Ok(())
    }

    /// Issue exactly one effect command for `def` under the active profile.
    async fn send_effect_locked(
        &self,
        op: &mut TransportOp<'_>,
        def: &effects::EffectDef,
        args: &EffectArgs,
    ) -> Result<()> {
        let extended = self.profile.uses_extended_effect_class;
        let effect_id = def.id_for(extended).ok_or_else(|| {
            Error::unsupported(format!(
                "effect {} has no {} encoding",
                def.name,
                if extended { "extended" } else { "legacy" }
            ))
        })?;

        let req = if extended {
            let mut req = self.request(&commands::SET_EFFECT_EXTENDED)?;
            if def.name == "custom_frame" {
                // custom frame latches from the no-store slot on LED zero
                req.put_u8(NOSTORE).put_u8(0x00).put_u8(effect_id);
            } else {
                let led = self.descriptor.brightness_led();
                req.put_u8(VARSTORE).put_u8(led.hardware_id()).put_u8(effect_id);
                req.put_bytes(&effects::build_args(def, args)?);
            }
            req
        } else {
            let mut req = self.request(&commands::SET_EFFECT)?;
            req.put_u8(effect_id);
            req.put_bytes(&effects::build_args(def, args)?);
            req
        };

        self.run_request_locked(op, &req).await?;
        Ok(())
    }

    // ── custom frames ───────────────────────────────────────────────────

    /// Push the composed frame to the device and latch it.
    ///
    /// All row segments and the latch command are emitted as one contiguous
    /// sequence under the transport lock; nothing can interleave.
    pub async fn commit_matrix(&self, frame: &Frame) -> Result<()> {
        let Some(dims) = self.descriptor.dimensions else {
            return Err(Error::unsupported(format!(
                "{} has no addressable matrix",
                self.descriptor.name
            )));
        };
        self.ensure_online()?;

        let budget = if self.descriptor.has_capability(CapabilityFlag::CustomFrameAlt) {
            MAX_COLUMNS_ALT
        } else {
            MAX_COLUMNS
        };

        let mut op = self.transport.with_device().await;

        if dims.height == 1 {
            let rgb = frame.to_rgb_bytes();
            let cols = dims.width.min(budget);
            let mut req = self.request(&commands::SET_FRAME_SINGLE)?;
            req.put_u8(0x00).put_u8(cols as u8);
            req.put_bytes(&rgb[..cols * 3]);
            self.run_request_locked(&mut op, &req).await?;
        } else {
            let segments = frame.wire_rows(budget, &self.descriptor.key_row_offsets);
            let total = segments.len();

            let cmd = if self.profile.uses_extended_effect_class {
                &commands::SET_FRAME_EXTENDED
            } else {
                &commands::SET_FRAME_MATRIX
            };

            for (index, segment) in segments.iter().enumerate() {
                let mut req = self.request(cmd)?;
                req.remaining_packets = (total - index - 1) as u16;
                req.put_u8(segment.row)
                    .put_u8(segment.start_col)
                    .put_u8(segment.end_col)
                    .put_bytes(&segment.rgb);
                self.run_request_locked(&mut op, &req).await?;
            }
        }

        // latch the uploaded frame
        let def = effects::find("custom_frame").expect("custom_frame is registered");
        self.send_effect_locked(&mut op, def, &EffectArgs::default())
            .await
    }

    /// Disable effects and restore full brightness.
    pub async fn reset(&self) -> Result<()> {
        self.set_effect("disable", EffectArgs::default()).await?;
        self.set_brightness(100.0).await?;
        Ok(())
    }
}

/// Serial payloads are up to 22 bytes, zero-terminated; strip anything that
/// is not printable ASCII.
fn decode_serial(payload: &[u8]) -> String {
    payload
        .iter()
        .take(22)
        .take_while(|b| **b != 0)
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|b| *b as char)
        .collect()
}

/// Response stand-in for send-only packets in multi-packet transfers.
fn synthetic_ok(req: &Request) -> [u8; REPORT_SIZE] {
    let mut buf = req.pack();
    buf[0] = 0x02;
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_decoding_stops_at_zero() {
        let mut payload = vec![0u8; 22];
        payload[..6].copy_from_slice(b"PM1234");
        assert_eq!(decode_serial(&payload), "PM1234");

        let noisy = b"AB\x01CD\x00EF";
        assert_eq!(decode_serial(noisy), "ABCD");
    }

    #[test]
    fn column_budgets() {
        assert_eq!(MAX_COLUMNS, 24);
        // 3-byte header + 25 * 3 bytes of RGB = 78 <= 80
        assert!(3 + MAX_COLUMNS_ALT * 3 <= crate::protocol::ARGS_SIZE);
    }
}
