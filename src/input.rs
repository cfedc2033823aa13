//! Key input intake.
//!
//! One [`InputRouter`] per device reads the device's evdev nodes on a
//! blocking thread and fans key events out over a broadcast channel. Each
//! renderer that wants input attaches an [`InputQueue`], which filters by
//! keystate, maps keycodes to matrix cells, and expires events after their
//! time-to-live.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::hardware::{DeviceDescriptor, Point};
use crate::traits::TraitValue;

/// Keystate filter bits.
pub const KEY_UP: u8 = 1;
pub const KEY_DOWN: u8 = 2;
pub const KEY_HOLD: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    Up,
    Down,
    Hold,
}

impl KeyState {
    fn mask_bit(self) -> u8 {
        match self {
            KeyState::Up => KEY_UP,
            KeyState::Down => KEY_DOWN,
            KeyState::Hold => KEY_HOLD,
        }
    }
}

/// A key event as read from the OS, before per-renderer decoration.
#[derive(Clone, Debug)]
pub struct RawKeyEvent {
    pub keycode: Arc<str>,
    pub scancode: u16,
    pub state: KeyState,
    pub timestamp: f64,
}

/// A key event as delivered to a renderer.
#[derive(Clone, Debug)]
pub struct KeyInputEvent {
    pub timestamp: f64,
    pub expire_at: Option<Instant>,
    pub keycode: Arc<str>,
    pub scancode: u16,
    pub keystate: KeyState,
    pub coords: Vec<Point>,
    /// Scratch space owned by the consuming renderer.
    pub payload: HashMap<String, TraitValue>,
}

impl KeyInputEvent {
    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.expire_at, Some(at) if at <= now)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Fan-out point for a device's key events.
pub struct InputRouter {
    tx: broadcast::Sender<RawKeyEvent>,
    stop: Arc<AtomicBool>,
    descriptor: Arc<DeviceDescriptor>,
}

impl InputRouter {
    /// Spawn reader threads for the given event device nodes.
    pub fn new(descriptor: Arc<DeviceDescriptor>, event_nodes: Vec<PathBuf>) -> Self {
        let (tx, _) = broadcast::channel(256);
        let stop = Arc::new(AtomicBool::new(false));

        for node in event_nodes {
            let tx = tx.clone();
            let stop = stop.clone();
            thread::spawn(move || read_loop(node, tx, stop));
        }

        InputRouter {
            tx,
            stop,
            descriptor,
        }
    }

    /// Router for tests and for devices without event nodes; events are
    /// injected with [`InputRouter::inject`].
    pub fn detached(descriptor: Arc<DeviceDescriptor>) -> Self {
        let (tx, _) = broadcast::channel(256);
        InputRouter {
            tx,
            stop: Arc::new(AtomicBool::new(false)),
            descriptor,
        }
    }

    /// Push a synthetic event through the router.
    pub fn inject(&self, event: RawKeyEvent) {
        let _ = self.tx.send(event);
    }

    pub fn attach(&self) -> InputQueue {
        InputQueue {
            rx: self.tx.subscribe(),
            descriptor: self.descriptor.clone(),
            keystate_mask: KEY_DOWN,
            expire_time: Duration::ZERO,
            events: Vec::new(),
        }
    }
}

impl Drop for InputRouter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Blocking evdev reader; polls with a short sleep so the stop flag is
/// observed even when the device is quiet.
fn read_loop(node: PathBuf, tx: broadcast::Sender<RawKeyEvent>, stop: Arc<AtomicBool>) {
    let mut device = match evdev::Device::open(&node) {
        Ok(d) => d,
        Err(e) => {
            warn!(node = %node.display(), error = %e, "failed to open event device");
            return;
        }
    };

    // fetch_events must not block forever or shutdown stalls
    unsafe {
        use std::os::fd::AsRawFd;
        let fd = device.as_raw_fd();
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }

    debug!(node = %node.display(), "event device opened");

    while !stop.load(Ordering::Relaxed) {
        match device.fetch_events() {
            Ok(events) => {
                for event in events {
                    if let evdev::InputEventKind::Key(key) = event.kind() {
                        let state = match event.value() {
                            0 => KeyState::Up,
                            1 => KeyState::Down,
                            2 => KeyState::Hold,
                            _ => continue,
                        };
                        let raw = RawKeyEvent {
                            keycode: Arc::from(format!("{key:?}").as_str()),
                            scancode: key.code(),
                            state,
                            timestamp: now_secs(),
                        };
                        if tx.send(raw).is_err() {
                            // no receivers left
                            return;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                warn!(node = %node.display(), error = %e, "event device read error");
                return;
            }
        }
    }
}

/// Per-renderer queue of key events with TTL and coalescing.
pub struct InputQueue {
    rx: broadcast::Receiver<RawKeyEvent>,
    descriptor: Arc<DeviceDescriptor>,
    keystate_mask: u8,
    expire_time: Duration,
    events: Vec<KeyInputEvent>,
}

impl InputQueue {
    pub fn set_keystate_mask(&mut self, mask: u8) {
        self.keystate_mask = mask;
    }

    /// Duration events stay available. Zero means events are consumed on
    /// first read.
    pub fn set_expire_time(&mut self, expire_time: Duration) {
        self.expire_time = expire_time;
    }

    pub fn expire_time(&self) -> Duration {
        self.expire_time
    }

    /// Matrix cells lit by a keycode; empty when unmapped.
    pub fn coords_of(&self, keycode: &str) -> Vec<Point> {
        self.descriptor.coords_of(keycode)
    }

    fn accept(&mut self, raw: RawKeyEvent) {
        if raw.state.mask_bit() & self.keystate_mask == 0 {
            return;
        }

        let expire_at = if self.expire_time.is_zero() {
            None
        } else {
            Some(Instant::now() + self.expire_time)
        };
        let coords = self.descriptor.coords_of(&raw.keycode);
        let event = KeyInputEvent {
            timestamp: raw.timestamp,
            expire_at,
            keycode: raw.keycode,
            scancode: raw.scancode,
            keystate: raw.state,
            coords,
            payload: HashMap::new(),
        };

        // repeats of the same keycode within the TTL are delivered as
        // separate events; set_payload writes to all of them
        self.events.push(event);
    }

    fn expire(&mut self) {
        let now = Instant::now();
        self.events.retain(|e| !e.expired(now));
    }

    fn drain_channel(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(raw) => self.accept(raw),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(dropped = n, "input queue lagged");
                }
                Err(_) => break,
            }
        }
    }

    /// All currently active events without waiting.
    pub fn events_nowait(&mut self) -> Vec<KeyInputEvent> {
        self.drain_channel();
        self.expire();
        if self.expire_time.is_zero() {
            std::mem::take(&mut self.events)
        } else {
            self.events.clone()
        }
    }

    /// Wait until at least one non-expired event is available. Returns
    /// empty once the router has gone away and the renderer is being
    /// kicked to exit.
    pub async fn pop_events(&mut self) -> Vec<KeyInputEvent> {
        loop {
            self.drain_channel();
            self.expire();

            if !self.events.is_empty() {
                if self.expire_time.is_zero() {
                    return std::mem::take(&mut self.events);
                }
                return self.events.clone();
            }

            match self.rx.recv().await {
                Ok(raw) => self.accept(raw),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "input queue lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Vec::new(),
            }
        }
    }

    /// Write a payload entry back onto a pending event so later reads within
    /// the TTL observe it.
    pub fn set_payload(&mut self, keycode: &str, key: &str, value: TraitValue) {
        for event in &mut self.events {
            if &*event.keycode == keycode {
                event.payload.insert(key.to_string(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareStore;

    fn keyboard_descriptor() -> Arc<DeviceDescriptor> {
        HardwareStore::builtin().lookup(0x1532, 0x0203).unwrap()
    }

    fn raw(keycode: &str, state: KeyState) -> RawKeyEvent {
        RawKeyEvent {
            keycode: Arc::from(keycode),
            scancode: 30,
            state,
            timestamp: now_secs(),
        }
    }

    #[tokio::test]
    async fn events_filtered_by_keystate_mask() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();

        router.inject(raw("KEY_A", KeyState::Up));
        router.inject(raw("KEY_A", KeyState::Down));

        let events = queue.pop_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].keystate, KeyState::Down);
    }

    #[tokio::test]
    async fn mapped_keycode_yields_coords() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();

        router.inject(raw("KEY_A", KeyState::Down));
        let events = queue.pop_events().await;
        assert_eq!(events[0].coords, vec![Point::new(4, 2)]);

        router.inject(raw("KEY_NOPE", KeyState::Down));
        let events = queue.pop_events().await;
        assert!(events[0].coords.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_consumes_on_read() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();

        router.inject(raw("KEY_A", KeyState::Down));
        assert_eq!(queue.pop_events().await.len(), 1);
        assert!(queue.events_nowait().is_empty());
    }

    #[tokio::test]
    async fn events_expire_after_ttl() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();
        queue.set_expire_time(Duration::from_millis(10));

        router.inject(raw("KEY_A", KeyState::Down));
        assert_eq!(queue.pop_events().await.len(), 1);
        // still present inside the TTL
        assert_eq!(queue.events_nowait().len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert!(queue.events_nowait().is_empty());
    }

    #[tokio::test]
    async fn repeated_keycode_delivers_separate_events_sharing_payload() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();
        queue.set_expire_time(Duration::from_secs(5));

        router.inject(raw("KEY_A", KeyState::Down));
        router.inject(raw("KEY_A", KeyState::Down));
        assert_eq!(queue.pop_events().await.len(), 2);

        queue.set_payload("KEY_A", "hit", TraitValue::Bool(true));
        let events = queue.events_nowait();
        assert!(events
            .iter()
            .all(|e| e.payload.get("hit") == Some(&TraitValue::Bool(true))));
    }

    #[tokio::test]
    async fn closed_router_returns_empty() {
        let router = InputRouter::detached(keyboard_descriptor());
        let mut queue = router.attach();
        drop(router);
        assert!(queue.pop_events().await.is_empty());
    }
}
