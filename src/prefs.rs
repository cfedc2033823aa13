//! Persisted per-device preferences and named profiles.
//!
//! Records are keyed by device serial and stored as JSON under the
//! configured directory. Profiles are snapshots of the same record with a
//! creation timestamp.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::LedState;
use crate::protocol::effects::EffectArgs;
use crate::traits::TraitMap;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LayerPreference {
    pub renderer: String,
    pub zindex: i32,
    #[serde(default)]
    pub traits: TraitMap,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DevicePreferences {
    #[serde(default)]
    pub brightness: Option<f32>,
    #[serde(default)]
    pub effect: Option<(String, EffectArgs)>,
    #[serde(default)]
    pub leds: HashMap<String, LedState>,
    /// Active layers in z order.
    #[serde(default)]
    pub layers: Vec<LayerPreference>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub created_at: u64,
    pub record: DevicePreferences,
}

pub struct PreferenceStore {
    dir: PathBuf,
}

impl PreferenceStore {
    pub fn new(config_dir: PathBuf) -> Self {
        PreferenceStore { dir: config_dir }
    }

    fn prefs_path(&self, serial: &str) -> PathBuf {
        self.dir.join("prefs").join(format!("{serial}.json"))
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.dir.join("profiles").join(format!("{name}.json"))
    }

    /// Load the record for a serial; missing or unreadable files yield the
    /// defaults.
    pub fn load(&self, serial: &str) -> DevicePreferences {
        let path = self.prefs_path(serial);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring corrupt preferences");
                DevicePreferences::default()
            }),
            Err(_) => DevicePreferences::default(),
        }
    }

    pub fn save(&self, serial: &str, prefs: &DevicePreferences) -> io::Result<()> {
        let path = self.prefs_path(serial);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(prefs)?)
    }

    pub fn save_profile(&self, name: &str, record: DevicePreferences) -> io::Result<()> {
        let profile = Profile {
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            record,
        };
        let path = self.profile_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&profile)?)
    }

    pub fn load_profile(&self, name: &str) -> Option<Profile> {
        let raw = fs::read_to_string(self.profile_path(name)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.dir.join("profiles")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        names
    }
}
