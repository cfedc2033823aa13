//! OS thermal readings for the fan-safety overlay.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Injected collaborator supplying temperatures by sensor name, in degrees
/// Celsius.
pub trait ThermalSource: Send + Sync {
    fn read_temperatures(&self) -> io::Result<HashMap<String, f32>>;
}

/// Reads `/sys/class/thermal/thermal_zone*/temp` (millidegrees).
pub struct SysfsThermal {
    root: PathBuf,
}

impl SysfsThermal {
    pub fn new() -> Self {
        SysfsThermal {
            root: PathBuf::from("/sys/class/thermal"),
        }
    }

    pub fn with_root(root: PathBuf) -> Self {
        SysfsThermal { root }
    }
}

impl Default for SysfsThermal {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalSource for SysfsThermal {
    fn read_temperatures(&self) -> io::Result<HashMap<String, f32>> {
        let mut out = HashMap::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("thermal_zone") {
                continue;
            }

            let Ok(raw) = fs::read_to_string(path.join("temp")) else {
                continue;
            };
            let Ok(millideg) = raw.trim().parse::<i64>() else {
                continue;
            };

            let label = fs::read_to_string(path.join("type"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| name.to_string());

            out.insert(label, millideg as f32 / 1000.0);
        }

        Ok(out)
    }
}
