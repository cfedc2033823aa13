//! Fan, power-mode, and boost control for Blade laptops.
//!
//! Manual fan control passes through a thermal safety overlay: above 95 °C
//! any manual request is converted to automatic control and reported as a
//! warning-labeled success; manual control stays refused until readings
//! fall below 90 °C.

use std::sync::atomic::Ordering;

use tracing::warn;

use crate::error::{Error, Result};
use crate::hardware::{CapabilityFlag, FanLimits};
use crate::protocol::commands;

use super::Driver;

/// Temperature at which manual fan control is overridden.
pub const THERMAL_OVERRIDE_C: f32 = 95.0;

/// Manual control is re-enabled once all readings drop below this.
pub const THERMAL_RELEASE_C: f32 = 90.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    #[default]
    Balanced,
    Gaming,
    Creator,
    Custom,
}

impl PowerMode {
    pub fn hardware_id(self) -> u8 {
        match self {
            PowerMode::Balanced => 0,
            PowerMode::Gaming => 1,
            PowerMode::Creator => 2,
            PowerMode::Custom => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<PowerMode> {
        Some(match name {
            "balanced" => PowerMode::Balanced,
            "gaming" => PowerMode::Gaming,
            "creator" => PowerMode::Creator,
            "custom" => PowerMode::Custom,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoostTarget {
    Cpu,
    Gpu,
}

impl BoostTarget {
    fn hardware_id(self) -> u8 {
        match self {
            BoostTarget::Cpu => 0x00,
            BoostTarget::Gpu => 0x01,
        }
    }
}

/// Result of a manual fan request after the safety overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FanOutcome {
    Applied,
    /// The overlay forced automatic control instead.
    Overridden { reason: String },
}

impl Driver {
    fn ensure_system_control(&self) -> Result<()> {
        if self.descriptor().has_capability(CapabilityFlag::SystemControl) {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "{} has no EC control",
                self.descriptor().name
            )))
        }
    }

    fn fan_limits(&self) -> FanLimits {
        self.descriptor().fan_limits.unwrap_or_default()
    }

    /// Check the thermal overlay. Returns true when manual fan control must
    /// be refused right now.
    fn thermal_blocked(&self) -> Result<bool> {
        let Some(thermal) = self.thermal.as_ref() else {
            return Ok(false);
        };
        let temps = thermal.read_temperatures().map_err(Error::from)?;
        let hottest = temps.values().copied().fold(f32::MIN, f32::max);

        if hottest >= THERMAL_OVERRIDE_C {
            self.thermal_hold.store(true, Ordering::Relaxed);
            return Ok(true);
        }
        if self.thermal_hold.load(Ordering::Relaxed) {
            if hottest < THERMAL_RELEASE_C {
                self.thermal_hold.store(false, Ordering::Relaxed);
                return Ok(false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// SET_FAN_MODE quad: `[reserved, fan_id, power_mode, rpm/100]`.
    async fn write_fan_power(&self, mode: PowerMode, rpm: u32, fan_id: u8) -> Result<()> {
        let mut req = self.request(&commands::SET_FAN_MODE)?;
        req.put_u8(0x00)
            .put_u8(fan_id)
            .put_u8(mode.hardware_id())
            .put_u8((rpm / 100) as u8);
        self.run_request(&req).await?;
        Ok(())
    }

    /// Current RPM per fan.
    pub async fn get_fan_rpm(&self) -> Result<(u32, Option<u32>)> {
        self.ensure_system_control()?;

        let read_fan = |fan_id: u8| async move {
            let mut req = self.request(&commands::GET_FAN_SPEED)?;
            req.put_u8(0x00).put_u8(fan_id);
            let rsp = self.run_request(&req).await?;
            let raw = rsp
                .payload
                .get(2)
                .copied()
                .ok_or_else(|| Error::protocol("fan speed response too short"))?;
            Ok::<u32, Error>(raw as u32 * 100)
        };

        let fan1 = read_fan(0x00).await?;
        let fan2 = if self.fan_limits().dual_fan {
            Some(read_fan(0x01).await?)
        } else {
            None
        };
        Ok((fan1, fan2))
    }

    /// Hand fan control back to the EC, preserving the power mode.
    pub async fn set_fan_auto(&self) -> Result<()> {
        self.ensure_system_control()?;

        let mode = self.current_power_mode().await.unwrap_or_default();
        self.write_fan_power(mode, 0, 0x00).await?;
        if self.fan_limits().dual_fan {
            self.write_fan_power(mode, 0, 0x01).await?;
        }
        Ok(())
    }

    /// Manual fan RPM, bounded by the per-model band.
    ///
    /// Rejected with `InvalidArgument` outside the band; converted to
    /// automatic control under thermal override.
    pub async fn set_fan_rpm(&self, rpm: u32, rpm2: Option<u32>) -> Result<FanOutcome> {
        self.ensure_system_control()?;

        if rpm == 0 {
            self.set_fan_auto().await?;
            return Ok(FanOutcome::Applied);
        }

        let limits = self.fan_limits();
        for value in std::iter::once(rpm).chain(rpm2) {
            if value < limits.min_manual_rpm || value > limits.max_rpm {
                return Err(Error::invalid(format!(
                    "fan rpm {value} outside [{}, {}]",
                    limits.min_manual_rpm, limits.max_rpm
                )));
            }
        }

        if self.thermal_blocked()? {
            warn!(
                device = self.descriptor().name,
                "manual fan request refused, forcing automatic control"
            );
            self.set_fan_auto().await?;
            return Ok(FanOutcome::Overridden {
                reason: "thermal override active".to_string(),
            });
        }

        self.write_fan_power(PowerMode::Custom, rpm, 0x00).await?;
        if limits.dual_fan {
            let second = rpm2.unwrap_or(rpm);
            self.write_fan_power(PowerMode::Custom, second, 0x01).await?;
        }
        Ok(FanOutcome::Applied)
    }

    pub async fn set_power_mode(&self, mode: PowerMode) -> Result<()> {
        self.ensure_system_control()?;

        // keep the currently configured fan speed when switching profiles
        let current_rpm = self.configured_fan_rpm().await.unwrap_or(0);
        self.write_fan_power(mode, current_rpm, 0x00).await?;
        if self.fan_limits().dual_fan {
            self.write_fan_power(mode, current_rpm, 0x01).await?;
        }
        Ok(())
    }

    async fn current_power_mode(&self) -> Result<PowerMode> {
        let mut req = self.request(&commands::GET_FAN_MODE)?;
        req.put_bytes(&[0x00, 0x00, 0x00, 0x00]);
        let rsp = self.run_request(&req).await?;
        Ok(match rsp.payload.get(2).copied() {
            Some(1) => PowerMode::Gaming,
            Some(2) => PowerMode::Creator,
            Some(4) => PowerMode::Custom,
            _ => PowerMode::Balanced,
        })
    }

    async fn configured_fan_rpm(&self) -> Result<u32> {
        let mut req = self.request(&commands::GET_FAN_MODE)?;
        req.put_bytes(&[0x00, 0x00, 0x00, 0x00]);
        let rsp = self.run_request(&req).await?;
        Ok(rsp.payload.get(3).copied().unwrap_or(0) as u32 * 100)
    }

    /// CPU/GPU boost level for the custom power mode.
    pub async fn set_boost(&self, target: BoostTarget, level: u8) -> Result<()> {
        self.ensure_system_control()?;
        if level > 3 {
            return Err(Error::invalid(format!("boost level {level} outside 0-3")));
        }

        let mut req = self.request(&commands::SET_BOOST)?;
        req.put_u8(0x01).put_u8(target.hardware_id()).put_u8(level);
        self.run_request(&req).await?;
        Ok(())
    }

    /// Temperatures from the injected thermal source.
    pub fn get_temperatures(&self) -> Result<std::collections::HashMap<String, f32>> {
        let thermal = self
            .thermal
            .as_ref()
            .ok_or_else(|| Error::unsupported("no thermal source configured"))?;
        thermal.read_temperatures().map_err(Error::from)
    }
}
