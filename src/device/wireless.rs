//! Battery, charging, and idle-time control for wireless devices.

use crate::error::{Error, Result};
use crate::hardware::CapabilityFlag;
use crate::protocol::commands;

use super::Driver;

/// Idle timeout bounds accepted by the firmware, in seconds.
pub const IDLE_TIME_MIN: u16 = 60;
pub const IDLE_TIME_MAX: u16 = 900;

impl Driver {
    fn ensure_wireless(&self) -> Result<()> {
        if self.descriptor().has_capability(CapabilityFlag::Wireless) {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "{} has no wireless telemetry",
                self.descriptor().name
            )))
        }
    }

    /// Battery level in percent. The raw value is 0-255 in the second
    /// payload byte.
    pub async fn get_battery(&self) -> Result<f32> {
        self.ensure_wireless()?;

        let req = self.request(&commands::GET_BATTERY_LEVEL)?;
        match self.run_request(&req).await {
            Ok(rsp) => {
                let raw = rsp
                    .payload
                    .get(1)
                    .copied()
                    .ok_or_else(|| Error::protocol("battery response too short"))?;
                let pct = raw as f32 / 255.0 * 100.0;
                self.update_state(|s| {
                    s.telemetry.battery = Some(pct);
                    s.telemetry.stale = false;
                });
                Ok(pct)
            }
            Err(err) => {
                self.update_state(|s| s.telemetry.stale = true);
                Err(err)
            }
        }
    }

    pub async fn get_charging(&self) -> Result<bool> {
        self.ensure_wireless()?;

        let req = self.request(&commands::GET_CHARGING_STATUS)?;
        match self.run_request(&req).await {
            Ok(rsp) => {
                let charging = rsp.payload.get(1).copied() == Some(0x01);
                self.update_state(|s| {
                    s.telemetry.charging = Some(charging);
                    s.telemetry.stale = false;
                });
                Ok(charging)
            }
            Err(err) => {
                self.update_state(|s| s.telemetry.stale = true);
                Err(err)
            }
        }
    }

    /// Seconds of inactivity before the device sleeps.
    pub async fn set_idle_time(&self, seconds: u16) -> Result<()> {
        self.ensure_wireless()?;
        if !(IDLE_TIME_MIN..=IDLE_TIME_MAX).contains(&seconds) {
            return Err(Error::invalid(format!(
                "idle time {seconds}s outside [{IDLE_TIME_MIN}, {IDLE_TIME_MAX}]"
            )));
        }

        let mut req = self.request(&commands::SET_IDLE_TIME)?;
        req.put_u16_be(seconds);
        self.run_request(&req).await?;
        Ok(())
    }

    pub async fn get_idle_time(&self) -> Result<u16> {
        self.ensure_wireless()?;

        let req = self.request(&commands::GET_IDLE_TIME)?;
        let rsp = self.run_request(&req).await?;
        if rsp.payload.len() < 2 {
            return Err(Error::protocol("idle time response too short"));
        }
        Ok(u16::from_be_bytes([rsp.payload[0], rsp.payload[1]]))
    }
}
