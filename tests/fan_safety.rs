//! Laptop EC control and the thermal safety overlay.

mod common;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use chromad::device::laptop::{BoostTarget, FanOutcome, PowerMode};
use chromad::device::{Driver, ThermalSource};
use chromad::error::Error;
use chromad::hid::FeatureDevice;

use common::*;

struct MockThermal {
    cpu: Arc<Mutex<f32>>,
}

impl ThermalSource for MockThermal {
    fn read_temperatures(&self) -> io::Result<HashMap<String, f32>> {
        let mut out = HashMap::new();
        out.insert("x86_pkg_temp".to_string(), *self.cpu.lock().unwrap());
        Ok(out)
    }
}

fn laptop(dev: &Arc<MockDevice>, cpu: &Arc<Mutex<f32>>) -> Driver {
    Driver::new(
        descriptor(BLADE_STEALTH),
        dev.clone() as Arc<dyn FeatureDevice>,
    )
    .with_thermal(Box::new(MockThermal { cpu: cpu.clone() }))
}

#[tokio::test]
async fn rpm_outside_the_band_is_rejected_without_state_change() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(60.0));
    let driver = laptop(&dev, &cpu);

    // Blade Stealth band is 3500..=4500
    let low = driver.set_fan_rpm(3000, None).await.unwrap_err();
    assert!(matches!(low, Error::InvalidArgument(_)));
    let high = driver.set_fan_rpm(4600, None).await.unwrap_err();
    assert!(matches!(high, Error::InvalidArgument(_)));
    assert_eq!(dev.sent_count(), 0, "rejected requests do not reach the EC");
}

#[tokio::test]
async fn hot_cpu_forces_auto_with_a_warning() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(96.0));
    let driver = laptop(&dev, &cpu);

    let outcome = driver.set_fan_rpm(3600, None).await.unwrap();
    assert_eq!(
        outcome,
        FanOutcome::Overridden {
            reason: "thermal override active".to_string()
        }
    );

    // the command actually written sets rpm 0 (automatic)
    let fan = dev
        .sent()
        .into_iter()
        .rev()
        .find(|r| (r[6], r[7]) == (0x0D, 0x02))
        .expect("fan command issued");
    assert_eq!(fan[11], 0, "rpm/100 byte is zero for auto");
}

#[tokio::test]
async fn manual_control_stays_refused_until_cooled_below_90() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(96.0));
    let driver = laptop(&dev, &cpu);

    assert!(matches!(
        driver.set_fan_rpm(3600, None).await.unwrap(),
        FanOutcome::Overridden { .. }
    ));

    // cooled, but not below the release threshold yet
    *cpu.lock().unwrap() = 92.0;
    assert!(matches!(
        driver.set_fan_rpm(3600, None).await.unwrap(),
        FanOutcome::Overridden { .. }
    ));

    *cpu.lock().unwrap() = 88.0;
    assert_eq!(
        driver.set_fan_rpm(3600, None).await.unwrap(),
        FanOutcome::Applied
    );

    let fan = dev
        .sent()
        .into_iter()
        .rev()
        .find(|r| (r[6], r[7]) == (0x0D, 0x02))
        .unwrap();
    assert_eq!(fan[10], 4, "custom power profile");
    assert_eq!(fan[11], 36, "3600 rpm / 100");
}

#[tokio::test]
async fn fan_rpm_reads_scale_by_100() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(60.0));
    let driver = laptop(&dev, &cpu);

    dev.push_ok(0xFF, 0x0D, 0x81, &[0x00, 0x00, 35]);
    let (fan1, fan2) = driver.get_fan_rpm().await.unwrap();
    assert_eq!(fan1, 3500);
    assert_eq!(fan2, None, "single-fan model");
}

#[tokio::test]
async fn power_modes_and_boost_encode_their_ids() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(60.0));
    let driver = laptop(&dev, &cpu);

    driver.set_power_mode(PowerMode::Gaming).await.unwrap();
    let fan = dev
        .sent()
        .into_iter()
        .rev()
        .find(|r| (r[6], r[7]) == (0x0D, 0x02))
        .unwrap();
    assert_eq!(fan[10], 1, "gaming profile id");

    dev.clear_sent();
    driver.set_boost(BoostTarget::Gpu, 3).await.unwrap();
    let boost = &dev.sent()[0];
    assert_eq!((boost[6], boost[7]), (0x0D, 0x0D));
    assert_eq!(&boost[8..11], &[0x01, 0x01, 0x03]);

    let err = driver.set_boost(BoostTarget::Cpu, 9).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn non_laptops_reject_ec_control() {
    let dev = MockDevice::new();
    let driver = Driver::new(
        descriptor(BLACKWIDOW_CHROMA),
        dev.clone() as Arc<dyn FeatureDevice>,
    );

    assert!(matches!(
        driver.set_fan_auto().await.unwrap_err(),
        Error::Unsupported(_)
    ));
    assert!(matches!(
        driver.set_fan_rpm(4000, None).await.unwrap_err(),
        Error::Unsupported(_)
    ));
    assert_eq!(dev.sent_count(), 0);
}

#[tokio::test]
async fn temperatures_surface_from_the_injected_source() {
    let dev = MockDevice::new();
    let cpu = Arc::new(Mutex::new(67.5));
    let driver = laptop(&dev, &cpu);

    let temps = driver.get_temperatures().unwrap();
    assert_eq!(temps.get("x86_pkg_temp"), Some(&67.5));
}
