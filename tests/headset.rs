//! Kraken headsets speak the register protocol, not the 90-byte commands.

mod common;

use std::sync::Arc;

use chromad::color::Color;
use chromad::device::Driver;
use chromad::error::Error;
use chromad::hid::FeatureDevice;
use chromad::protocol::effects::EffectArgs;

use common::*;

fn kraken(dev: &Arc<MockDevice>) -> Driver {
    Driver::new(descriptor(KRAKEN), dev.clone() as Arc<dyn FeatureDevice>)
}

#[tokio::test]
async fn serial_comes_from_eeprom() {
    let dev = MockDevice::new();
    let driver = kraken(&dev);

    let mut input = vec![0u8; 33];
    input[0] = 0x05;
    input[1..9].copy_from_slice(b"HN123456");
    dev.push_input_report(input);

    let serial = driver.get_serial().await.unwrap();
    assert_eq!(serial, "HN123456");

    // request: [report id, READ_EEPROM, length, addr hi, addr lo]
    let request = &dev.written()[0];
    assert_eq!(request.len(), 37);
    assert_eq!(request[0], 0x04);
    assert_eq!(request[1], 0x20, "EEPROM read");
    assert_eq!(request[2], 0x16, "22 bytes");
    assert_eq!(&request[3..5], &[0x7F, 0x00], "serial address");
}

#[tokio::test]
async fn static_effect_writes_color_then_mode() {
    let dev = MockDevice::new();
    let driver = kraken(&dev);

    driver
        .set_effect("static", EffectArgs::with_color(Color::new(0.0, 1.0, 1.0, 1.0)))
        .await
        .unwrap();

    let written = dev.written();
    assert_eq!(written.len(), 2);

    // Rainie breathing bank holds the color as [intensity, r, g, b]
    let colors = &written[0];
    assert_eq!(colors[1], 0x40, "RAM write");
    assert_eq!(&colors[3..5], &[0x15, 0xDE]);
    assert_eq!(&colors[5..9], &[0xFF, 0x00, 0xFF, 0xFF]);

    // then the mode byte with the `on` bit set
    let mode = &written[1];
    assert_eq!(&mode[3..5], &[0x10, 0x08], "Rainie led mode address");
    assert_eq!(mode[5], 0x01);

    let (name, _) = driver.state().current_effect.unwrap();
    assert_eq!(name, "static");
}

#[tokio::test]
async fn breathe_counts_colors_in_the_bit_field() {
    let dev = MockDevice::new();
    let driver = kraken(&dev);

    driver
        .set_effect(
            "breathe",
            EffectArgs {
                colors: vec![Color::RED, Color::GREEN],
                speed: None,
                direction: None,
            },
        )
        .await
        .unwrap();

    let written = dev.written();
    let mode = written.last().unwrap();
    // on | sync | breathe_double
    assert_eq!(mode[5], 0b0001_1001);
}

#[tokio::test]
async fn matrix_effects_are_not_available() {
    let dev = MockDevice::new();
    let driver = kraken(&dev);

    let err = driver
        .set_effect("wave", EffectArgs::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(dev.written().is_empty());
}
