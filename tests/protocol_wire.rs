//! Wire-level behavior of the device driver against a scripted endpoint.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use chromad::color::Color;
use chromad::device::{Driver, LedSettings};
use chromad::error::Error;
use chromad::hardware::Led;
use chromad::protocol::effects::EffectArgs;

use common::*;

fn driver_for(product_id: u16, dev: &Arc<MockDevice>) -> Driver {
    Driver::new(descriptor(product_id), dev.clone() as Arc<dyn chromad::hid::FeatureDevice>)
}

#[tokio::test]
async fn static_red_on_legacy_keyboard() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    driver
        .set_effect("static", EffectArgs::with_color(Color::RED))
        .await
        .unwrap();

    let sent = dev.sent();
    assert_eq!(sent.len(), 1);
    let report = &sent[0];
    assert_eq!(report[1], 0xFF, "legacy transaction id");
    assert_eq!(report[4], 0x00, "protocol type");
    assert_eq!(report[5], 0x04, "data size: effect id + rgb");
    assert_eq!(report[6], 0x03, "standard effect class");
    assert_eq!(report[7], 0x0A, "set-effect command");
    assert_eq!(report[8], 0x06, "static effect id");
    assert_eq!(&report[9..12], &[0xFF, 0x00, 0x00]);
    assert_eq!(report[88], xor_crc(report));

    let state = driver.state();
    let (name, args) = state.current_effect.expect("effect recorded");
    assert_eq!(name, "static");
    assert_eq!(args.colors, vec![Color::RED]);
}

#[tokio::test]
async fn brightness_75_on_wireless_keyboard() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_V3_PRO, &dev);

    driver.set_brightness(75.0).await.unwrap();

    let sent = dev.sent();
    assert_eq!(sent.len(), 1);
    let report = &sent[0];
    assert_eq!(report[1], 0x9F, "wireless keyboard transaction id");
    assert_eq!(report[6], 0x03);
    assert_eq!(report[7], 0x03, "set-led-brightness");
    assert_eq!(report[8], 0x05, "backlight led");
    assert_eq!(report[9], 0xBF, "round(75 * 2.55) = 191");

    // hardware reports the same byte back
    dev.push_ok(0x9F, 0x03, 0x83, &[0x05, 0xBF]);
    let pct = driver.get_brightness().await.unwrap();
    assert!((74.0..=76.0).contains(&pct), "got {pct}");
}

#[tokio::test]
async fn unsupported_led_fails_without_sending() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    let err = driver
        .set_led(Led::Battery, LedSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert_eq!(dev.sent_count(), 0, "no report may reach the wire");
}

#[tokio::test]
async fn supported_led_issues_only_the_requested_subset() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    driver
        .set_led(
            Led::Logo,
            LedSettings {
                color: Some(Color::BLUE),
                on: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let sent = dev.sent();
    assert_eq!(sent.len(), 2);
    // state first, then color
    assert_eq!((sent[0][6], sent[0][7]), (0x03, 0x00));
    assert_eq!(&sent[0][8..10], &[0x04, 0x01]);
    assert_eq!((sent[1][6], sent[1][7]), (0x03, 0x01));
    assert_eq!(&sent[1][8..12], &[0x04, 0x00, 0x00, 0xFF]);
}

#[tokio::test]
async fn brightness_zero_and_led_off_are_independent() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    driver.set_brightness(0.0).await.unwrap();
    let dim = dev.sent();
    assert_eq!((dim[0][6], dim[0][7]), (0x03, 0x03));
    assert_eq!(dim[0][9], 0x00);

    dev.clear_sent();
    driver
        .set_led(
            Led::Backlight,
            LedSettings {
                on: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let off = dev.sent();
    assert_eq!((off[0][6], off[0][7]), (0x03, 0x00), "distinct command");
    assert_eq!(&off[0][8..10], &[0x05, 0x00]);
}

#[tokio::test]
async fn extended_profile_routes_effects_through_class_0f() {
    let dev = MockDevice::new();
    let driver = driver_for(ORNATA_CHROMA, &dev);

    driver
        .set_effect("static", EffectArgs::with_color(Color::GREEN))
        .await
        .unwrap();

    let sent = dev.sent();
    let report = &sent[0];
    assert_eq!(report[1], 0x3F, "extended transaction id");
    assert_eq!(report[6], 0x0F);
    assert_eq!(report[7], 0x02);
    // [varstore, led, effect id, rgb]
    assert_eq!(&report[8..14], &[0x01, 0x05, 0x01, 0x00, 0xFF, 0x00]);
}

#[tokio::test]
async fn effect_without_extended_mapping_is_rejected_before_transport() {
    let dev = MockDevice::new();
    // Blade 15 runs the modern (extended-class) protocol but lists the
    // legacy-only Blade effects
    let driver = driver_for(BLADE_15, &dev);

    let err = driver
        .set_effect("gradient", EffectArgs::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert_eq!(dev.sent_count(), 0);
}

#[tokio::test]
async fn unknown_effect_name_is_unsupported() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);
    let err = driver
        .set_effect("disco", EffectArgs::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[tokio::test]
async fn matrix_commit_counts_down_remaining_packets() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    let frame_lock = driver.frame().expect("keyboard has a matrix");
    {
        let frame = frame_lock.lock().await;
        driver.commit_matrix(&frame).await.unwrap();
    }

    let sent = dev.sent();
    // six rows in one segment each, plus the latch
    assert_eq!(sent.len(), 7);

    for (row, report) in sent[..6].iter().enumerate() {
        assert_eq!((report[6], report[7]), (0x03, 0x0B), "frame command");
        let remaining = u16::from_be_bytes([report[2], report[3]]);
        assert_eq!(remaining, (5 - row) as u16, "big-endian countdown");
        assert_eq!(report[8], row as u8);
        assert_eq!(report[9], 0x00, "start col");
        assert_eq!(report[10], 21, "end col");
        assert_eq!(report[5] as usize, 3 + 22 * 3, "row header + rgb");
    }

    let latch = &sent[6];
    assert_eq!((latch[6], latch[7]), (0x03, 0x0A));
    assert_eq!(latch[8], 0x05, "custom_frame effect id");
    assert_eq!(latch[9], 0x01, "varstore");
}

#[tokio::test]
async fn wide_laptop_rows_split_into_ordered_segments() {
    let dev = MockDevice::new();
    let driver = driver_for(BLADE_STEALTH, &dev);

    let frame_lock = driver.frame().unwrap();
    {
        let frame = frame_lock.lock().await;
        driver.commit_matrix(&frame).await.unwrap();
    }

    let sent = dev.sent();
    // 6 rows x 25 cols fit one alt-width segment per row, plus the latch
    assert_eq!(sent.len(), 7);
    assert_eq!(sent[0][9], 0, "segment starts left");
    assert_eq!(sent[0][10], 24, "segment spans all 25 columns");
    assert_eq!(sent[0][5] as usize, 3 + 25 * 3);
}

#[tokio::test]
async fn busy_is_retried_then_succeeds() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    dev.push_status(0x01);
    dev.push_status(0x01);
    // echo-OK takes over afterwards
    driver.set_brightness(50.0).await.unwrap();

    // the same report was resent for each BUSY
    assert_eq!(dev.sent_count(), 3);
}

#[tokio::test]
async fn three_consecutive_busy_surface_device_busy() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    for _ in 0..4 {
        dev.push_status(0x01);
    }
    let err = driver.set_brightness(50.0).await.unwrap_err();
    assert!(matches!(err, Error::DeviceBusy));
}

#[tokio::test]
async fn timeout_gets_exactly_one_retry() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    dev.push_timeout();
    dev.push_timeout();
    let err = driver.get_firmware().await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(dev.sent_count(), 2, "initial send plus one retry");
}

#[tokio::test]
async fn crc_mismatch_raises_protocol_error() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    let mut bad = ok_report(0xFF, 0x00, 0x81, &[1, 2]);
    bad[88] ^= 0xA5;
    dev.push_reply(Reply::Data(bad));

    let err = driver.get_firmware().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn firmware_and_serial_parse() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    dev.push_ok(0xFF, 0x00, 0x81, &[0x02, 0x05]);
    assert_eq!(driver.get_firmware().await.unwrap(), (2, 5));

    let mut serial = [0u8; 22];
    serial[..8].copy_from_slice(b"PM180300");
    dev.push_ok(0xFF, 0x00, 0x82, &serial);
    assert_eq!(driver.get_serial().await.unwrap(), "PM180300");
}

#[tokio::test]
async fn suspend_dims_but_remembers_brightness() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    driver.set_brightness(80.0).await.unwrap();
    driver.set_suspend(true).await.unwrap();

    // logical level is preserved while suspended
    assert_eq!(driver.get_brightness().await.unwrap(), 80.0);
    assert!(driver.state().suspended);

    dev.clear_sent();
    driver.set_suspend(false).await.unwrap();
    let sent = dev.sent();
    assert_eq!(sent.last().unwrap()[9], 204, "round(80 * 2.55)");
}

#[tokio::test]
async fn refresh_led_reads_back_hardware_state() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    dev.push_ok(0xFF, 0x03, 0x80, &[0x04, 0x01]);
    dev.push_ok(0xFF, 0x03, 0x81, &[0x04, 0xFF, 0x00, 0x80]);
    dev.push_ok(0xFF, 0x03, 0x83, &[0x04, 0xBF]);
    dev.push_ok(0xFF, 0x03, 0x82, &[0x04, 0x02]);

    let led = driver.refresh_led(Led::Logo).await.unwrap();
    assert!(led.on);
    assert_eq!(led.color.to_rgb8(), [0xFF, 0x00, 0x80]);
    assert!((led.brightness - 74.9).abs() < 1.0);
    assert_eq!(led.mode, chromad::device::LedMode::Pulse);

    // the cache reflects the readback
    let cached = driver.state().leds[&Led::Logo];
    assert!(cached.on);
}

#[tokio::test]
async fn offline_device_rejects_writes() {
    let dev = MockDevice::new();
    let driver = driver_for(BLACKWIDOW_CHROMA, &dev);

    driver.mark_offline();
    let err = driver.set_brightness(10.0).await.unwrap_err();
    assert!(matches!(err, Error::DeviceOffline(_)));
    assert_eq!(dev.sent_count(), 0);
}
