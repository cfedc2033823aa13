#![allow(dead_code)]

//! Scripted HID device for exercising the full driver stack.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use chromad::hardware::{DeviceDescriptor, HardwareStore, RAZER_VENDOR_ID};
use chromad::hid::FeatureDevice;
use chromad::protocol::REPORT_SIZE;

/// What the next `get_feature` call should produce.
pub enum Reply {
    Data(Vec<u8>),
    Timeout,
    IoError,
}

/// A fake feature-report endpoint.
///
/// Sent reports are recorded verbatim. Reads consume scripted replies; with
/// nothing scripted, the last sent report is echoed back with an OK status,
/// which satisfies the common command flows.
#[derive(Default)]
pub struct MockDevice {
    sent: Mutex<Vec<Vec<u8>>>,
    replies: Mutex<VecDeque<Reply>>,
    written: Mutex<Vec<Vec<u8>>>,
    input_replies: Mutex<VecDeque<Vec<u8>>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Script an OK response carrying `payload`, echoing the headers of the
    /// given command.
    pub fn push_ok(&self, transaction_id: u8, class: u8, id: u8, payload: &[u8]) {
        self.push_reply(Reply::Data(ok_report(transaction_id, class, id, payload)));
    }

    pub fn push_status(&self, status: u8) {
        let mut buf = vec![0u8; REPORT_SIZE];
        buf[0] = status;
        buf[88] = xor_crc(&buf);
        self.push_reply(Reply::Data(buf));
    }

    pub fn push_timeout(&self) {
        self.push_reply(Reply::Timeout);
    }

    pub fn push_input_report(&self, data: Vec<u8>) {
        self.input_replies.lock().unwrap().push_back(data);
    }
}

pub fn xor_crc(buf: &[u8]) -> u8 {
    buf[1..87].iter().fold(0, |acc, b| acc ^ b)
}

/// A well-formed OK response report.
pub fn ok_report(transaction_id: u8, class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; REPORT_SIZE];
    buf[0] = 0x02;
    buf[1] = transaction_id;
    buf[5] = payload.len() as u8;
    buf[6] = class;
    buf[7] = id;
    buf[8..8 + payload.len()].copy_from_slice(payload);
    buf[88] = xor_crc(&buf);
    buf
}

impl FeatureDevice for MockDevice {
    fn set_feature(&self, buf: &[u8]) -> io::Result<()> {
        self.sent.lock().unwrap().push(buf.to_vec());
        Ok(())
    }

    fn get_feature(&self, buf: &mut [u8]) -> io::Result<usize> {
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Reply::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "no response")),
            Some(Reply::IoError) => Err(io::Error::other("device gone")),
            None => {
                // echo the last request with an OK status
                let sent = self.sent.lock().unwrap();
                let last = sent.last().cloned().unwrap_or_else(|| vec![0; REPORT_SIZE]);
                drop(sent);
                let n = last.len().min(buf.len());
                buf[..n].copy_from_slice(&last[..n]);
                buf[0] = 0x02;
                Ok(n)
            }
        }
    }

    fn write_output(&self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn read_input(&self, buf: &mut [u8]) -> io::Result<usize> {
        let reply = self.input_replies.lock().unwrap().pop_front();
        let data = reply.unwrap_or_else(|| {
            let mut d = vec![0u8; buf.len()];
            d[0] = 0x05;
            d
        });
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

pub fn descriptor(product_id: u16) -> Arc<DeviceDescriptor> {
    HardwareStore::builtin()
        .lookup(RAZER_VENDOR_ID, product_id)
        .expect("descriptor in builtin catalog")
}

/// Product ids used across the tests.
pub const BLACKWIDOW_CHROMA: u16 = 0x0203;
pub const ORNATA_CHROMA: u16 = 0x021E;
pub const BLACKWIDOW_V3_PRO: u16 = 0x025A;
pub const BLADE_STEALTH: u16 = 0x0220;
pub const BLADE_15: u16 = 0x0253;
pub const MAMBA_WIRELESS: u16 = 0x0045;
pub const KRAKEN: u16 = 0x0504;
