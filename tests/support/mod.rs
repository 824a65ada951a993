//! Shared fixtures for the integration tests: a synchronous fake transport and a couple of
//! small test drivers modeled on the NB-IoT/SIM800 URC tables and header scanners.

use std::sync::Mutex;
use std::vec::Vec;

use at_engine::driver::{ModemDriver, UrcWriter};
use at_engine::response::ResponseType;

/// Captures every byte written to it; tests assert against `take()`.
///
/// Plain `std::sync::Mutex`, not `RefCell`: these fixtures are shared across the RX thread and
/// the caller thread in the scenario tests, so they need to actually be `Sync`.
#[derive(Default)]
pub struct FakeTx {
    written: Mutex<Vec<u8>>,
}

impl FakeTx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<u8> {
        core::mem::take(&mut self.written.lock().unwrap())
    }
}

impl at_engine::channel::Tx for FakeTx {
    fn write(&self, buffer: &[u8]) -> at_engine::Result<()> {
        self.written.lock().unwrap().extend_from_slice(buffer);
        Ok(())
    }
}

/// A driver with no URC table and no scanner of its own; every line falls through to the
/// parser's generic classifier.
#[derive(Default)]
pub struct NullDriver;

impl ModemDriver for NullDriver {
    fn handle_urc(&mut self, _line: &str, _writer: &mut dyn UrcWriter) {}
}

/// Records every URC it's handed, for assertions. Modeled on `ModemManager::urc_handler`.
#[derive(Default)]
pub struct RecordingDriver {
    pub urcs: Mutex<Vec<std::string::String>>,
}

impl ModemDriver for RecordingDriver {
    fn handle_urc(&mut self, line: &str, _writer: &mut dyn UrcWriter) {
        self.urcs.lock().unwrap().push(line.into());
    }
}

/// A socket driver whose header lines are a bare byte count, e.g. `"4,"` meaning 4 hex-encoded
/// payload bytes follow.
#[derive(Default)]
pub struct SocketDriver;

impl ModemDriver for SocketDriver {
    fn scan_line(&mut self, line: &str) -> ResponseType {
        if let Some(digits) = line.strip_suffix(',') {
            if let Ok(n) = digits.parse::<usize>() {
                return ResponseType::HexDataFollows(n);
            }
        }
        ResponseType::Unknown
    }

    fn handle_urc(&mut self, _line: &str, _writer: &mut dyn UrcWriter) {}
}

pub fn data_accept_scanner(line: &str) -> ResponseType {
    if line.starts_with("DATA ACCEPT:") {
        ResponseType::FinalOk
    } else {
        ResponseType::Unknown
    }
}
