//! Response classification and the buffer type returned to callers.

use heapless::Vec;

use crate::error::Error;

/// The classification a scanner (driver, per-command override, or the generic fallback)
/// assigns to one completed response line.
///
/// `RawDataFollows`/`HexDataFollows` carry the payload length in bytes, computed by the
/// scanner from the modem's own header syntax (e.g. `+QIRD: 4,` means 4 raw bytes follow).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseType {
    /// Defer to the generic classifier.
    Unknown,
    /// Accumulate this line into the response; keep reading.
    Intermediate,
    /// An unsolicited notification; do not include it in the response.
    Urc,
    /// Terminates the command successfully; the line itself is dropped from the response.
    FinalOk,
    /// Terminates the command with a modem-reported error; the line is dropped.
    Final,
    /// Accumulate this header line, then consume `n` raw payload bytes before resuming line
    /// mode.
    RawDataFollows(usize),
    /// Accumulate this header line, then consume `n` bytes' worth of hex-ASCII before
    /// resuming line mode.
    HexDataFollows(usize),
}

/// Lines that terminate a command even when no driver-specific scanner recognizes them.
const FINAL_OK_EXACT: &[&str] = &["OK"];
const FINAL_ERROR_EXACT: &[&str] = &["ERROR", "NO CARRIER"];
const FINAL_ERROR_PREFIX: &[&str] = &["+CME ERROR:", "+CMS ERROR:"];

/// Generic URC prefixes recognized regardless of the active modem family.
///
/// Driver-specific URC tables (one per modem family) are consulted first, via
/// [`crate::driver::ModemDriver::scan_line`]; this table is the fallback.
pub const GENERIC_URC_PREFIXES: &[&str] = &["RING"];

fn prefix_in_table(line: &str, table: &[&str]) -> bool {
    table.iter().any(|prefix| line.starts_with(prefix))
}

/// The classifier applied whenever a scanner defers by returning [`ResponseType::Unknown`].
pub fn classify_generic(line: &str) -> ResponseType {
    if prefix_in_table(line, GENERIC_URC_PREFIXES) {
        ResponseType::Urc
    } else if FINAL_OK_EXACT.contains(&line) {
        ResponseType::FinalOk
    } else if FINAL_ERROR_EXACT.contains(&line) || prefix_in_table(line, FINAL_ERROR_PREFIX) {
        ResponseType::Final
    } else {
        ResponseType::Intermediate
    }
}

/// The accumulated body of a completed command.
///
/// Kept as raw bytes rather than a `str`: a response that went through a `RawDataFollows`/
/// `HexDataFollows` block carries binary payload inline with its header lines, so UTF-8
/// validity can't be assumed for the buffer as a whole. [`ResponseBody::as_str`] is the
/// convenience path for the common text-only case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseBody<const N: usize> {
    bytes: Vec<u8, N>,
}

impl<const N: usize> ResponseBody<N> {
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut vec = Vec::new();
        // `bytes` is always a view into a buffer already bounded by the same capacity `N`,
        // so this can only fail if the parser and channel disagree on N.
        let _ = vec.extend_from_slice(bytes);
        Self { bytes: vec }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> crate::Result<&str> {
        core::str::from_utf8(&self.bytes).map_err(|_| Error::Utf8Error)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
