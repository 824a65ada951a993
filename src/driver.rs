//! The adapter surface a modem-family driver (NB-IoT, 2G/BT, ...) implements.
//!
//! None of this crate's modules know anything about a particular modem. A driver plugs in by
//! implementing [`ModemDriver`] and handing it to [`crate::channel::AtChannel::new`]; everything
//! modem-specific (URC tables, header parsing, socket state machines) lives on the driver side.

use crate::response::ResponseType;

/// A per-byte transform installed for the duration of one command.
///
/// Invoked once per received byte while the parser is assembling a line (not during raw/hex
/// payload consumption). `ch` has already been appended to the buffer, so `line` is the line
/// accumulated so far INCLUDING `ch` as its last byte; the returned byte replaces `ch` for
/// classification purposes only — a handler that wants to rewrite history mutates `line` in
/// place (e.g. coercing non-printable reboot-banner garbage to spaces).
///
/// The second return value, when `true`, tells the channel to clear the handler immediately
/// (the mechanism a driver uses to end a variable-length header early at a separator, e.g. a
/// comma, by returning `(b'\n', true)`).
pub type CharacterHandlerFn = fn(ch: u8, line: &mut [u8], len: usize) -> (u8, bool);

/// A per-command override of [`ModemDriver::scan_line`], cleared automatically when the
/// command completes.
pub type CommandScannerFn = fn(line: &str) -> ResponseType;

/// The write-only surface exposed to a driver from inside [`ModemDriver::handle_urc`].
///
/// `handle_urc` runs synchronously from whatever context calls
/// [`crate::parser::AtParser::feed`] (commonly the serial RX task), so it must never block
/// waiting for a response. Drivers that need to react to a URC with an outbound command (for
/// example SIM800's auto-accept of an incoming Bluetooth pairing request) use this trait to
/// fire the write and nothing else; issuing a full `command()` call here would deadlock
/// against the very RX context delivering the URC.
pub trait UrcWriter {
    /// Writes `line` followed by `\r`, without waiting for a response.
    fn send(&mut self, line: &str);
}

/// Callbacks a modem-family driver registers with [`crate::channel::AtChannel`].
pub trait ModemDriver {
    /// Classifies one completed line. Returning [`ResponseType::Unknown`] defers to the
    /// generic classifier (URC/`OK`/`ERROR`/`NO CARRIER`/`+CME ERROR:`/`+CMS ERROR:`, else
    /// intermediate).
    fn scan_line(&mut self, line: &str) -> ResponseType {
        let _ = line;
        ResponseType::Unknown
    }

    /// Delivers one unsolicited line. May mutate driver-owned state (socket status tables,
    /// pairing state machines) and may write through `writer`. Must not block.
    fn handle_urc(&mut self, line: &str, writer: &mut dyn UrcWriter);
}
