//! The byte-in/event-out line and payload assembler.
//!
//! [`AtParser`] owns nothing but a fixed-size buffer and a small state tag; it does no I/O and
//! knows nothing about any particular modem. [`AtParser::feed`] is the only way bytes enter it,
//! and must be called from a single context (the serial RX path) — see the crate's concurrency
//! notes in [`crate::channel`].

use core::str::FromStr;

#[cfg(feature = "defmt")]
use defmt::debug;
use heapless::String;
#[cfg(not(feature = "defmt"))]
use log::debug;

use crate::driver::CharacterHandlerFn;
use crate::error::Error;
use crate::response::{ResponseType, classify_generic};

/// Default capacity of the dataprompt string (e.g. `"> "`), generous enough for every known
/// modem-family prompt.
const DATAPROMPT_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// No command outstanding; completed lines are unsolicited.
    Idle,
    /// A command is outstanding; completed lines are response lines until a final line.
    ReadLine,
    /// A command is outstanding and armed with a dataprompt; an exact match on the
    /// in-progress line completes it immediately as [`ResponseType::FinalOk`].
    DataPrompt,
    /// `n` raw payload bytes remain before line mode resumes.
    RawData(usize),
    /// `n` payload bytes remain, each built from two hex-ASCII nibbles; the first nibble of a
    /// pair, once seen, is held here until its partner arrives.
    HexData(usize, Option<u8>),
}

/// The callbacks [`AtParser::feed`] drives while assembling one line or payload.
///
/// Implemented by [`crate::channel::AtChannel`], which is responsible for consulting any
/// per-command scanner override before the driver's own [`crate::driver::ModemDriver::scan_line`].
/// Returning [`ResponseType::Unknown`] from `scan_line` defers to the built-in generic
/// classifier ([`crate::response::classify_generic`]).
pub trait LineSink {
    /// Classifies one completed, non-empty line. Not called for the matched line of a
    /// dataprompt — that always completes as `FinalOk`.
    fn scan_line(&mut self, line: &str) -> ResponseType;

    /// Delivers an unsolicited line: either genuinely classified as a URC, or any line at all
    /// that arrived with no command outstanding.
    fn handle_urc(&mut self, line: &str);

    /// Delivers the accumulated response body for a command that just terminated. `ok` is
    /// `true` for `FinalOk`, `false` for a modem-reported `Final`. The parser has already
    /// reset to `Idle` by the time this returns.
    fn handle_response(&mut self, response: &[u8], ok: bool);
}

/// Accumulates `\r\n`-terminated lines and in-band binary payloads out of a raw byte stream.
///
/// `N` bounds the response buffer; per the data model, byte index `N - 1` is always reserved
/// so a NUL terminator (or simply "one past the last valid byte") is representable without a
/// bounds check at the point of use. Overflow within a single line is dropped silently — lines
/// that fit are delivered intact, nothing else is ever lost, and no allocation ever fails.
pub struct AtParser<const N: usize> {
    buf: [u8; N],
    /// One past the last byte written.
    used: usize,
    /// Start of the line currently being assembled.
    current: usize,
    state: State,
    dataprompt: Option<String<DATAPROMPT_CAPACITY>>,
    character_handler: Option<CharacterHandlerFn>,
}

impl<const N: usize> Default for AtParser<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AtParser<N> {
    pub fn new() -> Self {
        assert!(N > 1, "parser buffer must hold at least one data byte plus its reserved slot");
        Self {
            buf: [0u8; N],
            used: 0,
            current: 0,
            state: State::Idle,
            dataprompt: None,
            character_handler: None,
        }
    }

    /// Returns the parser to `Idle` with an empty buffer, no armed dataprompt and no
    /// character handler. Called on every terminal classification and on timeout.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.used = 0;
        self.current = 0;
        self.dataprompt = None;
        self.character_handler = None;
    }

    /// Installs (or clears) the per-byte transform invoked while a line is being assembled.
    pub fn set_character_handler(&mut self, handler: Option<CharacterHandlerFn>) {
        self.character_handler = handler;
    }

    /// Arms a dataprompt for the *next* [`AtParser::await_response`] call. An exact match of
    /// the prompt against the in-progress line, even with no terminator, completes that line
    /// immediately as `FinalOk`.
    pub fn expect_dataprompt(&mut self, prompt: &str) -> crate::Result<()> {
        self.dataprompt = Some(String::from_str(prompt).map_err(|_| Error::BufferTooSmall)?);
        Ok(())
    }

    /// Arms the parser to read a response: `Idle` → `ReadLine`, or `DataPrompt` if a prompt
    /// was armed via [`AtParser::expect_dataprompt`]. Must be called immediately before the
    /// response bytes it expects are fed in.
    pub fn await_response(&mut self) {
        self.state = if self.dataprompt.is_some() {
            State::DataPrompt
        } else {
            State::ReadLine
        };
    }

    /// Feeds received bytes into the parser. Must be called from a single context (see module
    /// docs); `sink` is consulted for every completed line, URC and finished response.
    pub fn feed(&mut self, bytes: &[u8], sink: &mut impl LineSink) {
        for &byte in bytes {
            self.feed_one(byte, sink);
        }
    }

    fn feed_one(&mut self, byte: u8, sink: &mut impl LineSink) {
        match self.state {
            State::Idle | State::ReadLine | State::DataPrompt => self.feed_line_byte(byte, sink),
            State::RawData(_) => self.feed_raw_byte(byte),
            State::HexData(..) => self.feed_hex_byte(byte),
        }
    }

    fn feed_line_byte(&mut self, ch: u8, sink: &mut impl LineSink) {
        if ch != b'\r' && ch != b'\n' {
            self.append(ch);
        }

        let mut effective = ch;
        if let Some(handler) = self.character_handler {
            let current = self.current;
            let used = self.used;
            let (replaced, clear) = handler(ch, &mut self.buf[current..used], used - current);
            effective = replaced;
            if clear {
                self.character_handler = None;
            }
        }

        if effective == b'\n' {
            self.handle_line(sink, false);
        } else if self.state == State::DataPrompt && self.current_line_matches_dataprompt() {
            self.handle_line(sink, true);
        }
    }

    fn feed_raw_byte(&mut self, byte: u8) {
        let State::RawData(mut remaining) = self.state else {
            return;
        };
        if remaining > 0 {
            self.append(byte);
            remaining -= 1;
        }
        if remaining == 0 {
            self.include_line();
            self.state = State::ReadLine;
        } else {
            self.state = State::RawData(remaining);
        }
    }

    fn feed_hex_byte(&mut self, ch: u8) {
        let State::HexData(mut remaining, mut held) = self.state else {
            return;
        };
        if remaining > 0 {
            if let Some(nibble) = hex_nibble(ch) {
                match held {
                    None => held = Some(nibble),
                    Some(high) => {
                        self.append((high << 4) | nibble);
                        held = None;
                        remaining -= 1;
                    }
                }
            }
        }
        if remaining == 0 {
            self.include_line();
            self.state = State::ReadLine;
        } else {
            self.state = State::HexData(remaining, held);
        }
    }

    /// `forced_final_ok` is set when this call is triggered by an exact dataprompt match
    /// rather than a `\n`; such a line is never classified, it is always `FinalOk`.
    fn handle_line(&mut self, sink: &mut impl LineSink, forced_final_ok: bool) {
        if self.used == self.current {
            return;
        }

        let line = core::str::from_utf8(&self.buf[self.current..self.used]).unwrap_or("");
        debug!(">> {}", line);

        let line_type = if forced_final_ok {
            ResponseType::FinalOk
        } else {
            match sink.scan_line(line) {
                ResponseType::Unknown => classify_generic(line),
                ty => ty,
            }
        };

        if matches!(line_type, ResponseType::Urc) || self.state == State::Idle {
            sink.handle_urc(line);
            self.used = self.current;
            return;
        }

        match line_type {
            ResponseType::FinalOk => {
                self.used = self.current;
                self.finalize(sink, true);
            }
            ResponseType::Final => {
                self.include_line();
                self.finalize(sink, false);
            }
            ResponseType::RawDataFollows(n) => {
                self.include_line();
                self.state = State::RawData(n);
            }
            ResponseType::HexDataFollows(n) => {
                self.include_line();
                self.state = State::HexData(n, None);
            }
            ResponseType::Intermediate => {
                self.include_line();
                self.state = State::ReadLine;
            }
            ResponseType::Unknown | ResponseType::Urc => unreachable!("handled above"),
        }
    }

    fn include_line(&mut self) {
        self.append(b'\n');
        self.current = self.used;
    }

    fn finalize(&mut self, sink: &mut impl LineSink, ok: bool) {
        let mut end = self.used;
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
        }
        sink.handle_response(&self.buf[..end], ok);
        self.reset();
    }

    fn current_line_matches_dataprompt(&self) -> bool {
        match &self.dataprompt {
            Some(prompt) => self.buf[self.current..self.used] == *prompt.as_bytes(),
            None => false,
        }
    }

    fn append(&mut self, byte: u8) {
        if self.used + 1 < N {
            self.buf[self.used] = byte;
            self.used += 1;
        }
    }
}

fn hex_nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        urcs: heapless::Vec<heapless::String<64>, 8>,
        responses: heapless::Vec<(heapless::Vec<u8, 64>, bool), 8>,
    }

    impl LineSink for RecordingSink {
        fn scan_line(&mut self, _line: &str) -> ResponseType {
            ResponseType::Unknown
        }

        fn handle_urc(&mut self, line: &str) {
            let _ = self.urcs.push(String::from_str(line).unwrap());
        }

        fn handle_response(&mut self, response: &[u8], ok: bool) {
            let mut v = heapless::Vec::new();
            let _ = v.extend_from_slice(response);
            let _ = self.responses.push((v, ok));
        }
    }

    #[test]
    fn simple_ok_yields_empty_body() {
        let mut parser = AtParser::<64>::new();
        let mut sink = RecordingSink::default();
        parser.await_response();
        parser.feed(b"OK\r\n", &mut sink);
        assert_eq!(sink.responses.len(), 1);
        assert_eq!(sink.responses[0].0.as_slice(), b"");
        assert!(sink.responses[0].1);
    }

    #[test]
    fn intermediate_then_ok_yields_body() {
        let mut parser = AtParser::<64>::new();
        let mut sink = RecordingSink::default();
        parser.await_response();
        parser.feed(b"+CEREG: 2,1\r\nOK\r\n", &mut sink);
        assert_eq!(sink.responses[0].0.as_slice(), b"+CEREG: 2,1");
    }

    #[test]
    fn final_error_line_is_retained_in_body() {
        let mut parser = AtParser::<64>::new();
        let mut sink = RecordingSink::default();
        parser.await_response();
        parser.feed(b"+CME ERROR: 10\r\n", &mut sink);
        assert_eq!(sink.responses[0].0.as_slice(), b"+CME ERROR: 10");
        assert!(!sink.responses[0].1);
    }

    #[test]
    fn urc_while_idle_is_not_a_response() {
        let mut parser = AtParser::<64>::new();
        let mut sink = RecordingSink::default();
        parser.feed(b"+QIURC: \"pdpdeact\",1\r\n", &mut sink);
        assert_eq!(sink.urcs.len(), 1);
        assert_eq!(sink.urcs[0].as_str(), "+QIURC: \"pdpdeact\",1");
        assert!(sink.responses.is_empty());
    }

    #[test]
    fn feed_is_chunk_size_invariant() {
        let mut whole = AtParser::<64>::new();
        let mut whole_sink = RecordingSink::default();
        whole.await_response();
        whole.feed(b"RING\r\n+CSQ: 15,99\r\nOK\r\n", &mut whole_sink);

        let mut split = AtParser::<64>::new();
        let mut split_sink = RecordingSink::default();
        split.await_response();
        for chunk in [b"RI".as_slice(), b"NG\r", b"\n+CSQ", b": 15,99\r\n", b"OK\r\n"] {
            split.feed(chunk, &mut split_sink);
        }

        assert_eq!(whole_sink.urcs, split_sink.urcs);
        assert_eq!(whole_sink.responses, split_sink.responses);
        assert_eq!(whole_sink.responses[0].0.as_slice(), b"+CSQ: 15,99");
    }

    #[test]
    fn hex_data_follows_decodes_payload() {
        struct HexSink;
        impl LineSink for HexSink {
            fn scan_line(&mut self, line: &str) -> ResponseType {
                if line.starts_with("+QIRD: ") {
                    ResponseType::HexDataFollows(4)
                } else {
                    ResponseType::Unknown
                }
            }
            fn handle_urc(&mut self, _line: &str) {}
            fn handle_response(&mut self, response: &[u8], ok: bool) {
                assert!(ok);
                assert!(response.ends_with(&[0xDE, 0xAD, 0xBE, 0xEF]));
            }
        }
        let mut parser = AtParser::<64>::new();
        let mut sink = HexSink;
        parser.await_response();
        parser.feed(b"+QIRD: 4,\r\nDEADBEEF\r\nOK\r\n", &mut sink);
    }

    #[test]
    fn hex_data_holds_half_nibble_across_feed_calls() {
        // "AB C" into a 2-byte field: AB completes the first byte, the space is ignored,
        // and C is held waiting for its pairing nibble (D, in the next feed() call).
        struct HexSink;
        impl LineSink for HexSink {
            fn scan_line(&mut self, line: &str) -> ResponseType {
                if line == "HDR" { ResponseType::HexDataFollows(2) } else { ResponseType::Unknown }
            }
            fn handle_urc(&mut self, _line: &str) {}
            fn handle_response(&mut self, response: &[u8], _ok: bool) {
                assert!(response.ends_with(&[0xAB, 0xCD]));
            }
        }
        let mut parser = AtParser::<64>::new();
        let mut sink = HexSink;
        parser.await_response();
        parser.feed(b"HDR\r\nAB C", &mut sink);
        parser.feed(b"D\r\nOK\r\n", &mut sink);
    }

    #[test]
    fn raw_data_follows_passes_opaque_bytes_through() {
        struct RawSink;
        impl LineSink for RawSink {
            fn scan_line(&mut self, line: &str) -> ResponseType {
                if line.starts_with("+BTSPPGET: ") {
                    ResponseType::RawDataFollows(3)
                } else {
                    ResponseType::Unknown
                }
            }
            fn handle_urc(&mut self, _line: &str) {}
            fn handle_response(&mut self, response: &[u8], _ok: bool) {
                assert!(response.ends_with(b"abc"));
            }
        }
        let mut parser = AtParser::<64>::new();
        let mut sink = RawSink;
        parser.await_response();
        parser.feed(b"+BTSPPGET: 3,\r\nabc\r\nOK\r\n", &mut sink);
    }

    #[test]
    fn dataprompt_completes_without_newline() {
        struct PromptSink;
        impl LineSink for PromptSink {
            fn scan_line(&mut self, _line: &str) -> ResponseType {
                ResponseType::Unknown
            }
            fn handle_urc(&mut self, _line: &str) {}
            fn handle_response(&mut self, response: &[u8], ok: bool) {
                assert!(ok);
                assert!(response.is_empty());
            }
        }
        let mut parser = AtParser::<64>::new();
        let mut sink = PromptSink;
        parser.expect_dataprompt("> ").unwrap();
        parser.await_response();
        parser.feed(b"> ", &mut sink);
    }

    #[test]
    fn overflow_clamps_silently_and_parser_stays_reusable_after_reset() {
        let mut parser = AtParser::<8>::new();
        let mut sink = RecordingSink::default();
        parser.await_response();
        // ten digits into a 7-usable-byte buffer: clamped, not reported as an error
        parser.feed(b"0123456789\r\n", &mut sink);
        assert!(sink.responses.is_empty());

        parser.reset();
        parser.await_response();
        parser.feed(b"OK\r\n", &mut sink);
        assert_eq!(sink.responses.len(), 1);
        assert_eq!(sink.responses[0].0.as_slice(), b"");
    }

    #[test]
    fn character_handler_clears_itself_at_separator() {
        fn stop_at_comma(ch: u8, _line: &mut [u8], _len: usize) -> (u8, bool) {
            if ch == b',' { (b'\n', true) } else { (ch, false) }
        }
        struct HeaderSink;
        impl LineSink for HeaderSink {
            fn scan_line(&mut self, line: &str) -> ResponseType {
                // comma is appended before the handler fires, so it's part of the line
                if line == "+HDR: 3," {
                    ResponseType::RawDataFollows(3)
                } else {
                    ResponseType::Unknown
                }
            }
            fn handle_urc(&mut self, _line: &str) {}
            fn handle_response(&mut self, response: &[u8], _ok: bool) {
                assert!(response.ends_with(b"xyz"));
            }
        }
        let mut parser = AtParser::<64>::new();
        let mut sink = HeaderSink;
        parser.await_response();
        parser.set_character_handler(Some(stop_at_comma));
        parser.feed(b"+HDR: 3,xyz\r\nOK\r\n", &mut sink);
    }

    #[test]
    fn timeout_like_reset_leaves_parser_reusable() {
        let mut parser = AtParser::<64>::new();
        let mut sink = RecordingSink::default();
        parser.await_response();
        parser.feed(b"+CSQ: 1", &mut sink);
        parser.reset();
        parser.await_response();
        parser.feed(b"OK\r\n", &mut sink);
        assert_eq!(sink.responses.len(), 1);
        assert_eq!(sink.responses[0].0.as_slice(), b"");
    }
}
