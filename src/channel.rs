//! Single-outstanding-command arbitration on top of [`crate::parser::AtParser`].
//!
//! [`AtChannel`] owns the parser, the shared response buffer and the command-in-flight slot.
//! Its public API is synchronous from the caller's perspective (`command`, `send`,
//! `send_hex`, `command_raw` all resolve to a finished outcome or an error) while
//! [`AtChannel::feed`] is the synchronous entry point fed bytes from the serial RX path.
//!
//! Two different locks guard two different things, deliberately kept apart:
//! - `inflight`, an async mutex held for the duration of one command (or one multi-part
//!   [`CommandSession`]), serializes concurrent callers so at most one command is ever
//!   outstanding.
//! - `shared`, a [`embassy_sync::blocking_mutex::Mutex`] guarding the parser and driver state
//!   that [`AtChannel::feed`] touches, lockable from a non-async context (a serial RX task or
//!   interrupt bottom half).
//!
//! [`Tx::write`] is synchronous for the same reason: a driver reacting to a URC from inside
//! `feed` (SIM800's auto-accept of an incoming Bluetooth pairing request is the textbook case)
//! must be able to write without awaiting anything, since `feed` itself cannot await while
//! holding `shared`.

use core::cell::RefCell;

#[cfg(feature = "defmt")]
use defmt::{debug, warn};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, WithTimeout};
#[cfg(not(feature = "defmt"))]
use log::{debug, warn};

use crate::RawMutex;
use crate::driver::{CommandScannerFn, ModemDriver, UrcWriter};
use crate::error::Error;
use crate::parser::{AtParser, LineSink};
use crate::response::{ResponseBody, ResponseType};

/// Used whenever [`AtChannel::set_timeout`] hasn't overridden the next command's deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The write side of the transport a channel drives. Synchronous: see the module docs for why.
pub trait Tx {
    fn write(&self, buffer: &[u8]) -> crate::Result<()>;
}

/// The outcome of a command that reached a terminal classification or timed out.
///
/// The modem-error body is kept rather than discarded: callers parsing `+CME ERROR:`/
/// `+CMS ERROR:` codes need the text that preceded the final line.
#[derive(Debug)]
pub enum CommandError<const N: usize> {
    /// No terminal line arrived before the deadline.
    Timeout,
    /// The command was classified `Final`; the accumulated body (if any) is attached.
    Modem(ResponseBody<N>),
    /// The transport rejected the outbound write.
    Io(Error),
}

pub type CommandResult<const N: usize> = core::result::Result<ResponseBody<N>, CommandError<N>>;

enum Outcome<const N: usize> {
    Ok(ResponseBody<N>),
    Modem(ResponseBody<N>),
}

struct Inner<D, const N: usize> {
    parser: AtParser<N>,
    driver: D,
    /// Per-command override of `driver.scan_line`, cleared once the command completes.
    command_scanner: Option<CommandScannerFn>,
    /// Set by `set_timeout`, consumed by the next command.
    next_timeout: Option<Duration>,
}

/// Single-outstanding-command AT channel over transport `T`, steered by driver `D`, with a
/// response buffer of `N` bytes.
pub struct AtChannel<D, T, const N: usize> {
    shared: BlockingMutex<RawMutex, RefCell<Inner<D, N>>>,
    signal: Signal<RawMutex, Outcome<N>>,
    inflight: AsyncMutex<RawMutex, ()>,
    tx: T,
}

impl<D, T, const N: usize> AtChannel<D, T, N> {
    pub fn new(tx: T, driver: D) -> Self {
        Self {
            shared: BlockingMutex::new(RefCell::new(Inner {
                parser: AtParser::new(),
                driver,
                command_scanner: None,
                next_timeout: None,
            })),
            signal: Signal::new(),
            inflight: AsyncMutex::new(()),
            tx,
        }
    }

    /// Overrides the timeout for the *next* command only.
    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.lock(|cell| cell.borrow_mut().next_timeout = Some(timeout));
    }

    /// Arms a dataprompt for the next command's `await_response`.
    pub fn expect_dataprompt(&self, prompt: &str) -> crate::Result<()> {
        self.shared.lock(|cell| cell.borrow_mut().parser.expect_dataprompt(prompt))
    }

    /// Overrides `scan_line` for exactly the next command; cleared automatically when it
    /// completes.
    pub fn set_command_scanner(&self, scanner: CommandScannerFn) {
        self.shared.lock(|cell| cell.borrow_mut().command_scanner = Some(scanner));
    }

    /// The transport this channel writes through, for drivers or tests that need to inspect
    /// or share it directly.
    pub fn tx(&self) -> &T {
        &self.tx
    }

    fn take_timeout(&self) -> Duration {
        self.shared
            .lock(|cell| cell.borrow_mut().next_timeout.take())
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl<D: ModemDriver, T: Tx, const N: usize> AtChannel<D, T, N> {
    /// Delivers bytes received from the modem. Must be called from a single context (the
    /// serial RX path); see the module docs.
    pub fn feed(&self, bytes: &[u8]) {
        self.shared.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let inner = &mut *guard;
            let mut sink = ChannelSink {
                command_scanner: &mut inner.command_scanner,
                driver: &mut inner.driver,
                tx: &self.tx,
                signal: &self.signal,
            };
            inner.parser.feed(bytes, &mut sink);
        });
    }

    /// Opens a scoped session that serializes a multi-part exchange (`send`/`send_hex`
    /// followed by a terminating `command`) against every other caller.
    pub async fn begin(&self) -> CommandSession<'_, D, T, N> {
        let guard = self.inflight.lock().await;
        CommandSession { channel: self, _guard: guard }
    }

    /// Sends a text command terminated by `\r` and waits for the accumulated response.
    pub async fn command(&self, cmd: &str) -> CommandResult<N> {
        self.begin().await.command(cmd).await
    }

    /// Transmits text without a terminating `\r`, for the leading parts of a multi-part
    /// command. Prefer [`AtChannel::begin`] if a concurrent caller must not interleave.
    pub async fn send(&self, text: &str) -> crate::Result<()> {
        self.begin().await.send(text).await
    }

    /// Transmits `bytes` as uppercase hex ASCII, two characters per byte, no separators.
    pub async fn send_hex(&self, bytes: &[u8]) -> crate::Result<()> {
        self.begin().await.send_hex(bytes).await
    }

    /// Writes a raw payload body (after a dataprompt-armed command has seen its prompt) and
    /// waits for the accumulated response, the same as [`AtChannel::command`].
    pub async fn command_raw(&self, bytes: &[u8]) -> CommandResult<N> {
        self.begin().await.command_raw(bytes).await
    }

    async fn issue_command(&self, cmd: &str) -> CommandResult<N> {
        let timeout = self.take_timeout();
        self.signal.reset();
        self.shared.lock(|cell| cell.borrow_mut().parser.await_response());
        if let Err(err) = write_line(&self.tx, cmd) {
            self.shared.lock(|cell| cell.borrow_mut().parser.reset());
            return Err(CommandError::Io(err));
        }
        self.wait_for_outcome(cmd, timeout).await
    }

    async fn issue_raw(&self, bytes: &[u8]) -> CommandResult<N> {
        let timeout = self.take_timeout();
        self.signal.reset();
        self.shared.lock(|cell| cell.borrow_mut().parser.await_response());
        if let Err(err) = self.tx.write(bytes) {
            self.shared.lock(|cell| cell.borrow_mut().parser.reset());
            return Err(CommandError::Io(err));
        }
        self.wait_for_outcome("<raw payload>", timeout).await
    }

    async fn wait_for_outcome(&self, cmd: &str, timeout: Duration) -> CommandResult<N> {
        let start = Instant::now();
        match self.signal.wait().with_timeout(timeout).await {
            Ok(Outcome::Ok(body)) => {
                debug!("{}: {} byte response, took {}ms", cmd, body.len(), (Instant::now() - start).as_millis());
                Ok(body)
            }
            Ok(Outcome::Modem(body)) => {
                warn!("{}: modem reported error, took {}ms", cmd, (Instant::now() - start).as_millis());
                Err(CommandError::Modem(body))
            }
            Err(_) => {
                // No terminal line arrived in time. The link is presumed still usable: reset
                // the parser so bytes belonging to the dead command are treated as URCs.
                warn!("{}: timed out after {}ms", cmd, timeout.as_millis());
                self.shared.lock(|cell| {
                    let mut inner = cell.borrow_mut();
                    inner.parser.reset();
                    inner.command_scanner = None;
                });
                Err(CommandError::Timeout)
            }
        }
    }
}

/// A held [`AtChannel::inflight`] lock, guaranteeing no other caller's command interleaves
/// with this one. Returned by [`AtChannel::begin`].
pub struct CommandSession<'a, D, T, const N: usize> {
    channel: &'a AtChannel<D, T, N>,
    _guard: embassy_sync::mutex::MutexGuard<'a, RawMutex, ()>,
}

impl<'a, D: ModemDriver, T: Tx, const N: usize> CommandSession<'a, D, T, N> {
    pub fn set_timeout(&self, timeout: Duration) {
        self.channel.set_timeout(timeout);
    }

    pub fn expect_dataprompt(&self, prompt: &str) -> crate::Result<()> {
        self.channel.expect_dataprompt(prompt)
    }

    pub fn set_command_scanner(&self, scanner: CommandScannerFn) {
        self.channel.set_command_scanner(scanner);
    }

    pub async fn command(&self, cmd: &str) -> CommandResult<N> {
        self.channel.issue_command(cmd).await
    }

    pub async fn send(&self, text: &str) -> crate::Result<()> {
        self.channel.tx.write(text.as_bytes())
    }

    pub async fn send_hex(&self, bytes: &[u8]) -> crate::Result<()> {
        for &byte in bytes {
            let chars = [hex_upper(byte >> 4), hex_upper(byte & 0x0F)];
            self.channel.tx.write(&chars)?;
        }
        Ok(())
    }

    pub async fn command_raw(&self, bytes: &[u8]) -> CommandResult<N> {
        self.channel.issue_raw(bytes).await
    }
}

fn write_line(tx: &impl Tx, text: &str) -> crate::Result<()> {
    tx.write(text.as_bytes())?;
    tx.write(b"\r")
}

fn hex_upper(nibble: u8) -> u8 {
    if nibble < 10 { b'0' + nibble } else { b'A' + (nibble - 10) }
}

struct TxUrcWriter<'a, T> {
    tx: &'a T,
}

impl<'a, T: Tx> UrcWriter for TxUrcWriter<'a, T> {
    fn send(&mut self, line: &str) {
        let _ = write_line(self.tx, line);
    }
}

/// Bridges [`crate::parser::LineSink`] to a channel's driver and per-command scanner override.
struct ChannelSink<'a, D, T, const N: usize> {
    command_scanner: &'a mut Option<CommandScannerFn>,
    driver: &'a mut D,
    tx: &'a T,
    signal: &'a Signal<RawMutex, Outcome<N>>,
}

impl<'a, D: ModemDriver, T: Tx, const N: usize> LineSink for ChannelSink<'a, D, T, N> {
    fn scan_line(&mut self, line: &str) -> ResponseType {
        if let Some(scanner) = *self.command_scanner {
            let ty = scanner(line);
            if !matches!(ty, ResponseType::Unknown) {
                return ty;
            }
        }
        self.driver.scan_line(line)
    }

    fn handle_urc(&mut self, line: &str) {
        let mut writer = TxUrcWriter { tx: self.tx };
        self.driver.handle_urc(line, &mut writer);
    }

    fn handle_response(&mut self, response: &[u8], ok: bool) {
        *self.command_scanner = None;
        let body = ResponseBody::from_slice(response);
        self.signal.signal(if ok { Outcome::Ok(body) } else { Outcome::Modem(body) });
    }
}
