#![no_std]
//! Core of an AT-command protocol engine for driving cellular/Bluetooth modems over a
//! half-duplex serial link.
//!
//! The crate is split into the two layers that do the hard work, plus the adapter surface
//! a modem-family driver plugs into:
//!
//! - [`parser`] — a byte-in/event-out state machine that accumulates `\r\n`-terminated lines
//!   and in-band binary payloads (raw or hex-encoded) out of a raw byte stream.
//! - [`channel`] — single-outstanding-command arbitration built on top of the parser: issue a
//!   command, get back the accumulated response or a timeout/modem-error.
//! - [`driver`] — the callback traits a modem-family driver (NB-IoT, 2G/BT, ...) implements to
//!   steer line classification, unsolicited notifications and per-byte transforms.
//!
//! What a driver does with this (attach to the network, open a PDP context, connect/send/recv
//! on a socket) is out of scope here; this crate only ships the plumbing those drivers are
//! built on.

pub mod channel;
pub mod driver;
pub mod error;
pub mod parser;
pub mod response;

pub use error::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(all(target_abi = "eabihf", target_os = "none"))]
pub(crate) type RawMutex = embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
#[cfg(not(all(target_abi = "eabihf", target_os = "none")))]
pub(crate) type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
