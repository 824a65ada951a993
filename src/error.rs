//! Error taxonomy for the parser and command channel.
//!
//! The parser itself never reports errors upward (see [`crate::parser`]); everything here is
//! owned and raised by [`crate::channel::AtChannel`].

use thiserror::Error;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// No terminal line (`FinalOk`/`Final`) arrived before the command's deadline.
    #[error("command timed out")]
    Timeout,
    /// A fixed-capacity buffer (formatted command line, dataprompt, response copy) would have
    /// overflowed.
    #[error("buffer too small")]
    BufferTooSmall,
    /// The transport rejected or failed to accept outgoing bytes.
    #[error("uart write failed")]
    WriteError,
    /// Bytes accumulated by the parser were not valid UTF-8 where a `str` was required.
    #[error("invalid utf-8 from modem")]
    Utf8Error,
}
