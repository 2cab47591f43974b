//! User-visible error kinds.
//!
//! Every failure a continuation or blocking wrapper can report is one of
//! these. Layer-internal reception and transmission problems have their own
//! enums in the crate root and never reach the user directly; a request that
//! dies to a dropped frame simply times out.

use std::io;

/// Errors delivered through continuations and synchronous wrappers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied parameter out of range (node ID, channel, mode,
    /// name or value length).
    #[error("invalid argument")]
    InvalidArgument,

    /// Deadline reached before a matching response arrived.
    #[error("request timed out")]
    Timeout,

    /// Response payload violates the wire schema.
    #[error("protocol violation in response")]
    Protocol,

    /// Register access answered with the empty tag: no such register.
    #[error("register not present on node")]
    NotFound,

    /// Write-verify readback differed from the value written.
    #[error("readback does not match written value")]
    Mismatch,

    /// Response carried a register variant the caller cannot use.
    #[error("unexpected register variant")]
    NotSupported,

    /// No room to register another outstanding request.
    #[error("request records exhausted")]
    OutOfMemory,

    /// Socket or platform failure during setup or shutdown.
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
