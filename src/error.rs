//! Error types for the synchronized transport engine
//!
//! Per-session failures (malformed input, unrecoverable groups, clock desync,
//! unreachable endpoints) are absorbed by the session that hit them and only
//! show up in its status. Only [`SchedulerError`] is surfaced to the upstream
//! producer.

use thiserror::Error;

use crate::session::{SessionEvent, SessionState};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire parse failures. Every variant is a flavour of "malformed": the
/// datagram is dropped and the session carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed unit: truncated (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    #[error("malformed unit: declared length {declared} but {actual} bytes follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("malformed unit: unsupported version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed unit: unknown kind {0}")]
    UnknownKind(u8),

    #[error("malformed unit: unknown control kind {0}")]
    UnknownControl(u8),

    #[error("malformed unit: invalid field {0}")]
    InvalidField(&'static str),

    #[error("malformed control arguments: {0}")]
    ControlArgs(String),

    #[error("unit too large: {0} bytes")]
    TooLarge(usize),
}

/// Forward error correction failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("unrecoverable group: {received} of {required} units required")]
    Unrecoverable { received: usize, required: usize },

    #[error("invalid group shape: {0}")]
    InvalidGroup(String),

    #[error("inconsistent shard lengths")]
    InconsistentShards,
}

/// Clock model failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("negative round-trip delay: {0}us")]
    NegativeDelay(i64),

    #[error("local timestamps out of order")]
    OutOfOrder,
}

/// Per-session failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("clock desynchronized")]
    ClockDesync,

    #[error("endpoint unreachable")]
    Unreachable,

    #[error("session not accepting frames in state {0:?}")]
    NotAccepting(SessionState),

    #[error("invalid transition: {event:?} in state {from:?}")]
    InvalidTransition { from: SessionState, event: SessionEvent },

    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("session command queue full")]
    Backlogged,

    #[error("session closed")]
    Closed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send would block, datagram dropped")]
    WouldBlock,

    #[error("Datagram too large: {0} bytes")]
    DatagramTooLarge(usize),
}

/// Controller-wide failures, the only ones returned to the upstream producer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid frame from upstream: {0}")]
    InvalidFrame(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session already registered: {0}")]
    AlreadyRegistered(String),

    #[error("scheduler is shut down")]
    ShutDown,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
