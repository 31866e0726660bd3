//! Unified error types for the cart reader.
//!
//! A single `Error` enum that every subsystem converts into, with small
//! `Copy` variants so errors pass through the session driver and the
//! scheduler without allocation.  Only construction-time errors
//! ([`ConfigError`]) ever reach the caller; the rest are absorbed as
//! state-machine transitions.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Register access on the two-wire bus failed.
    Transport(TransportError),
    /// A tag was present but could not be singled out.
    Selection(SelectionError),
    /// Tag memory could not be decoded.
    Payload(PayloadError),
    /// Configuration rejected at construction.
    Config(ConfigError),
    /// Persistent storage failed.
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Selection(e) => write!(f, "selection: {e}"),
            Self::Payload(e) => write!(f, "payload: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Bus-level failures.  Recoverable: the next tick retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The chip did not acknowledge its address or a data byte.
    Nack,
    /// Arbitration loss, bus timeout or any other bus fault.
    Bus,
    /// Register address outside the register map.
    InvalidRegister(u8),
    /// FIFO transfer longer than the chip FIFO.
    Length,
    /// Register access attempted before a successful probe.
    NotInitialised,
    /// The device answered but does not identify as an ST25R3918.
    NotFound,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => write!(f, "bus NACK"),
            Self::Bus => write!(f, "bus fault or timeout"),
            Self::InvalidRegister(reg) => write!(f, "invalid register 0x{reg:02X}"),
            Self::Length => write!(f, "FIFO length exceeded"),
            Self::NotInitialised => write!(f, "bus not initialised"),
            Self::NotFound => write!(f, "ST25R3918 not found"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Selection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    /// Still colliding after the maximum number of anti-collision attempts.
    Timeout,
    /// No tag answered the inventory request.
    NoResponse,
    /// The tag answered the select command with an error.
    Rejected,
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "selection timeout"),
            Self::NoResponse => write!(f, "no tag response"),
            Self::Rejected => write!(f, "select rejected"),
        }
    }
}

impl From<SelectionError> for Error {
    fn from(e: SelectionError) -> Self {
        Self::Selection(e)
    }
}

// ---------------------------------------------------------------------------
// Payload errors
// ---------------------------------------------------------------------------

/// Non-fatal: a bad payload yields empty fields, presence is still reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    Empty,
    Malformed,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty payload"),
            Self::Malformed => write!(f, "malformed payload"),
        }
    }
}

impl From<PayloadError> for Error {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Invalid pin, bus or cart configuration.  Fatal at initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation.  The message names the field.
    ValidationFailed(&'static str),
    /// More carts configured than the registry can hold.
    TooManyCarts,
    /// The same cart id appears twice.
    DuplicateCart,
    /// A cart id or name does not fit its fixed-size buffer.
    FieldTooLong(&'static str),
    /// A stored or supplied config blob could not be parsed.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::TooManyCarts => write!(f, "too many carts"),
            Self::DuplicateCart => write!(f, "duplicate cart id"),
            Self::FieldTooLong(field) => write!(f, "{field} too long"),
            Self::Corrupted => write!(f, "config corrupted"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from [`StoragePort`](crate::app::ports::StoragePort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored blob failed to decode.
    Corrupted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
