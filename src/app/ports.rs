//! Port traits: the boundary between the reader core and its host.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ CartReader (domain)
//! ```
//!
//! Storage, event sinks, the clock and configuration persistence are
//! implemented by adapters; [`CartReader`](crate::scheduler::CartReader)
//! consumes them via generics so the core never touches ESP-IDF directly.

use crate::config::ReaderConfig;
pub use crate::error::{ConfigError, StorageError};

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.  Never goes backwards.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The reader emits structured [`ReaderEvent`](super::events::ReaderEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::ReaderEvent);
}

// ───────────────────────────────────────────────────────────────
// State sink port (domain → host entities)
// ───────────────────────────────────────────────────────────────

/// One published value (binary sensor, numeric sensor, text sensor).
pub trait StateSink<T: ?Sized> {
    fn publish(&mut self, value: &T);
}

impl<T: ?Sized, F: FnMut(&T)> StateSink<T> for F {
    fn publish(&mut self, value: &T) {
        self(value);
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the reader configuration.
///
/// Implementations MUST validate before persisting.  Invalid values are
/// rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Returns [`ReaderConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<ReaderConfig, ConfigError>;

    fn save(&self, config: &ReaderConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent namespaced key-value storage.
///
/// Write operations MUST be atomic; the ESP-IDF NVS API guarantees this
/// natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}
