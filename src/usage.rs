//! Per-cart usage accounting.
//!
//! [`UsageLedger`] maps a usage key (cart id, or UID hex for tags without
//! one) to accumulated milliseconds of use.  [`UsageTracker`] wraps it with
//! the heater gate, the active key and the save schedule, and persists the
//! ledger through a [`StoragePort`] as a postcard blob.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::ReaderConfig;
use crate::fsm::context::UsageKey;

/// Distinct carts remembered by the ledger (power of two).
pub const LEDGER_CAPACITY: usize = 32;

const STORAGE_NAMESPACE: &str = "cart_usage";
const STORAGE_KEY: &str = "ledger";
/// Encoded ledger never exceeds this.
const MAX_LEDGER_BLOB: usize = 2048;

const MS_PER_HOUR: f32 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerEntry {
    key: UsageKey,
    usage_ms: u64,
}

type LedgerBlob = heapless::Vec<LedgerEntry, LEDGER_CAPACITY>;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageLedger {
    entries: heapless::FnvIndexMap<UsageKey, u64, LEDGER_CAPACITY>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `ms` to `key`.  Saturates; returns `false` if the ledger is full
    /// and `key` is new.
    pub fn add(&mut self, key: &UsageKey, ms: u64) -> bool {
        if let Some(total) = self.entries.get_mut(key) {
            *total = total.saturating_add(ms);
            return true;
        }
        self.entries.insert(key.clone(), ms).is_ok()
    }

    pub fn usage_ms(&self, key: &str) -> u64 {
        let mut k = UsageKey::new();
        if k.push_str(key).is_err() {
            return 0;
        }
        self.entries.get(&k).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let blob: LedgerBlob = self
            .entries
            .iter()
            .map(|(key, usage_ms)| LedgerEntry {
                key: key.clone(),
                usage_ms: *usage_ms,
            })
            .collect();
        postcard::to_allocvec(&blob).map_err(|_| StorageError::Corrupted)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        let blob: LedgerBlob = postcard::from_bytes(bytes).map_err(|_| StorageError::Corrupted)?;
        let mut ledger = Self::new();
        for entry in blob {
            ledger.add(&entry.key, entry.usage_ms);
        }
        Ok(ledger)
    }
}

/// `100 - usage/capacity * 100`, clamped to `[0, 100]`.
pub fn remaining_percent(usage_ms: u64, capacity_ms: u64) -> f32 {
    if capacity_ms == 0 {
        return 0.0;
    }
    let used = usage_ms as f64 / capacity_ms as f64 * 100.0;
    (100.0 - used).clamp(0.0, 100.0) as f32
}

pub fn hours(usage_ms: u64) -> f32 {
    usage_ms as f32 / MS_PER_HOUR
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct UsageTracker {
    ledger: UsageLedger,
    capacity_ms: u64,
    save_interval_ms: u64,
    gate_on_heater: bool,
    heating: bool,
    active: Option<UsageKey>,
    /// Usage added since the last save.
    dirty: bool,
    last_save_ms: u64,
}

impl UsageTracker {
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            ledger: UsageLedger::new(),
            capacity_ms: config.capacity_ms(),
            save_interval_ms: u64::from(config.usage_save_interval_secs) * 1000,
            gate_on_heater: config.gate_usage_on_heater,
            heating: false,
            active: None,
            dirty: false,
            last_save_ms: 0,
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn active(&self) -> Option<&UsageKey> {
        self.active.as_ref()
    }

    /// Accumulation allowed right now.
    pub fn gate_open(&self) -> bool {
        !self.gate_on_heater || self.heating
    }

    /// Add `elapsed_ms` to the active cart if the gate is open.
    pub fn accumulate(&mut self, elapsed_ms: u64) -> bool {
        if elapsed_ms == 0 || !self.gate_open() {
            return false;
        }
        let Some(key) = self.active.as_ref() else {
            return false;
        };
        if !self.ledger.add(key, elapsed_ms) {
            warn!("usage: ledger full, '{key}' not tracked");
            return false;
        }
        self.dirty = true;
        true
    }

    /// Switch the active cart.  Returns `true` when unsaved usage of the
    /// previous cart should be written now.
    pub fn set_active(&mut self, key: Option<UsageKey>) -> bool {
        if self.active == key {
            return false;
        }
        debug!("usage: active cart {:?} -> {:?}", self.active, key);
        self.active = key;
        self.dirty
    }

    /// Heater state from the host.  Returns `true` on a falling edge with
    /// unsaved usage.
    pub fn set_heating(&mut self, on: bool) -> bool {
        let falling = self.heating && !on;
        self.heating = on;
        falling && self.dirty
    }

    pub fn save_due(&self, now_ms: u64) -> bool {
        self.dirty && now_ms.saturating_sub(self.last_save_ms) >= self.save_interval_ms
    }

    pub fn active_usage_ms(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |key| self.ledger.usage_ms(key))
    }

    pub fn remaining_percent(&self, usage_ms: u64) -> f32 {
        remaining_percent(usage_ms, self.capacity_ms)
    }

    /// Load the ledger.  A missing blob starts an empty ledger.
    pub fn load(&mut self, store: &dyn StoragePort) -> Result<usize, StorageError> {
        let mut buf = [0u8; MAX_LEDGER_BLOB];
        match store.read(STORAGE_NAMESPACE, STORAGE_KEY, &mut buf) {
            Ok(len) => {
                self.ledger = UsageLedger::decode(&buf[..len])?;
                info!("usage: loaded {} carts", self.ledger.len());
                Ok(self.ledger.len())
            }
            Err(StorageError::NotFound) => {
                info!("usage: no stored ledger");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Write the ledger and reset the save timer.
    pub fn save(&mut self, store: &mut dyn StoragePort, now_ms: u64) -> Result<(), StorageError> {
        let bytes = self.ledger.encode()?;
        if bytes.len() > MAX_LEDGER_BLOB {
            return Err(StorageError::Full);
        }
        store.write(STORAGE_NAMESPACE, STORAGE_KEY, &bytes)?;
        self.dirty = false;
        self.last_save_ms = now_ms;
        debug!("usage: saved {} carts ({} bytes)", self.ledger.len(), bytes.len());
        Ok(())
    }
}
