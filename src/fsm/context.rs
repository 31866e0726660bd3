//! Shared mutable context threaded through every FSM handler.
//!
//! `SessionContext` is the blackboard between the session driver and the
//! state handlers.  The driver writes interrupt flags and the results of
//! the bus exchanges it performed; handlers read them, decide the next
//! state and leave requests (field on/off, read wanted) for the driver.

use crate::config::{CartId, CartName};
use crate::error::SelectionError;
use crate::irq::{InterruptFlag, InterruptFlags};
use crate::payload::{CartPayload, CartUrl, Layout};
use crate::registry::CartRegistry;
use crate::rfid::Uid;

/// Unanswered memory reads before the payload is given up as blank.
pub const MAX_READ_ATTEMPTS: u8 = 3;

/// Usage ledger key: the cart id.
pub type UsageKey = CartId;

// ---------------------------------------------------------------------------
// Tag session
// ---------------------------------------------------------------------------

/// The one tag currently being handled.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSession {
    pub uid: Uid,
    /// Selected and answering.
    pub present: bool,
    pub cart_id: CartId,
    pub cart_url: CartUrl,
    /// Registry name if the cart id is configured, else the tag's own.
    pub fragrance: CartName,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub payload_cached: bool,
}

impl TagSession {
    pub fn new(uid: Uid, now_ms: u64) -> Self {
        Self {
            uid,
            present: false,
            cart_id: CartId::new(),
            cart_url: CartUrl::new(),
            fragrance: CartName::new(),
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            payload_cached: false,
        }
    }

    pub fn layout(&self) -> Layout {
        if self.uid.is_st_cart() {
            Layout::Ndef
        } else {
            Layout::Fixed
        }
    }

    /// Ledger key for this tag.  Tags without a cart id are not tracked.
    pub fn usage_key(&self) -> Option<UsageKey> {
        (!self.cart_id.is_empty()).then(|| self.cart_id.clone())
    }
}

/// Result of the memory read the driver performed in `Reading`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Memory(CartPayload),
    /// No block answered.
    NoAnswer,
}

// ---------------------------------------------------------------------------
// Requests to the driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfCommands {
    /// RF field on for communication; off means wake-up detection.
    pub field_on: bool,
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

pub struct SessionContext {
    // -- Timing --
    /// Timestamp of the current tick (ms).
    pub now_ms: u64,
    /// When the current detection attempt began (ms).
    pub selection_started_ms: u64,

    // -- Configuration --
    pub selection_timeout_ms: u32,
    pub registry: CartRegistry,

    // -- Inputs (written by the driver) --
    pub flags: InterruptFlags,
    pub inventory: Option<Result<Uid, SelectionError>>,
    pub selected: Option<bool>,
    pub read: Option<ReadOutcome>,
    /// Recovery probe result while in `Error`.
    pub chip_ok: Option<bool>,

    // -- Requests and state --
    pub read_requested: bool,
    pub read_failures: u8,
    pub read_retry_at_ms: u64,
    /// Look for a tag once even without a wake-up interrupt.
    pub recheck_field: bool,
    pub commands: RfCommands,
    pub session: Option<TagSession>,
    pub last_selection_error: Option<SelectionError>,
}

impl SessionContext {
    pub fn new(selection_timeout_ms: u32, registry: CartRegistry) -> Self {
        Self {
            now_ms: 0,
            selection_started_ms: 0,
            selection_timeout_ms,
            registry,
            flags: InterruptFlags::empty(),
            inventory: None,
            selected: None,
            read: None,
            chip_ok: None,
            read_requested: false,
            read_failures: 0,
            read_retry_at_ms: 0,
            recheck_field: false,
            commands: RfCommands::default(),
            session: None,
            last_selection_error: None,
        }
    }

    pub fn has(&self, flag: InterruptFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn selection_expired(&self) -> bool {
        self.now_ms.saturating_sub(self.selection_started_ms)
            >= u64::from(self.selection_timeout_ms)
    }

    /// Store a decoded payload in the session, resolving the display name.
    pub fn apply_payload(&mut self, payload: CartPayload) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let name = self
            .registry
            .lookup(&payload.cart_id)
            .unwrap_or(payload.fragrance.as_str());
        session.fragrance.clear();
        let _ = session.fragrance.push_str(name);
        session.cart_id = payload.cart_id;
        session.cart_url = payload.cart_url;
        session.payload_cached = true;
    }
}
