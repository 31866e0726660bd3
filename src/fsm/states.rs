//! Concrete state handler functions and table builder.
//!
//! ```text
//!  IDLE ──[TagDetected]──▶ DETECTING ──[unique UID]──▶ SELECTING
//!    ▲                        │                          │
//!    │        [no tag / 3 collisions / timeout]   [selected]
//!    │◀───────────────────────┘                          ▼
//!    │                                  READING ◀──[read]── ACTIVE
//!    │                                     └──[payload]──▶ │
//!    └──────────────[TagRemoved]───────────────────────────┘
//!
//!  Any state ──[Error]──▶ ERROR ──[chip answers]──▶ IDLE
//! ```

use log::{debug, info, warn};

use super::context::{MAX_READ_ATTEMPTS, ReadOutcome, SessionContext, TagSession};
use super::{StateDescriptor, StateId};
use crate::error::SelectionError;
use crate::irq::InterruptFlag;
use crate::payload::CartPayload;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Detecting
        StateDescriptor {
            id: StateId::Detecting,
            name: "Detecting",
            on_enter: Some(detecting_enter),
            on_exit: None,
            on_update: detecting_update,
        },
        // Index 2: Selecting
        StateDescriptor {
            id: StateId::Selecting,
            name: "Selecting",
            on_enter: Some(selecting_enter),
            on_exit: None,
            on_update: selecting_update,
        },
        // Index 3: Active
        StateDescriptor {
            id: StateId::Active,
            name: "Active",
            on_enter: Some(active_enter),
            on_exit: None,
            on_update: active_update,
        },
        // Index 4: Reading
        StateDescriptor {
            id: StateId::Reading,
            name: "Reading",
            on_enter: Some(reading_enter),
            on_exit: None,
            on_update: reading_update,
        },
        // Index 5: Error
        StateDescriptor {
            id: StateId::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: Some(error_exit),
            on_update: error_update,
        },
    ]
}

/// Checks shared by every state that may hold a tag.
fn common_guards(ctx: &SessionContext) -> Option<StateId> {
    if ctx.has(InterruptFlag::Error) {
        return Some(StateId::Error);
    }
    if ctx.has(InterruptFlag::TagRemoved) {
        return Some(StateId::Idle);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state: field off, chip in wake-up detection
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut SessionContext) {
    if let Some(s) = ctx.session.take() {
        info!("IDLE: tag {} gone", s.uid);
    }
    ctx.commands.field_on = false;
    ctx.read_requested = false;
    ctx.read_failures = 0;
}

fn idle_update(ctx: &mut SessionContext) -> Option<StateId> {
    if ctx.has(InterruptFlag::Error) {
        return Some(StateId::Error);
    }

    let woke = ctx.has(InterruptFlag::TagDetected);
    let recheck = core::mem::take(&mut ctx.recheck_field);
    if woke && ctx.has(InterruptFlag::TagRemoved) {
        debug!("IDLE: tag bounced in and out within one poll");
        return None;
    }
    if woke || recheck {
        return Some(StateId::Detecting);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  DETECTING state: anti-collision in progress
// ═══════════════════════════════════════════════════════════════════════════

fn detecting_enter(ctx: &mut SessionContext) {
    ctx.commands.field_on = true;
    ctx.inventory = None;
    ctx.selection_started_ms = ctx.now_ms;
}

fn detecting_update(ctx: &mut SessionContext) -> Option<StateId> {
    if let Some(next) = common_guards(ctx) {
        return Some(next);
    }

    match ctx.inventory.take() {
        Some(Ok(uid)) => {
            info!("DETECTING: tag {uid}");
            ctx.session = Some(TagSession::new(uid, ctx.now_ms));
            ctx.last_selection_error = None;
            Some(StateId::Selecting)
        }
        Some(Err(e)) => {
            if e == SelectionError::NoResponse {
                debug!("DETECTING: {e}");
            } else {
                warn!("DETECTING: {e}");
            }
            ctx.last_selection_error = Some(e);
            Some(StateId::Idle)
        }
        None if ctx.selection_expired() => {
            warn!("DETECTING: no UID within {} ms", ctx.selection_timeout_ms);
            ctx.last_selection_error = Some(SelectionError::Timeout);
            Some(StateId::Idle)
        }
        None => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  SELECTING state: addressing the UID found by inventory
// ═══════════════════════════════════════════════════════════════════════════

fn selecting_enter(ctx: &mut SessionContext) {
    ctx.selected = None;
}

fn selecting_update(ctx: &mut SessionContext) -> Option<StateId> {
    if let Some(next) = common_guards(ctx) {
        return Some(next);
    }
    if ctx.session.is_none() {
        return Some(StateId::Idle);
    }

    match ctx.selected.take() {
        Some(true) => Some(StateId::Active),
        Some(false) => {
            warn!("SELECTING: {}", SelectionError::Rejected);
            ctx.last_selection_error = Some(SelectionError::Rejected);
            Some(StateId::Idle)
        }
        None if ctx.selection_expired() => {
            warn!("SELECTING: no answer within {} ms", ctx.selection_timeout_ms);
            ctx.last_selection_error = Some(SelectionError::Timeout);
            Some(StateId::Idle)
        }
        None => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ACTIVE state: tag selected and answering
// ═══════════════════════════════════════════════════════════════════════════

fn active_enter(ctx: &mut SessionContext) {
    let now = ctx.now_ms;
    if let Some(s) = ctx.session.as_mut() {
        if !s.present {
            info!("ACTIVE: tag {} selected", s.uid);
        }
        s.present = true;
        s.last_seen_ms = now;
        if !s.payload_cached {
            ctx.read_requested = true;
        }
    }
}

fn active_update(ctx: &mut SessionContext) -> Option<StateId> {
    if let Some(next) = common_guards(ctx) {
        return Some(next);
    }
    let now = ctx.now_ms;
    let Some(s) = ctx.session.as_mut() else {
        return Some(StateId::Idle);
    };
    s.last_seen_ms = now;

    if ctx.read_requested && now >= ctx.read_retry_at_ms {
        return Some(StateId::Reading);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  READING state: fetching tag memory
// ═══════════════════════════════════════════════════════════════════════════

fn reading_enter(ctx: &mut SessionContext) {
    ctx.read = None;
}

fn reading_update(ctx: &mut SessionContext) -> Option<StateId> {
    if let Some(next) = common_guards(ctx) {
        return Some(next);
    }

    match ctx.read.take()? {
        ReadOutcome::Memory(payload) => {
            if payload.is_empty() {
                info!("READING: tag carries no cart identity");
            }
            ctx.apply_payload(payload);
            if let Some(s) = ctx.session.as_ref() {
                info!(
                    "READING: cart '{}' ({})",
                    s.cart_id,
                    if s.fragrance.is_empty() { "unnamed" } else { s.fragrance.as_str() }
                );
            }
            ctx.read_requested = false;
            ctx.read_failures = 0;
        }
        ReadOutcome::NoAnswer => {
            ctx.read_failures = ctx.read_failures.saturating_add(1);
            if ctx.read_failures >= MAX_READ_ATTEMPTS {
                warn!("READING: memory unreadable after {MAX_READ_ATTEMPTS} attempts");
                ctx.apply_payload(CartPayload::default());
                ctx.read_requested = false;
                ctx.read_failures = 0;
            } else {
                // Retry on a later tick.
                ctx.read_retry_at_ms = ctx.now_ms + 1;
            }
        }
    }
    Some(StateId::Active)
}

// ═══════════════════════════════════════════════════════════════════════════
//  ERROR state: bus or reception fault, session dropped
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &mut SessionContext) {
    ctx.commands.field_on = false;
    ctx.chip_ok = None;
    ctx.read_requested = false;
    if let Some(s) = ctx.session.take() {
        warn!("ERROR: dropping session for tag {}", s.uid);
    } else {
        warn!("ERROR: reader fault");
    }
}

fn error_exit(ctx: &mut SessionContext) {
    info!("ERROR: chip responding again");
    ctx.recheck_field = true;
}

fn error_update(ctx: &mut SessionContext) -> Option<StateId> {
    let ok = ctx.chip_ok.take() == Some(true);
    if ok && !ctx.has(InterruptFlag::Error) {
        return Some(StateId::Idle);
    }
    None
}
