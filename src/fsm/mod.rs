//! Function-pointer finite state machine engine for the tag session.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  StateTable                                              │
//! │  ┌───────────┬───────────┬──────────┬─────────────────┐  │
//! │  │ StateId   │ on_enter  │ on_exit  │ on_update       │  │
//! │  ├───────────┼───────────┼──────────┼─────────────────┤  │
//! │  │ Idle      │ fn(ctx)   │ -        │ fn(ctx)->Option │  │
//! │  │ Detecting │ fn(ctx)   │ -        │ fn(ctx)->Option │  │
//! │  │ Selecting │ fn(ctx)   │ -        │ fn(ctx)->Option │  │
//! │  │ Active    │ fn(ctx)   │ -        │ fn(ctx)->Option │  │
//! │  │ Reading   │ fn(ctx)   │ -        │ fn(ctx)->Option │  │
//! │  │ Error     │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option │  │
//! │  └───────────┴───────────┴──────────┴─────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each step the engine calls `on_update` for the **current** state.
//! If it returns `Some(next_id)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next, and updates the
//! current pointer.  Handlers never touch the bus: they read the results
//! the session driver left in [`SessionContext`] and write requests back
//! into it.

pub mod context;
pub mod states;

use context::SessionContext;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Tag session states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StateId {
    #[default]
    Idle = 0,
    Detecting = 1,
    Selecting = 2,
    Active = 3,
    Reading = 4,
    Error = 5,
}

impl StateId {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 6;

    /// Convert a `u8` index back to `StateId`.  Panics on out-of-range in
    /// debug builds; returns `Error` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Detecting,
            2 => Self::Selecting,
            3 => Self::Active,
            4 => Self::Reading,
            5 => Self::Error,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Error
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Detecting => "Detecting",
            Self::Selecting => "Selecting",
            Self::Active => "Active",
            Self::Reading => "Reading",
            Self::Error => "Error",
        }
    }

    /// A selected tag is in the field.
    pub fn is_engaged(self) -> bool {
        matches!(self, Self::Active | Self::Reading)
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut SessionContext);

/// Signature for the per-step update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut SessionContext) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
    /// Steps taken since construction (wraps at u64::MAX).
    tick_count: u64,
    state_entry_tick: u64,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut SessionContext) {
        info!("session FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance by one step.  Returns the transition taken, if any.
    pub fn tick(&mut self, ctx: &mut SessionContext) -> Option<(StateId, StateId)> {
        self.tick_count = self.tick_count.wrapping_add(1);

        let from = self.current_state();
        let next = (self.table[self.current].on_update)(ctx)?;
        if next == from {
            return None;
        }
        self.transition(next, ctx);
        Some((from, next))
    }

    /// Jump to `next` regardless of what `on_update` would return.
    pub fn force_transition(&mut self, next: StateId, ctx: &mut SessionContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        self.table[self.current].id
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count.wrapping_sub(self.state_entry_tick)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut SessionContext) {
        let next_idx = next_id as usize;

        info!(
            "session: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
