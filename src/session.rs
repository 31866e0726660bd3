//! Session driver: the only place where the tag session touches the chip.
//!
//! The FSM handlers in [`crate::fsm::states`] are pure: they read the
//! results left in [`SessionContext`] and write requests back.  The driver
//! sits between them and the [`AirInterface`]:
//!
//! ```text
//!   flags ──▶ ┌──────────────────────────────┐
//!             │ SessionDriver::step          │
//!             │  apply field command         │──▶ AirInterface
//!             │  perform I/O for state       │◀── (ChipLink)
//!             │  Fsm::tick                   │
//!             └──────────────────────────────┘ ──▶ transitions
//! ```
//!
//! Transport errors raised while performing I/O become the `Error` flag for
//! the step in which they happened.

use log::{debug, info, warn};

use crate::error::{SelectionError, TransportError};
use crate::fsm::context::{ReadOutcome, SessionContext, TagSession};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::irq::{InterruptFlag, InterruptFlags};
use crate::payload::{self, BLOCK_COUNT, MEMORY_LEN};
use crate::registry::CartRegistry;
use crate::rfid::{AirInterface, BLOCK_LEN, ChipLink, Inventory, Uid, UidMask};

/// Upper bound on FSM steps per scheduler tick.
pub const MAX_STEPS_PER_TICK: usize = 6;
/// Inventory rounds per detection, counting the first.
pub const MAX_SELECTION_ATTEMPTS: u8 = 3;

/// Transitions taken during one [`SessionDriver::step`].
pub type Transitions = heapless::Vec<(StateId, StateId), MAX_STEPS_PER_TICK>;

pub struct SessionDriver {
    fsm: Fsm,
    ctx: SessionContext,
    /// Field state last written to the chip; `None` forces a rewrite.
    applied_field: Option<bool>,
    /// The air interface was already used during the current step.
    air_used: bool,
    /// Flags raised after the last FSM step of a tick, fed into the next.
    deferred: InterruptFlags,
}

impl SessionDriver {
    pub fn new(selection_timeout_ms: u32, registry: CartRegistry) -> Self {
        Self {
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx: SessionContext::new(selection_timeout_ms, registry),
            applied_field: None,
            air_used: false,
            deferred: InterruptFlags::empty(),
        }
    }

    /// Enter the initial state.  Call once the chip is configured.
    pub fn start(&mut self, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        self.applied_field = None;
        self.fsm.start(&mut self.ctx);
    }

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn session(&self) -> Option<&TagSession> {
        self.ctx.session.as_ref()
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn registry(&self) -> &CartRegistry {
        &self.ctx.registry
    }

    /// Ask for the selected tag's memory to be read again.  Ignored without
    /// a session.
    pub fn request_read(&mut self) -> bool {
        if self.ctx.session.is_none() {
            return false;
        }
        self.ctx.read_requested = true;
        self.ctx.read_failures = 0;
        self.ctx.read_retry_at_ms = 0;
        true
    }

    /// Run the FSM for one scheduler tick.
    ///
    /// `flags` are seen by the first FSM step only; later steps see the
    /// flags raised by the driver's own I/O.
    pub fn step<A: AirInterface + ?Sized>(
        &mut self,
        link: &mut ChipLink<'_>,
        air: &mut A,
        flags: InterruptFlags,
        now_ms: u64,
    ) -> Transitions {
        self.ctx.now_ms = now_ms;
        self.air_used = false;

        let mut transitions = Transitions::new();
        let mut incoming = flags.union(core::mem::take(&mut self.deferred));

        for _ in 0..MAX_STEPS_PER_TICK {
            self.ctx.flags = incoming;
            incoming = InterruptFlags::empty();

            self.apply_commands(link, air);
            self.perform_io(link, air);

            match self.fsm.tick(&mut self.ctx) {
                Some(t) => {
                    let _ = transitions.push(t);
                }
                None => break,
            }
        }

        // Field changes requested by the last on_enter.
        self.ctx.flags = InterruptFlags::empty();
        self.apply_commands(link, air);
        self.deferred = self.ctx.flags;
        self.ctx.flags = InterruptFlags::empty();

        transitions
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn fault(&mut self, what: &str, e: TransportError) {
        warn!("session: {what} failed: {e}");
        self.ctx.flags.insert(InterruptFlag::Error);
    }

    fn apply_commands<A: AirInterface + ?Sized>(&mut self, link: &mut ChipLink<'_>, air: &mut A) {
        let on = self.ctx.commands.field_on;
        if self.applied_field == Some(on) {
            return;
        }
        match air.set_field(link, on) {
            Ok(()) => {
                debug!("session: field {}", if on { "on" } else { "off (wake-up)" });
                self.applied_field = Some(on);
            }
            Err(e) => {
                self.applied_field = None;
                self.fault("set_field", e);
            }
        }
    }

    fn perform_io<A: AirInterface + ?Sized>(&mut self, link: &mut ChipLink<'_>, air: &mut A) {
        match self.fsm.current_state() {
            StateId::Idle => {}
            StateId::Detecting => {
                if self.ctx.inventory.is_none() {
                    self.air_used = true;
                    match anticollision(link, air) {
                        Ok(result) => self.ctx.inventory = Some(result),
                        Err(e) => self.fault("inventory", e),
                    }
                }
            }
            StateId::Selecting => {
                let Some(uid) = self.ctx.session.as_ref().map(|s| s.uid.clone()) else {
                    return;
                };
                if self.ctx.selected.is_none() {
                    self.air_used = true;
                    match air.select(link, &uid) {
                        Ok(ok) => self.ctx.selected = Some(ok),
                        Err(e) => self.fault("select", e),
                    }
                }
            }
            StateId::Active => {
                if self.air_used {
                    return;
                }
                let Some(uid) = self.ctx.session.as_ref().map(|s| s.uid.clone()) else {
                    return;
                };
                self.air_used = true;
                match air.is_present(link, &uid) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("session: tag {uid} stopped answering");
                        self.ctx.flags.insert(InterruptFlag::TagRemoved);
                    }
                    Err(e) => self.fault("presence check", e),
                }
            }
            StateId::Reading => {
                if self.ctx.read.is_some() {
                    return;
                }
                let Some(session) = self.ctx.session.as_ref() else {
                    return;
                };
                let uid = session.uid.clone();
                let layout = session.layout();
                self.air_used = true;
                match read_memory(link, air, &uid) {
                    Ok(Some((mem, len))) => {
                        let decoded = payload::decode_or_empty(&mem[..len], layout);
                        self.ctx.read = Some(ReadOutcome::Memory(decoded));
                    }
                    Ok(None) => self.ctx.read = Some(ReadOutcome::NoAnswer),
                    Err(e) => self.fault("memory read", e),
                }
            }
            StateId::Error => {
                if self.ctx.chip_ok.is_some() {
                    return;
                }
                let recovered = link.bus.probe().and_then(|_| air.configure(link));
                match recovered {
                    Ok(()) => {
                        self.applied_field = None;
                        self.ctx.chip_ok = Some(true);
                    }
                    Err(e) => {
                        debug!("session: recovery probe failed: {e}");
                        self.ctx.chip_ok = Some(false);
                    }
                }
            }
        }
    }
}

/// Up to [`MAX_SELECTION_ATTEMPTS`] inventory rounds, narrowing the mask by
/// one bit after each collision.
fn anticollision<A: AirInterface + ?Sized>(
    link: &mut ChipLink<'_>,
    air: &mut A,
) -> Result<Result<Uid, SelectionError>, TransportError> {
    let mut mask = UidMask::empty();
    // Mask that produced the last collision; lets an empty narrowed round
    // try the other branch.
    let mut parent: Option<UidMask> = None;

    for attempt in 1..=MAX_SELECTION_ATTEMPTS {
        match air.inventory(link, &mask)? {
            Inventory::Unique(uid) => return Ok(Ok(uid)),
            Inventory::Empty => {
                let Some(known) = parent.take() else {
                    return Ok(Err(SelectionError::NoResponse));
                };
                match known.narrowed(true) {
                    Some(next) => mask = next,
                    None => return Ok(Err(SelectionError::NoResponse)),
                }
            }
            Inventory::Collision { known } => {
                debug!("anticollision: collision on attempt {attempt} ({} bits)", known.len_bits());
                parent = Some(known);
                match known.narrowed(false) {
                    Some(next) => mask = next,
                    None => return Ok(Err(SelectionError::Timeout)),
                }
            }
        }
    }
    Ok(Err(SelectionError::Timeout))
}

/// Read every block of tag memory.  Blocks that answered are packed in
/// order; `None` if no block answered.
fn read_memory<A: AirInterface + ?Sized>(
    link: &mut ChipLink<'_>,
    air: &mut A,
    uid: &Uid,
) -> Result<Option<([u8; MEMORY_LEN], usize)>, TransportError> {
    let mut mem = [0u8; MEMORY_LEN];
    let mut len = 0;
    for block in 0..BLOCK_COUNT {
        let mut buf = [0u8; BLOCK_LEN];
        if air.read_block(link, uid, block, &mut buf)? {
            mem[len..len + BLOCK_LEN].copy_from_slice(&buf);
            len += BLOCK_LEN;
        }
    }
    if len == 0 {
        return Ok(None);
    }
    Ok(Some((mem, len)))
}
