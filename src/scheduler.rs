//! Polling scheduler, the public face of the reader.
//!
//! [`CartReader`] owns the transport, the air interface, the interrupt
//! demultiplexer, the session driver and the usage tracker.  One external
//! loop calls [`CartReader::tick`] every `poll_interval_ms`.
//!
//! ```text
//!   tick(now)
//!     │
//!     ├─ before init: wait boot_delay, probe + configure, retry on failure
//!     │
//!     ├─ 1. InterruptDemux::poll          ──▶ flags
//!     ├─ 2. SessionDriver::step (≤ 6)     ──▶ transitions ──▶ EventSink
//!     ├─ 3. usage += now − last_tick      (if engaged and gate open)
//!     ├─ 4. scent remaining
//!     ├─ 5. ledger save (periodic / cart change)
//!     └─ 6. Publisher ──▶ optional StateSinks
//! ```
//!
//! `tick` never fails.  Faults become FSM transitions or log lines, and a
//! failed tick keeps the previously published values.  A status read that
//! fails on the bus skips the rest of the tick; only
//! [`MAX_POLL_FAILURES`] failures in a row reach the FSM as `Error`.  The
//! skipped interval is credited by the next good tick.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin};
use log::{info, warn};

use crate::app::events::ReaderEvent;
use crate::app::ports::{EventSink, StoragePort};
use crate::app::publish::{Publisher, Sinks};
use crate::chip::RegisterTransport;
use crate::config::{CartId, CartName, ReaderConfig};
use crate::error;
use crate::fsm::StateId;
use crate::fsm::context::{TagSession, UsageKey};
use crate::irq::InterruptDemux;
use crate::payload::CartUrl;
use crate::registry::CartRegistry;
use crate::rfid::{AirInterface, ChipLink, Uid};
use crate::session::SessionDriver;
use crate::usage::{self, UsageTracker};

/// Consecutive failed status reads before the session is abandoned.
pub const MAX_POLL_FAILURES: u8 = 3;

// ═══════════════════════════════════════════════════════════════
//  Readings
// ═══════════════════════════════════════════════════════════════

/// Latest values exposed to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub initialised: bool,
    pub state: StateId,
    pub tag_present: bool,
    pub uid: Option<Uid>,
    pub cart_id: CartId,
    pub cart_url: CartUrl,
    pub fragrance_name: CartName,
    /// Usage of the tracked cart.  Kept from the last tracked cart while
    /// none is present.
    pub usage_ms: u64,
    pub usage_hours: f32,
    pub scent_remaining: f32,
    /// Ledger key usage is currently accumulated under.
    pub tracking: Option<UsageKey>,
}

// ═══════════════════════════════════════════════════════════════
//  Polling-only IRQ line
// ═══════════════════════════════════════════════════════════════

/// Stand-in for an unconnected IRQ line.  Always low.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIrq;

impl ErrorType for NoIrq {
    type Error = Infallible;
}

impl InputPin for NoIrq {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════
//  CartReader
// ═══════════════════════════════════════════════════════════════

pub struct CartReader<T, A, P = NoIrq> {
    config: ReaderConfig,
    transport: T,
    air: A,
    irq_line: Option<P>,
    demux: InterruptDemux,
    driver: SessionDriver,
    usage: UsageTracker,
    publisher: Publisher,
    readings: Readings,

    started: bool,
    initialised: bool,
    revision: Option<u8>,
    next_init_ms: u64,
    last_tick_ms: Option<u64>,
    /// Cart whose usage is on display; outlives the session.
    shown: Option<UsageKey>,
}

impl<T, A> CartReader<T, A, NoIrq>
where
    T: RegisterTransport,
    A: AirInterface,
{
    /// Reader without an IRQ line; relies on scheduled polling only.
    pub fn polling(
        config: ReaderConfig,
        transport: T,
        air: A,
        sinks: Sinks,
    ) -> error::Result<Self> {
        Self::new(config, transport, air, None, sinks)
    }
}

impl<T, A, P> CartReader<T, A, P>
where
    T: RegisterTransport,
    A: AirInterface,
    P: InputPin,
{
    /// Validate `config` and build the reader.  No bus traffic happens
    /// until the first [`tick`](Self::tick) after the boot delay.
    ///
    /// Configuration problems come back as [`Error::Config`](crate::Error::Config).
    pub fn new(
        config: ReaderConfig,
        transport: T,
        air: A,
        irq_line: Option<P>,
        sinks: Sinks,
    ) -> error::Result<Self> {
        config.validate()?;
        let registry = CartRegistry::from_config(&config.carts)?;
        let driver = SessionDriver::new(config.selection_timeout_ms, registry);
        let usage = UsageTracker::new(&config);

        Ok(Self {
            config,
            transport,
            air,
            irq_line,
            demux: InterruptDemux::new(),
            driver,
            usage,
            publisher: Publisher::new(sinks),
            readings: Readings::default(),
            started: false,
            initialised: false,
            revision: None,
            next_init_ms: 0,
            last_tick_ms: None,
            shown: None,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Load the usage ledger and arm the boot delay.  Called by the first
    /// `tick` if the host did not call it.
    pub fn start(&mut self, now_ms: u64, store: &impl StoragePort, sink: &mut impl EventSink) {
        self.started = true;
        self.next_init_ms = now_ms.saturating_add(u64::from(self.config.boot_delay_ms));

        match self.usage.load(store) {
            Ok(carts_tracked) => sink.emit(&ReaderEvent::Started { carts_tracked }),
            Err(e) => {
                warn!("CartReader: usage ledger unreadable ({e}), starting empty");
                sink.emit(&ReaderEvent::StorageFailed(e));
                sink.emit(&ReaderEvent::Started { carts_tracked: 0 });
            }
        }
        info!(
            "CartReader started; chip probe in {} ms",
            self.config.boot_delay_ms
        );
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one polling cycle.
    pub fn tick(&mut self, now_ms: u64, store: &mut impl StoragePort, sink: &mut impl EventSink) {
        if !self.started {
            self.start(now_ms, &*store, sink);
        }
        if !self.initialised && (now_ms < self.next_init_ms || !self.initialise(now_ms, sink)) {
            return;
        }

        // 1. Interrupt flags
        let flags = self.demux.poll(&mut self.transport);
        let faults = self.demux.bus_faults();
        if faults > 0 && faults < MAX_POLL_FAILURES {
            warn!("CartReader: status read failed ({faults}/{MAX_POLL_FAILURES}), tick skipped");
            return;
        }

        // 2. Session FSM
        let prev_state = self.driver.state();
        let prev_uid = self.driver.session().map(|s| s.uid.clone());
        let transitions = {
            let mut link = ChipLink {
                bus: &mut self.transport,
                irq: &mut self.demux,
            };
            self.driver.step(&mut link, &mut self.air, flags, now_ms)
        };
        self.emit_transitions(&transitions, prev_uid, sink);

        // 3. Usage accumulation for the interval that just ended
        let elapsed = self.last_tick_ms.map_or(0, |t| now_ms.saturating_sub(t));
        self.last_tick_ms = Some(now_ms);
        if prev_state.is_engaged() {
            self.usage.accumulate(elapsed);
        }

        // 4-5. Active cart and ledger saves
        let key = self.tracking_key();
        let mut save = self.usage.set_active(key);
        save |= self.usage.save_due(now_ms);
        if save {
            self.persist(now_ms, store, sink);
        }

        // 6. Publication
        self.refresh_readings();
        self.publisher.publish(&self.readings);
    }

    /// Drain the chip's interrupt latch if the IRQ line is asserted.  Call
    /// from the main loop between ticks.  Returns `true` if the line was
    /// high.
    pub fn service_irq(&mut self) -> bool {
        if !self.initialised {
            return false;
        }
        let Some(line) = self.irq_line.as_mut() else {
            return false;
        };
        if !matches!(line.is_high(), Ok(true)) {
            return false;
        }
        if let Err(e) = self.demux.service(&mut self.transport) {
            warn!("CartReader: IRQ service failed: {e}");
        }
        true
    }

    // ── Host controls ─────────────────────────────────────────

    /// Re-read the selected tag's memory on the next tick.
    pub fn request_read(&mut self) -> bool {
        self.driver.request_read()
    }

    /// Save the usage ledger now.
    pub fn flush_usage(&mut self, now_ms: u64, store: &mut impl StoragePort, sink: &mut impl EventSink) {
        self.persist(now_ms, store, sink);
    }

    /// Heater state.  With `gate_usage_on_heater` set, usage only
    /// accumulates while heating; switching off flushes the ledger.
    pub fn set_heating(
        &mut self,
        on: bool,
        now_ms: u64,
        store: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) {
        if self.usage.set_heating(on) {
            self.persist(now_ms, store, sink);
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    pub fn state(&self) -> StateId {
        self.driver.state()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn revision(&self) -> Option<u8> {
        self.revision
    }

    pub fn session(&self) -> Option<&TagSession> {
        self.driver.session()
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Log the configuration and the per-cart usage.
    pub fn dump_config(&self) {
        let c = &self.config;
        info!("ST25R3918 cart reader:");
        info!("  I2C: SDA={} SCL={} addr=0x{:02X} {} Hz", c.sda_pin, c.scl_pin, c.i2c_address, c.i2c_frequency_hz);
        match c.irq_pin {
            Some(pin) => info!("  IRQ pin: {pin}"),
            None => info!("  IRQ pin: none (polling)"),
        }
        info!("  Poll interval: {} ms", c.poll_interval_ms);
        match self.revision {
            Some(rev) if self.initialised => info!("  Chip: initialised (rev {rev})"),
            _ => info!("  Chip: not initialised"),
        }
        let registry = self.driver.registry();
        info!("  Configured carts: {}", registry.len());
        for (id, name) in registry.iter() {
            let used = self.usage.ledger().usage_ms(id);
            info!("    {id}: {name} ({:.1} h)", usage::hours(used));
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn initialise(&mut self, now_ms: u64, sink: &mut impl EventSink) -> bool {
        let result = match self.transport.probe() {
            Ok(rev) => {
                let mut link = ChipLink {
                    bus: &mut self.transport,
                    irq: &mut self.demux,
                };
                self.air.configure(&mut link).map(|()| rev)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(revision) => {
                info!("CartReader: ST25R3918 rev {revision} initialised");
                self.initialised = true;
                self.revision = Some(revision);
                self.demux = InterruptDemux::new();
                self.driver.start(now_ms);
                self.last_tick_ms = Some(now_ms);
                self.readings.initialised = true;
                sink.emit(&ReaderEvent::Initialised { revision });
                true
            }
            Err(e) => {
                warn!(
                    "CartReader: init failed ({e}), retry in {} ms",
                    self.config.init_retry_ms
                );
                self.next_init_ms = now_ms.saturating_add(u64::from(self.config.init_retry_ms));
                sink.emit(&ReaderEvent::InitFailed(e));
                false
            }
        }
    }

    fn emit_transitions(
        &self,
        transitions: &[(StateId, StateId)],
        prev_uid: Option<Uid>,
        sink: &mut impl EventSink,
    ) {
        let session = self.driver.session();
        for &(from, to) in transitions {
            sink.emit(&ReaderEvent::StateChanged { from, to });

            if to == StateId::Selecting {
                if let Some(s) = session {
                    sink.emit(&ReaderEvent::TagDetected { uid: s.uid.clone() });
                }
            }
            if from.is_engaged() && !to.is_engaged() {
                if let Some(uid) = prev_uid.as_ref() {
                    sink.emit(&ReaderEvent::TagRemoved { uid: uid.clone() });
                }
            }
        }

        let identified = transitions
            .iter()
            .any(|&(from, to)| from == StateId::Reading && to == StateId::Active);
        if identified {
            if let Some(s) = session {
                sink.emit(&ReaderEvent::CartIdentified {
                    cart_id: s.cart_id.clone(),
                    name: s.fragrance.clone(),
                });
            }
        }
    }

    /// Usage key for the cart in the field, once its identity is known.
    /// Tags without a cart id never reach the ledger.
    fn tracking_key(&self) -> Option<UsageKey> {
        if !self.driver.state().is_engaged() {
            return None;
        }
        self.driver
            .session()
            .filter(|s| s.payload_cached)
            .and_then(TagSession::usage_key)
    }

    fn persist(&mut self, now_ms: u64, store: &mut impl StoragePort, sink: &mut impl EventSink) {
        match self.usage.save(store, now_ms) {
            Ok(()) => sink.emit(&ReaderEvent::UsageSaved),
            Err(e) => {
                warn!("CartReader: usage save failed: {e}");
                sink.emit(&ReaderEvent::StorageFailed(e));
            }
        }
    }

    fn refresh_readings(&mut self) {
        let r = &mut self.readings;
        r.initialised = self.initialised;
        r.state = self.driver.state();

        match self.driver.session() {
            Some(s) if s.present => {
                r.tag_present = true;
                r.uid = Some(s.uid.clone());
                r.cart_id.clone_from(&s.cart_id);
                r.cart_url.clone_from(&s.cart_url);
                r.fragrance_name.clone_from(&s.fragrance);
            }
            _ => {
                r.tag_present = false;
                r.uid = None;
                r.cart_id.clear();
                r.cart_url.clear();
                r.fragrance_name.clear();
            }
        }

        r.tracking = self.usage.active().cloned();
        if r.tracking.is_some() {
            self.shown.clone_from(&r.tracking);
        }
        if let Some(key) = self.shown.as_ref() {
            r.usage_ms = self.usage.ledger().usage_ms(key);
            r.usage_hours = usage::hours(r.usage_ms);
            r.scent_remaining = self.usage.remaining_percent(r.usage_ms);
        }
    }
}
