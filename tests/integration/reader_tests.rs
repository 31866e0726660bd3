//! Integration tests for the CartReader → session FSM → usage pipeline.
//!
//! Runs on the host against `FakeChip` / `MockAir`; time is driven by hand
//! in 500 ms steps like the firmware loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cartreader::app::events::ReaderEvent;
use cartreader::app::publish::Sinks;
use cartreader::chip::registers::irq;
use cartreader::fsm::StateId;
use cartreader::error::ConfigError;
use cartreader::{CartReader, Error, ReaderConfig};

use crate::mock_hw::{
    AirHandle, ChipHandle, FakeChip, MemStore, MockAir, MockIrqPin, RecordingSink, WAKE,
    cart_tag, fixed_tag, latch,
};

const TICK: u64 = 500;
const BOOT: u64 = 2000;

type Reader = CartReader<FakeChip, MockAir>;

struct Rig {
    reader: Reader,
    chip: ChipHandle,
    air: AirHandle,
    store: MemStore,
    sink: RecordingSink,
    now: u64,
}

impl Rig {
    fn with(config: ReaderConfig, sinks: Sinks) -> Self {
        let (transport, chip) = FakeChip::new();
        let (air_iface, air) = MockAir::new();
        let reader = CartReader::polling(config, transport, air_iface, sinks).unwrap();
        Self {
            reader,
            chip,
            air,
            store: MemStore::new(),
            sink: RecordingSink::new(),
            now: 0,
        }
    }

    fn new() -> Self {
        Self::with(lavender_config(), Sinks::new())
    }

    fn tick(&mut self) {
        self.reader.tick(self.now, &mut self.store, &mut self.sink);
        self.now += TICK;
    }

    /// Tick until the chip has been initialised.
    fn boot(&mut self) {
        while self.now <= BOOT {
            self.tick();
        }
        assert!(self.reader.is_initialised());
    }

    /// Put `tag` in the field and raise the wake-up interrupt.
    fn arrive(&mut self, tag: crate::mock_hw::MockTag) {
        self.air.borrow_mut().tag = Some(tag);
        latch(&self.chip, WAKE);
        self.tick();
    }

    fn leave(&mut self) {
        self.air.borrow_mut().tag = None;
        self.tick();
    }
}

fn lavender_config() -> ReaderConfig {
    let mut cfg = ReaderConfig::default();
    cfg.add_cart("A1", "Lavender").unwrap();
    cfg
}

// ── Bring-up ──────────────────────────────────────────────────

#[test]
fn chip_not_probed_before_boot_delay() {
    let mut rig = Rig::new();
    for _ in 0..4 {
        rig.tick(); // 0, 500, 1000, 1500
    }
    assert_eq!(rig.chip.borrow().probes, 0);
    assert!(!rig.reader.is_initialised());

    rig.tick(); // 2000
    assert_eq!(rig.chip.borrow().probes, 1);
    assert!(rig.reader.is_initialised());
    assert_eq!(rig.reader.revision(), Some(2));
    assert_eq!(rig.air.borrow().configured, 1);
    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::Initialised { revision: 2 })), 1);
}

#[test]
fn failed_init_retries_after_delay() {
    let mut rig = Rig::new();
    rig.chip.borrow_mut().responding = false;
    while rig.now <= BOOT {
        rig.tick();
    }
    assert_eq!(rig.chip.borrow().probes, 1);
    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::InitFailed(_))), 1);

    rig.chip.borrow_mut().responding = true;
    // Next attempt at 2000 + 5000.
    while rig.now < BOOT + 5000 {
        rig.tick();
    }
    assert_eq!(rig.chip.borrow().probes, 1);
    rig.tick();
    assert_eq!(rig.chip.borrow().probes, 2);
    assert!(rig.reader.is_initialised());
}

#[test]
fn invalid_config_rejected_at_construction() {
    let (transport, _) = FakeChip::new();
    let (air, _) = MockAir::new();
    let cfg = ReaderConfig {
        poll_interval_ms: 0,
        ..ReaderConfig::default()
    };
    let result = CartReader::polling(cfg, transport, air, Sinks::new());
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::ValidationFailed(_)))
    ));
}

// ── Tag sessions ──────────────────────────────────────────────

#[test]
fn configured_cart_resolved_to_registry_name() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));

    assert_eq!(rig.reader.state(), StateId::Active);
    let r = rig.reader.readings();
    assert!(r.tag_present);
    assert_eq!(r.cart_id.as_str(), "A1");
    assert_eq!(r.fragrance_name.as_str(), "Lavender");
    assert!(r.cart_url.starts_with("https://www.pura.com/ss?d=A1"));

    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::TagDetected { .. })), 1);
    assert!(rig.sink.events.iter().any(|e| matches!(
        e,
        ReaderEvent::CartIdentified { cart_id, name }
            if cart_id.as_str() == "A1" && name.as_str() == "Lavender"
    )));
}

#[test]
fn unconfigured_fixed_tag_keeps_embedded_name() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(fixed_tag(2, "Q42", "Fig Leaf"));

    let r = rig.reader.readings();
    assert_eq!(r.cart_id.as_str(), "Q42");
    assert_eq!(r.fragrance_name.as_str(), "Fig Leaf");
}

#[test]
fn unknown_cart_id_has_no_name() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(3, "Z9"));

    let r = rig.reader.readings();
    assert!(r.tag_present);
    assert_eq!(r.cart_id.as_str(), "Z9");
    assert!(r.fragrance_name.is_empty());
}

#[test]
fn removal_returns_to_idle_and_saves_ledger() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.tick();
    rig.tick();
    let writes_before = rig.store.writes;

    rig.leave();
    assert_eq!(rig.reader.state(), StateId::Idle);
    assert!(rig.reader.session().is_none());
    assert!(!rig.reader.readings().tag_present);
    assert!(rig.reader.readings().cart_id.is_empty());
    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::TagRemoved { .. })), 1);
    assert_eq!(rig.store.writes, writes_before + 1);
    assert!(rig.store.contains("cart_usage", "ledger"));
}

#[test]
fn bounce_within_one_poll_is_ignored() {
    let mut rig = Rig::new();
    rig.boot();
    latch(&rig.chip, WAKE | irq::NRE);
    rig.tick();

    assert_eq!(rig.reader.state(), StateId::Idle);
    assert_eq!(rig.air.borrow().inventory_calls, 0);
    assert_eq!(rig.reader.usage().ledger().len(), 0);
}

#[test]
fn repeated_collision_abandons_after_three_rounds() {
    let mut rig = Rig::new();
    rig.boot();
    rig.air.borrow_mut().collisions_left = 100;
    rig.arrive(cart_tag(1, "A1"));

    assert_eq!(rig.air.borrow().inventory_calls, 3);
    assert_eq!(rig.air.borrow().select_calls, 0);
    assert_eq!(rig.reader.state(), StateId::Idle);
}

#[test]
fn request_read_rereads_memory() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.tick();
    let reads = rig.air.borrow().read_calls;

    assert!(rig.reader.request_read());
    rig.tick();
    // Presence check plus a full 16-block read.
    assert_eq!(rig.air.borrow().read_calls, reads + 1 + 16);
    assert_eq!(rig.reader.state(), StateId::Active);
}

// ── Faults ────────────────────────────────────────────────────

#[test]
fn bus_failure_enters_error_then_recovers() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    assert_eq!(rig.reader.state(), StateId::Active);

    rig.chip.borrow_mut().responding = false;
    // The first failed status reads only skip their ticks.
    rig.tick();
    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Active);
    assert!(rig.reader.session().is_some());

    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Error);
    assert!(!rig.reader.readings().tag_present);

    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Error);

    // Chip back; the cart is still in the field and gets picked up again.
    rig.chip.borrow_mut().responding = true;
    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Active);
    assert_eq!(rig.reader.readings().fragrance_name.as_str(), "Lavender");
}

#[test]
fn single_status_read_failure_keeps_session() {
    let mut rig = Rig::new();
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.tick();
    let first_seen = rig.reader.session().unwrap().first_seen_ms;
    assert_eq!(rig.reader.usage().ledger().usage_ms("A1"), 500);

    rig.chip.borrow_mut().status_failures = 1;
    rig.sink.clear();
    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Active);
    assert_eq!(rig.reader.session().unwrap().first_seen_ms, first_seen);
    assert!(rig.reader.readings().tag_present);
    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::TagRemoved { .. })), 0);
    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::StateChanged { .. })), 0);

    // The skipped interval is credited by the next good tick.
    rig.tick();
    assert_eq!(rig.reader.state(), StateId::Active);
    assert_eq!(rig.reader.usage().ledger().usage_ms("A1"), 1500);
}

// ── IRQ line ──────────────────────────────────────────────────

#[test]
fn irq_line_drains_latch_between_ticks() {
    let (transport, chip) = FakeChip::new();
    let (air_iface, air) = MockAir::new();
    let high = Rc::new(Cell::new(false));
    let pin = MockIrqPin { high: Rc::clone(&high) };
    let mut reader =
        CartReader::new(lavender_config(), transport, air_iface, Some(pin), Sinks::new()).unwrap();
    let mut store = MemStore::new();
    let mut sink = RecordingSink::new();

    assert!(!reader.service_irq());
    reader.tick(0, &mut store, &mut sink);
    reader.tick(BOOT, &mut store, &mut sink);

    air.borrow_mut().tag = Some(cart_tag(1, "A1"));
    latch(&chip, WAKE);
    high.set(true);
    assert!(reader.service_irq());
    assert_eq!(chip.borrow().latched, 0);

    // The stashed wake-up is handed out by the next tick.
    reader.tick(BOOT + TICK, &mut store, &mut sink);
    assert_eq!(reader.state(), StateId::Active);
}

// ── Publication ───────────────────────────────────────────────

#[test]
fn sinks_see_presence_and_name_changes() {
    let present = Rc::new(RefCell::new(Vec::new()));
    let names = Rc::new(RefCell::new(Vec::new()));
    let p = Rc::clone(&present);
    let n = Rc::clone(&names);
    let sinks = Sinks::new()
        .with_tag_present(move |v: &bool| p.borrow_mut().push(*v))
        .with_fragrance_name(move |v: &str| n.borrow_mut().push(v.to_string()));

    let mut rig = Rig::with(lavender_config(), sinks);
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.tick();
    rig.leave();

    assert_eq!(*present.borrow(), vec![false, true, false]);
    assert_eq!(*names.borrow(), vec!["".to_string(), "Lavender".into(), "".into()]);
}

#[test]
fn publishes_nothing_before_init() {
    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let sinks = Sinks::new().with_tag_present(move |_: &bool| c.set(c.get() + 1));
    let mut rig = Rig::with(lavender_config(), sinks);
    rig.tick();
    rig.tick();
    assert_eq!(calls.get(), 0);
}
