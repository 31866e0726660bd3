//! Integration tests for usage accounting and ledger persistence.

use cartreader::app::events::ReaderEvent;
use cartreader::app::publish::Sinks;
use cartreader::payload::MEMORY_LEN;
use cartreader::rfid::Uid;
use cartreader::{CartReader, ReaderConfig};

use crate::mock_hw::{
    AirHandle, ChipHandle, FakeChip, MemStore, MockAir, MockTag, RecordingSink, WAKE, cart_tag,
    latch,
};

const TICK: u64 = 500;

struct Rig {
    reader: CartReader<FakeChip, MockAir>,
    chip: ChipHandle,
    air: AirHandle,
    store: MemStore,
    sink: RecordingSink,
    now: u64,
}

impl Rig {
    fn with(config: ReaderConfig) -> Self {
        let (transport, chip) = FakeChip::new();
        let (air_iface, air) = MockAir::new();
        let reader = CartReader::polling(config, transport, air_iface, Sinks::new()).unwrap();
        Self {
            reader,
            chip,
            air,
            store: MemStore::new(),
            sink: RecordingSink::new(),
            now: 0,
        }
    }

    fn tick(&mut self) {
        self.reader.tick(self.now, &mut self.store, &mut self.sink);
        self.now += TICK;
    }

    fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    fn boot(&mut self) {
        while !self.reader.is_initialised() {
            self.tick();
        }
    }

    fn arrive(&mut self, tag: MockTag) {
        self.air.borrow_mut().tag = Some(tag);
        latch(&self.chip, WAKE);
        self.tick();
    }

    fn leave(&mut self) {
        self.air.borrow_mut().tag = None;
        self.tick();
    }

    fn usage(&self, key: &str) -> u64 {
        self.reader.usage().ledger().usage_ms(key)
    }

    fn saves(&self) -> usize {
        self.sink.count(|e| matches!(e, ReaderEvent::UsageSaved))
    }
}

fn config() -> ReaderConfig {
    let mut cfg = ReaderConfig::default();
    cfg.add_cart("A1", "Lavender").unwrap();
    cfg
}

#[test]
fn ten_active_ticks_add_five_seconds() {
    let mut rig = Rig::with(config());
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    assert_eq!(rig.usage("A1"), 0);

    rig.ticks(10);
    assert_eq!(rig.usage("A1"), 5000);
    assert_eq!(rig.reader.readings().usage_ms, 5000);
}

#[test]
fn usage_frozen_after_removal() {
    let mut rig = Rig::with(config());
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.ticks(3);
    rig.leave();
    let frozen = rig.usage("A1");
    assert_eq!(frozen, 2000);

    rig.ticks(10);
    assert_eq!(rig.usage("A1"), frozen);
    // Last tracked cart's figures stay on display.
    assert_eq!(rig.reader.readings().usage_ms, frozen);
}

#[test]
fn scent_remaining_follows_capacity() {
    let mut cfg = config();
    cfg.cart_capacity_secs = 10;
    let mut rig = Rig::with(cfg);
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    assert_eq!(rig.reader.readings().scent_remaining, 100.0);

    rig.ticks(10);
    assert_eq!(rig.reader.readings().scent_remaining, 50.0);

    rig.ticks(30);
    assert_eq!(rig.reader.readings().scent_remaining, 0.0);
}

#[test]
fn heater_gate_controls_accumulation() {
    let mut cfg = config();
    cfg.gate_usage_on_heater = true;
    let mut rig = Rig::with(cfg);
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));

    rig.ticks(4);
    assert_eq!(rig.usage("A1"), 0);

    rig.reader.set_heating(true, rig.now, &mut rig.store, &mut rig.sink);
    rig.ticks(4);
    assert_eq!(rig.usage("A1"), 2000);

    let saves = rig.saves();
    rig.reader.set_heating(false, rig.now, &mut rig.store, &mut rig.sink);
    assert_eq!(rig.saves(), saves + 1);

    rig.ticks(2);
    assert_eq!(rig.usage("A1"), 2000);
}

#[test]
fn ledger_survives_restart() {
    let mut first = Rig::with(config());
    first.boot();
    first.arrive(cart_tag(1, "A1"));
    first.ticks(4);
    first.reader.flush_usage(first.now, &mut first.store, &mut first.sink);

    let mut second = Rig::with(config());
    second.store = std::mem::take(&mut first.store);
    second.boot();
    assert!(second.sink.events.contains(&ReaderEvent::Started { carts_tracked: 1 }));
    assert_eq!(second.usage("A1"), 2000);

    second.arrive(cart_tag(1, "A1"));
    second.ticks(2);
    assert_eq!(second.usage("A1"), 3000);
}

#[test]
fn ledger_saved_periodically_while_accumulating() {
    let mut rig = Rig::with(config());
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    while rig.now < 60_000 {
        rig.tick();
    }
    assert_eq!(rig.saves(), 0);
    rig.tick(); // 60 000 ms
    assert_eq!(rig.saves(), 1);
}

#[test]
fn storage_failure_is_reported_not_fatal() {
    let mut rig = Rig::with(config());
    rig.store.fail_writes = true;
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.ticks(2);
    rig.leave();

    assert_eq!(rig.sink.count(|e| matches!(e, ReaderEvent::StorageFailed(_))), 1);
    assert_eq!(rig.saves(), 0);
    // Nothing lost in memory.
    assert_eq!(rig.usage("A1"), 1500);
}

fn blank_tag(serial: u8) -> MockTag {
    MockTag {
        uid: Uid::from_bytes(&[serial, 0x42, 0x11, 0x22, 0x33, 0x44, 0x02, 0xE0]).unwrap(),
        memory: [0; MEMORY_LEN],
    }
}

#[test]
fn blank_tag_is_present_but_untracked() {
    let mut rig = Rig::with(config());
    rig.boot();
    rig.arrive(blank_tag(1));
    rig.ticks(2);

    assert!(rig.reader.readings().tag_present);
    assert!(rig.reader.readings().cart_id.is_empty());
    assert_eq!(rig.reader.readings().tracking, None);
    assert!(rig.reader.usage().ledger().is_empty());
}

#[test]
fn many_foreign_tags_leave_room_for_carts() {
    let mut rig = Rig::with(config());
    rig.boot();
    for serial in 0..40 {
        rig.arrive(blank_tag(serial));
        rig.tick();
        rig.leave();
    }
    assert!(rig.reader.usage().ledger().is_empty());

    rig.arrive(cart_tag(1, "A1"));
    rig.ticks(10);
    assert_eq!(rig.usage("A1"), 5000);
    assert_eq!(rig.reader.usage().ledger().len(), 1);
}

#[test]
fn swapping_carts_saves_previous() {
    let mut rig = Rig::with(config());
    rig.boot();
    rig.arrive(cart_tag(1, "A1"));
    rig.ticks(2);
    rig.leave();
    let saves = rig.saves();

    rig.arrive(cart_tag(2, "B2"));
    rig.ticks(2);
    assert_eq!(rig.usage("A1"), 1500);
    assert_eq!(rig.usage("B2"), 1000);
    assert_eq!(rig.saves(), saves);
    assert_eq!(rig.reader.readings().tracking.as_deref(), Some("B2"));
}
