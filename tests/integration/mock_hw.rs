//! Mock hardware for integration tests.
//!
//! The reader owns its transport and air interface, so each mock keeps its
//! state behind an `Rc<RefCell<..>>` handle that the test holds on to and
//! mutates between ticks (tag arrives, tag leaves, bus dies, ...).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use cartreader::app::events::ReaderEvent;
use cartreader::app::ports::{EventSink, StorageError, StoragePort};
use cartreader::chip::RegisterTransport;
use cartreader::chip::registers::{IRQ_MAIN, irq};
use cartreader::error::TransportError;
use cartreader::payload::MEMORY_LEN;
use cartreader::rfid::{AirInterface, BLOCK_LEN, ChipLink, Inventory, Uid, UidMask};
use embedded_hal::digital::{ErrorType, InputPin};

// ── FakeChip ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct ChipState {
    /// Chip answers at all.
    pub responding: bool,
    pub revision: u8,
    /// Latched interrupt bits, cleared by reading the status block.
    pub latched: u32,
    pub probes: u32,
    pub status_reads: u32,
    /// Upcoming status reads answered with a NACK.
    pub status_failures: u32,
}

impl Default for ChipState {
    fn default() -> Self {
        Self {
            responding: true,
            revision: 2,
            latched: 0,
            probes: 0,
            status_reads: 0,
            status_failures: 0,
        }
    }
}

pub type ChipHandle = Rc<RefCell<ChipState>>;

/// Register file that only models probing and the interrupt status block.
pub struct FakeChip {
    state: ChipHandle,
}

impl FakeChip {
    pub fn new() -> (Self, ChipHandle) {
        let state = Rc::new(RefCell::new(ChipState::default()));
        (Self { state: Rc::clone(&state) }, state)
    }
}

#[allow(dead_code)]
pub fn latch(chip: &ChipHandle, bits: u32) {
    chip.borrow_mut().latched |= bits;
}

/// Wake-up measurement fired.
#[allow(dead_code)]
pub const WAKE: u32 = irq::WAM;

impl RegisterTransport for FakeChip {
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut s = self.state.borrow_mut();
        if !s.responding {
            return Err(TransportError::Bus);
        }
        buf.fill(0);
        if register == IRQ_MAIN && buf.len() == 3 {
            if s.status_failures > 0 {
                s.status_failures -= 1;
                return Err(TransportError::Nack);
            }
            s.status_reads += 1;
            let bits = core::mem::take(&mut s.latched);
            buf[0] = (bits >> 16) as u8;
            buf[1] = (bits >> 8) as u8;
            buf[2] = bits as u8;
        }
        Ok(())
    }

    fn write(&mut self, _register: u8, _value: u8) -> Result<(), TransportError> {
        self.ok()
    }

    fn execute(&mut self, _command: u8) -> Result<(), TransportError> {
        self.ok()
    }

    fn write_fifo(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        self.ok()
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        buf.fill(0);
        self.ok()
    }

    fn probe(&mut self) -> Result<u8, TransportError> {
        let mut s = self.state.borrow_mut();
        s.probes += 1;
        if s.responding {
            Ok(s.revision)
        } else {
            Err(TransportError::Nack)
        }
    }
}

impl FakeChip {
    fn ok(&self) -> Result<(), TransportError> {
        if self.state.borrow().responding {
            Ok(())
        } else {
            Err(TransportError::Bus)
        }
    }
}

// ── MockAir ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MockTag {
    pub uid: Uid,
    pub memory: [u8; MEMORY_LEN],
}

#[derive(Debug)]
pub struct AirState {
    pub tag: Option<MockTag>,
    /// Inventory rounds still answered with a collision.
    pub collisions_left: u32,
    pub select_ok: bool,
    pub field: Option<bool>,
    pub configured: u32,
    pub inventory_calls: u32,
    pub select_calls: u32,
    pub read_calls: u32,
}

impl Default for AirState {
    fn default() -> Self {
        Self {
            tag: None,
            collisions_left: 0,
            select_ok: true,
            field: None,
            configured: 0,
            inventory_calls: 0,
            select_calls: 0,
            read_calls: 0,
        }
    }
}

pub type AirHandle = Rc<RefCell<AirState>>;

/// Scripted tag family.  Answers for whatever tag the test put in the field.
pub struct MockAir {
    state: AirHandle,
}

impl MockAir {
    pub fn new() -> (Self, AirHandle) {
        let state = Rc::new(RefCell::new(AirState::default()));
        (Self { state: Rc::clone(&state) }, state)
    }
}

impl AirInterface for MockAir {
    fn configure(&mut self, _link: &mut ChipLink<'_>) -> Result<(), TransportError> {
        self.state.borrow_mut().configured += 1;
        Ok(())
    }

    fn set_field(&mut self, _link: &mut ChipLink<'_>, on: bool) -> Result<(), TransportError> {
        self.state.borrow_mut().field = Some(on);
        Ok(())
    }

    fn inventory(
        &mut self,
        _link: &mut ChipLink<'_>,
        mask: &UidMask,
    ) -> Result<Inventory, TransportError> {
        let mut s = self.state.borrow_mut();
        s.inventory_calls += 1;
        if s.collisions_left > 0 {
            s.collisions_left -= 1;
            return Ok(Inventory::Collision { known: *mask });
        }
        Ok(match &s.tag {
            Some(tag) => Inventory::Unique(tag.uid.clone()),
            None => Inventory::Empty,
        })
    }

    fn select(&mut self, _link: &mut ChipLink<'_>, uid: &Uid) -> Result<bool, TransportError> {
        let mut s = self.state.borrow_mut();
        s.select_calls += 1;
        let here = s.tag.as_ref().is_some_and(|t| &t.uid == uid);
        Ok(here && s.select_ok)
    }

    fn read_block(
        &mut self,
        _link: &mut ChipLink<'_>,
        uid: &Uid,
        block: u8,
        out: &mut [u8; BLOCK_LEN],
    ) -> Result<bool, TransportError> {
        let mut s = self.state.borrow_mut();
        s.read_calls += 1;
        match &s.tag {
            Some(tag) if &tag.uid == uid => {
                let at = usize::from(block) * BLOCK_LEN;
                out.copy_from_slice(&tag.memory[at..at + BLOCK_LEN]);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// ST cart tag carrying `https://www.pura.com/ss?d=<cart_id>.7f.c0de`.
#[allow(dead_code)]
pub fn cart_tag(serial: u8, cart_id: &str) -> MockTag {
    let uid = Uid::from_bytes(&[serial, 0x11, 0x22, 0x33, 0x44, 0x55, 0x02, 0xE0]).unwrap();
    let uri = format!("pura.com/ss?d={cart_id}.7f.c0de");

    let mut memory = [0u8; MEMORY_LEN];
    memory[..4].copy_from_slice(&[0xE1, 0x40, 0x08, 0x00]);
    memory[4] = 0x03; // NDEF message TLV
    memory[5] = (uri.len() + 5) as u8;
    memory[6] = 0xD1; // MB | ME | SR | TNF well-known
    memory[7] = 0x01; // type length
    memory[8] = (uri.len() + 1) as u8;
    memory[9] = b'U';
    memory[10] = 0x02; // https://www.
    memory[11..11 + uri.len()].copy_from_slice(uri.as_bytes());
    MockTag { uid, memory }
}

/// Generic NFC-V tag using the fixed `{id, name}` layout.
#[allow(dead_code)]
pub fn fixed_tag(serial: u8, cart_id: &str, name: &str) -> MockTag {
    let uid = Uid::from_bytes(&[serial, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0x04, 0xE0]).unwrap();
    let mut memory = [0u8; MEMORY_LEN];
    memory[..cart_id.len()].copy_from_slice(cart_id.as_bytes());
    memory[16..16 + name.len()].copy_from_slice(name.as_bytes());
    MockTag { uid, memory }
}

// ── MockIrqPin ────────────────────────────────────────────────

pub struct MockIrqPin {
    pub high: Rc<Cell<bool>>,
}

impl ErrorType for MockIrqPin {
    type Error = Infallible;
}

impl InputPin for MockIrqPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high.get())
    }
}

// ── MemStore ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemStore {
    store: HashMap<String, Vec<u8>>,
    pub fail_writes: bool,
    pub writes: u32,
}

#[allow(dead_code)]
impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.exists(namespace, key)
    }
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let k = format!("{}::{}", namespace, key);
        match self.store.get(&k) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.store.insert(format!("{}::{}", namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&format!("{}::{}", namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.contains_key(&format!("{}::{}", namespace, key))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ReaderEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&ReaderEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ReaderEvent) {
        self.events.push(event.clone());
    }
}
