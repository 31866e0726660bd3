//! Interrupt demultiplexer.
//!
//! The ST25R3918 latches its interrupt sources in three read-to-clear
//! registers (0x1A..=0x1C).  [`InterruptDemux`] reads them as one block and
//! folds the raw bits into the five [`InterruptFlag`]s the session state
//! machine reacts to.
//!
//! Reading the block clears it on the chip, so any bit read but not acted
//! upon must be remembered here.  The air interface waits for specific
//! bits through [`InterruptDemux::wait_for`]; everything else it sees is
//! stashed and handed out by the next [`InterruptDemux::poll`].

use core::fmt;

use log::warn;

use crate::chip::RegisterTransport;
use crate::chip::registers::{self as reg, irq};
use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptFlag {
    /// Wake-up measurement crossed its threshold: a tag entered the field.
    TagDetected = 0b0000_0001,
    /// No-response timer expired: the tag stopped answering.
    TagRemoved = 0b0000_0010,
    /// End of reception.
    TransferDone = 0b0000_0100,
    /// Framing, parity or CRC error, or a failed bus access.
    Error = 0b0000_1000,
    /// Bit collision during reception.
    Collision = 0b0001_0000,
}

impl InterruptFlag {
    pub const ALL: [Self; 5] = [
        Self::TagDetected,
        Self::TagRemoved,
        Self::TransferDone,
        Self::Error,
        Self::Collision,
    ];

    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// Set of [`InterruptFlag`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptFlags(u8);

impl InterruptFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Fold a raw status word into flags.  Bits with no flag are dropped.
    pub fn from_status(status: IrqStatus) -> Self {
        let mut flags = Self::empty();
        if status.any(irq::WAKE_UP) {
            flags.insert(InterruptFlag::TagDetected);
        }
        if status.any(irq::NRE) {
            flags.insert(InterruptFlag::TagRemoved);
        }
        if status.any(irq::RXE) {
            flags.insert(InterruptFlag::TransferDone);
        }
        if status.any(irq::COL) {
            flags.insert(InterruptFlag::Collision);
        }
        if status.any(irq::RX_ERROR) {
            flags.insert(InterruptFlag::Error);
        }
        flags
    }

    /// Flags from raw bits; unknown bits are ignored.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0b0001_1111)
    }

    pub fn insert(&mut self, flag: InterruptFlag) {
        self.0 |= flag.mask();
    }

    pub fn remove(&mut self, flag: InterruptFlag) {
        self.0 &= !flag.mask();
    }

    pub fn contains(self, flag: InterruptFlag) -> bool {
        self.0 & flag.mask() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl From<InterruptFlag> for InterruptFlags {
    fn from(flag: InterruptFlag) -> Self {
        Self(flag.mask())
    }
}

impl fmt::Debug for InterruptFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(InterruptFlag::ALL.iter().filter(|fl| self.contains(**fl)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Raw status
// ---------------------------------------------------------------------------

/// Raw 24-bit interrupt status: `MAIN << 16 | TIMER_NFC << 8 | ERROR_WUP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqStatus(pub u32);

impl IrqStatus {
    pub fn from_registers(regs: [u8; 3]) -> Self {
        Self((u32::from(regs[0]) << 16) | (u32::from(regs[1]) << 8) | u32::from(regs[2]))
    }

    /// True if any bit of `mask` is set.
    pub fn any(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// Demultiplexer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InterruptDemux {
    /// Bits read from the chip but not yet handed out.
    pending: u32,
    /// Consecutive polls that failed on the bus.
    bus_faults: u8,
}

impl InterruptDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and clear the status block, merge the stash and return the
    /// resulting flags.  A bus failure yields exactly `{Error}` and keeps the
    /// stash for the next poll; [`bus_faults`](Self::bus_faults) tells it
    /// apart from error bits latched by the chip.
    pub fn poll<B: RegisterTransport + ?Sized>(&mut self, bus: &mut B) -> InterruptFlags {
        match read_status(bus) {
            Ok(status) => {
                let all = IrqStatus(self.pending | status.0);
                self.pending = 0;
                self.bus_faults = 0;
                InterruptFlags::from_status(all)
            }
            Err(e) => {
                self.bus_faults = self.bus_faults.saturating_add(1);
                warn!("IRQ poll failed ({} in a row): {e}", self.bus_faults);
                InterruptFlag::Error.into()
            }
        }
    }

    /// Number of consecutive polls that failed to read the status block.
    /// Zero after any successful poll.
    pub fn bus_faults(&self) -> u8 {
        self.bus_faults
    }

    /// Called when the external IRQ line is asserted: drain the chip latch
    /// into the stash so the line deasserts.
    pub fn service<B: RegisterTransport + ?Sized>(
        &mut self,
        bus: &mut B,
    ) -> Result<(), TransportError> {
        let status = read_status(bus)?;
        self.pending |= status.0;
        Ok(())
    }

    /// Poll until any bit of `mask` is latched or `max_polls` reads have
    /// passed.  Returns the matching bits (empty on timeout); other bits are
    /// stashed.
    pub fn wait_for<B: RegisterTransport + ?Sized>(
        &mut self,
        bus: &mut B,
        mask: u32,
        max_polls: u16,
    ) -> Result<IrqStatus, TransportError> {
        let hit = self.pending & mask;
        if hit != 0 {
            self.pending &= !mask;
            return Ok(IrqStatus(hit));
        }
        for _ in 0..max_polls {
            let status = read_status(bus)?;
            self.pending |= status.0 & !mask;
            let hit = status.0 & mask;
            if hit != 0 {
                return Ok(IrqStatus(hit));
            }
        }
        Ok(IrqStatus::default())
    }

    /// Forget stale stashed bits of `mask` before starting a transfer.
    pub fn discard(&mut self, mask: u32) {
        self.pending &= !mask;
    }

    pub fn pending(&self) -> IrqStatus {
        IrqStatus(self.pending)
    }
}

fn read_status<B: RegisterTransport + ?Sized>(bus: &mut B) -> Result<IrqStatus, TransportError> {
    let mut regs = [0u8; 3];
    bus.read_and_clear(reg::IRQ_MAIN, &mut regs)?;
    Ok(IrqStatus::from_registers(regs))
}
