//! ISO 15693 (NFC-V) through the ST25R3918 FIFO.
//!
//! Every exchange is the same sequence: clear FIFO, program the transmit
//! length, load the frame, transmit with CRC, wait for end-of-reception,
//! no-response or collision, drain the FIFO.

use log::{debug, warn};

use super::{AirInterface, BLOCK_LEN, ChipLink, Inventory, Uid, UidMask};
use crate::chip::registers::{self as reg, irq};
use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

mod flags {
    pub const HIGH_DATA_RATE: u8 = 0x02;
    pub const INVENTORY: u8 = 0x04;
    /// With INVENTORY set: single-slot round.
    pub const ONE_SLOT: u8 = 0x20;
    /// Without INVENTORY: request carries the UID.
    pub const ADDRESSED: u8 = 0x20;
    /// Response flag byte: error code follows.
    pub const RESP_ERROR: u8 = 0x01;
}

mod cmd {
    pub const INVENTORY: u8 = 0x01;
    pub const READ_SINGLE_BLOCK: u8 = 0x20;
    pub const SELECT: u8 = 0x25;
}

/// Inventory response: flags, DSFID, 8-byte UID.
const INVENTORY_RESP_LEN: usize = 10;
const NFCV_UID_LEN: usize = 8;
const RX_BUF_LEN: usize = 32;

/// Status block polls per exchange.  At 100 kHz one poll is about 0.4 ms.
const DEFAULT_WAIT_POLLS: u16 = 50;
/// Oscillator start-up wait after enabling the chip.
const OSC_WAIT_POLLS: u16 = 20;

/// No-response timer: 64/fc steps, ~4.8 ms (tag response budget).
const NO_RESPONSE_STEPS: u16 = 1000;

/// Transmit FIFO length registers for `n` bytes.
fn tx_length(n: usize) -> (u8, u8) {
    let n = n as u16;
    ((n >> 5) as u8, ((n << 3) & 0xF8) as u8)
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Single-slot inventory request with the given mask.
pub fn inventory_frame(mask: &UidMask) -> heapless::Vec<u8, 11> {
    let mut frame = heapless::Vec::new();
    let _ = frame.extend_from_slice(&[
        flags::HIGH_DATA_RATE | flags::INVENTORY | flags::ONE_SLOT,
        cmd::INVENTORY,
        mask.len_bits(),
    ]);
    let _ = frame.extend_from_slice(mask.bytes());
    frame
}

/// Addressed request: flags, command, UID, optional parameter byte.
pub fn addressed_frame(command: u8, uid: &Uid, param: Option<u8>) -> heapless::Vec<u8, 13> {
    let mut frame = heapless::Vec::new();
    let _ = frame.extend_from_slice(&[flags::HIGH_DATA_RATE | flags::ADDRESSED, command]);
    let _ = frame.extend_from_slice(uid.as_bytes());
    if let Some(p) = param {
        let _ = frame.push(p);
    }
    frame
}

/// Pull the UID out of an inventory response.
pub fn parse_inventory(resp: &[u8]) -> Option<Uid> {
    if resp.len() < INVENTORY_RESP_LEN || resp[0] & flags::RESP_ERROR != 0 {
        return None;
    }
    Uid::from_bytes(&resp[2..2 + NFCV_UID_LEN])
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Received(usize),
    NoResponse,
    Collision,
    /// CRC, parity or framing error in the answer.
    Garbled,
}

pub struct Iso15693 {
    wait_polls: u16,
}

impl Default for Iso15693 {
    fn default() -> Self {
        Self::new()
    }
}

impl Iso15693 {
    pub fn new() -> Self {
        Self {
            wait_polls: DEFAULT_WAIT_POLLS,
        }
    }

    /// Override how many status polls one exchange may take.
    pub fn with_wait_polls(mut self, polls: u16) -> Self {
        self.wait_polls = polls.max(1);
        self
    }

    fn transceive(
        &mut self,
        link: &mut ChipLink<'_>,
        frame: &[u8],
        rx: &mut [u8],
    ) -> Result<Transfer, TransportError> {
        let done = irq::RXE | irq::NRE | irq::COL | irq::RX_ERROR;
        link.irq.discard(done | irq::TXE | irq::RXS);

        link.bus.execute(reg::CMD_CLEAR_FIFO)?;
        let (hi, lo) = tx_length(frame.len());
        link.bus.write(reg::NUM_TX_BYTES1, hi)?;
        link.bus.write(reg::NUM_TX_BYTES2, lo)?;
        link.bus.write_fifo(frame)?;
        link.bus.execute(reg::CMD_TRANSMIT_WITH_CRC)?;

        let hit = link.irq.wait_for(&mut *link.bus, done, self.wait_polls)?;
        if hit.any(irq::COL) {
            return Ok(Transfer::Collision);
        }
        if hit.any(irq::RX_ERROR) {
            return Ok(Transfer::Garbled);
        }
        if !hit.any(irq::RXE) {
            return Ok(Transfer::NoResponse);
        }

        let mut status = [0u8; 2];
        link.bus.read_block(reg::FIFO_STATUS1, &mut status)?;
        let available =
            usize::from(status[0]) | (usize::from(status[1] & reg::FIFO_STATUS2_B_MASK) << 2);
        let n = available.min(rx.len());
        link.bus.read_fifo(&mut rx[..n])?;
        Ok(Transfer::Received(n))
    }
}

impl AirInterface for Iso15693 {
    fn configure(&mut self, link: &mut ChipLink<'_>) -> Result<(), TransportError> {
        link.bus.execute(reg::CMD_SET_DEFAULT)?;
        link.bus.write(reg::OP_CONTROL, reg::OP_CONTROL_EN)?;
        let osc = link.irq.wait_for(&mut *link.bus, irq::OSC, OSC_WAIT_POLLS)?;
        if osc.is_empty() {
            warn!("ST25R3918 oscillator did not report stable");
        }

        link.bus
            .modify(reg::MODE, reg::MODE_OM_MASK, reg::MODE_OM_SUBCARRIER_STREAM)?;
        link.bus.write(reg::BIT_RATE, reg::BIT_RATE_NFCV_26K)?;
        let [hi, lo] = NO_RESPONSE_STEPS.to_be_bytes();
        link.bus.write(reg::NO_RESPONSE_TIMER1, hi)?;
        link.bus.write(reg::NO_RESPONSE_TIMER2, lo)?;
        link.bus
            .write(reg::WUP_TIMER_CONTROL, reg::WUP_TIMER_AMPLITUDE_PHASE_100MS)?;

        // Unmask every source; the demux decides what matters.
        for mask_reg in [
            reg::IRQ_MASK_MAIN,
            reg::IRQ_MASK_TIMER_NFC,
            reg::IRQ_MASK_ERROR_WUP,
            reg::IRQ_MASK_TARGET,
        ] {
            link.bus.write(mask_reg, 0x00)?;
        }
        debug!("ISO 15693 mode configured");
        Ok(())
    }

    fn set_field(&mut self, link: &mut ChipLink<'_>, on: bool) -> Result<(), TransportError> {
        if on {
            link.bus.modify(
                reg::OP_CONTROL,
                reg::OP_CONTROL_WU,
                reg::OP_CONTROL_EN | reg::OP_CONTROL_RX_EN | reg::OP_CONTROL_TX_EN,
            )
        } else {
            link.bus.modify(
                reg::OP_CONTROL,
                reg::OP_CONTROL_RX_EN | reg::OP_CONTROL_TX_EN,
                reg::OP_CONTROL_EN | reg::OP_CONTROL_WU,
            )
        }
    }

    fn inventory(
        &mut self,
        link: &mut ChipLink<'_>,
        mask: &UidMask,
    ) -> Result<Inventory, TransportError> {
        let frame = inventory_frame(mask);
        let mut rx = [0u8; RX_BUF_LEN];
        match self.transceive(link, &frame, &mut rx)? {
            Transfer::Received(n) => match parse_inventory(&rx[..n]) {
                Some(uid) => Ok(Inventory::Unique(uid)),
                None => {
                    debug!("inventory: unusable {n}-byte answer");
                    Ok(Inventory::Collision { known: *mask })
                }
            },
            // Overlapping answers corrupt the CRC as often as they raise I_col.
            Transfer::Collision | Transfer::Garbled => Ok(Inventory::Collision { known: *mask }),
            Transfer::NoResponse => Ok(Inventory::Empty),
        }
    }

    fn select(&mut self, link: &mut ChipLink<'_>, uid: &Uid) -> Result<bool, TransportError> {
        let frame = addressed_frame(cmd::SELECT, uid, None);
        let mut rx = [0u8; RX_BUF_LEN];
        match self.transceive(link, &frame, &mut rx)? {
            Transfer::Received(n) if n >= 1 => Ok(rx[0] & flags::RESP_ERROR == 0),
            _ => Ok(false),
        }
    }

    fn read_block(
        &mut self,
        link: &mut ChipLink<'_>,
        uid: &Uid,
        block: u8,
        out: &mut [u8; BLOCK_LEN],
    ) -> Result<bool, TransportError> {
        let frame = addressed_frame(cmd::READ_SINGLE_BLOCK, uid, Some(block));
        let mut rx = [0u8; RX_BUF_LEN];
        match self.transceive(link, &frame, &mut rx)? {
            Transfer::Received(n) if n > BLOCK_LEN && rx[0] & flags::RESP_ERROR == 0 => {
                out.copy_from_slice(&rx[1..=BLOCK_LEN]);
                Ok(true)
            }
            other => {
                debug!("block {block}: {other:?}");
                Ok(false)
            }
        }
    }
}
