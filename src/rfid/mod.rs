//! Air-interface layer: tag identity types and the anti-collision / select
//! / block-read sub-protocol.
//!
//! Each [`AirInterface`] call is one atomic exchange with the tag, driven
//! through the chip FIFO.  The session driver decides what to call; the
//! implementation only knows how to frame and decode the exchange.

pub mod iso15693;

use core::fmt;
use core::fmt::Write as _;

use crate::chip::RegisterTransport;
use crate::error::TransportError;
use crate::irq::InterruptDemux;

pub use iso15693::Iso15693;

/// Longest UID carried by any supported tag family.
pub const UID_MAX_LEN: usize = 10;
/// Bytes per tag memory block.
pub const BLOCK_LEN: usize = 4;

// ---------------------------------------------------------------------------
// UID
// ---------------------------------------------------------------------------

/// Tag unique identifier, bytes in the order the tag sends them.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Uid(heapless::Vec<u8, UID_MAX_LEN>);

impl Uid {
    /// `None` if `bytes` is empty or longer than [`UID_MAX_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        heapless::Vec::from_slice(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NFC-V tag carrying the ST manufacturer code (`0xE0 0x02` in the two
    /// most significant UID bytes).  Cart tags are ST NFC-V chips.
    pub fn is_st_cart(&self) -> bool {
        self.0.len() == 8 && self.0[7] == 0xE0 && self.0[6] == 0x02
    }

    /// Colon-separated upper-case hex, e.g. `E0:02:1A:...`.
    pub fn to_hex(&self) -> heapless::String<{ UID_MAX_LEN * 3 }> {
        let mut out = heapless::String::new();
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                let _ = out.push(':');
            }
            let _ = write!(out, "{b:02X}");
        }
        out
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.to_hex())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Anti-collision mask
// ---------------------------------------------------------------------------

/// Known low-order UID bits used to narrow an inventory round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UidMask {
    value: [u8; 8],
    len_bits: u8,
}

impl UidMask {
    pub const MAX_BITS: u8 = 64;

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len_bits(&self) -> u8 {
        self.len_bits
    }

    /// The mask value, `ceil(len_bits / 8)` bytes, LSB first.
    pub fn bytes(&self) -> &[u8] {
        &self.value[..usize::from(self.len_bits.div_ceil(8))]
    }

    /// Extend the mask by one bit.  `None` once all 64 bits are fixed.
    pub fn narrowed(&self, bit: bool) -> Option<Self> {
        if self.len_bits >= Self::MAX_BITS {
            return None;
        }
        let mut next = *self;
        let idx = usize::from(self.len_bits / 8);
        let shift = self.len_bits % 8;
        if bit {
            next.value[idx] |= 1 << shift;
        } else {
            next.value[idx] &= !(1 << shift);
        }
        next.len_bits += 1;
        Some(next)
    }
}

/// Outcome of one inventory round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inventory {
    /// Exactly one tag answered.
    Unique(Uid),
    /// More than one tag answered; `known` is the mask that was used.
    Collision { known: UidMask },
    /// No tag answered.
    Empty,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Exclusive access to the chip for the duration of one exchange.
pub struct ChipLink<'a> {
    pub bus: &'a mut dyn RegisterTransport,
    pub irq: &'a mut InterruptDemux,
}

/// Tag-family sub-protocol.
pub trait AirInterface {
    /// One-time analog and protocol setup after the chip is probed.
    fn configure(&mut self, link: &mut ChipLink<'_>) -> Result<(), TransportError>;

    /// `true`: RF field on for communication.  `false`: field off, chip in
    /// low-power wake-up detection.
    fn set_field(&mut self, link: &mut ChipLink<'_>, on: bool) -> Result<(), TransportError>;

    /// One anti-collision round restricted to tags matching `mask`.
    fn inventory(
        &mut self,
        link: &mut ChipLink<'_>,
        mask: &UidMask,
    ) -> Result<Inventory, TransportError>;

    /// Address `uid` exclusively.  `Ok(false)` if the tag refused or did
    /// not answer.
    fn select(&mut self, link: &mut ChipLink<'_>, uid: &Uid) -> Result<bool, TransportError>;

    /// Read one memory block into `out`.  `Ok(false)` if the tag did not
    /// answer with data.
    fn read_block(
        &mut self,
        link: &mut ChipLink<'_>,
        uid: &Uid,
        block: u8,
        out: &mut [u8; BLOCK_LEN],
    ) -> Result<bool, TransportError>;

    /// Presence check for the selected tag.
    fn is_present(&mut self, link: &mut ChipLink<'_>, uid: &Uid) -> Result<bool, TransportError> {
        let mut scratch = [0u8; BLOCK_LEN];
        self.read_block(link, uid, 0, &mut scratch)
    }
}
