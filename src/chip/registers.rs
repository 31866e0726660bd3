//! ST25R3918 register map, direct commands and interrupt bits.
//!
//! Only the subset the driver touches is listed.  Addresses with
//! [`SPACE_B`] set live in the second register space and are reached by
//! prefixing the access with [`CMD_SPACE_B_ACCESS`].

// ---------------------------------------------------------------------------
// Serial framing (first byte of every transaction)
// ---------------------------------------------------------------------------

pub const MODE_WRITE: u8 = 0b00 << 6;
pub const MODE_READ: u8 = 0b01 << 6;
pub const MODE_CMD: u8 = 0b11 << 6;
pub const FIFO_LOAD: u8 = 0x80;
pub const FIFO_READ: u8 = 0x9F;

/// Marks a space-B register address.
pub const SPACE_B: u8 = 0x40;
/// Largest valid address (space B | 0x3F).
pub const REG_MAX: u8 = SPACE_B | 0x3F;

/// FIFO depth in bytes.
pub const FIFO_DEPTH: usize = 512;

// ---------------------------------------------------------------------------
// Space A registers
// ---------------------------------------------------------------------------

pub const IO_CONF1: u8 = 0x00;
pub const IO_CONF2: u8 = 0x01;
pub const OP_CONTROL: u8 = 0x02;
pub const MODE: u8 = 0x03;
pub const BIT_RATE: u8 = 0x04;
pub const NO_RESPONSE_TIMER1: u8 = 0x0F;
pub const NO_RESPONSE_TIMER2: u8 = 0x10;
pub const IRQ_MASK_MAIN: u8 = 0x16;
pub const IRQ_MASK_TIMER_NFC: u8 = 0x17;
pub const IRQ_MASK_ERROR_WUP: u8 = 0x18;
pub const IRQ_MASK_TARGET: u8 = 0x19;
/// First of the read-to-clear interrupt status registers.
pub const IRQ_MAIN: u8 = 0x1A;
pub const IRQ_TIMER_NFC: u8 = 0x1B;
pub const IRQ_ERROR_WUP: u8 = 0x1C;
pub const FIFO_STATUS1: u8 = 0x1E;
pub const FIFO_STATUS2: u8 = 0x1F;
pub const NUM_TX_BYTES1: u8 = 0x22;
pub const NUM_TX_BYTES2: u8 = 0x23;
pub const WUP_TIMER_CONTROL: u8 = 0x31;
pub const IC_IDENTITY: u8 = 0x3F;

// ---------------------------------------------------------------------------
// Register fields
// ---------------------------------------------------------------------------

/// OP_CONTROL: oscillator and regulator enable.
pub const OP_CONTROL_EN: u8 = 0x80;
/// OP_CONTROL: receiver enable.
pub const OP_CONTROL_RX_EN: u8 = 0x40;
/// OP_CONTROL: transmitter (RF field) enable.
pub const OP_CONTROL_TX_EN: u8 = 0x08;
/// OP_CONTROL: wake-up mode (low-power tag detection).
pub const OP_CONTROL_WU: u8 = 0x04;

/// MODE: operation-mode field mask.
pub const MODE_OM_MASK: u8 = 0x78;
/// MODE: sub-carrier stream mode, used for ISO 15693.
pub const MODE_OM_SUBCARRIER_STREAM: u8 = 0x70;

/// BIT_RATE: 26 kbit/s NFC-V high data rate for both directions.
pub const BIT_RATE_NFCV_26K: u8 = 0x00;

/// WUP_TIMER_CONTROL: amplitude and phase measurement enable, 100 ms period.
pub const WUP_TIMER_AMPLITUDE_PHASE_100MS: u8 = 0x6C;

/// IC_IDENTITY: IC type field and expected value.
pub const IC_TYPE_MASK: u8 = 0xF8;
pub const IC_TYPE_ST25R3918: u8 = 0x28;
pub const IC_REVISION_MASK: u8 = 0x07;

/// FIFO_STATUS2: bits 9:8 of the FIFO byte count.
pub const FIFO_STATUS2_B_MASK: u8 = 0xC0;

// ---------------------------------------------------------------------------
// Direct commands
// ---------------------------------------------------------------------------

pub const CMD_SET_DEFAULT: u8 = 0xC1;
pub const CMD_STOP: u8 = 0xC2;
pub const CMD_TRANSMIT_WITH_CRC: u8 = 0xC4;
pub const CMD_CLEAR_FIFO: u8 = 0xDB;
pub const CMD_SPACE_B_ACCESS: u8 = 0xFB;

// ---------------------------------------------------------------------------
// Interrupt bits (24-bit status word: MAIN << 16 | TIMER_NFC << 8 | ERROR_WUP)
// ---------------------------------------------------------------------------

pub mod irq {
    // IRQ_MAIN
    pub const OSC: u32 = 0x80 << 16;
    pub const RXS: u32 = 0x20 << 16;
    pub const RXE: u32 = 0x10 << 16;
    pub const TXE: u32 = 0x08 << 16;
    pub const COL: u32 = 0x04 << 16;

    // IRQ_TIMER_NFC
    pub const NRE: u32 = 0x40 << 8;
    pub const GPE: u32 = 0x20 << 8;

    // IRQ_ERROR_WUP
    pub const CRC: u32 = 0x80;
    pub const PAR: u32 = 0x40;
    pub const ERR2: u32 = 0x20;
    pub const ERR1: u32 = 0x10;
    pub const WT: u32 = 0x08;
    pub const WAM: u32 = 0x04;
    pub const WPH: u32 = 0x02;
    pub const WCAP: u32 = 0x01;

    /// Wake-up measurements that indicate a tag entered the field.
    pub const WAKE_UP: u32 = WAM | WPH | WCAP;
    /// Reception errors.
    pub const RX_ERROR: u32 = CRC | PAR | ERR1 | ERR2;
}
