//! Default GPIO / bus assignments for the cart reader board.
//!
//! Single source of truth for the defaults: [`ReaderConfig`] starts from
//! these and the firmware binary resolves them into peripherals.
//!
//! [`ReaderConfig`]: crate::config::ReaderConfig

// ---------------------------------------------------------------------------
// ST25R3918 two-wire bus
// ---------------------------------------------------------------------------

/// I2C data line.
pub const DEFAULT_SDA_GPIO: i32 = 27;
/// I2C clock line.
pub const DEFAULT_SCL_GPIO: i32 = 14;
/// 7-bit bus address (0xA0 >> 1).
pub const DEFAULT_I2C_ADDRESS: u8 = 0x50;
/// Standard-mode bus clock.
pub const DEFAULT_I2C_FREQUENCY_HZ: u32 = 100_000;
/// Per-transaction bus timeout.  A stalled transfer becomes a
/// `TransportError::Bus` instead of blocking the polling loop.
pub const DEFAULT_I2C_TIMEOUT_MS: u32 = 10;

// ---------------------------------------------------------------------------
// ST25R3918 interrupt line
// ---------------------------------------------------------------------------

/// IRQ output of the reader (active HIGH).  `None` in the config means the
/// reader runs purely on scheduled polling.
pub const DEFAULT_IRQ_GPIO: i32 = 26;

/// Highest GPIO number on the ESP32 family used by this board.
pub const MAX_GPIO: i32 = 48;
