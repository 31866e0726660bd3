//! Reader configuration.
//!
//! Everything the host used to supply through its YAML schema: pins, bus
//! timing, polling interval, the cart name table and usage accounting
//! parameters.  Passed by value into [`CartReader::new`], never stored in
//! process-wide state.
//!
//! [`CartReader::new`]: crate::scheduler::CartReader::new

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pins;

/// Maximum number of configured carts (registry capacity, power of two).
pub const MAX_CARTS: usize = 16;
/// Cart id buffer size.
pub const CART_ID_LEN: usize = 32;
/// Display name buffer size.
pub const CART_NAME_LEN: usize = 64;

pub type CartId = heapless::String<CART_ID_LEN>;
pub type CartName = heapless::String<CART_NAME_LEN>;

/// One `{cart_id, name}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartConfig {
    pub cart_id: CartId,
    pub name: CartName,
}

impl CartConfig {
    pub fn new(cart_id: &str, name: &str) -> Result<Self, ConfigError> {
        let mut id = CartId::new();
        id.push_str(cart_id)
            .map_err(|()| ConfigError::FieldTooLong("cart_id"))?;
        let mut n = CartName::new();
        n.push_str(name).map_err(|()| ConfigError::FieldTooLong("name"))?;
        Ok(Self { cart_id: id, name: n })
    }
}

/// Complete driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    // --- Bus ---
    /// IRQ input GPIO.  `None` runs on scheduled polling only.
    pub irq_pin: Option<i32>,
    pub sda_pin: i32,
    pub scl_pin: i32,
    /// 7-bit I2C address of the reader.
    pub i2c_address: u8,
    pub i2c_frequency_hz: u32,
    /// Bounded per-transaction timeout (milliseconds).
    pub i2c_timeout_ms: u32,

    // --- Timing ---
    /// Period of `CartReader::tick` (milliseconds).
    pub poll_interval_ms: u32,
    /// Delay after construction before the chip is first probed.
    pub boot_delay_ms: u32,
    /// Delay before re-probing after a failed initialisation.
    pub init_retry_ms: u32,
    /// Longest time a tag may spend in Detecting/Selecting.
    pub selection_timeout_ms: u32,

    // --- Usage accounting ---
    /// Seconds of use that empty a cart.
    pub cart_capacity_secs: u32,
    /// Ledger save period while usage is accumulating.
    pub usage_save_interval_secs: u32,
    /// Only accumulate usage while the heater reports ON.
    pub gate_usage_on_heater: bool,

    // --- Carts ---
    pub carts: heapless::Vec<CartConfig, MAX_CARTS>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            // Bus
            irq_pin: Some(pins::DEFAULT_IRQ_GPIO),
            sda_pin: pins::DEFAULT_SDA_GPIO,
            scl_pin: pins::DEFAULT_SCL_GPIO,
            i2c_address: pins::DEFAULT_I2C_ADDRESS,
            i2c_frequency_hz: pins::DEFAULT_I2C_FREQUENCY_HZ,
            i2c_timeout_ms: pins::DEFAULT_I2C_TIMEOUT_MS,

            // Timing
            poll_interval_ms: 500,
            boot_delay_ms: 2000,
            init_retry_ms: 5000,
            selection_timeout_ms: 1000,

            // Usage
            cart_capacity_secs: 200 * 3600, // ~200 hours at medium intensity
            usage_save_interval_secs: 60,
            gate_usage_on_heater: false,

            carts: heapless::Vec::new(),
        }
    }
}

impl ReaderConfig {
    /// Parse a JSON config blob and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Append a cart to the name table.
    pub fn add_cart(&mut self, cart_id: &str, name: &str) -> Result<(), ConfigError> {
        let cart = CartConfig::new(cart_id, name)?;
        if self.carts.iter().any(|c| c.cart_id == cart.cart_id) {
            return Err(ConfigError::DuplicateCart);
        }
        self.carts.push(cart).map_err(|_| ConfigError::TooManyCarts)
    }

    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gpio_ok = |pin: i32| (0..=pins::MAX_GPIO).contains(&pin);

        if !gpio_ok(self.sda_pin) {
            return Err(ConfigError::ValidationFailed("sda_pin must be 0-48"));
        }
        if !gpio_ok(self.scl_pin) {
            return Err(ConfigError::ValidationFailed("scl_pin must be 0-48"));
        }
        if self.sda_pin == self.scl_pin {
            return Err(ConfigError::ValidationFailed("sda_pin and scl_pin must differ"));
        }
        if let Some(irq) = self.irq_pin {
            if !gpio_ok(irq) {
                return Err(ConfigError::ValidationFailed("irq_pin must be 0-48"));
            }
            if irq == self.sda_pin || irq == self.scl_pin {
                return Err(ConfigError::ValidationFailed(
                    "irq_pin must not share a bus pin",
                ));
            }
        }
        if !(0x08..=0x77).contains(&self.i2c_address) {
            return Err(ConfigError::ValidationFailed(
                "i2c_address must be 0x08-0x77",
            ));
        }
        if !(10_000..=1_000_000).contains(&self.i2c_frequency_hz) {
            return Err(ConfigError::ValidationFailed(
                "i2c_frequency_hz must be 10k-1M",
            ));
        }
        if !(1..=1000).contains(&self.i2c_timeout_ms) {
            return Err(ConfigError::ValidationFailed("i2c_timeout_ms must be 1-1000"));
        }
        if !(50..=60_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be 50-60000",
            ));
        }
        if self.selection_timeout_ms < self.poll_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "selection_timeout_ms must be >= poll_interval_ms",
            ));
        }
        if self.cart_capacity_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "cart_capacity_secs must be > 0",
            ));
        }
        if !(5..=3600).contains(&self.usage_save_interval_secs) {
            return Err(ConfigError::ValidationFailed(
                "usage_save_interval_secs must be 5-3600",
            ));
        }
        for (i, cart) in self.carts.iter().enumerate() {
            if cart.cart_id.is_empty() {
                return Err(ConfigError::ValidationFailed("cart_id must not be empty"));
            }
            if self.carts[..i].iter().any(|c| c.cart_id == cart.cart_id) {
                return Err(ConfigError::DuplicateCart);
            }
        }
        Ok(())
    }

    /// Cart capacity in milliseconds.
    pub fn capacity_ms(&self) -> u64 {
        u64::from(self.cart_capacity_secs) * 1000
    }
}
