//! Cart reader firmware entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  I2cTransport    LogEventSink   NvsAdapter     SystemClock     │
//! │  (I2cDriver)     (EventSink)    (Config+NVS)   (Clock)         │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  CartReader: demux · session FSM · usage · publisher    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::{Context, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, PinDriver};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use log::{info, warn};

use cartreader::adapters::log_sink::LogEventSink;
use cartreader::adapters::nvs::NvsAdapter;
use cartreader::adapters::time::SystemClock;
use cartreader::app::ports::{Clock, ConfigPort};
use cartreader::app::publish::Sinks;
use cartreader::chip::I2cTransport;
use cartreader::rfid::Iso15693;
use cartreader::{CartReader, ReaderConfig};

/// Granularity of the IRQ line check between ticks.
const IRQ_CHECK_MS: u32 = 10;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("Cart reader v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = NvsAdapter::new()
        .map_err(cartreader::Error::from)
        .context("NVS init")?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({e}), using defaults");
            ReaderConfig::default()
        }
    };

    // ── 3. Bus and IRQ line ───────────────────────────────────
    let peripherals = Peripherals::take()?;
    let i2c_config = I2cConfig::new()
        .baudrate(Hertz(config.i2c_frequency_hz))
        .timeout(Duration::from_millis(u64::from(config.i2c_timeout_ms)).into());
    // SAFETY: pin numbers were range-checked by `ReaderConfig::validate`
    // and nothing else in this binary claims them.
    let (sda, scl) = unsafe { (AnyIOPin::new(config.sda_pin), AnyIOPin::new(config.scl_pin)) };
    let i2c = I2cDriver::new(peripherals.i2c0, sda, scl, &i2c_config)
        .context("I2C driver init")?;

    let irq_line = match config.irq_pin {
        Some(pin) => {
            // SAFETY: as above.
            let pin = unsafe { AnyIOPin::new(pin) };
            Some(PinDriver::input(pin).context("IRQ pin init")?)
        }
        None => None,
    };

    // ── 4. Reader ─────────────────────────────────────────────
    let mut transport = I2cTransport::new(i2c, config.i2c_address);
    if !transport.scan().contains(&config.i2c_address) {
        warn!("No device at 0x{:02X}; reader will keep retrying", config.i2c_address);
    }
    let poll_interval = u64::from(config.poll_interval_ms);
    let sinks = Sinks::new()
        .with_tag_present(|present: &bool| info!("tag present: {present}"))
        .with_fragrance_name(|name: &str| info!("fragrance: '{name}'"))
        .with_scent_remaining(|pct: &f32| info!("scent remaining: {pct:.1}%"));

    let mut reader = CartReader::new(config, transport, Iso15693::new(), irq_line, sinks)
        .context("reader config")?;

    let clock = SystemClock::new();
    let mut log_sink = LogEventSink::new();
    reader.start(clock.now_ms(), &nvs, &mut log_sink);
    reader.dump_config();

    // ── 5. Polling loop ───────────────────────────────────────
    let mut next_tick = clock.now_ms();
    loop {
        let now = clock.now_ms();
        if now >= next_tick {
            reader.tick(now, &mut nvs, &mut log_sink);
            next_tick = now + poll_interval;
        } else {
            reader.service_irq();
        }
        FreeRtos::delay_ms(IRQ_CHECK_MS);
    }
}
