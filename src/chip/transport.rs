//! Addressed register access to the ST25R3918 over I2C.
//!
//! [`RegisterTransport`] is the seam every higher layer talks through; the
//! firmware uses [`I2cTransport`] on top of any `embedded_hal::i2c::I2c`
//! bus, tests substitute a scripted register file.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use log::{debug, info, warn};

use super::registers as reg;
use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Register-level access to the reader chip.
pub trait RegisterTransport {
    /// Read `buf.len()` consecutive registers starting at `register`.
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write a single register.
    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError>;

    /// Issue a direct command (`0xC0..=0xFF`).
    fn execute(&mut self, command: u8) -> Result<(), TransportError>;

    /// Load `bytes` into the transmit FIFO.
    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Drain `buf.len()` bytes from the receive FIFO.
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Check the chip identity and mark the bus ready.  Returns the silicon
    /// revision.
    fn probe(&mut self) -> Result<u8, TransportError>;

    /// Read a single register.
    fn read(&mut self, register: u8) -> Result<u8, TransportError> {
        let mut value = [0u8; 1];
        self.read_block(register, &mut value)?;
        Ok(value[0])
    }

    /// Read-to-clear access for the interrupt status block.  Always hits
    /// the bus; a read clears the latched bits on the chip.
    fn read_and_clear(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        self.read_block(register, buf)
    }

    /// Read-modify-write.  The write is skipped when the value would not
    /// change.
    fn modify(&mut self, register: u8, clear_mask: u8, set_mask: u8) -> Result<(), TransportError> {
        let old = self.read(register)?;
        let new = (old & !clear_mask) | set_mask;
        if new != old {
            self.write(register, new)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// I2C implementation
// ---------------------------------------------------------------------------

/// ST25R3918 on a two-wire bus.  Owns the bus handle; the bus driver's own
/// timeout bounds every transaction.
pub struct I2cTransport<I2C> {
    i2c: I2C,
    address: u8,
    initialised: bool,
}

impl<I2C, E> I2cTransport<I2C>
where
    I2C: I2c<Error = E>,
    E: embedded_hal::i2c::Error,
{
    #[must_use]
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            initialised: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// List every 7-bit address that acknowledges an empty write.
    /// Diagnostic only; logged once during bring-up.
    pub fn scan(&mut self) -> heapless::Vec<u8, 16> {
        let mut found = heapless::Vec::new();
        for addr in 0x08u8..0x78 {
            if self.i2c.write(addr, &[]).is_ok() {
                debug!("I2C device at 0x{addr:02X}");
                if found.push(addr).is_err() {
                    break;
                }
            }
        }
        info!("I2C scan: {} device(s)", found.len());
        found
    }

    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.initialised {
            Ok(())
        } else {
            Err(TransportError::NotInitialised)
        }
    }

    /// Build the address header for a register access in `mode`.  Space-B
    /// registers get the space-B access command in front.
    fn header(register: u8, mode: u8) -> Result<([u8; 2], usize), TransportError> {
        if register > reg::REG_MAX {
            return Err(TransportError::InvalidRegister(register));
        }
        let addr = register & 0x3F;
        if register & reg::SPACE_B != 0 {
            Ok(([reg::CMD_SPACE_B_ACCESS, mode | addr], 2))
        } else {
            Ok(([mode | addr, 0], 1))
        }
    }

    fn raw_read(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        let (hdr, n) = Self::header(register, reg::MODE_READ)?;
        self.i2c
            .write_read(self.address, &hdr[..n], buf)
            .map_err(map_bus_error)
    }
}

impl<I2C, E> RegisterTransport for I2cTransport<I2C>
where
    I2C: I2c<Error = E>,
    E: embedded_hal::i2c::Error,
{
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        self.ensure_ready()?;
        self.raw_read(register, buf)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError> {
        self.ensure_ready()?;
        let (hdr, n) = Self::header(register, reg::MODE_WRITE)?;
        let mut frame = [0u8; 3];
        frame[..n].copy_from_slice(&hdr[..n]);
        frame[n] = value;
        self.i2c
            .write(self.address, &frame[..=n])
            .map_err(map_bus_error)
    }

    fn execute(&mut self, command: u8) -> Result<(), TransportError> {
        self.ensure_ready()?;
        self.i2c
            .write(self.address, &[command | reg::MODE_CMD])
            .map_err(map_bus_error)
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if bytes.len() > reg::FIFO_DEPTH {
            return Err(TransportError::Length);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let mut frame: heapless::Vec<u8, { reg::FIFO_DEPTH + 1 }> = heapless::Vec::new();
        frame
            .push(reg::FIFO_LOAD)
            .map_err(|_| TransportError::Length)?;
        frame
            .extend_from_slice(bytes)
            .map_err(|()| TransportError::Length)?;
        self.i2c.write(self.address, &frame).map_err(map_bus_error)
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if buf.len() > reg::FIFO_DEPTH {
            return Err(TransportError::Length);
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c
            .write_read(self.address, &[reg::FIFO_READ], buf)
            .map_err(map_bus_error)
    }

    fn probe(&mut self) -> Result<u8, TransportError> {
        let mut id = [0u8; 1];
        self.raw_read(reg::IC_IDENTITY, &mut id).inspect_err(|e| {
            warn!("ST25R3918 not responding at 0x{:02X}: {e}", self.address);
        })?;
        let id = id[0];
        if id & reg::IC_TYPE_MASK != reg::IC_TYPE_ST25R3918 {
            warn!("unexpected IC identity 0x{id:02X} at 0x{:02X}", self.address);
            return Err(TransportError::NotFound);
        }
        self.initialised = true;
        let revision = id & reg::IC_REVISION_MASK;
        info!(
            "ST25R3918 found at 0x{:02X} (revision {revision})",
            self.address
        );
        Ok(revision)
    }
}

/// NACK of address or data becomes `Nack`; every other bus fault,
/// including the driver timeout, becomes `Bus`.
fn map_bus_error<E: embedded_hal::i2c::Error>(e: E) -> TransportError {
    match e.kind() {
        ErrorKind::NoAcknowledge(_) => TransportError::Nack,
        _ => TransportError::Bus,
    }
}
