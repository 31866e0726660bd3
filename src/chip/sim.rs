//! Register-level chip simulator for unit tests.
//!
//! Latches interrupt bits like the real read-to-clear block and answers
//! every transmit with the next scripted [`Reply`].

use std::collections::VecDeque;

use super::registers::{self as reg, irq};
use super::transport::RegisterTransport;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Tag answered; bytes land in the receive FIFO.
    Frame(Vec<u8>),
    /// Nobody answered before the no-response timer.
    Silence,
    /// Several tags answered at once.
    Collision,
}

pub(crate) struct SimChip {
    pub regs: [u8; 128],
    pub latched: u32,
    pub fail: Option<TransportError>,
    pub identity: u8,
    pub irq_reads: usize,
    pub commands: Vec<u8>,
    pub sent: Vec<Vec<u8>>,
    pub replies: VecDeque<Reply>,
    fifo_tx: Vec<u8>,
    fifo_rx: Vec<u8>,
}

impl SimChip {
    pub fn ready() -> Self {
        Self {
            regs: [0; 128],
            latched: 0,
            fail: None,
            identity: reg::IC_TYPE_ST25R3918 | 0x02,
            irq_reads: 0,
            commands: Vec::new(),
            sent: Vec::new(),
            replies: VecDeque::new(),
            fifo_tx: Vec::new(),
            fifo_rx: Vec::new(),
        }
    }

    pub fn latch(&mut self, bits: u32) {
        self.latched |= bits;
    }

    pub fn reply(&mut self, reply: Reply) {
        self.replies.push_back(reply);
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.fail {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn transmit(&mut self) {
        self.sent.push(core::mem::take(&mut self.fifo_tx));
        match self.replies.pop_front() {
            Some(Reply::Frame(bytes)) => {
                self.fifo_rx = bytes;
                self.latch(irq::TXE | irq::RXS | irq::RXE);
            }
            Some(Reply::Collision) => self.latch(irq::TXE | irq::RXS | irq::COL),
            Some(Reply::Silence) | None => self.latch(irq::TXE | irq::NRE),
        }
    }
}

impl RegisterTransport for SimChip {
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        self.check()?;
        if register > reg::REG_MAX {
            return Err(TransportError::InvalidRegister(register));
        }
        if register == reg::IRQ_MAIN && buf.len() == 3 {
            self.irq_reads += 1;
            let bits = core::mem::take(&mut self.latched);
            buf.copy_from_slice(&[(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]);
            return Ok(());
        }
        for (i, b) in buf.iter_mut().enumerate() {
            let r = register as usize + i;
            *b = match r as u8 {
                reg::FIFO_STATUS1 => self.fifo_rx.len() as u8,
                reg::FIFO_STATUS2 => (((self.fifo_rx.len() >> 8) & 0x03) << 6) as u8,
                reg::IC_IDENTITY => self.identity,
                _ => self.regs[r % 128],
            };
        }
        Ok(())
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), TransportError> {
        self.check()?;
        if register > reg::REG_MAX {
            return Err(TransportError::InvalidRegister(register));
        }
        self.regs[register as usize] = value;
        Ok(())
    }

    fn execute(&mut self, command: u8) -> Result<(), TransportError> {
        self.check()?;
        self.commands.push(command);
        match command {
            reg::CMD_CLEAR_FIFO => {
                self.fifo_tx.clear();
                self.fifo_rx.clear();
            }
            reg::CMD_TRANSMIT_WITH_CRC => self.transmit(),
            _ => {}
        }
        Ok(())
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.check()?;
        if self.fifo_tx.len() + bytes.len() > reg::FIFO_DEPTH {
            return Err(TransportError::Length);
        }
        self.fifo_tx.extend_from_slice(bytes);
        Ok(())
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.check()?;
        let n = buf.len().min(self.fifo_rx.len());
        buf[..n].copy_from_slice(&self.fifo_rx[..n]);
        self.fifo_rx.drain(..n);
        Ok(())
    }

    fn probe(&mut self) -> Result<u8, TransportError> {
        self.check()?;
        if self.identity & reg::IC_TYPE_MASK != reg::IC_TYPE_ST25R3918 {
            return Err(TransportError::NotFound);
        }
        Ok(self.identity & reg::IC_REVISION_MASK)
    }
}
