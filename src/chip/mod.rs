//! ST25R3918 reader chip: register map and bus transport.

pub mod registers;
pub mod transport;

#[cfg(test)]
pub(crate) mod sim;

pub use transport::{I2cTransport, RegisterTransport};
