//! Outbound reader events.
//!
//! [`CartReader`](crate::scheduler::CartReader) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters decide what to do
//! with them (log to serial, forward to a host).

use crate::config::{CartId, CartName};
use crate::error::{StorageError, TransportError};
use crate::fsm::StateId;
use crate::rfid::Uid;

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// `start()` ran; usage ledger loaded with this many carts.
    Started { carts_tracked: usize },

    /// Chip probed and configured.
    Initialised { revision: u8 },

    /// Chip bring-up failed; retried after the configured delay.
    InitFailed(TransportError),

    /// The session FSM moved between states.
    StateChanged { from: StateId, to: StateId },

    /// A tag answered inventory.
    TagDetected { uid: Uid },

    /// Tag memory was read and resolved.
    CartIdentified { cart_id: CartId, name: CartName },

    /// The selected tag left the field.
    TagRemoved { uid: Uid },

    /// Usage ledger written to storage.
    UsageSaved,

    /// Usage ledger could not be written or read.
    StorageFailed(StorageError),
}
