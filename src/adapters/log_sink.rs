//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing reader events to the ESP-IDF
//! logger (UART / USB-CDC in production, stderr on host).

use log::{info, warn};

use crate::app::events::ReaderEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ReaderEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events seen since construction.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ReaderEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            ReaderEvent::Started { carts_tracked } => {
                info!("START | usage ledger holds {carts_tracked} carts");
            }
            ReaderEvent::Initialised { revision } => {
                info!("CHIP  | ST25R3918 rev {revision} ready");
            }
            ReaderEvent::InitFailed(e) => {
                warn!("CHIP  | init failed: {e}");
            }
            ReaderEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from.name(), to.name());
            }
            ReaderEvent::TagDetected { uid } => {
                info!("TAG   | detected {uid}");
            }
            ReaderEvent::CartIdentified { cart_id, name } => {
                if name.is_empty() {
                    info!("CART  | id='{cart_id}' (no name)");
                } else {
                    info!("CART  | id='{cart_id}' name='{name}'");
                }
            }
            ReaderEvent::TagRemoved { uid } => {
                info!("TAG   | removed {uid}");
            }
            ReaderEvent::UsageSaved => {
                info!("USAGE | ledger saved");
            }
            ReaderEvent::StorageFailed(e) => {
                warn!("USAGE | storage error: {e}");
            }
        }
    }
}
