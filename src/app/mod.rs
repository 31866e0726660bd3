//! Application boundary: ports, events and publication.
//!
//! The reader core in [`crate::scheduler`] talks to the outside world only
//! through the **port traits** defined in [`ports`], keeping the domain
//! fully testable without real peripherals.

pub mod events;
pub mod ports;
pub mod publish;
