//! Application core — power-panic domain logic, zero I/O.
//!
//! [`service::PowerPanic`] is the entry point the firmware calls. All
//! interaction with the printer happens through the **port traits** in
//! [`ports`], keeping this layer fully testable without real hardware.

pub mod events;
pub mod ports;
pub mod service;
