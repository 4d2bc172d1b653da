//! Power-panic: AC-fault recovery for 3D-printer firmware.
//!
//! When mains drops, the interrupt handler in [`isr`] stops motion and
//! captures state; the fault task in [`task`] retracts, realigns Z, saves a
//! snapshot to flash and holds until reset. On the next boot
//! [`app::service::PowerPanic`] loads the snapshot and drives the resume
//! machine back into the print.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; everything else runs on the host against mocks.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod isr;
pub mod kinematics;
pub mod shutdown;
pub mod snapshot;
pub mod storage;
pub mod task;

pub use app::service::{PanicStatus, PowerPanic};
pub use error::{Error, Result};
pub use isr::FaultIrq;
