//! Outbound power-panic events.
//!
//! [`PowerPanic`](super::service::PowerPanic) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log to serial, forward to the UI, count
//! them in telemetry.

use crate::error::Error;
use crate::fsm::{PPState, ResumeState};

use super::ports::HandoffKind;

#[derive(Debug, Clone, PartialEq)]
pub enum PanicEvent {
    /// The panic machine moved between states.
    StateChanged { from: PPState, to: PPState },

    /// The resume machine moved between states.
    ResumeStateChanged { from: ResumeState, to: ResumeState },

    /// The Fixed section for a new print is on flash.
    Prepared,

    /// A fault was picked up from the interrupt handler.
    FaultAccepted { heavy: bool, nested: bool },

    /// Variable section written and committed.
    Saved,

    /// Persisting failed; the panic sequence carries on without a save.
    SaveFailed(Error),

    /// A shutdown step outlived the queued motion.
    ShutdownOverrun { state: PPState, step: u8 },

    /// Control went back to the print-state machine.
    ResumeComplete(HandoffKind),

    /// Stored and staged state cleared for a new print.
    Reset,
}
