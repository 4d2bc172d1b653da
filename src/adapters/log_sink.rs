//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing power-panic events to the firmware
//! logger. A UI or telemetry adapter would implement the same trait.

use log::{error, info, warn};

use crate::app::events::PanicEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`PanicEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &PanicEvent) {
        match event {
            PanicEvent::StateChanged { from, to } => {
                info!("PANIC | {:?} -> {:?}", from, to);
            }
            PanicEvent::ResumeStateChanged { from, to } => {
                info!("RESUME | {:?} -> {:?}", from, to);
            }
            PanicEvent::Prepared => info!("PANIC | prepared"),
            PanicEvent::FaultAccepted { heavy, nested } => {
                info!(
                    "PANIC | fault accepted, path={} nested={}",
                    if *heavy { "heavy" } else { "light" },
                    nested
                );
            }
            PanicEvent::Saved => info!("PANIC | state saved"),
            PanicEvent::SaveFailed(e) => error!("PANIC | save failed: {}", e),
            PanicEvent::ShutdownOverrun { state, step } => {
                warn!("PANIC | shutdown step {} overran motion in {:?}", step, state);
            }
            PanicEvent::ResumeComplete(kind) => info!("RESUME | complete, handoff={:?}", kind),
            PanicEvent::Reset => info!("PANIC | reset"),
        }
    }
}
