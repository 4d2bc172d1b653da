//! Shared context threaded through the panic and resume step functions.
//!
//! `PanicContext` owns the staging buffer, the shutdown sequencer and the
//! flash store. It is held by the fault-processing task; the interrupt
//! handler never sees it, so no lock guards it.

use crate::app::ports::{FlashPort, LevelingPort, MotionQueue, PrintHostPort};
use crate::config::PanicConfig;
use crate::error::Result;
use crate::shutdown::ShutdownSequencer;
use crate::snapshot::{FixedSection, Staging};
use crate::storage::FlashStore;

pub struct PanicContext<F: FlashPort> {
    pub config: PanicConfig,
    pub staging: Staging,
    pub shutdown: ShutdownSequencer,
    pub store: FlashStore<F>,
    /// Stored sections were loaded into `staging` for a resume.
    pub loaded: bool,
    /// The hold expired and a hardware reset was requested.
    pub reset_issued: bool,
}

impl<F: FlashPort> PanicContext<F> {
    pub fn new(config: PanicConfig, store: FlashStore<F>) -> Self {
        Self {
            config,
            staging: Staging::default(),
            shutdown: ShutdownSequencer::new(),
            store,
            loaded: false,
            reset_issued: false,
        }
    }

    pub fn fixed_section(&self, hw: &impl LevelingPort) -> FixedSection {
        FixedSection {
            print_area: hw.print_area(),
            mesh: hw.mesh(),
            media_path: self.staging.media_path.clone(),
        }
    }

    /// Write the staged snapshot. The Fixed section goes first if this print
    /// has none on flash yet; the validity byte always goes last.
    pub fn persist(&mut self, hw: &impl LevelingPort) -> Result<()> {
        if self.staging.fixed_written {
            self.store.erase_variable()?;
        } else {
            let fixed = self.fixed_section(hw);
            self.store.erase_all()?;
            self.store.write_fixed(&fixed)?;
            self.staging.fixed_written = true;
        }
        self.store.write_variable(&self.staging.snapshot)?;
        self.store.commit()
    }
}

/// Planner or command queue still has work.
pub fn motion_busy(hw: &(impl MotionQueue + PrintHostPort)) -> bool {
    hw.moves_planned() > 0 || hw.queue_len() > 0
}
