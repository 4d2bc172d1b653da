//! Application service — the power-panic core.
//!
//! [`PowerPanic`] owns both state machines and the [`PanicContext`]
//! (staging buffer, shutdown sequencer, flash store). It exposes the API the
//! rest of the firmware calls: print lifecycle hooks, boot-time recovery and
//! the two loop entry points. All printer I/O flows through port traits
//! injected at call sites, so the whole service runs against mocks on the
//! host.
//!
//! ```text
//!  FaultIrq ──FaultCapture──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                             │        PowerPanic         │
//!  PrinterPort ◀──────────────│  PPState · ResumeState    │
//!                             └──────────────────────────┘
//!                                          │
//!                                          ▼
//!                                   FlashStore<F>
//! ```

use embedded_hal::digital::{Error as _, InputPin};
use log::{debug, error, info, warn};

use crate::config::PanicConfig;
use crate::drivers::fault_line::FaultLine;
use crate::error::{FaultError, Result, ResumeError};
use crate::fsm::context::PanicContext;
use crate::fsm::{Fsm, PPState, ResumeState, panic, resume};
use crate::isr::{FaultCapture, FaultIrq, Severity};
use crate::shutdown::ShutdownSequencer;
use crate::snapshot::{FaultSnapshot, FixedSection, MediaPath};
use crate::storage::FlashStore;

use super::events::PanicEvent;
use super::ports::{EventSink, FlashPort, PrinterPort};

/// What the fault task should do after a [`PowerPanic::panic_loop`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicStatus {
    /// No fault is being handled.
    Idle,
    /// The panic machine has more work; call again.
    Running,
    /// The hold expired and a hardware reset was requested.
    ResetIssued,
}

/// Auto-recovery decision. Pure.
///
/// A print that has not extruded anything since it started is always safe
/// to resume. Otherwise the bed must still be within `max_diff_c` of its
/// saved target (or have had no target at all).
pub fn auto_recover_check(
    snapshot: &FaultSnapshot,
    odometer_e: f32,
    bed_temp: f32,
    max_diff_c: f32,
) -> bool {
    // An odometer at or below the baseline (reset, rounding) counts as
    // nothing extruded.
    let extruded = odometer_e - snapshot.print.odometer_e_start;
    if extruded <= 0.0 {
        return true;
    }
    let target = snapshot.thermal.target_bed;
    target == 0 || (target as f32 - bed_temp) < max_diff_c
}

// ───────────────────────────────────────────────────────────────
// PowerPanic
// ───────────────────────────────────────────────────────────────

pub struct PowerPanic<F: FlashPort> {
    ctx: PanicContext<F>,
    panic: Fsm<PPState>,
    resume: Fsm<ResumeState>,
}

impl<F: FlashPort> PowerPanic<F> {
    /// Build the service. Both machines start at their first state.
    pub fn new(config: PanicConfig, store: FlashStore<F>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ctx: PanicContext::new(config, store),
            panic: Fsm::new(PPState::Inactive),
            resume: Fsm::new(ResumeState::Setup),
        })
    }

    // ── Print lifecycle ───────────────────────────────────────

    /// Write the Fixed section for a new print. Call once bed leveling is
    /// done; later faults in the same print skip the Fixed write.
    pub fn prepare<P: PrinterPort>(&mut self, hw: &mut P, sink: &mut impl EventSink) -> Result<()> {
        if self.panic.current_state() >= PPState::Triggered {
            warn!("powerpanic: prepare ignored while a fault is handled");
            return Ok(());
        }

        self.ctx.staging.media_path = hw.media_path();
        self.ctx.staging.fixed_written = false;
        let fixed = self.ctx.fixed_section(&*hw);
        self.ctx.store.erase_all()?;
        self.ctx.store.write_fixed(&fixed)?;
        self.ctx.staging.fixed_written = true;

        self.set_panic_state(PPState::Prepared, sink);
        sink.emit(&PanicEvent::Prepared);
        info!("powerpanic prepared for '{}'", fixed.media_path.as_str());
        Ok(())
    }

    /// Clear stored and staged state and rebase the extrusion baseline for a
    /// new print. The internal state is cleared even if the erase fails.
    pub fn reset<P: PrinterPort>(
        &mut self,
        hw: &mut P,
        irq: &FaultIrq,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let erased = self.ctx.store.erase_all();
        if let Err(e) = erased {
            error!("powerpanic: reset failed to erase store: {}", e);
        }

        self.ctx.staging.clear();
        self.ctx.staging.snapshot.print.odometer_e_start = hw.odometer_e();
        self.ctx.shutdown = ShutdownSequencer::new();
        self.ctx.loaded = false;
        self.ctx.reset_issued = false;
        self.resume = Fsm::new(ResumeState::Setup);
        self.set_panic_state(PPState::Inactive, sink);

        irq.set_nested(false);
        irq.clear_panic_active();
        irq.arm(hw);

        sink.emit(&PanicEvent::Reset);
        erased
    }

    // ── Stored state ──────────────────────────────────────────

    /// True iff the validity marker says a Variable section is usable.
    pub fn state_stored(&mut self) -> bool {
        self.ctx.store.state_stored()
    }

    /// Media path from the Fixed section. Check [`state_stored`] first.
    ///
    /// [`state_stored`]: Self::state_stored
    pub fn stored_media_path(&mut self) -> Result<MediaPath> {
        self.ctx.store.load_media_path()
    }

    /// Load both sections, restore print progress and decide whether the
    /// print may resume without asking the user.
    ///
    /// Any storage or decode failure is reported as
    /// [`ResumeError::NoStoredState`].
    pub fn setup_auto_recover_check<P: PrinterPort>(
        &mut self,
        hw: &mut P,
        irq: &FaultIrq,
    ) -> Result<bool> {
        if !self.ctx.store.state_stored() {
            return Err(ResumeError::NoStoredState.into());
        }
        let (fixed, snapshot) = self.load_sections().map_err(|e| {
            error!("powerpanic: stored state unusable: {}", e);
            ResumeError::NoStoredState
        })?;

        hw.set_print_area(fixed.print_area);
        hw.set_mesh(&fixed.mesh);
        hw.restore_progress(&snapshot.progress);
        hw.set_bedlet_mask(snapshot.thermal.bedlet_mask);

        let auto = auto_recover_check(
            &snapshot,
            hw.odometer_e(),
            hw.bed_temp(),
            self.ctx.config.max_bed_diff_c,
        );

        self.ctx.staging.load(fixed, snapshot);
        self.ctx.loaded = true;
        // A fault during recovery must not overwrite what was just loaded.
        irq.set_nested(true);

        info!("powerpanic: stored state loaded, auto recover = {}", auto);
        Ok(auto)
    }

    fn load_sections(&mut self) -> Result<(FixedSection, FaultSnapshot)> {
        let fixed = self.ctx.store.load_fixed()?;
        let snapshot = self.ctx.store.load_variable()?;
        Ok((fixed, snapshot))
    }

    // ── Resume ────────────────────────────────────────────────

    /// Start recovery. The print-state machine opens the stored file at
    /// the saved offset; the resume machine holds the bed target until
    /// [`resume_continue`](Self::resume_continue) unless `auto_recover`.
    pub fn resume_print<P: PrinterPort>(
        &mut self,
        auto_recover: bool,
        hw: &mut P,
        irq: &FaultIrq,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if !self.ctx.loaded {
            return Err(ResumeError::NotLoaded.into());
        }
        if self.resume.current_state() != ResumeState::Setup {
            return Err(ResumeError::LoopNotReset.into());
        }

        let sdpos = self.ctx.staging.snapshot.crash.sdpos;
        hw.begin_resume(self.ctx.staging.media_path.as_str(), sdpos, auto_recover);

        let ctx = &mut self.ctx;
        let mut outcome = Ok(());
        self.resume.tick(|s| match resume::step(s, ctx, hw, irq) {
            Ok(next) => next,
            Err(e) => {
                outcome = Err(e);
                None
            }
        });
        outcome?;

        if auto_recover {
            self.resume_continue(sink);
        }
        Ok(())
    }

    /// User confirmation: leave `Setup`.
    pub fn resume_continue(&mut self, sink: &mut impl EventSink) {
        if self.resume.current_state() != ResumeState::Setup {
            return;
        }
        self.set_resume_state(ResumeState::Resume, sink);
    }

    /// Drive the resume machine by one step. Does nothing while a new fault
    /// is being handled; the panic machine owns the printer until it resets.
    pub fn resume_loop<P: PrinterPort>(
        &mut self,
        hw: &mut P,
        irq: &FaultIrq,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if self.panic_is_active(irq) {
            debug!("powerpanic: resume held, fault in progress");
            return Ok(());
        }
        let state = self.resume.current_state();
        if state != ResumeState::Error && !self.ctx.loaded {
            return Err(ResumeError::NotLoaded.into());
        }

        let ctx = &mut self.ctx;
        let mut outcome = Ok(());
        let moved = self.resume.tick(|s| match resume::step(s, ctx, hw, irq) {
            Ok(next) => next,
            Err(e) => {
                outcome = Err(e);
                None
            }
        });

        if let Some((from, to)) = moved {
            sink.emit(&PanicEvent::ResumeStateChanged { from, to });
            if from == ResumeState::Finish {
                self.finish_reset(hw, irq, sink);
            }
        }

        if let Err(e) = outcome {
            if e == ResumeError::HandoffRefused {
                self.set_resume_state(ResumeState::Error, sink);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Handoff done: drop the Variable section, keep the Fixed section for
    /// the continuing print, re-arm the fault line.
    ///
    /// Deliberately not a full [`reset`](Self::reset): the Fixed section
    /// survives and the panic machine returns to `Prepared`, not `Inactive`,
    /// so a later fault in the same print only rewrites the Variable section.
    fn finish_reset<P: PrinterPort>(&mut self, hw: &mut P, irq: &FaultIrq, sink: &mut impl EventSink) {
        let kind = resume::handoff_kind(&self.ctx.staging.snapshot);

        if let Err(e) = self.ctx.store.erase_variable() {
            error!("powerpanic: failed to clear stored state: {}", e);
        }
        self.ctx.staging.clear();
        self.ctx.staging.fixed_written = true;
        self.ctx.loaded = false;
        self.set_panic_state(PPState::Prepared, sink);

        irq.set_nested(false);
        irq.clear_panic_active();
        irq.arm(hw);

        sink.emit(&PanicEvent::ResumeComplete(kind));
    }

    // ── Panic ─────────────────────────────────────────────────

    /// Drive the panic machine by one step, first folding in any capture
    /// the interrupt handler left.
    pub fn panic_loop<P: PrinterPort>(
        &mut self,
        hw: &mut P,
        irq: &FaultIrq,
        sink: &mut impl EventSink,
    ) -> PanicStatus {
        if let Some(capture) = irq.take() {
            self.accept_fault(capture, irq, sink);
        }
        if self.ctx.reset_issued {
            return PanicStatus::ResetIssued;
        }
        if self.panic.current_state() < PPState::Triggered {
            return PanicStatus::Idle;
        }

        let ctx = &mut self.ctx;
        if let Some((from, to)) = self.panic.tick(|s| panic::step(s, ctx, hw, irq, &mut *sink)) {
            sink.emit(&PanicEvent::StateChanged { from, to });
        }

        if self.ctx.reset_issued {
            PanicStatus::ResetIssued
        } else {
            PanicStatus::Running
        }
    }

    /// Fold a capture from the interrupt handler into staging and restart
    /// the panic machine at `Triggered`.
    pub fn accept_fault(&mut self, capture: FaultCapture, irq: &FaultIrq, sink: &mut impl EventSink) {
        let heavy = capture.severity == Severity::Heavy;
        let nested = irq.is_nested();
        self.ctx.staging.absorb(capture, self.panic.current_state());
        self.ctx.reset_issued = false;
        sink.emit(&PanicEvent::FaultAccepted { heavy, nested });
        self.set_panic_state(PPState::Triggered, sink);
    }

    // ── Queries ───────────────────────────────────────────────

    /// A fault is being handled: the panic machine is at or past
    /// `Triggered`, or the interrupt handler already took the heavy path.
    pub fn panic_is_active(&self, irq: &FaultIrq) -> bool {
        self.panic.current_state() >= PPState::Triggered || irq.panic_active()
    }

    /// Debounced level of the fault-sense line. A line that cannot be read
    /// counts as active: nothing proves mains is present.
    pub fn is_ac_fault_active<L: InputPin>(&self, line: &mut FaultLine<L>) -> bool {
        match line.is_active() {
            Ok(active) => active,
            Err(e) => {
                error!("powerpanic: fault line read failed: {:?}", e.kind());
                true
            }
        }
    }

    /// Boot check: an active line with nothing stored is an electrical fault.
    pub fn boot_check<L: InputPin>(&mut self, line: &mut FaultLine<L>) -> Result<()> {
        if self.is_ac_fault_active(line) && !self.state_stored() {
            error!("powerpanic: AC fault line active at startup");
            return Err(FaultError::AcFaultAtStartup.into());
        }
        Ok(())
    }

    pub fn panic_state(&self) -> PPState {
        self.panic.current_state()
    }

    pub fn resume_state(&self) -> ResumeState {
        self.resume.current_state()
    }

    pub fn config(&self) -> &PanicConfig {
        &self.ctx.config
    }

    /// Staged snapshot (loaded or captured).
    pub fn snapshot(&self) -> &FaultSnapshot {
        &self.ctx.staging.snapshot
    }

    pub fn store(&self) -> &FlashStore<F> {
        &self.ctx.store
    }

    pub fn store_mut(&mut self) -> &mut FlashStore<F> {
        &mut self.ctx.store
    }

    /// Give the store back, e.g. to rebuild the service after a reboot.
    pub fn into_store(self) -> FlashStore<F> {
        self.ctx.store
    }

    // ── Internal ──────────────────────────────────────────────

    fn set_panic_state(&mut self, next: PPState, sink: &mut impl EventSink) {
        if let Some((from, to)) = self.panic.force_transition(next) {
            sink.emit(&PanicEvent::StateChanged { from, to });
        }
    }

    fn set_resume_state(&mut self, next: ResumeState, sink: &mut impl EventSink) {
        if let Some((from, to)) = self.resume.force_transition(next) {
            sink.emit(&PanicEvent::ResumeStateChanged { from, to });
        }
    }
}
