//! AC-fault interrupt entry point.
//!
//! ```text
//! ┌──────────────┐  FaultCapture   ┌──────────────┐   ┌──────────────┐
//! │ edge on the  │───(Signal)─────▶│ fault task   │──▶│ Staging,     │
//! │ sense line   │                 │ (parked)     │   │ PPState FSM  │
//! └──────────────┘                 └──────────────┘   └──────────────┘
//! ```
//!
//! [`FaultIrq::on_edge`] runs in interrupt context. It never blocks,
//! allocates, logs or touches flash. Everything it copies goes into a
//! [`FaultCapture`] which is moved to the fault-processing task through an
//! `embassy_sync` [`Signal`]; the task then owns it exclusively.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::app::ports::{PrintPhase, PrinterPort};
use crate::config::HOTENDS;
use crate::kinematics::AxisMask;
use crate::snapshot::{Capture, MotionCapture, ThermalCapture};

/// How much work the handler did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Nothing live to protect; timestamp only.
    Light,
    /// Motion was stopped and state captured.
    Heavy,
}

/// Message from the interrupt handler to the fault-processing task.
#[derive(Debug, Clone)]
pub struct FaultCapture {
    pub severity: Severity,
    pub stamp_ms: u32,
    /// Known-axes mask at the moment of the fault.
    pub orig_axis_known: AxisMask,
    /// Captured groups; `None` on the light path and on nested faults.
    pub state: Option<Capture>,
}

/// Interrupt-side state, shareable as a `static`.
pub struct FaultIrq {
    armed: AtomicBool,
    nested: AtomicBool,
    ac_power_fault: AtomicBool,
    panic_active: AtomicBool,
    handoff: Signal<CriticalSectionRawMutex, FaultCapture>,
}

impl Default for FaultIrq {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultIrq {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
            nested: AtomicBool::new(false),
            ac_power_fault: AtomicBool::new(false),
            panic_active: AtomicBool::new(false),
            handoff: Signal::new(),
        }
    }

    // ── Interrupt context ─────────────────────────────────────

    /// Edge on the fault-sense line.
    pub fn on_edge<P: PrinterPort>(&self, hw: &mut P) {
        // EEPROM writers check this before committing.
        self.ac_power_fault.store(true, Ordering::Release);

        if !self.armed.swap(false, Ordering::AcqRel) {
            return;
        }
        hw.set_fault_irq_enabled(false);

        let nested = self.nested.load(Ordering::Acquire);
        if !nested && hw.print_phase().is_light() {
            let stamp_ms = hw.now_ms();
            self.handoff.signal(FaultCapture {
                severity: Severity::Light,
                stamp_ms,
                orig_axis_known: hw.axis_known(),
                state: None,
            });
            return;
        }

        let capture = critical_section::with(|_| self.capture_heavy(hw, nested));
        self.panic_active.store(true, Ordering::Release);
        self.handoff.signal(capture);
    }

    fn capture_heavy<P: PrinterPort>(&self, hw: &mut P, nested: bool) -> FaultCapture {
        let stamp_ms = hw.now_ms();
        let orig_axis_known = hw.axis_known();

        hw.disable_xy();
        hw.aux_power_off();

        let was_crashed = hw.crash_in_progress();
        if !was_crashed {
            // No crash being handled: have the safety subsystem record one
            // at the current position.
            hw.trigger_ac_fault(orig_axis_known);
        }

        let state = (!nested).then(|| Self::capture_state(hw, was_crashed));

        if was_crashed {
            // The original crash record is copied; the subsystem may now
            // overwrite it with the current position for parking.
            hw.trigger_ac_fault(orig_axis_known);
        }

        hw.disable_all_heaters();
        hw.zero_fan_speeds();
        hw.quick_stop();
        hw.disable_endstops();

        FaultCapture {
            severity: Severity::Heavy,
            stamp_ms,
            orig_axis_known,
            state,
        }
    }

    fn capture_state<P: PrinterPort>(hw: &mut P, was_crashed: bool) -> Capture {
        let was_paused = hw.print_phase() == PrintPhase::Paused;
        let resume = hw.resume_data();

        let mut crash = hw.crash_record();
        if was_paused {
            // While paused the crash position is the park position; keep the
            // restore position in its slot instead.
            crash.sdpos = hw.pause_position();
            crash.crash_current_position = resume.pos;
        }
        crash.counter_power_panic = crash.counter_power_panic.wrapping_add(1);

        let mut thermal = ThermalCapture {
            target_nozzle: [0; HOTENDS],
            target_bed: hw.target_bed(),
            fan_speed: hw.fan_speed(),
            extrude_min_temp: hw.extrude_min_temp(),
            allow_cold_extrude: hw.allow_cold_extrude(),
            bedlet_mask: hw.bedlet_mask(),
        };
        if was_paused {
            thermal.target_nozzle = resume.nozzle_temp;
            thermal.fan_speed = resume.fan_speed;
        } else {
            for (e, t) in thermal.target_nozzle.iter_mut().enumerate() {
                *t = hw.target_hotend(e);
            }
        }

        let mut motion = MotionCapture {
            settings: hw.planner_settings(),
            shaper: hw.shaper(),
            advance: hw.pressure_advance(),
            axis_relative: hw.axis_relative(),
            z_position: hw.current_position().z,
            was_paused,
            was_crashed,
            ..MotionCapture::default()
        };
        for e in 0..HOTENDS {
            motion.flow_percentage[e] = hw.flow_percentage(e);
            motion.advance_k[e] = hw.advance_k(e);
        }

        Capture {
            media_path: hw.media_path(),
            crash,
            motion,
            thermal,
            features: hw.capture_features(),
        }
    }

    // ── Task context ──────────────────────────────────────────

    /// Wait for the next capture. Used by the fault-processing task.
    pub async fn wait(&self) -> FaultCapture {
        self.handoff.wait().await
    }

    /// Take a pending capture without waiting.
    pub fn take(&self) -> Option<FaultCapture> {
        self.handoff.try_take()
    }

    /// A capture is waiting to be picked up.
    pub fn pending(&self) -> bool {
        self.handoff.signaled()
    }

    /// Re-enable fault handling and unmask the line.
    pub fn arm(&self, hw: &mut impl crate::app::ports::PeripheralPort) {
        self.armed.store(true, Ordering::Release);
        hw.set_fault_irq_enabled(true);
    }

    /// Disable fault handling and mask the line.
    pub fn disarm(&self, hw: &mut impl crate::app::ports::PeripheralPort) {
        hw.set_fault_irq_enabled(false);
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// A capture is already staged (or loaded for resume); further faults
    /// merge into it instead of re-capturing.
    pub fn set_nested(&self, nested: bool) {
        self.nested.store(nested, Ordering::Release);
    }

    pub fn is_nested(&self) -> bool {
        self.nested.load(Ordering::Acquire)
    }

    /// Set from the first edge on; never cleared until reboot.
    pub fn ac_power_fault(&self) -> bool {
        self.ac_power_fault.load(Ordering::Acquire)
    }

    /// The heavy path ran.
    pub fn panic_active(&self) -> bool {
        self.panic_active.load(Ordering::Acquire)
    }

    pub(crate) fn clear_panic_active(&self) {
        self.panic_active.store(false, Ordering::Release);
    }
}
