//! Port traits — the hexagonal boundary between the power-panic core and
//! the rest of the firmware.
//!
//! ```text
//!   Printer subsystems ──▶ Port traits ──▶ PowerPanic (domain)
//! ```
//!
//! The motion planner, thermal manager, motion-safety (crash) subsystem,
//! print-state machine and peripheral drivers all live outside this crate.
//! They implement the traits below; [`PowerPanic`](super::service::PowerPanic)
//! and the interrupt handler consume them via generics.
//!
//! Ports used from the interrupt handler must not block, allocate or log.

use crate::kinematics::{Axis, AxisMask, Rect, SoftEndstops, StepperPhase, Xyze};
use crate::snapshot::{
    BedMesh, CrashRecord, FeatureState, MediaPath, PauseResumeData, PlannerSettings,
    PressureAdvanceConfig, ProgressState, ShaperConfig,
};

// ───────────────────────────────────────────────────────────────
// Flash (driven adapter: domain ↔ external NOR flash)
// ───────────────────────────────────────────────────────────────

/// Raw flash primitives. Operations report nothing directly; a sticky error
/// flag is read (and cleared) with [`fetch_error`](Self::fetch_error).
pub trait FlashPort {
    fn read(&mut self, addr: u32, buf: &mut [u8]);

    /// Program bytes into erased flash. Can only clear bits.
    fn program(&mut self, addr: u32, data: &[u8]);

    /// Erase the sector containing `addr` to `0xFF`.
    fn erase_sector(&mut self, addr: u32);

    /// True if any operation since the last call failed.
    fn fetch_error(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Print-state machine
// ───────────────────────────────────────────────────────────────

/// Coarse phase of the print-state machine, as seen by the fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintPhase {
    Idle,
    Printing,
    Paused,
    Aborting,
    /// File preview / print confirmation screen.
    Preview,
}

impl PrintPhase {
    /// Nothing live to protect: the fault handler takes the light path.
    pub const fn is_light(self) -> bool {
        matches!(self, Self::Idle | Self::Aborting | Self::Preview)
    }
}

/// Which recovery flow the print-state machine runs after the resume
/// machine hands control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffKind {
    /// The print was paused at fault time; return to the paused state.
    Pause,
    /// Replay the interrupted instruction, as after a crash.
    Replay,
    /// The fault hit a tool change; run tool-crash recovery.
    ToolCrash,
}

pub trait PrintHostPort {
    fn print_phase(&self) -> PrintPhase;

    /// Path of the file currently being printed.
    fn media_path(&self) -> MediaPath;

    /// Media offset at which a paused print will continue.
    fn pause_position(&self) -> u32;

    fn resume_data(&self) -> PauseResumeData;
    fn set_resume_data(&mut self, data: &PauseResumeData);

    fn progress(&self) -> ProgressState;
    fn restore_progress(&mut self, progress: &ProgressState);

    /// Show the saved hotend target on the UI without starting to heat.
    fn set_display_temp(&mut self, hotend: usize, temp: i16);

    /// Queue a G-code line. Returns `false` if the queue rejected it.
    fn enqueue_gcode(&mut self, line: &str) -> bool;

    /// Gcode queue length (commands not yet turned into moves).
    fn queue_len(&self) -> usize;

    /// Open the file and start the recovery loop at `sdpos`.
    fn begin_resume(&mut self, path: &str, sdpos: u32, auto_recover: bool);

    /// Hand control back to the print-state machine. Returns `false` if it
    /// refused, which leaves the resume loop in an undefined state.
    fn finish_recovery(&mut self, kind: HandoffKind) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Motion planner and steppers
// ───────────────────────────────────────────────────────────────

/// Queue occupancy, all the shutdown sequencer needs to see.
pub trait MotionQueue {
    /// Number of planned (unexecuted or executing) moves.
    fn moves_planned(&self) -> usize;

    /// Progress of the currently executing segment, `0.0..=1.0`.
    fn segment_progress(&self) -> f32;
}

pub trait MotionPort: MotionQueue {
    fn current_position(&self) -> Xyze;

    /// Tell the planner where the head is without moving.
    fn set_position(&mut self, pos: Xyze);

    fn axis_known(&self) -> AxisMask;

    /// Mark an axis known and homed.
    fn mark_homed(&mut self, axis: Axis);

    /// Relative move at `feedrate_mm_s`.
    fn plan_move_by(&mut self, delta: Xyze, feedrate_mm_s: f32);

    /// Absolute move at `feedrate_mm_s`.
    fn plan_move_to(&mut self, dest: Xyze, feedrate_mm_s: f32);

    /// Park-style move: Z first when rising, XY at its own feedrate.
    fn plan_park_move(&mut self, dest: Xyze, xy_feedrate_mm_s: f32, z_feedrate_mm_s: f32);

    /// Kick the stepper ISR if it is idle.
    fn start_moving(&mut self);

    /// Extrusion multiplier of the active extruder.
    fn e_factor(&self) -> f32;

    fn stepper_phase(&self, axis: Axis) -> StepperPhase;
    fn set_stepper_current(&mut self, axis: Axis, ma: u16);

    /// Cut X and Y driver current (interrupt context).
    fn disable_xy(&mut self);
    fn disable_e(&mut self);

    fn set_soft_endstops(&mut self, endstops: SoftEndstops);

    /// Disable endstop checking (interrupt context).
    fn disable_endstops(&mut self);

    /// Abort media streaming and drop queued commands (interrupt context).
    fn quick_stop(&mut self);

    fn reset_acceleration_rates(&mut self);

    /// Zero XY skew correction so a pure X move does not drive Y.
    fn disable_xy_skew(&mut self);

    fn planner_settings(&self) -> PlannerSettings;
    fn set_planner_settings(&mut self, settings: &PlannerSettings);

    fn shaper(&self) -> ShaperConfig;
    fn set_shaper(&mut self, shaper: &ShaperConfig);

    fn pressure_advance(&self) -> PressureAdvanceConfig;
    fn set_pressure_advance(&mut self, config: &PressureAdvanceConfig);

    fn advance_k(&self, hotend: usize) -> f32;
    fn set_advance_k(&mut self, hotend: usize, k: f32);

    fn flow_percentage(&self, hotend: usize) -> i16;
    fn set_flow_percentage(&mut self, hotend: usize, pct: i16);

    fn axis_relative(&self) -> bool;
    fn set_axis_relative(&mut self, relative: bool);
}

// ───────────────────────────────────────────────────────────────
// Thermal manager
// ───────────────────────────────────────────────────────────────

pub trait ThermalPort {
    fn target_hotend(&self, hotend: usize) -> i16;
    fn set_target_hotend(&mut self, hotend: usize, temp: i16);

    fn target_bed(&self) -> i16;
    fn set_target_bed(&mut self, temp: i16);

    /// Measured bed temperature over the enabled bedlets.
    fn bed_temp(&self) -> f32;

    fn fan_speed(&self) -> u8;
    fn set_fan_speed(&mut self, speed: u8);

    fn extrude_min_temp(&self) -> i16;
    fn allow_cold_extrude(&self) -> bool;
    fn set_cold_extrusion(&mut self, min_temp: i16, allow: bool);

    fn bedlet_mask(&self) -> u16;
    fn set_bedlet_mask(&mut self, mask: u16);

    /// Stop temperature regulation (interrupt context).
    fn disable_all_heaters(&mut self);

    /// Stop fan regulation (interrupt context).
    fn zero_fan_speeds(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Motion-safety (crash detection) subsystem
// ───────────────────────────────────────────────────────────────

pub trait CrashPort {
    /// A crash is being handled right now.
    fn crash_in_progress(&self) -> bool;

    /// Record an AC-fault crash at the current position (interrupt context).
    fn trigger_ac_fault(&mut self, axis_known: AxisMask);

    fn crash_record(&self) -> CrashRecord;
    fn restore_crash_record(&mut self, record: &CrashRecord);

    /// Put the crash subsystem into recovery so queued motion can run.
    fn enter_recovery(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Feature modules
// ───────────────────────────────────────────────────────────────

pub trait FeaturePort {
    fn capture_features(&self) -> FeatureState;
    fn restore_features(&mut self, features: &FeatureState);

    /// The head sits in a tool-change parking area.
    fn parked_in_tool_area(&self) -> bool;
}

pub trait LevelingPort {
    fn print_area(&self) -> Rect;
    fn set_print_area(&mut self, rect: Rect);

    fn mesh(&self) -> BedMesh;
    fn set_mesh(&mut self, mesh: &BedMesh);
}

// ───────────────────────────────────────────────────────────────
// Peripherals and system services
// ───────────────────────────────────────────────────────────────

pub trait PeripheralPort {
    /// Status LEDs and other visual indicators off.
    fn indicators_off(&mut self);

    fn display_off(&mut self);

    /// Drop the board into its low-power hardware mode.
    fn enter_low_power(&mut self);

    /// Remove power from the auxiliary compute module (interrupt context).
    fn aux_power_off(&mut self);

    /// Mask or unmask the fault-sense interrupt line.
    fn set_fault_irq_enabled(&mut self, enabled: bool);

    /// Debounced level of the fault-sense line.
    fn fault_line_active(&mut self) -> bool;
}

pub trait SystemPort {
    /// Monotonic milliseconds (interrupt-safe).
    fn now_ms(&mut self) -> u32;

    fn feed_watchdog(&mut self);

    /// Hardware reset. Does not return on a real target.
    fn system_reset(&mut self);

    fn play_alert(&mut self);

    /// Total extruded filament from the E odometer (mm).
    fn odometer_e(&self) -> f32;

    /// Flush odometer trip values to EEPROM.
    fn commit_odometer(&mut self);
}

/// Everything the panic and resume sequences touch.
pub trait PrinterPort:
    PrintHostPort
    + MotionPort
    + ThermalPort
    + CrashPort
    + FeaturePort
    + LevelingPort
    + PeripheralPort
    + SystemPort
{
}

impl<T> PrinterPort for T where
    T: PrintHostPort
        + MotionPort
        + ThermalPort
        + CrashPort
        + FeaturePort
        + LevelingPort
        + PeripheralPort
        + SystemPort
{
}

// ───────────────────────────────────────────────────────────────
// Task control (fault-processing task ↔ RTOS)
// ───────────────────────────────────────────────────────────────

/// RTOS hooks used once a heavy fault is confirmed.
pub trait TaskControlPort {
    /// Suspend workers that may hold hardware the panic path needs.
    fn suspend_workers(&mut self);

    /// Drop the display task to idle priority.
    fn demote_display(&mut self);

    /// Drop the calling task to near-idle priority.
    fn demote_self(&mut self);

    /// Break the main task out of any delay or signal wait.
    fn kick_main_task(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits [`PanicEvent`](super::events::PanicEvent)s through this
/// port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::PanicEvent);
}
