//! Power-panic configuration parameters
//!
//! Tunables for the panic and resume sequences, plus the build-time
//! constants that size the persisted layout. The printer's own
//! configuration (bed size, steps/mm, currents in normal operation) lives
//! elsewhere; only the values this subsystem acts on are mirrored here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kinematics::AxisLimits;

/// Number of hotends tracked in the snapshot.
pub const HOTENDS: usize = 5;

/// Bed-leveling mesh grid size.
pub const MESH_POINTS_X: usize = 12;
pub const MESH_POINTS_Y: usize = 12;

/// Maximum length of the short-filename media path, including the
/// directory prefix.
pub const MEDIA_PATH_LEN: usize = 128;

/// Power-panic tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicConfig {
    // --- Hold-for-reset ---
    /// Minimum time (ms) between the fault edge and the forced reset, so
    /// short mains bursts do not restart the printer.
    pub hold_reset_ms: u32,
    /// Hard cap (ms) on the hold; reset happens even if the line is still
    /// reported active.
    pub hold_max_ms: u32,

    // --- Auto-recovery ---
    /// Bed may have cooled by at most this much (°C) for an automatic resume.
    pub max_bed_diff_c: f32,

    // --- Stepper currents during panic (mA RMS) ---
    pub x_current_ma: u16,
    pub z_current_ma: u16,
    pub e_current_ma: u16,

    // --- Retraction ---
    /// Filament retracted on panic and restored on unpark (mm).
    pub retract_length_mm: f32,
    pub retract_feedrate_mm_s: f32,

    // --- Z realignment ---
    /// Full-step cycles (4 full steps each) lifted to realign the Z phase.
    pub z_lift_cycles: u8,
    pub z_feedrate_mm_s: f32,

    // --- Escape and park moves ---
    pub x_escape_feedrate_mm_s: f32,
    pub park_xy_feedrate_mm_s: f32,
    pub park_z_feedrate_mm_s: f32,
    /// Minimum nozzle clearance (mm) before rehoming X/Y on resume.
    pub z_homing_height_mm: f32,

    // --- Machine limits (logical mm) ---
    pub x_min_pos: f32,
    pub x_max_pos: f32,
    pub y_min_pos: f32,
    pub y_max_pos: f32,

    // --- Fault line ---
    /// Consecutive active samples required to report the line as active.
    pub fault_debounce_samples: u8,
}

impl Default for PanicConfig {
    fn default() -> Self {
        Self {
            // Hold
            hold_reset_ms: 1000,
            hold_max_ms: 10_000,

            // Auto-recovery
            max_bed_diff_c: 10.0,

            // Currents
            x_current_ma: 300,
            z_current_ma: 350,
            e_current_ma: 100,

            // Retraction
            retract_length_mm: 2.0,
            retract_feedrate_mm_s: 60.0,

            // Z realignment
            z_lift_cycles: 2,
            z_feedrate_mm_s: 8.0,

            // Moves
            x_escape_feedrate_mm_s: 200.0,
            park_xy_feedrate_mm_s: 100.0,
            park_z_feedrate_mm_s: 8.0,
            z_homing_height_mm: 2.0,

            // Limits
            x_min_pos: 0.0,
            x_max_pos: 250.0,
            y_min_pos: -4.0,
            y_max_pos: 210.0,

            fault_debounce_samples: 3,
        }
    }
}

impl PanicConfig {
    /// Machine XY travel limits.
    pub fn machine_limits(&self) -> AxisLimits {
        AxisLimits {
            x_min: self.x_min_pos,
            x_max: self.x_max_pos,
            y_min: self.y_min_pos,
            y_max: self.y_max_pos,
        }
    }

    /// Range-check every field. Rejects rather than clamps.
    pub fn validate(&self) -> Result<()> {
        if self.hold_reset_ms > self.hold_max_ms {
            return Err(Error::Config("hold_reset_ms must not exceed hold_max_ms"));
        }
        if !(0.0..=100.0).contains(&self.max_bed_diff_c) {
            return Err(Error::Config("max_bed_diff_c must be 0.0–100.0"));
        }
        if self.z_lift_cycles == 0 {
            return Err(Error::Config("z_lift_cycles must be at least 1"));
        }
        if self.retract_length_mm < 0.0 {
            return Err(Error::Config("retract_length_mm must not be negative"));
        }
        let feedrates = [
            self.retract_feedrate_mm_s,
            self.z_feedrate_mm_s,
            self.x_escape_feedrate_mm_s,
            self.park_xy_feedrate_mm_s,
            self.park_z_feedrate_mm_s,
        ];
        if feedrates.iter().any(|f| *f <= 0.0) {
            return Err(Error::Config("feedrates must be positive"));
        }
        if self.x_min_pos >= self.x_max_pos || self.y_min_pos >= self.y_max_pos {
            return Err(Error::Config("axis limits inverted"));
        }
        if self.fault_debounce_samples == 0 {
            return Err(Error::Config("fault_debounce_samples must be at least 1"));
        }
        Ok(())
    }
}
