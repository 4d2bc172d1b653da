//! Axis and position types, plus the pure geometric helpers used by the
//! panic and resume sequences.
//!
//! Nothing in here touches hardware: the stepper phase counter and the
//! planner's steps/mm are passed in by the caller, so every helper can be
//! tested on the host.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    E = 3,
}

impl Axis {
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Known-position / homed bitmask, one bit per [`Axis`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMask(pub u8);

impl AxisMask {
    pub const NONE: Self = Self(0);
    pub const XYZ: Self = Self(Axis::X.bit() | Axis::Y.bit() | Axis::Z.bit());

    pub const fn has(self, axis: Axis) -> bool {
        self.0 & axis.bit() != 0
    }

    #[must_use]
    pub const fn with(self, axis: Axis) -> Self {
        Self(self.0 | axis.bit())
    }

    #[must_use]
    pub const fn without(self, axis: Axis) -> Self {
        Self(self.0 & !axis.bit())
    }

    /// X, Y and Z are all known.
    pub const fn all_homed(self) -> bool {
        self.0 & Self::XYZ.0 == Self::XYZ.0
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Logical (or physical, depending on context) XYZE position in mm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Xyze {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub e: f32,
}

impl Xyze {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        e: 0.0,
    };

    pub const fn e_only(e: f32) -> Self {
        Self { e, ..Self::ZERO }
    }

    pub const fn z_only(z: f32) -> Self {
        Self { z, ..Self::ZERO }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    pub x: f32,
    pub y: f32,
}

/// Print-area bounding rectangle; `a` is the min corner, `b` the max corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub a: Xy,
    pub b: Xy,
}

impl Rect {
    /// True when the rectangle has no horizontal extent (print area never set).
    pub fn is_degenerate(&self) -> bool {
        self.b.x <= self.a.x
    }
}

/// Machine travel limits on the horizontal plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl AxisLimits {
    pub fn x_span(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn y_span(&self) -> f32 {
        self.y_max - self.y_min
    }
}

/// Software endstop window applied by the planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftEndstops {
    pub min: Xy,
    pub max: Xy,
}

impl SoftEndstops {
    /// Limits widened by one full span on each side, so a retract or park
    /// issued from inside an interrupted homing move is never clipped.
    pub fn widened(limits: &AxisLimits) -> Self {
        let (xs, ys) = (limits.x_span(), limits.y_span());
        Self {
            min: Xy {
                x: limits.x_min - xs,
                y: limits.y_min - ys,
            },
            max: Xy {
                x: limits.x_max + xs,
                y: limits.y_max + ys,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stepper phase realignment
// ---------------------------------------------------------------------------

/// Microstep counter range of the stepper driver (one electrical cycle).
pub const MSCNT_RANGE: u16 = 1024;

/// Snapshot of a stepper driver's phase, read just before the Z lift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepperPhase {
    /// Configured microstep resolution (e.g. 16).
    pub microsteps: u16,
    /// Driver microstep counter, `0..MSCNT_RANGE`.
    pub mscnt: u16,
    /// Axis direction is inverted in the machine configuration.
    pub inverted: bool,
    pub steps_per_mm: f32,
}

impl StepperPhase {
    fn mm_per_step(&self) -> f32 {
        1.0 / self.steps_per_mm
    }

    fn cycle_steps(&self, cycles: u8) -> u32 {
        4 * u32::from(self.microsteps) * u32::from(cycles)
    }
}

/// Physical distance covered by `cycles` electrical cycles (4 full steps each).
pub fn distance_per_cycle(phase: &StepperPhase, cycles: u8) -> f32 {
    phase.cycle_steps(cycles) as f32 * phase.mm_per_step()
}

/// Forward shift needed to land on the next point where the driver's
/// microstep counter is zero, plus `cycles` whole electrical cycles.
pub fn distance_to_reset_point(phase: &StepperPhase, cycles: u8) -> f32 {
    let mscnt = if phase.inverted {
        MSCNT_RANGE - phase.mscnt.min(MSCNT_RANGE)
    } else {
        phase.mscnt
    };
    f32::from(mscnt) / (f32::from(phase.microsteps) * phase.steps_per_mm)
        + phase.cycle_steps(cycles) as f32 * phase.mm_per_step()
}

/// Number of lift cycles for the Z realignment: one if the nozzle is
/// already clear of the print by the full configured lift, else the full
/// configured count.
pub fn z_lift_cycles(z_dist: f32, phase: &StepperPhase, configured: u8) -> u8 {
    if z_dist >= distance_per_cycle(phase, configured) {
        1
    } else {
        configured
    }
}

// ---------------------------------------------------------------------------
// Escape and rehome moves
// ---------------------------------------------------------------------------

/// Target X for the horizontal escape move issued after the state is saved.
///
/// With a known X the head goes to the machine limit on the side of the
/// print area it is closer to. An unknown X gets a blind move one full span
/// towards the minimum endstop. A degenerate print area falls back to the
/// machine midpoint as the dividing line.
pub fn escape_target_x(current_x: f32, x_known: bool, area: &Rect, limits: &AxisLimits) -> f32 {
    if !x_known {
        return current_x - limits.x_span();
    }
    let towards_min = if area.is_degenerate() {
        current_x < (limits.x_min + limits.x_max) / 2.0
    } else {
        (current_x - area.a.x).abs() <= (area.b.x - current_x).abs()
    };
    if towards_min {
        limits.x_min
    } else {
        limits.x_max
    }
}

/// Extra Z lift requested from the X/Y rehome so the nozzle clears the print
/// by at least `homing_height`.
pub fn rehome_lift(current_z: f32, crash_z: f32, homing_height: f32) -> f32 {
    let z_dist = current_z - crash_z;
    if z_dist < homing_height {
        homing_height - z_dist
    } else {
        0.0
    }
}
