//! Fault snapshot and staging buffer.
//!
//! [`FaultSnapshot`] is the Variable-section payload: everything needed to
//! put the printer back where it was. It is grouped by origin (crash,
//! motion, thermal, feature, progress) so the interrupt handler copies each
//! group with one bounded read.
//!
//! [`Staging`] is the in-memory mirror owned by the fault-processing task.
//! The interrupt handler never touches it; it hands its copy over in a
//! [`FaultCapture`] and the task folds that in with [`Staging::absorb`].

use serde::{Deserialize, Serialize};

use crate::config::{HOTENDS, MEDIA_PATH_LEN, MESH_POINTS_X, MESH_POINTS_Y};
use crate::fsm::PPState;
use crate::isr::{FaultCapture, Severity};
use crate::kinematics::{AxisMask, Rect, Xyze};

/// Short-filename path of the file being printed.
pub type MediaPath = heapless::String<MEDIA_PATH_LEN>;

/// Bed-leveling mesh Z offsets, row-major.
pub type BedMesh = [[f32; MESH_POINTS_X]; MESH_POINTS_Y];

// ---------------------------------------------------------------------------
// Motion
// ---------------------------------------------------------------------------

/// Planner kinematic limits. Indexed X, Y, Z, E.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    pub max_acceleration_mm_per_s2: [u32; 4],
    pub max_feedrate_mm_s: [f32; 4],
    pub axis_steps_per_mm: [f32; 4],
    pub min_segment_time_us: u32,
    pub acceleration: f32,
    pub retract_acceleration: f32,
    pub travel_acceleration: f32,
    pub min_feedrate_mm_s: f32,
    pub min_travel_feedrate_mm_s: f32,
    pub max_jerk: Xyze,
    pub junction_deviation_mm: f32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_acceleration_mm_per_s2: [1250, 1250, 400, 4000],
            max_feedrate_mm_s: [200.0, 200.0, 12.0, 100.0],
            axis_steps_per_mm: [100.0, 100.0, 400.0, 280.0],
            min_segment_time_us: 20_000,
            acceleration: 1250.0,
            retract_acceleration: 1250.0,
            travel_acceleration: 1250.0,
            min_feedrate_mm_s: 0.0,
            min_travel_feedrate_mm_s: 0.0,
            max_jerk: Xyze {
                x: 8.0,
                y: 8.0,
                z: 2.0,
                e: 10.0,
            },
            junction_deviation_mm: 0.013,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisShaper {
    /// Shaper kind as understood by the motion firmware (ZV, MZV, EI, ...).
    pub kind: u8,
    pub frequency_hz: f32,
    pub damping_ratio: f32,
    pub vibration_reduction: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaperConfig {
    pub enabled: bool,
    pub x: AxisShaper,
    pub y: AxisShaper,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureAdvanceConfig {
    pub enabled: bool,
    pub smooth_time_s: f32,
}

/// Planner-side state captured by the interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCapture {
    pub settings: PlannerSettings,
    pub shaper: ShaperConfig,
    pub advance: PressureAdvanceConfig,
    /// Linear-advance K factor per hotend.
    pub advance_k: [f32; HOTENDS],
    pub flow_percentage: [i16; HOTENDS],
    pub axis_relative: bool,
    /// Z after the realignment lift; written in SaveState.
    pub z_position: f32,
    pub was_paused: bool,
    pub was_crashed: bool,
}

impl Default for MotionCapture {
    fn default() -> Self {
        Self {
            settings: PlannerSettings::default(),
            shaper: ShaperConfig::default(),
            advance: PressureAdvanceConfig::default(),
            advance_k: [0.0; HOTENDS],
            flow_percentage: [100; HOTENDS],
            axis_relative: false,
            z_position: 0.0,
            was_paused: false,
            was_crashed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Thermal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalCapture {
    pub target_nozzle: [i16; HOTENDS],
    pub target_bed: i16,
    pub fan_speed: u8,
    pub extrude_min_temp: i16,
    pub allow_cold_extrude: bool,
    /// Enabled segments of a modular heatbed.
    pub bedlet_mask: u16,
}

impl Default for ThermalCapture {
    fn default() -> Self {
        Self {
            target_nozzle: [0; HOTENDS],
            target_bed: 0,
            fan_speed: 0,
            extrude_min_temp: 170,
            allow_cold_extrude: false,
            bedlet_mask: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Replay inhibit flags kept by the motion-safety subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitFlags(pub u8);

impl InhibitFlags {
    pub const INHIBIT_PARTIAL_REPLAY: u8 = 1 << 0;
    pub const INHIBIT_XYZ_REPOSITIONING: u8 = 1 << 1;

    pub const fn inhibits_repositioning(self) -> bool {
        self.0 & Self::INHIBIT_XYZ_REPOSITIONING != 0
    }
}

/// Crash-recovery bookkeeping, owned by the motion-safety subsystem and
/// only copied here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrashRecord {
    /// Media offset of the instruction being aborted.
    pub sdpos: u32,
    /// Logical start position of that instruction.
    pub start_current_position: Xyze,
    /// Logical position of the crash (or the pause-restore position).
    pub crash_current_position: Xyze,
    /// Physical position of the crash.
    pub crash_position: Xyze,
    pub segments_finished: u16,
    pub axis_known_position: AxisMask,
    pub leveling_active: bool,
    pub fr_mm_s: f32,
    pub counter_crash: [u16; 2],
    pub counter_power_panic: u16,
    pub inhibit_flags: InhibitFlags,
}

/// Pause/resume bookkeeping kept by the print-state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PauseResumeData {
    pub pos: Xyze,
    pub nozzle_temp: [i16; HOTENDS],
    pub fan_speed: u8,
}

// ---------------------------------------------------------------------------
// Features, progress, print
// ---------------------------------------------------------------------------

/// Tool-changer state when a tool change was interrupted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolchangePrecrash {
    pub in_progress: bool,
    pub from_tool: u8,
    pub to_tool: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    /// Canceled-object bitmap.
    pub canceled_objects: u32,
    /// Logical-to-physical tool mapping.
    pub tool_mapping: [u8; HOTENDS],
    /// Spool-join chain, one entry per tool (`u8::MAX` = none).
    pub spool_join: [u8; HOTENDS],
    /// Media stream restore cursor.
    pub stream_cursor: u32,
    pub toolchange: ToolchangePrecrash,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub print_duration_s: u32,
    pub percent_done: u32,
    pub time_to_end_s: u32,
    pub time_to_pause_s: u32,
}

/// State that survives every fault until the print ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintState {
    /// E odometer value at print start.
    pub odometer_e_start: f32,
}

// ---------------------------------------------------------------------------
// Snapshot and sections
// ---------------------------------------------------------------------------

/// The Variable-section payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultSnapshot {
    pub crash: CrashRecord,
    pub motion: MotionCapture,
    pub thermal: ThermalCapture,
    pub progress: ProgressState,
    pub print: PrintState,
    pub features: FeatureState,
}

/// The Fixed-section payload, written once per print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedSection {
    pub print_area: Rect,
    pub mesh: BedMesh,
    pub media_path: MediaPath,
}

impl Default for FixedSection {
    fn default() -> Self {
        Self {
            print_area: Rect::default(),
            mesh: [[0.0; MESH_POINTS_X]; MESH_POINTS_Y],
            media_path: MediaPath::new(),
        }
    }
}

/// Groups the interrupt handler copies on the first heavy fault.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub media_path: MediaPath,
    pub crash: CrashRecord,
    pub motion: MotionCapture,
    pub thermal: ThermalCapture,
    pub features: FeatureState,
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// In-memory staging buffer, exclusively owned by the fault-processing task.
#[derive(Debug, Clone)]
pub struct Staging {
    pub severity: Severity,
    /// Panic state when the latest fault arrived.
    pub orig_state: PPState,
    /// Known-axes mask when the latest fault arrived.
    pub orig_axis_known: AxisMask,
    pub fault_stamp_ms: u32,
    /// The Fixed section for the current print is on flash.
    pub fixed_written: bool,
    pub media_path: MediaPath,
    pub snapshot: FaultSnapshot,
}

impl Default for Staging {
    fn default() -> Self {
        Self {
            severity: Severity::Light,
            orig_state: PPState::Inactive,
            orig_axis_known: AxisMask::NONE,
            fault_stamp_ms: 0,
            fixed_written: false,
            media_path: MediaPath::new(),
            snapshot: FaultSnapshot::default(),
        }
    }
}

impl Staging {
    /// Fold an interrupt capture into the buffer.
    ///
    /// A capture without state (nested fault or light path) only refreshes
    /// the timing fields, so an earlier snapshot is never overwritten.
    pub fn absorb(&mut self, capture: FaultCapture, current: PPState) {
        self.orig_state = current;
        self.fault_stamp_ms = capture.stamp_ms;
        self.orig_axis_known = capture.orig_axis_known;
        self.severity = self.severity.max(capture.severity);

        if let Some(c) = capture.state {
            self.media_path = c.media_path;
            self.snapshot.crash = c.crash;
            self.snapshot.motion = c.motion;
            self.snapshot.thermal = c.thermal;
            self.snapshot.features = c.features;
        }
    }

    /// Adopt sections loaded from flash on boot.
    pub fn load(&mut self, fixed: FixedSection, snapshot: FaultSnapshot) {
        self.media_path = fixed.media_path;
        self.snapshot = snapshot;
        self.fixed_written = true;
    }

    /// Drop everything except the print-start extrusion baseline.
    pub fn clear(&mut self) {
        let print = self.snapshot.print;
        *self = Self::default();
        self.snapshot.print = print;
    }

    pub fn is_heavy(&self) -> bool {
        self.severity == Severity::Heavy
    }
}
