//! Resume state machine step function.
//!
//! Drives the printer from the loaded snapshot back into the print-state
//! machine's hands. Waiting states return `Ok(None)` while the planner or
//! command queue still has work. The only failures are a refused handoff
//! and being driven again after the handoff.

use core::fmt::Write as _;

use log::{error, info, warn};

use crate::app::ports::{FlashPort, HandoffKind, PrinterPort};
use crate::error::ResumeError;
use crate::isr::FaultIrq;
use crate::kinematics::{Axis, Xyze, rehome_lift};
use crate::snapshot::{FaultSnapshot, PauseResumeData};

use super::ResumeState;
use super::context::{PanicContext, motion_busy};

type Line = heapless::String<32>;

/// Which flow the print-state machine runs once control is handed back.
pub fn handoff_kind(snapshot: &FaultSnapshot) -> HandoffKind {
    if snapshot.features.toolchange.in_progress {
        HandoffKind::ToolCrash
    } else if snapshot.motion.was_paused {
        HandoffKind::Pause
    } else {
        HandoffKind::Replay
    }
}

/// Run the logic for `state`.
pub fn step<F: FlashPort, P: PrinterPort>(
    state: ResumeState,
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
) -> Result<Option<ResumeState>, ResumeError> {
    match state {
        ResumeState::Setup => {
            // Keep the bed from cooling further while the user decides.
            hw.set_target_bed(ctx.staging.snapshot.thermal.target_bed);
            Ok(None)
        }
        ResumeState::Resume => Ok(Some(resume(ctx, hw))),
        ResumeState::WaitForHeaters => {
            wait_for_heaters(&ctx.staging.snapshot, hw);
            Ok(Some(ResumeState::Unpark))
        }
        ResumeState::Unpark => Ok(unpark(ctx, hw)),
        ResumeState::ParkForPause => {
            if motion_busy(hw) {
                return Ok(None);
            }
            let cfg = &ctx.config;
            hw.plan_park_move(
                ctx.staging.snapshot.crash.start_current_position,
                cfg.park_xy_feedrate_mm_s,
                cfg.park_z_feedrate_mm_s,
            );
            Ok(Some(ResumeState::Finish))
        }
        ResumeState::Finish => finish(ctx, hw, irq),
        ResumeState::Error => {
            error!("resume loop not reset");
            Err(ResumeError::LoopNotReset)
        }
    }
}

fn resume<F: FlashPort, P: PrinterPort>(ctx: &mut PanicContext<F>, hw: &mut P) -> ResumeState {
    let snap = &ctx.staging.snapshot;
    let (motion, thermal, crash) = (&snap.motion, &snap.thermal, &snap.crash);

    if motion.was_paused {
        hw.set_resume_data(&PauseResumeData {
            pos: crash.crash_current_position,
            nozzle_temp: thermal.target_nozzle,
            fan_speed: thermal.fan_speed,
        });
    } else {
        hw.set_fan_speed(thermal.fan_speed);
        for (e, t) in thermal.target_nozzle.iter().enumerate() {
            hw.set_target_hotend(e, *t);
            hw.set_display_temp(e, *t);
        }
    }
    hw.set_target_bed(thermal.target_bed);
    hw.set_cold_extrusion(thermal.extrude_min_temp, thermal.allow_cold_extrude);

    hw.set_planner_settings(&motion.settings);
    hw.reset_acceleration_rates();
    hw.set_shaper(&motion.shaper);
    hw.set_pressure_advance(&motion.advance);

    // Z survives the reboot; X and Y are rehomed.
    let mut pos = hw.current_position();
    pos.z = motion.z_position;
    hw.set_position(pos);
    if crash.axis_known_position.has(Axis::Z) {
        hw.mark_homed(Axis::Z);
    }

    hw.restore_features(&snap.features);

    if snap.features.toolchange.in_progress {
        info!("fault hit a tool change, deferring to tool recovery");
        return ResumeState::Finish;
    }

    if crash.axis_known_position.has(Axis::X) || crash.axis_known_position.has(Axis::Y) {
        let lift = rehome_lift(pos.z, crash.crash_current_position.z, ctx.config.z_homing_height_mm);
        let mut cmd = Line::new();
        if write!(cmd, "G28 X Y D R{:.3}", lift).is_ok() {
            enqueue(hw, &cmd);
        }
    }

    if motion.was_paused {
        ResumeState::ParkForPause
    } else {
        ResumeState::WaitForHeaters
    }
}

fn enqueue(hw: &mut impl PrinterPort, line: &str) {
    if !hw.enqueue_gcode(line) {
        warn!("resume: gcode queue rejected '{}'", line);
    }
}

fn wait_for_heaters(snap: &FaultSnapshot, hw: &mut impl PrinterPort) {
    let mut cmd = Line::new();
    for (e, t) in snap.thermal.target_nozzle.iter().enumerate() {
        if *t != 0 {
            cmd.clear();
            if write!(cmd, "M109 S{} T{}", t, e).is_ok() {
                enqueue(hw, &cmd);
            }
        }
    }
    if snap.thermal.target_bed != 0 {
        cmd.clear();
        if write!(cmd, "M190 S{}", snap.thermal.target_bed).is_ok() {
            enqueue(hw, &cmd);
        }
    }
}

fn unpark<F: FlashPort, P: PrinterPort>(ctx: &mut PanicContext<F>, hw: &mut P) -> Option<ResumeState> {
    if motion_busy(hw) {
        return None;
    }
    let cfg = &ctx.config;
    let crash = &mut ctx.staging.snapshot.crash;

    if crash.inhibit_flags.inhibits_repositioning() {
        let here = hw.current_position();
        crash.crash_current_position = Xyze {
            e: crash.crash_current_position.e,
            ..here
        };
    }

    let known = crash.axis_known_position;
    if known.has(Axis::X) && known.has(Axis::Y) {
        hw.plan_park_move(
            crash.crash_current_position,
            cfg.park_xy_feedrate_mm_s,
            cfg.park_z_feedrate_mm_s,
        );
    }

    let e = cfg.retract_length_mm / hw.e_factor();
    hw.plan_move_by(Xyze::e_only(e), cfg.retract_feedrate_mm_s);

    Some(ResumeState::Finish)
}

fn finish<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
) -> Result<Option<ResumeState>, ResumeError> {
    if motion_busy(hw) {
        return Ok(None);
    }
    let snap = &ctx.staging.snapshot;
    let motion = &snap.motion;

    for e in 0..motion.flow_percentage.len() {
        hw.set_flow_percentage(e, motion.flow_percentage[e]);
        hw.set_advance_k(e, motion.advance_k[e]);
    }
    hw.set_axis_relative(motion.axis_relative);
    hw.set_shaper(&motion.shaper);
    hw.set_pressure_advance(&motion.advance);

    hw.restore_crash_record(&snap.crash);

    // The line stays masked until the stored state is cleared.
    irq.disarm(hw);
    let kind = handoff_kind(snap);
    if !hw.finish_recovery(kind) {
        error!("print handoff refused ({:?})", kind);
        return Err(ResumeError::HandoffRefused);
    }
    info!("resuming complete");
    Ok(Some(ResumeState::Error))
}
