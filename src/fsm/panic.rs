//! Panic state machine step function.
//!
//! Runs in the fault-processing task after the interrupt handler has
//! stopped motion. Strictly forward: a failed save is logged and reported,
//! never retried, and the machine always ends in `WaitingToDie`.

use log::{debug, error, info};

use crate::app::events::PanicEvent;
use crate::app::ports::{EventSink, FlashPort, PrinterPort};
use crate::isr::FaultIrq;
use crate::kinematics::{
    Axis, SoftEndstops, Xyze, distance_to_reset_point, escape_target_x, z_lift_cycles,
};

use super::PPState;
use super::context::PanicContext;

/// Run the logic for `state`. Returns `Some(next)` to transition.
pub fn step<F: FlashPort, P: PrinterPort>(
    state: PPState,
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
    sink: &mut impl EventSink,
) -> Option<PPState> {
    match state {
        // Not driven from the task: entered by prepare() / reset() / the ISR.
        PPState::Inactive | PPState::Prepared => None,
        PPState::Triggered => Some(triggered(ctx, hw, irq, sink)),
        PPState::Retracting => retracting(ctx, hw, irq, sink),
        PPState::SaveState => save_state(ctx, hw, irq, sink),
        PPState::WaitingToDie => {
            waiting_to_die(ctx, hw, irq);
            None
        }
    }
}

/// Advance the shutdown sequence behind queued motion. Returns `true` while
/// moves are still pending.
fn shutdown_checked<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    state: PPState,
    sink: &mut impl EventSink,
) -> bool {
    let busy = ctx.shutdown.step_checked(hw, state);
    if let Some(step) = ctx.shutdown.take_overrun() {
        sink.emit(&PanicEvent::ShutdownOverrun { state, step });
    }
    busy
}

fn triggered<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
    sink: &mut impl EventSink,
) -> PPState {
    if !ctx.staging.is_heavy() {
        info!("powerpanic triggered (light)");
        return PPState::Retracting;
    }
    debug!("powerpanic loop start");

    let cfg = &ctx.config;
    hw.set_stepper_current(Axis::X, cfg.x_current_ma);
    hw.set_stepper_current(Axis::E, cfg.e_current_ma);

    // Let a retract or park run from inside an interrupted homing move.
    hw.set_soft_endstops(SoftEndstops::widened(&cfg.machine_limits()));

    hw.enter_recovery();
    hw.reset_acceleration_rates();

    let motion = &ctx.staging.snapshot.motion;
    let printing = !motion.was_paused && !motion.was_crashed;
    if !irq.is_nested() && printing && hw.axis_known().all_homed() {
        let e = -cfg.retract_length_mm / hw.e_factor();
        hw.plan_move_by(Xyze::e_only(e), cfg.retract_feedrate_mm_s);
        hw.start_moving();
        shutdown_checked(ctx, hw, PPState::Triggered, sink);
    }

    info!("powerpanic triggered");
    PPState::Retracting
}

fn retracting<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
    sink: &mut impl EventSink,
) -> Option<PPState> {
    if shutdown_checked(ctx, hw, PPState::Retracting, sink) {
        return None;
    }
    if !ctx.staging.is_heavy() {
        return Some(PPState::SaveState);
    }

    hw.disable_e();

    let crash = &ctx.staging.snapshot.crash;
    let z_known = ctx.staging.orig_axis_known.has(Axis::Z) && crash.axis_known_position.has(Axis::Z);
    if !z_known {
        debug!("Z position unknown, skipping realignment");
        return Some(PPState::SaveState);
    }

    let z = hw.current_position().z;
    if irq.is_nested() && z == ctx.staging.snapshot.motion.z_position {
        debug!("Z already realigned by the previous fault");
        return Some(PPState::SaveState);
    }

    // Lift as little as sensibly possible to bring the driver phase to zero.
    let phase = hw.stepper_phase(Axis::Z);
    debug!("Z MSCNT start: {}", phase.mscnt);
    let z_dist = z - crash.crash_current_position.z;
    let cycles = z_lift_cycles(z_dist, &phase, ctx.config.z_lift_cycles);
    let shift = distance_to_reset_point(&phase, cycles);
    hw.plan_move_by(Xyze::z_only(shift), ctx.config.z_feedrate_mm_s);
    hw.start_moving();
    shutdown_checked(ctx, hw, PPState::Retracting, sink);

    Some(PPState::SaveState)
}

fn save_state<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
    sink: &mut impl EventSink,
) -> Option<PPState> {
    if shutdown_checked(ctx, hw, PPState::SaveState, sink) {
        return None;
    }

    if ctx.staging.is_heavy() {
        save_and_escape(ctx, hw, irq, sink);
    } else {
        info!("powerpanic: nothing to save");
    }

    // A fault arriving from here on is nested into the one just saved.
    irq.arm(hw);
    Some(PPState::WaitingToDie)
}

fn save_and_escape<F: FlashPort, P: PrinterPort>(
    ctx: &mut PanicContext<F>,
    hw: &mut P,
    irq: &FaultIrq,
    sink: &mut impl EventSink,
) {
    // Z is aligned now.
    hw.set_stepper_current(Axis::Z, ctx.config.z_current_ma);

    let snapshot = &mut ctx.staging.snapshot;
    let pos = hw.current_position();
    snapshot.motion.z_position = pos.z;
    snapshot.progress = hw.progress();
    snapshot.features.canceled_objects = hw.capture_features().canceled_objects;

    info!("powerpanic saving");
    match ctx.persist(&*hw) {
        Ok(()) => sink.emit(&PanicEvent::Saved),
        Err(e) => {
            error!("powerpanic: failed to save state: {}", e);
            sink.emit(&PanicEvent::SaveFailed(e));
        }
    }
    irq.set_nested(true);

    hw.commit_odometer();

    let x_known = ctx.staging.snapshot.crash.axis_known_position.has(Axis::X);
    if x_known && !hw.parked_in_tool_area() {
        hw.disable_xy_skew();
        let x = escape_target_x(
            pos.x,
            ctx.staging.orig_axis_known.has(Axis::X),
            &hw.print_area(),
            &ctx.config.machine_limits(),
        );
        hw.plan_move_to(Xyze { x, ..pos }, ctx.config.x_escape_feedrate_mm_s);
        hw.start_moving();
    }

    info!("powerpanic complete");
    hw.play_alert();
}

/// Drain the shutdown sequence, then hold before resetting so a short
/// mains dip does not restart the printer. Returns early if a new capture
/// is pending from the interrupt handler.
fn waiting_to_die<F: FlashPort, P: PrinterPort>(ctx: &mut PanicContext<F>, hw: &mut P, irq: &FaultIrq) {
    ctx.shutdown.drain(hw);
    if ctx.reset_issued {
        return;
    }

    let hold_reset = ctx.config.hold_reset_ms;
    let hold_max = ctx.config.hold_max_ms;
    loop {
        hw.feed_watchdog();
        if irq.pending() {
            debug!("powerpanic: nested fault during hold");
            return;
        }

        let elapsed = hw.now_ms().wrapping_sub(ctx.staging.fault_stamp_ms);
        let line_active = hw.fault_line_active();
        if (elapsed >= hold_reset && !line_active) || elapsed >= hold_max {
            info!("powerpanic: resetting after {} ms hold", elapsed);
            ctx.reset_issued = true;
            hw.system_reset();
            return;
        }
    }
}
