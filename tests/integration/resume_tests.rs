//! Boot-time recovery: loading the saved state, the resume machine and the
//! handoff back to the print-state machine.

use powerpanic::adapters::flash::SimFlash;
use powerpanic::app::events::PanicEvent;
use powerpanic::app::ports::{HandoffKind, PrintPhase};
use powerpanic::error::{Error, ResumeError};
use powerpanic::fsm::{PPState, ResumeState};
use powerpanic::isr::FaultIrq;
use powerpanic::kinematics::{Axis, Xyze};
use powerpanic::snapshot::{InhibitFlags, PauseResumeData};
use powerpanic::{PanicStatus, PowerPanic};

use crate::mock_printer::{
    Call, MockPrinter, RecordingSink, blank_flash, layout, reboot, run_panic, service_on,
};

/// Run a print into a heavy fault, then power-cycle. Returns the rebooted
/// service and printer.
fn fault_and_reboot(mut hw: MockPrinter) -> (PowerPanic<SimFlash>, MockPrinter) {
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();
    let mut pp = service_on(blank_flash());
    pp.reset(&mut hw, &irq, &mut sink).unwrap();
    pp.prepare(&mut hw, &mut sink).unwrap();
    hw.odometer_e += 25.0;

    irq.on_edge(&mut hw);
    assert_eq!(run_panic(&mut pp, &mut hw, &irq, &mut sink), PanicStatus::ResetIssued);

    let booted = hw.rebooted();
    (reboot(pp), booted)
}

/// Drive the resume machine until it parks in `Error`, bounded.
fn drive_resume(
    pp: &mut PowerPanic<SimFlash>,
    hw: &mut MockPrinter,
    irq: &FaultIrq,
    sink: &mut RecordingSink,
) -> Result<(), Error> {
    for _ in 0..64 {
        pp.resume_loop(hw, irq, sink)?;
        if pp.resume_state() == ResumeState::Error {
            return Ok(());
        }
    }
    panic!("resume machine did not finish");
}

fn resume_route(sink: &RecordingSink) -> Vec<(ResumeState, ResumeState)> {
    sink.events
        .iter()
        .filter_map(|e| match e {
            PanicEvent::ResumeStateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[test]
fn mid_print_fault_replays_at_crash_position() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    assert!(pp.state_stored());
    assert_eq!(pp.setup_auto_recover_check(&mut hw, &irq), Ok(true));
    assert_eq!(hw.restored_progress.map(|p| p.percent_done), Some(42));
    assert_eq!(hw.area.a.x, 90.0);
    assert!(irq.is_nested());

    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    assert_eq!(
        hw.calls[0],
        Call::BeginResume {
            path: "/usb/BENCHY~1.GCO".into(),
            sdpos: 48_213,
            auto: true
        }
    );
    assert_eq!(hw.bed_target, 60);
    assert_eq!(pp.resume_state(), ResumeState::Resume);

    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();

    assert_eq!(
        resume_route(&sink),
        vec![
            (ResumeState::Setup, ResumeState::Resume),
            (ResumeState::Resume, ResumeState::WaitForHeaters),
            (ResumeState::WaitForHeaters, ResumeState::Unpark),
            (ResumeState::Unpark, ResumeState::Finish),
            (ResumeState::Finish, ResumeState::Error),
        ]
    );

    assert_eq!(hw.hotend_targets[0], 215);
    assert!(hw.calls.contains(&Call::MarkHomed(Axis::Z)));
    let gcode = hw.gcode();
    assert!(gcode[0].starts_with("G28 X Y D R"));
    assert!(gcode.contains(&"M109 S215 T0".to_string()));
    assert!(gcode.contains(&"M190 S60".to_string()));
    assert!(!gcode.iter().any(|g| g.contains("T1")));

    let parks = hw.parks();
    assert_eq!(parks.len(), 1);
    assert_eq!((parks[0].x, parks[0].y, parks[0].z), (120.0, 95.0, 4.2));
    assert!(hw.calls.contains(&Call::MoveBy(Xyze::e_only(2.0))));

    assert_eq!(hw.count(&Call::FinishRecovery(HandoffKind::Replay)), 1);
    assert_eq!(hw.restored_crash.map(|c| c.sdpos), Some(48_213));
    assert!(sink.contains(&PanicEvent::ResumeComplete(HandoffKind::Replay)));
}

#[test]
fn finished_resume_clears_variable_and_keeps_fixed() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();

    assert!(!pp.state_stored());
    assert_eq!(pp.panic_state(), PPState::Prepared);
    assert!(!irq.is_nested());
    assert!(irq.is_armed());
    assert!(hw.irq_enabled);
    assert_eq!(pp.stored_media_path().unwrap().as_str(), "/usb/BENCHY~1.GCO");
}

#[test]
fn fault_during_resume_holds_the_resume_machine() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    assert_eq!(pp.resume_state(), ResumeState::Resume);
    let gcode_before = hw.gcode();

    // Mains drops again before the first resume step.
    irq.on_edge(&mut hw);
    assert!(pp.panic_is_active(&irq));
    assert_eq!(pp.resume_loop(&mut hw, &irq, &mut sink), Ok(()));

    pp.panic_loop(&mut hw, &irq, &mut sink);
    assert_eq!(pp.panic_state(), PPState::Retracting);
    assert_eq!(pp.resume_loop(&mut hw, &irq, &mut sink), Ok(()));

    assert_eq!(pp.resume_state(), ResumeState::Resume);
    assert_eq!(hw.gcode(), gcode_before);
    assert_eq!(
        resume_route(&sink),
        vec![(ResumeState::Setup, ResumeState::Resume)]
    );
}

#[test]
fn paused_print_parks_at_pre_pause_position() {
    let mut hw = MockPrinter::printing();
    hw.phase = PrintPhase::Paused;
    hw.pause_position = 5_000;
    let mut nozzle = [0; 5];
    nozzle[0] = 210;
    let restore = Xyze {
        x: 130.0,
        y: 100.0,
        z: 4.2,
        e: 300.0,
    };
    hw.resume_data = PauseResumeData {
        pos: restore,
        nozzle_temp: nozzle,
        fan_speed: 100,
    };
    let park = Xyze {
        x: 10.0,
        y: 200.0,
        z: 24.2,
        e: 0.0,
    };
    hw.crash.start_current_position = park;

    let (mut pp, mut hw) = fault_and_reboot(hw);
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();

    assert_eq!(
        resume_route(&sink),
        vec![
            (ResumeState::Setup, ResumeState::Resume),
            (ResumeState::Resume, ResumeState::ParkForPause),
            (ResumeState::ParkForPause, ResumeState::Finish),
            (ResumeState::Finish, ResumeState::Error),
        ]
    );
    assert_eq!(hw.parks(), vec![park]);
    assert_eq!(hw.resume_data.pos, restore);
    assert_eq!(hw.resume_data.nozzle_temp[0], 210);
    // Heaters come back through the pause flow, not directly.
    assert_eq!(hw.hotend_targets[0], 0);
    assert_eq!(hw.count(&Call::FinishRecovery(HandoffKind::Pause)), 1);
}

#[test]
fn tool_change_defers_to_tool_recovery() {
    let mut hw = MockPrinter::printing();
    hw.features.toolchange.in_progress = true;
    hw.features.toolchange.from_tool = 0;
    hw.features.toolchange.to_tool = 2;

    let (mut pp, mut hw) = fault_and_reboot(hw);
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();

    assert!(hw.gcode().is_empty());
    assert!(hw.parks().is_empty());
    assert_eq!(hw.restored_features.map(|f| f.toolchange.to_tool), Some(2));
    assert_eq!(hw.count(&Call::FinishRecovery(HandoffKind::ToolCrash)), 1);
}

#[test]
fn inhibited_repositioning_parks_in_place() {
    let mut hw = MockPrinter::printing();
    hw.crash.inhibit_flags = InhibitFlags(InhibitFlags::INHIBIT_XYZ_REPOSITIONING);

    let (mut pp, mut hw) = fault_and_reboot(hw);
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    let saved_z = pp.snapshot().motion.z_position;
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();

    let parks = hw.parks();
    assert_eq!(parks.len(), 1);
    assert_eq!((parks[0].x, parks[0].y, parks[0].z), (0.0, 0.0, saved_z));
    let restored = hw.restored_crash.unwrap();
    assert_eq!(restored.crash_current_position.x, 0.0);
}

#[test]
fn manual_confirmation_holds_in_setup() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(false, &mut hw, &irq, &mut sink).unwrap();
    for _ in 0..5 {
        pp.resume_loop(&mut hw, &irq, &mut sink).unwrap();
    }
    assert_eq!(pp.resume_state(), ResumeState::Setup);
    assert_eq!(hw.bed_target, 60);

    pp.resume_continue(&mut sink);
    assert_eq!(pp.resume_state(), ResumeState::Resume);
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();
}

#[test]
fn cooled_bed_needs_confirmation() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    hw.bed_temp = 25.0;
    let irq = FaultIrq::new();

    assert_eq!(pp.setup_auto_recover_check(&mut hw, &irq), Ok(false));
}

#[test]
fn nothing_extruded_recovers_on_cold_bed() {
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    hw.odometer_e = 1_000.0;
    pp.reset(&mut hw, &irq, &mut sink).unwrap();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);

    let mut pp = crate::mock_printer::reboot(pp);
    let mut hw = hw.rebooted();
    hw.bed_temp = 20.0;
    let irq = FaultIrq::new();

    assert_eq!(pp.setup_auto_recover_check(&mut hw, &irq), Ok(true));
    assert_eq!(pp.snapshot().print.odometer_e_start, 1_000.0);
}

#[test]
fn refused_handoff_is_fatal() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    hw.handoff_ok = false;
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();

    assert_eq!(
        drive_resume(&mut pp, &mut hw, &irq, &mut sink),
        Err(Error::Resume(ResumeError::HandoffRefused))
    );
    assert_eq!(pp.resume_state(), ResumeState::Error);
    assert_eq!(
        pp.resume_loop(&mut hw, &irq, &mut sink),
        Err(Error::Resume(ResumeError::LoopNotReset))
    );
    // Nothing was cleared, the state is still on flash.
    assert!(pp.state_stored());
}

#[test]
fn resume_requires_loaded_state() {
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    assert_eq!(
        pp.resume_print(true, &mut hw, &irq, &mut sink),
        Err(Error::Resume(ResumeError::NotLoaded))
    );
    assert_eq!(
        pp.resume_loop(&mut hw, &irq, &mut sink),
        Err(Error::Resume(ResumeError::NotLoaded))
    );
    assert_eq!(
        pp.setup_auto_recover_check(&mut hw, &irq),
        Err(Error::Resume(ResumeError::NoStoredState))
    );
}

#[test]
fn fault_after_resume_skips_fixed_section() {
    let (mut pp, mut hw) = fault_and_reboot(MockPrinter::printing());
    let irq = FaultIrq::new();
    let mut sink = RecordingSink::new();

    pp.setup_auto_recover_check(&mut hw, &irq).unwrap();
    pp.resume_print(true, &mut hw, &irq, &mut sink).unwrap();
    drive_resume(&mut pp, &mut hw, &irq, &mut sink).unwrap();
    assert_eq!(pp.store().flash().programs_at(layout().fixed_addr()), 1);

    // Same print, second mains loss.
    hw.phase = PrintPhase::Printing;
    hw.sdpos = 90_001;
    irq.on_edge(&mut hw);
    assert_eq!(run_panic(&mut pp, &mut hw, &irq, &mut sink), PanicStatus::ResetIssued);

    assert!(pp.state_stored());
    assert_eq!(pp.store().flash().programs_at(layout().fixed_addr()), 1);
    assert_eq!(pp.store_mut().load_variable().unwrap().crash.sdpos, 90_001);
}
