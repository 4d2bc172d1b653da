//! Persisted state across simulated power cycles: torn writes, corrupt
//! frames, boot checks and print resets.

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin};
use powerpanic::adapters::flash::FlashOp;
use powerpanic::app::events::PanicEvent;
use powerpanic::app::ports::FlashPort;
use powerpanic::drivers::fault_line::FaultLine;
use powerpanic::error::{Error, FaultError, ResumeError, StorageError};
use powerpanic::fsm::PPState;
use powerpanic::isr::FaultIrq;

use crate::mock_printer::{
    MockPrinter, RecordingSink, blank_flash, fault_line, layout, reboot, run_panic, service_on,
};

#[test]
fn saved_state_survives_reboot() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    pp.prepare(&mut hw, &mut sink).unwrap();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);
    let before = pp.snapshot().clone();

    let mut pp = reboot(pp);

    assert!(pp.state_stored());
    assert_eq!(pp.stored_media_path().unwrap().as_str(), "/usb/BENCHY~1.GCO");
    assert_eq!(pp.store_mut().load_variable().unwrap(), before);
    assert_eq!(pp.panic_state(), PPState::Inactive);
}

#[test]
fn power_lost_mid_save_reads_as_no_state() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    pp.prepare(&mut hw, &mut sink).unwrap();
    // Enough for a few bytes of the Variable frame, never the marker.
    pp.store_mut().flash_mut().cut_power_after(40);

    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);

    let mut pp = reboot(pp);
    assert!(!pp.state_stored());

    let mut hw = hw.rebooted();
    assert_eq!(
        pp.setup_auto_recover_check(&mut hw, &FaultIrq::new()),
        Err(Error::Resume(ResumeError::NoStoredState))
    );
}

#[test]
fn corrupt_variable_frame_is_unusable() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);

    // Clear the length field: the digest no longer covers the same bytes.
    pp.store_mut()
        .flash_mut()
        .program(layout().variable_addr() + 1, &[0x00, 0x00]);

    let mut pp = reboot(pp);
    assert!(pp.state_stored());
    let mut hw = hw.rebooted();
    assert_eq!(
        pp.setup_auto_recover_check(&mut hw, &FaultIrq::new()),
        Err(Error::Resume(ResumeError::NoStoredState))
    );
}

#[test]
fn marker_from_another_layout_is_ignored() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);
    assert!(pp.state_stored());

    pp.store_mut()
        .flash_mut()
        .program(layout().validity_addr(), &[0x00]);

    assert!(!reboot(pp).state_stored());
}

#[test]
fn read_failure_means_no_state() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);

    let mut pp = reboot(pp);
    pp.store_mut().flash_mut().fail_next(FlashOp::Read);
    assert!(!pp.state_stored());
}

// ── Boot check ────────────────────────────────────────────────

#[test]
fn active_line_at_boot_without_state_is_fatal() {
    let mut pp = service_on(blank_flash());
    let mut line = fault_line(true);
    assert_eq!(
        pp.boot_check(&mut line),
        Err(Error::Fault(FaultError::AcFaultAtStartup))
    );
    // Every debounce sample agreed before the line counted as active.
    assert_eq!(line.release().reads, 3);
    assert_eq!(pp.boot_check(&mut fault_line(false)), Ok(()));
}

#[test]
fn active_line_at_boot_with_state_is_tolerated() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);

    let mut pp = reboot(pp);
    let mut line = fault_line(true);
    assert!(pp.is_ac_fault_active(&mut line));
    assert_eq!(pp.boot_check(&mut line), Ok(()));
}

/// Sense pin whose reads always fail.
struct BrokenPin;

impl ErrorType for BrokenPin {
    type Error = ErrorKind;
}

impl InputPin for BrokenPin {
    fn is_high(&mut self) -> Result<bool, ErrorKind> {
        Err(ErrorKind::Other)
    }

    fn is_low(&mut self) -> Result<bool, ErrorKind> {
        Err(ErrorKind::Other)
    }
}

#[test]
fn unreadable_line_at_boot_counts_as_active() {
    let mut pp = service_on(blank_flash());
    let mut line = FaultLine::new(BrokenPin, 3);
    assert!(pp.is_ac_fault_active(&mut line));
    assert_eq!(
        pp.boot_check(&mut line),
        Err(Error::Fault(FaultError::AcFaultAtStartup))
    );
}

// ── Print reset ───────────────────────────────────────────────

#[test]
fn reset_clears_state_and_rebases_odometer() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    irq.on_edge(&mut hw);
    run_panic(&mut pp, &mut hw, &irq, &mut sink);
    assert!(pp.state_stored());

    hw.odometer_e = 812.5;
    pp.reset(&mut hw, &irq, &mut sink).unwrap();

    assert!(!pp.state_stored());
    assert_eq!(pp.panic_state(), PPState::Inactive);
    assert!(!pp.panic_is_active(&irq));
    assert!(!irq.is_nested());
    assert!(irq.is_armed());
    assert!(sink.contains(&PanicEvent::Reset));
    assert_eq!(pp.snapshot().print.odometer_e_start, 812.5);
}

#[test]
fn reset_with_failing_erase_still_clears_memory() {
    let irq = FaultIrq::new();
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();
    pp.prepare(&mut hw, &mut sink).unwrap();
    pp.store_mut().flash_mut().fail_next(FlashOp::Erase);

    assert_eq!(
        pp.reset(&mut hw, &irq, &mut sink),
        Err(Error::Storage(StorageError::Erase))
    );
    assert_eq!(pp.panic_state(), PPState::Inactive);
}

#[test]
fn prepare_writes_fixed_without_marking_state() {
    let mut pp = service_on(blank_flash());
    let mut hw = MockPrinter::printing();
    let mut sink = RecordingSink::new();

    pp.prepare(&mut hw, &mut sink).unwrap();

    assert_eq!(pp.panic_state(), PPState::Prepared);
    assert!(sink.contains(&PanicEvent::Prepared));
    assert!(!pp.state_stored());
    assert_eq!(pp.stored_media_path().unwrap().as_str(), "/usb/BENCHY~1.GCO");
    assert_eq!(pp.store().flash().programs_at(layout().fixed_addr()), 1);
}
