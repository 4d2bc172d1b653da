//! Fault-processing task.
//!
//! Parked on the [`FaultIrq`] signal until the interrupt handler fires.
//! Once woken it takes over the capture, gets other tasks out of the way on
//! a heavy fault, and drives the panic machine until the hold expires.
//!
//! The loop never sleeps between steps. Most other tasks are suspended or
//! demoted by then, so instead of a cooperative delay it kicks the main
//! task and calls straight back into the panic machine.

use std::io;
use std::thread::JoinHandle;

use futures_lite::future::block_on;
use log::{debug, info};

use crate::app::ports::{EventSink, FlashPort, PrinterPort, TaskControlPort};
use crate::app::service::{PanicStatus, PowerPanic};
use crate::drivers::task_pin::{TaskSpec, spawn_pinned};
use crate::isr::{FaultIrq, Severity};

/// Start the fault task per [`TaskSpec::FAULT_TASK`]. The task owns the
/// service, the printer handle and the sink from here on and hands the
/// first two back if it ever returns.
pub fn spawn_fault_task<F, P, S>(
    irq: &'static FaultIrq,
    mut service: PowerPanic<F>,
    mut hw: P,
    mut sink: S,
) -> io::Result<JoinHandle<(PowerPanic<F>, P)>>
where
    F: FlashPort + Send + 'static,
    P: PrinterPort + TaskControlPort + Send + 'static,
    S: EventSink + Send + 'static,
{
    spawn_pinned(TaskSpec::FAULT_TASK, move || {
        run_fault_task(irq, &mut service, &mut hw, &mut sink);
        (service, hw)
    })
}

/// Run the fault task body. Returns once a hardware reset was requested;
/// on a real target `system_reset` does not return and neither does this.
pub fn run_fault_task<F, P>(
    irq: &FaultIrq,
    service: &mut PowerPanic<F>,
    hw: &mut P,
    sink: &mut impl EventSink,
) where
    F: FlashPort,
    P: PrinterPort + TaskControlPort,
{
    loop {
        let capture = block_on(irq.wait());
        let heavy = capture.severity == Severity::Heavy;
        debug!("fault task woken ({:?})", capture.severity);
        service.accept_fault(capture, irq, sink);

        if heavy {
            // Workers may hold the hash peripheral or the flash bus.
            hw.suspend_workers();
            hw.demote_display();
        }
        hw.demote_self();

        if drive(irq, service, hw, sink) == PanicStatus::ResetIssued {
            info!("fault task: reset requested");
            return;
        }
    }
}

fn drive<F, P>(
    irq: &FaultIrq,
    service: &mut PowerPanic<F>,
    hw: &mut P,
    sink: &mut impl EventSink,
) -> PanicStatus
where
    F: FlashPort,
    P: PrinterPort + TaskControlPort,
{
    loop {
        match service.panic_loop(hw, irq, sink) {
            PanicStatus::Running => hw.kick_main_task(),
            status => return status,
        }
    }
}
