//! Opportunistic peripheral shutdown.
//!
//! Peripherals are powered down one per call, roughly in order of power
//! draw, while already-committed motion drains. The motion-gated wrapper
//! only runs a step while the planner still has work, so the step latency
//! hides behind moves that cannot be stopped any faster.

use log::warn;

use crate::app::ports::{MotionQueue, PeripheralPort};
use crate::fsm::PPState;

/// Shutdown steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownStep {
    Indicators = 0,
    Display = 1,
    LowPower = 2,
}

impl ShutdownStep {
    pub const COUNT: u8 = 3;

    fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::Indicators),
            1 => Some(Self::Display),
            2 => Some(Self::LowPower),
            _ => None,
        }
    }
}

/// Stepwise peripheral power-down. Not safe to drive from two contexts.
#[derive(Debug, Default)]
pub struct ShutdownSequencer {
    next: u8,
    overrun: Option<u8>,
}

impl ShutdownSequencer {
    pub const fn new() -> Self {
        Self {
            next: 0,
            overrun: None,
        }
    }

    /// Run one shutdown step. Returns `true` while steps remain. Once the
    /// sequence is done this is a no-op that keeps returning `false`.
    pub fn step(&mut self, hw: &mut impl PeripheralPort) -> bool {
        let Some(step) = ShutdownStep::from_index(self.next) else {
            return false;
        };
        match step {
            ShutdownStep::Indicators => hw.indicators_off(),
            ShutdownStep::Display => hw.display_off(),
            ShutdownStep::LowPower => hw.enter_low_power(),
        }
        self.next += 1;
        self.remaining()
    }

    /// Step only while motion is still queued. Returns whether moves remain
    /// afterwards, i.e. whether the caller should keep waiting.
    pub fn step_checked(&mut self, hw: &mut (impl MotionQueue + PeripheralPort), state: PPState) -> bool {
        if hw.moves_planned() == 0 {
            return false;
        }

        if hw.moves_planned() > 1 || hw.segment_progress() < 0.5 {
            self.step(hw);
        }

        let moves = hw.moves_planned();
        if moves == 0 && self.next > 0 {
            let step = self.next - 1;
            warn!("shutdown state {:?}/{} took too long", state, step);
            self.overrun = Some(step);
        }
        moves > 0
    }

    /// Run every remaining step.
    pub fn drain(&mut self, hw: &mut impl PeripheralPort) {
        while self.step(hw) {}
    }

    pub fn remaining(&self) -> bool {
        self.next < ShutdownStep::COUNT
    }

    /// Index of the step that last outlived the queued motion, once.
    pub fn take_overrun(&mut self) -> Option<u8> {
        self.overrun.take()
    }
}
