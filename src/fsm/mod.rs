//! State machines of the power-panic subsystem.
//!
//! ```text
//!  PPState:      Inactive ─▶ Prepared ─▶ Triggered ─▶ Retracting ─▶ SaveState ─▶ WaitingToDie
//!                    └──────────────────────▲
//!
//!  ResumeState:  Setup ─▶ Resume ─┬▶ WaitForHeaters ─▶ Unpark ─┐
//!                                 ├▶ ParkForPause ─────────────┼▶ Finish ─▶ Error
//!                                 └────────────────────────────┘
//! ```
//!
//! The per-state logic lives in [`panic`] and [`resume`] as exhaustive
//! `match` step functions returning `Some(next)` to transition. [`Fsm`] is
//! the small engine that tracks the current state, time in state, and logs
//! every transition. Both machines always start at their first variant
//! after boot; only the data they act on is persisted.

pub mod context;
pub mod panic;
pub mod resume;

use core::fmt;

use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// A state enumeration driven by [`Fsm`].
pub trait StateId: Copy + Eq + fmt::Debug {
    /// Machine name used in transition logs.
    const MACHINE: &'static str;

    fn name(self) -> &'static str;
}

/// Panic phase. Strictly forward; ordered so that `>= Triggered` means a
/// fault is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PPState {
    Inactive = 0,
    Prepared = 1,
    Triggered = 2,
    Retracting = 3,
    SaveState = 4,
    WaitingToDie = 5,
}

impl StateId for PPState {
    const MACHINE: &'static str = "Panic";

    fn name(self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::Prepared => "Prepared",
            Self::Triggered => "Triggered",
            Self::Retracting => "Retracting",
            Self::SaveState => "SaveState",
            Self::WaitingToDie => "WaitingToDie",
        }
    }
}

/// Recovery phase after boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResumeState {
    Setup = 0,
    Resume = 1,
    WaitForHeaters = 2,
    Unpark = 3,
    ParkForPause = 4,
    Finish = 5,
    Error = 6,
}

impl StateId for ResumeState {
    const MACHINE: &'static str = "Resume";

    fn name(self) -> &'static str {
        match self {
            Self::Setup => "Setup",
            Self::Resume => "Resume",
            Self::WaitForHeaters => "WaitForHeaters",
            Self::Unpark => "Unpark",
            Self::ParkForPause => "ParkForPause",
            Self::Finish => "Finish",
            Self::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// Tracks the current state of one machine.
#[derive(Debug, Clone)]
pub struct Fsm<S: StateId> {
    current: S,
    /// Monotonically increasing tick counter.
    tick_count: u64,
    /// Tick at which the current state was entered.
    state_entry_tick: u64,
}

impl<S: StateId> Fsm<S> {
    pub const fn new(initial: S) -> Self {
        Self {
            current: initial,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Advance by one tick.
    ///
    /// `update` runs for the current state; if it returns `Some(next)` the
    /// engine moves there and reports `(from, to)`.
    pub fn tick(&mut self, update: impl FnOnce(S) -> Option<S>) -> Option<(S, S)> {
        self.tick_count += 1;
        let next = update(self.current)?;
        self.transition(next)
    }

    /// Jump to `next` regardless of the current state's logic (external
    /// events: a new fault, a reset, a resume confirmation).
    pub fn force_transition(&mut self, next: S) -> Option<(S, S)> {
        self.transition(next)
    }

    pub fn current_state(&self) -> S {
        self.current
    }

    /// How many ticks the machine has been in the current state.
    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    fn transition(&mut self, next: S) -> Option<(S, S)> {
        if next == self.current {
            return None;
        }
        let from = self.current;
        info!("{} transition: {} -> {}", S::MACHINE, from.name(), next.name());
        self.current = next;
        self.state_entry_tick = self.tick_count;
        Some((from, next))
    }
}
