//! Unified error types for the power-panic subsystem.
//!
//! A single `Error` enum that every component converts into, keeping the
//! resume path's error handling uniform. All variants are `Copy` so they can
//! be passed through the state machines and event sink without allocation.
//!
//! The panic path never propagates these: a failed flash write is logged and
//! the sequence continues. The resume path treats every storage or layout
//! error as "no usable state".

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The flash driver reported a failed operation.
    Storage(StorageError),
    /// A persisted section could not be encoded or decoded.
    Layout(LayoutError),
    /// The resume sequence cannot proceed.
    Resume(ResumeError),
    /// An electrical fault was detected outside of normal panic handling.
    Fault(FaultError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Layout(e) => write!(f, "layout: {e}"),
            Self::Resume(e) => write!(f, "resume: {e}"),
            Self::Fault(e) => write!(f, "fault: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Raised when the flash driver's "last operation failed" predicate is set
/// after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    Program,
    Erase,
    Read,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Program => write!(f, "program failed"),
            Self::Erase => write!(f, "erase failed"),
            Self::Read => write!(f, "read failed"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Layout errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The frame header reads as erased flash.
    Erased,
    /// The frame was written by a firmware with a different layout.
    VersionMismatch { found: u8 },
    /// Declared or encoded length exceeds the section capacity.
    Oversized,
    /// Payload digest does not match the stored one.
    DigestMismatch,
    /// Serialisation into the frame buffer failed.
    Encode,
    /// Payload bytes do not deserialize.
    Decode,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erased => write!(f, "section erased"),
            Self::VersionMismatch { found } => write!(f, "layout version {found} not supported"),
            Self::Oversized => write!(f, "section exceeds capacity"),
            Self::DigestMismatch => write!(f, "digest mismatch"),
            Self::Encode => write!(f, "encode failed"),
            Self::Decode => write!(f, "decode failed"),
        }
    }
}

impl From<LayoutError> for Error {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

// ---------------------------------------------------------------------------
// Resume errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeError {
    /// No valid Variable section is stored.
    NoStoredState,
    /// `setup_auto_recover_check` has not loaded the stored sections.
    NotLoaded,
    /// The resume loop was driven again after `Finish` handed control back.
    LoopNotReset,
    /// The print-state machine refused the handoff.
    HandoffRefused,
}

impl fmt::Display for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStoredState => write!(f, "no stored state"),
            Self::NotLoaded => write!(f, "stored state not loaded"),
            Self::LoopNotReset => write!(f, "resume loop not reset"),
            Self::HandoffRefused => write!(f, "print handoff refused"),
        }
    }
}

impl From<ResumeError> for Error {
    fn from(e: ResumeError) -> Self {
        Self::Resume(e)
    }
}

// ---------------------------------------------------------------------------
// Electrical faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The AC-fault line was already active when the firmware booted.
    AcFaultAtStartup,
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcFaultAtStartup => write!(f, "AC fault active at startup"),
        }
    }
}

impl From<FaultError> for Error {
    fn from(e: FaultError) -> Self {
        Self::Fault(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
