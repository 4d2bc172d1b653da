//! Byte layout of the reserved flash region.
//!
//! ```text
//! base ─▶ ┌──────────────────────────────┐
//!         │ sector 0: Fixed frame        │  written once per print
//!         ├──────────────────────────────┤
//!         │ sector 1: Variable frame     │  rewritten on every fault
//!         │                        ...   │
//!         │              validity byte ◀─┼─ last byte, programmed last
//!         └──────────────────────────────┘
//! ```
//!
//! A frame is `version: u8 | len: u16 LE | payload[len] | digest[8]`.

/// Erase granularity of the external NOR flash.
pub const SECTOR_SIZE: u32 = 4096;

/// Bumped whenever a persisted struct changes shape. A save written by a
/// different layout fails both the validity check and frame decoding.
pub const LAYOUT_VERSION: u8 = 1;

/// Value of erased NOR flash.
pub const ERASED: u8 = 0xFF;

pub const HEADER_LEN: usize = 3;
pub const DIGEST_LEN: usize = 8;

/// Largest frame (header + payload + digest) the store reads or writes.
pub const FRAME_MAX: usize = 1024;

pub const PAYLOAD_MAX: usize = FRAME_MAX - HEADER_LEN - DIGEST_LEN;

const _: () = assert!(FRAME_MAX < SECTOR_SIZE as usize);
const _: () = assert!(LAYOUT_VERSION != ERASED);

/// Placement of the reserved region on the flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    pub base: u32,
}

impl FlashLayout {
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    /// Total reserved size in bytes.
    pub const fn size(&self) -> u32 {
        2 * SECTOR_SIZE
    }

    pub const fn fixed_addr(&self) -> u32 {
        self.base
    }

    pub const fn variable_addr(&self) -> u32 {
        self.base + SECTOR_SIZE
    }

    pub const fn validity_addr(&self) -> u32 {
        self.base + 2 * SECTOR_SIZE - 1
    }
}
