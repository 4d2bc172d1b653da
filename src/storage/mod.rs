//! Persistent store for the Fixed and Variable sections.
//!
//! [`FlashStore`] wraps a raw [`FlashPort`] and turns its "last operation
//! failed" predicate into typed errors. Write ordering is the caller's
//! contract: erase, Fixed (if needed), Variable, then [`FlashStore::commit`].
//! Only a committed validity byte makes [`FlashStore::state_stored`] true,
//! so any write cut short before the commit reads back as "no state".

pub mod frame;
pub mod layout;

use log::{debug, error};

use crate::app::ports::FlashPort;
use crate::error::{LayoutError, Result, StorageError};
use crate::snapshot::{FaultSnapshot, FixedSection, MediaPath};

use layout::{FRAME_MAX, FlashLayout, HEADER_LEN, LAYOUT_VERSION, SECTOR_SIZE};

pub struct FlashStore<F: FlashPort> {
    flash: F,
    layout: FlashLayout,
}

impl<F: FlashPort> FlashStore<F> {
    pub fn new(flash: F, layout: FlashLayout) -> Self {
        Self { flash, layout }
    }

    pub fn layout(&self) -> FlashLayout {
        self.layout
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn check(&mut self, kind: StorageError) -> core::result::Result<(), StorageError> {
        if self.flash.fetch_error() {
            Err(kind)
        } else {
            Ok(())
        }
    }

    // ── Erase ─────────────────────────────────────────────────

    /// Erase the whole reserved region.
    pub fn erase_all(&mut self) -> Result<()> {
        let mut addr = self.layout.base;
        while addr < self.layout.base + self.layout.size() {
            self.flash.erase_sector(addr);
            addr += SECTOR_SIZE;
        }
        self.check(StorageError::Erase)?;
        debug!("powerpanic store: region erased");
        Ok(())
    }

    /// Erase the Variable sector, which also clears the validity byte.
    pub fn erase_variable(&mut self) -> Result<()> {
        self.flash.erase_sector(self.layout.variable_addr());
        Ok(self.check(StorageError::Erase)?)
    }

    // ── Write ─────────────────────────────────────────────────

    fn write_frame<T: serde::Serialize>(&mut self, addr: u32, value: &T) -> Result<()> {
        let mut buf = [0u8; FRAME_MAX];
        let n = frame::encode(value, &mut buf)?;
        self.flash.program(addr, &buf[..n]);
        Ok(self.check(StorageError::Program)?)
    }

    /// Program the Fixed frame. The sector must be erased.
    pub fn write_fixed(&mut self, fixed: &FixedSection) -> Result<()> {
        self.write_frame(self.layout.fixed_addr(), fixed)
    }

    /// Program the Variable frame. The sector must be erased.
    pub fn write_variable(&mut self, snapshot: &FaultSnapshot) -> Result<()> {
        self.write_frame(self.layout.variable_addr(), snapshot)
    }

    /// Program the validity byte. Must be the last write of a save.
    pub fn commit(&mut self) -> Result<()> {
        self.flash
            .program(self.layout.validity_addr(), &[LAYOUT_VERSION]);
        Ok(self.check(StorageError::Program)?)
    }

    // ── Read ──────────────────────────────────────────────────

    /// True iff the validity byte is committed by this layout version.
    pub fn state_stored(&mut self) -> bool {
        let mut marker = [0u8; 1];
        self.flash.read(self.layout.validity_addr(), &mut marker);
        if self.flash.fetch_error() {
            error!("powerpanic store: failed to read validity marker");
            return false;
        }
        marker[0] == LAYOUT_VERSION
    }

    fn read_frame<T: serde::de::DeserializeOwned>(&mut self, addr: u32) -> Result<T> {
        let mut header = [0u8; HEADER_LEN];
        self.flash.read(addr, &mut header);
        self.check(StorageError::Read)?;

        let total = frame::frame_len(&header)?;
        if total > FRAME_MAX {
            return Err(LayoutError::Oversized.into());
        }
        let mut buf = [0u8; FRAME_MAX];
        self.flash.read(addr, &mut buf[..total]);
        self.check(StorageError::Read)?;

        Ok(frame::decode(&buf[..total])?)
    }

    pub fn load_fixed(&mut self) -> Result<FixedSection> {
        self.read_frame(self.layout.fixed_addr())
    }

    pub fn load_variable(&mut self) -> Result<FaultSnapshot> {
        self.read_frame(self.layout.variable_addr())
    }

    /// Media path from the Fixed section.
    pub fn load_media_path(&mut self) -> Result<MediaPath> {
        Ok(self.load_fixed()?.media_path)
    }
}
