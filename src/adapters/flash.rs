//! Flash adapters implementing [`FlashPort`].
//!
//! | Adapter          | Backend                                   |
//! |------------------|-------------------------------------------|
//! | `SimFlash`       | in-memory NOR model (host tests, bring-up) |
//! | `PartitionFlash` | ESP-IDF data partition (`espidf` only)     |
//!
//! Both follow the driver convention the store expects: operations return
//! nothing and a sticky error flag is read back with `fetch_error()`.

use log::{info, warn};

use crate::app::ports::FlashPort;

/// Operation kind, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Read,
    Program,
    Erase,
}

const SIM_SECTOR: usize = 4096;

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

/// NOR-flash model: erase sets a sector to `0xFF`, program can only clear
/// bits. Records every program call and can cut power mid-write.
pub struct SimFlash {
    base: u32,
    mem: Vec<u8>,
    error: bool,
    fail_next: Option<FlashOp>,
    /// Bytes that may still be programmed before power is lost.
    power_budget: Option<usize>,
    programs: Vec<(u32, usize)>,
    erases: Vec<u32>,
}

impl SimFlash {
    /// A fully erased device covering `base..base + size`.
    pub fn new(base: u32, size: usize) -> Self {
        info!("SimFlash: {} bytes at 0x{:08x}", size, base);
        Self {
            base,
            mem: vec![0xFF; size],
            error: false,
            fail_next: None,
            power_budget: None,
            programs: Vec::new(),
            erases: Vec::new(),
        }
    }

    /// Make the next operation of kind `op` fail.
    pub fn fail_next(&mut self, op: FlashOp) {
        self.fail_next = Some(op);
    }

    /// Lose power after `bytes` more bytes have been programmed. The
    /// program call that crosses the budget is truncated; everything after
    /// it is dropped without an error, as on a real brown-out.
    pub fn cut_power_after(&mut self, bytes: usize) {
        self.power_budget = Some(bytes);
    }

    /// Simulated reboot: power is back, memory contents are kept.
    pub fn restore_power(&mut self) {
        self.power_budget = None;
        self.error = false;
        self.fail_next = None;
    }

    /// Number of program calls that started at `addr`.
    pub fn programs_at(&self, addr: u32) -> usize {
        self.programs.iter().filter(|(a, _)| *a == addr).count()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of erases of the sector containing `addr`.
    pub fn erases_of(&self, addr: u32) -> usize {
        let sector = self.offset(addr).map(|o| o / SIM_SECTOR);
        self.erases
            .iter()
            .filter(|a| self.offset(**a).map(|o| o / SIM_SECTOR) == sector)
            .count()
    }

    /// Raw contents, for inspection.
    pub fn bytes(&self) -> &[u8] {
        &self.mem
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        (off < self.mem.len()).then_some(off)
    }

    fn injected(&mut self, op: FlashOp) -> bool {
        if self.fail_next == Some(op) {
            self.fail_next = None;
            self.error = true;
            return true;
        }
        false
    }

    fn powered_out(&self) -> bool {
        self.power_budget == Some(0)
    }
}

impl FlashPort for SimFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) {
        if self.injected(FlashOp::Read) {
            return;
        }
        match self.offset(addr) {
            Some(off) if off + buf.len() <= self.mem.len() => {
                buf.copy_from_slice(&self.mem[off..off + buf.len()]);
            }
            _ => self.error = true,
        }
    }

    fn program(&mut self, addr: u32, data: &[u8]) {
        if self.injected(FlashOp::Program) || self.powered_out() {
            return;
        }
        let Some(off) = self.offset(addr).filter(|o| o + data.len() <= self.mem.len()) else {
            self.error = true;
            return;
        };
        self.programs.push((addr, data.len()));

        let n = match self.power_budget.as_mut() {
            Some(budget) => {
                let n = data.len().min(*budget);
                *budget -= n;
                if n < data.len() {
                    warn!("SimFlash: power lost after {} of {} bytes", n, data.len());
                }
                n
            }
            None => data.len(),
        };
        for (cell, byte) in self.mem[off..off + n].iter_mut().zip(data) {
            *cell &= *byte;
        }
    }

    fn erase_sector(&mut self, addr: u32) {
        if self.injected(FlashOp::Erase) || self.powered_out() {
            return;
        }
        let Some(off) = self.offset(addr) else {
            self.error = true;
            return;
        };
        self.erases.push(addr);
        let start = off - off % SIM_SECTOR;
        let end = (start + SIM_SECTOR).min(self.mem.len());
        self.mem[start..end].fill(0xFF);
    }

    fn fetch_error(&mut self) -> bool {
        core::mem::take(&mut self.error)
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF partition backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::PartitionFlash;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::sys::*;
    use log::{error, info};

    use crate::app::ports::FlashPort;

    /// Raw access to a dedicated data partition. Addresses are offsets into
    /// the partition.
    pub struct PartitionFlash {
        part: *const esp_partition_t,
        error: bool,
    }

    // SAFETY: the partition descriptor is a static, read-only table entry
    // owned by ESP-IDF for the lifetime of the program.
    unsafe impl Send for PartitionFlash {}

    impl PartitionFlash {
        /// Look up the partition by label (null-terminated, e.g. `b"powerpanic\0"`).
        pub fn open(label: &'static [u8]) -> Option<Self> {
            // SAFETY: label is a null-terminated static string.
            let part = unsafe {
                esp_partition_find_first(
                    esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                    label.as_ptr().cast(),
                )
            };
            if part.is_null() {
                error!("PartitionFlash: partition not found");
                return None;
            }
            info!("PartitionFlash: opened");
            Some(Self { part, error: false })
        }

        fn record(&mut self, ret: esp_err_t) {
            if ret != ESP_OK {
                self.error = true;
            }
        }
    }

    impl FlashPort for PartitionFlash {
        fn read(&mut self, addr: u32, buf: &mut [u8]) {
            // SAFETY: buf is valid for buf.len() bytes; the driver bounds-checks.
            let ret = unsafe {
                esp_partition_read(self.part, addr as usize, buf.as_mut_ptr().cast(), buf.len())
            };
            self.record(ret);
        }

        fn program(&mut self, addr: u32, data: &[u8]) {
            // SAFETY: data is valid for data.len() bytes; the driver bounds-checks.
            let ret = unsafe {
                esp_partition_write(self.part, addr as usize, data.as_ptr().cast(), data.len())
            };
            self.record(ret);
        }

        fn erase_sector(&mut self, addr: u32) {
            // SAFETY: the range is one flash sector inside the partition.
            let ret = unsafe {
                esp_partition_erase_range(self.part, addr as usize, super::SIM_SECTOR)
            };
            self.record(ret);
        }

        fn fetch_error(&mut self) -> bool {
            core::mem::take(&mut self.error)
        }
    }
}
