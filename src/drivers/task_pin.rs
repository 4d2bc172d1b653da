//! Core-pinned spawning of the fault-processing task.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::spawn` creates a
//! FreeRTOS task pinned to a specific CPU core with explicit priority and
//! stack size. On non-ESP targets, falls back to a plain thread.
//!
//! `esp_pthread_set_cfg()` sets thread-local configuration that applies to
//! the *next* `pthread_create()` from the calling thread, so the
//! config→spawn pair must not be interleaved with other thread creation on
//! the same thread.

use std::io;
use std::thread::JoinHandle;

/// CPU core identifiers for the dual-core Xtensa targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU), protocol stacks.
    Pro = 0,
    /// Core 1 (APP_CPU), motion and the fault task.
    App = 1,
}

/// Where and how the fault task runs. It is created at high priority so
/// the interrupt handler's wake-up preempts the print loop; it demotes
/// itself once the panic sequence is underway.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
    /// Null-terminated, e.g. `"powerpanic\0"`.
    pub name: &'static str,
}

impl TaskSpec {
    pub const FAULT_TASK: Self = Self {
        core: Core::App,
        priority: 22,
        stack_kb: 8,
        name: "powerpanic\0",
    };
}

/// Spawn `f` according to `spec`.
#[cfg(target_os = "espidf")]
pub fn spawn_pinned<T: Send + 'static>(
    spec: TaskSpec,
    f: impl FnOnce() -> T + Send + 'static,
) -> io::Result<JoinHandle<T>> {
    use esp_idf_svc::sys::{ESP_OK, esp_create_default_pthread_config, esp_pthread_set_cfg};

    unsafe {
        let mut cfg = esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = i32::from(spec.priority);
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = spec.name.as_ptr().cast();
        let ret = esp_pthread_set_cfg(&cfg);
        if ret != ESP_OK as i32 {
            return Err(io::Error::other("esp_pthread_set_cfg failed"));
        }
    }

    let display_name = spec.name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new().name(display_name.into()).spawn(f)
}

/// Simulation fallback, ignores core affinity, priority and stack size
/// (host frames are much larger than on target).
#[cfg(not(target_os = "espidf"))]
pub fn spawn_pinned<T: Send + 'static>(
    spec: TaskSpec,
    f: impl FnOnce() -> T + Send + 'static,
) -> io::Result<JoinHandle<T>> {
    let display_name = spec.name.trim_end_matches('\0');
    log::info!("Spawning '{}' (sim, no core pinning)", display_name);

    std::thread::Builder::new().name(display_name.into()).spawn(f)
}
