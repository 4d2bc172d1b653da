//! Board-level drivers used around the power-panic core.

pub mod fault_line;
pub mod task_pin;
