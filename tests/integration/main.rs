//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one part of the
//! power-panic flow against the recording [`mock_printer::MockPrinter`]
//! and the simulated NOR flash. All tests run on the host with no real
//! hardware required.

mod resume_tests;
mod storage_tests;
