//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises one part of the link engine against the
//! simulated ESP-AT modem.  All tests run on the host with no real
//! hardware required.

#![cfg(not(target_os = "espidf"))]

mod bringup_tests;
mod correlator_tests;
mod harness;
mod mode_tests;
mod reader_tests;
mod watchdog_tests;
