//! ESP-AT bridge firmware library.
//!
//! Exposes the UART protocol engine and its adapters for integration
//! testing.  All ESP-IDF-specific code is guarded by the `espidf` feature
//! or `#[cfg(target_os = "espidf")]`; the host build swaps in a simulated
//! modem.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod link;

mod pins;
