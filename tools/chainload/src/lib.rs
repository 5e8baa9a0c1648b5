//! Host tooling for the chainloader.
//!
//! Scans an SD card image directory for payloads, inspects payload images
//! against the load window, and dry-runs the full chain on the simulated
//! platform.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
