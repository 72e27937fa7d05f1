//! mediashelf - personal media library conversion service
//!
//! The library crate holds the conversion queue, its event channel and the
//! HTTP surface so integration tests can drive them without the binary.

pub mod config;
pub mod conversion;
pub mod events;
pub mod mirror;
pub mod server;
pub mod watch;
