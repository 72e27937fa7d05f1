//! Database query modules.
//!
//! - conversion_jobs: durable record of queued and running conversions

pub mod conversion_jobs;
