//! Mediashelf-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across mediashelf:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for conversion jobs
//! - **Path Utilities**: Video extension detection and conversion destinations
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use mediashelf_common::{ConversionJobId, Error, Result};
//! use mediashelf_common::paths::{destination_path_for, is_video_file};
//! use std::path::{Path, PathBuf};
//!
//! let job_id = ConversionJobId::new();
//!
//! assert!(is_video_file(Path::new("movie.mkv")));
//! assert_eq!(
//!     destination_path_for(Path::new("/media/movie.mkv")),
//!     PathBuf::from("/media/movie.mp4")
//! );
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("conversion_job"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::*;
