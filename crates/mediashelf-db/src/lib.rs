//! Mediashelf-DB: Database schema, migrations, and query operations
//!
//! This crate provides the durable side of the conversion queue using SQLite
//! with rusqlite and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Conversion job model and its state machine
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use mediashelf_db::models::ConversionJob;
//! use mediashelf_db::pool::{get_conn, init_pool};
//! use mediashelf_db::queries::conversion_jobs;
//!
//! let pool = init_pool("/var/lib/mediashelf/db.sqlite").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let job = ConversionJob::new("/media/movie.mkv");
//! conversion_jobs::upsert_job(&conn, &job).unwrap();
//! println!("Persisted {} jobs", conversion_jobs::list_jobs(&conn).unwrap().len());
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
