//! Common utilities and shared types for fanout.
//!
//! This crate provides foundational components used across all fanout crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//! - **Links**: URL canonicalisation and platform detection via [`canonicalize_url`]
//! - **Metrics**: Pipeline counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use fanout_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("{} workers, first id {}", config.worker.concurrency, id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod link;
pub mod metrics;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use link::{CanonicalLink, canonicalize_url, detect_platform, normalize_tags};
pub use metrics::{Metrics, MetricsSnapshot};
