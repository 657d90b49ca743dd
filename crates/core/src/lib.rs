//! Core business logic for fanout.
//!
//! The decision engine and schedule arithmetic are pure; the services on
//! top of them own every state transition of contents, queue items and
//! tasks.

pub mod services;

pub use services::*;
