//! Background processing for fanout.
//!
//! This crate runs the pipeline on top of the durable task queue:
//!
//! - **Workers**: Parse and distribute task execution
//! - **Scheduler**: Due-item dispatcher and janitor ticks
//! - **Retry**: Exponential backoff configuration
//! - **Pub/Sub**: Pipeline events over Redis
//! - **HTTP**: Parser and push renderer bridges

pub mod http;
pub mod pubsub;
pub mod retry;
pub mod scheduler;
pub mod workers;

pub use http::{HttpParser, HttpPushRenderer};
pub use pubsub::{RedisPubSub, channels as pubsub_channels};
pub use retry::RetryConfig;
pub use scheduler::{JanitorReport, JobExecutor, PipelineExecutor, SchedulerConfig, run_scheduler};
pub use workers::*;
