//! Business logic services.

#![allow(missing_docs)]

pub mod collaborators;
pub mod content;
pub mod decision;
pub mod distribution;
pub mod event_publisher;
pub mod jobs;
pub mod queue_item;
pub mod schedule;
pub mod task_queue;

pub use collaborators::{
    CollaboratorError, NormalizedContent, Parser, ParserService, PushRenderer,
    PushRendererService, PushTarget,
};
pub use content::{ContentService, CreateContentInput, ReviewAction};
pub use decision::{Bucket, CompiledRule, Decision, ReasonCode};
pub use distribution::{DistributionService, PreviewEntry};
pub use event_publisher::{EventPublisher, EventPublisherService, NoOpEventPublisher, StreamEvent};
pub use jobs::Job;
pub use queue_item::{QueueItemService, QueueStats};
pub use schedule::SpacingPolicy;
pub use task_queue::{ClaimedTask, TaskQueue, TaskStats};
