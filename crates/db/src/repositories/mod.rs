//! Repositories, one per table.
//!
//! Methods that must run inside a caller's transaction take a
//! `&impl ConnectionTrait` instead of using the repository's own pool.

mod bot_chat;
mod content;
mod content_queue_item;
mod distribution_rule;
mod distribution_target;
mod pushed_record;
mod task;

pub use bot_chat::BotChatRepository;
pub use content::ContentRepository;
pub use content_queue_item::{ContentQueueItemRepository, QueueItemFilter};
pub use distribution_rule::DistributionRuleRepository;
pub use distribution_target::DistributionTargetRepository;
pub use pushed_record::PushedRecordRepository;
pub use task::TaskRepository;
