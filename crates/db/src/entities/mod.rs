//! Database entities.

pub mod bot_chat;
pub mod content;
pub mod content_queue_item;
pub mod distribution_rule;
pub mod distribution_target;
pub mod pushed_record;
pub mod task;

pub use bot_chat::Entity as BotChat;
pub use content::Entity as Content;
pub use content_queue_item::Entity as ContentQueueItem;
pub use distribution_rule::Entity as DistributionRule;
pub use distribution_target::Entity as DistributionTarget;
pub use pushed_record::Entity as PushedRecord;
pub use task::Entity as Task;
