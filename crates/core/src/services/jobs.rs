//! Task payloads.
//!
//! Every row of the task queue carries one [`Job`] as JSON, tagged by
//! `action`.

use serde::{Deserialize, Serialize};

/// Priority of operator-triggered work.
pub const PRIORITY_MANUAL: i32 = 10;

/// Priority of pipeline work.
pub const PRIORITY_NORMAL: i32 = 0;

/// A unit of work for the worker loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Job {
    /// Parse a content through the external parser.
    Parse {
        content_id: String,
        /// Attempts already made.
        #[serde(default)]
        attempt: u32,
        max_attempts: u32,
        /// Re-parse content that already parsed successfully.
        #[serde(default)]
        force: bool,
    },
    /// Deliver one queue item now.
    Distribute {
        queue_item_id: String,
        /// Deliver even if the item or its content was already delivered.
        #[serde(default)]
        force: bool,
    },
}

impl Job {
    /// Value stored in `task.task_type`.
    #[must_use]
    pub const fn task_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Distribute { .. } => "distribute",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let job = Job::Parse {
            content_id: "c1".to_string(),
            attempt: 0,
            max_attempts: 3,
            force: false,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["action"], "parse");
        assert_eq!(value["content_id"], "c1");
        assert_eq!(job.task_type(), "parse");
    }

    #[test]
    fn test_defaults_on_decode() {
        let job: Job = serde_json::from_value(json!({
            "action": "distribute",
            "queue_item_id": "q1"
        }))
        .unwrap();
        assert_eq!(
            job,
            Job::Distribute {
                queue_item_id: "q1".to_string(),
                force: false
            }
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_value::<Job>(json!({"action": "render"})).is_err());
    }
}
