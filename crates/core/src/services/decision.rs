//! Distribution decision engine.
//!
//! Everything here is pure: the same content, rule and destination always
//! produce the same [`Decision`], which is what lets live expansion and the
//! read-only rule preview share one code path.

use std::collections::HashSet;

use fanout_common::{AppError, AppResult};
use fanout_db::entities::{bot_chat, content, distribution_rule, pushed_record};
use fanout_db::entities::distribution_rule::{MatchConditions, NsfwPolicy, TagsMode};
use serde::Serialize;

/// Outcome class of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    WillPush,
    Filtered,
    PendingReview,
}

/// Machine-readable reason attached to every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    PlatformMismatch,
    TagsExcluded,
    TagsNotMatched,
    NsfwConditionMismatch,
    NsfwBlocked,
    NsfwSeparateUnconfiguredBlocked,
    ApprovalRequired,
    RuleMatched,
}

impl ReasonCode {
    /// Code stored in `last_error_type` columns.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlatformMismatch => "platform_mismatch",
            Self::TagsExcluded => "tags_excluded",
            Self::TagsNotMatched => "tags_not_matched",
            Self::NsfwConditionMismatch => "nsfw_condition_mismatch",
            Self::NsfwBlocked => "nsfw_blocked",
            Self::NsfwSeparateUnconfiguredBlocked => "nsfw_separate_unconfigured_blocked",
            Self::ApprovalRequired => "approval_required",
            Self::RuleMatched => "rule_matched",
        }
    }
}

/// Result of evaluating a content against a rule (and optionally a destination).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub bucket: Bucket,
    pub reason: ReasonCode,
    /// Chat id to post to, after NSFW routing. `None` when filtered or when
    /// no destination was given.
    pub routed_target_id: Option<String>,
}

impl Decision {
    const fn filtered(reason: ReasonCode) -> Self {
        Self {
            bucket: Bucket::Filtered,
            reason,
            routed_target_id: None,
        }
    }

    /// Whether the decision keeps a queue item alive.
    #[must_use]
    pub const fn is_deliverable(&self) -> bool {
        matches!(self.bucket, Bucket::WillPush | Bucket::PendingReview)
    }
}

/// A rule with its JSON conditions decoded.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: distribution_rule::Model,
    pub conditions: MatchConditions,
    pub auto_approve: Option<MatchConditions>,
}

impl CompiledRule {
    /// Decode a rule's conditions. A malformed rule is an error, never a
    /// silent skip.
    pub fn compile(rule: distribution_rule::Model) -> AppResult<Self> {
        let conditions = rule.conditions().map_err(|e| {
            AppError::Validation(format!(
                "rule {} has invalid match_conditions: {e}",
                rule.name
            ))
        })?;
        let auto_approve = rule.auto_approve().map_err(|e| {
            AppError::Validation(format!(
                "rule {} has invalid auto_approve_conditions: {e}",
                rule.name
            ))
        })?;
        Ok(Self {
            rule,
            conditions,
            auto_approve,
        })
    }
}

fn lowercase_set(tags: &[String]) -> HashSet<String> {
    tags.iter().map(|t| t.to_lowercase()).collect()
}

/// Steps 1 to 4: platform, excluded tags, required tags, NSFW flag.
pub fn check_conditions(
    conditions: &MatchConditions,
    content: &content::Model,
) -> Result<(), ReasonCode> {
    if let Some(platform) = &conditions.platform {
        if !platform.eq_ignore_ascii_case(&content.platform) {
            return Err(ReasonCode::PlatformMismatch);
        }
    }

    let tags = lowercase_set(&content.tag_list());

    if conditions
        .tags_exclude
        .iter()
        .any(|t| tags.contains(&t.to_lowercase()))
    {
        return Err(ReasonCode::TagsExcluded);
    }

    if !conditions.tags.is_empty() {
        let mut required = conditions.tags.iter().map(|t| t.to_lowercase());
        let matched = match conditions.tags_mode {
            TagsMode::Any => required.any(|t| tags.contains(&t)),
            TagsMode::All => required.all(|t| tags.contains(&t)),
        };
        if !matched {
            return Err(ReasonCode::TagsNotMatched);
        }
    }

    if let Some(is_nsfw) = conditions.is_nsfw {
        if is_nsfw != content.is_nsfw {
            return Err(ReasonCode::NsfwConditionMismatch);
        }
    }

    Ok(())
}

fn approval_gate(rule: &CompiledRule, content: &content::Model, routed: Option<String>) -> Decision {
    if rule.rule.approval_required && !content.review_status.is_approved() {
        return Decision {
            bucket: Bucket::PendingReview,
            reason: ReasonCode::ApprovalRequired,
            routed_target_id: routed,
        };
    }
    Decision {
        bucket: Bucket::WillPush,
        reason: ReasonCode::RuleMatched,
        routed_target_id: routed,
    }
}

/// Evaluate a rule without a destination.
///
/// NSFW routing is destination specific, so `separate_channel` passes here
/// and is settled by [`decide`].
#[must_use]
pub fn evaluate_rule(content: &content::Model, rule: &CompiledRule) -> Decision {
    if let Err(reason) = check_conditions(&rule.conditions, content) {
        return Decision::filtered(reason);
    }
    if content.is_nsfw && rule.rule.nsfw_policy == NsfwPolicy::Block {
        return Decision::filtered(ReasonCode::NsfwBlocked);
    }
    approval_gate(rule, content, None)
}

/// Full decision for one content, rule and destination.
#[must_use]
pub fn decide(content: &content::Model, rule: &CompiledRule, chat: &bot_chat::Model) -> Decision {
    if let Err(reason) = check_conditions(&rule.conditions, content) {
        return Decision::filtered(reason);
    }

    let mut routed = chat.chat_id.clone();
    if content.is_nsfw {
        match rule.rule.nsfw_policy {
            NsfwPolicy::Block => return Decision::filtered(ReasonCode::NsfwBlocked),
            NsfwPolicy::Allow => {}
            NsfwPolicy::SeparateChannel => match &chat.nsfw_chat_id {
                Some(alternate) if !alternate.is_empty() => routed = alternate.clone(),
                _ => return Decision::filtered(ReasonCode::NsfwSeparateUnconfiguredBlocked),
            },
        }
    }

    approval_gate(rule, content, Some(routed))
}

/// Whether a rule's auto-approval conditions accept the content.
#[must_use]
pub fn matches_auto_approval(rule: &CompiledRule, content: &content::Model) -> bool {
    rule.auto_approve
        .as_ref()
        .is_some_and(|conditions| check_conditions(conditions, content).is_ok())
}

/// Whether a pushed record still counts as a delivery of `content`.
///
/// A successful record is void only when the content was approved again
/// after it was pushed.
#[must_use]
pub fn is_already_delivered(record: &pushed_record::Model, content: &content::Model) -> bool {
    if record.push_status != pushed_record::PushStatus::Success {
        return false;
    }
    let reapproved = content.review_status.is_approved()
        && content
            .reviewed_at
            .is_some_and(|reviewed_at| reviewed_at > record.pushed_at);
    !reapproved
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use fanout_db::entities::content::{ContentStatus, ReviewStatus};
    use serde_json::{Value, json};

    fn content(tags: &[&str], is_nsfw: bool) -> content::Model {
        content::Model {
            id: "c1".to_string(),
            platform: "bilibili".to_string(),
            url: "https://bilibili.com/video/1".to_string(),
            canonical_url: "https://bilibili.com/video/1".to_string(),
            status: ContentStatus::ParseSuccess,
            review_status: ReviewStatus::Pending,
            tags: json!(tags),
            is_nsfw,
            source: None,
            title: None,
            body: None,
            cover_url: None,
            media_urls: json!([]),
            author_name: None,
            author_id: None,
            author_url: None,
            stats: json!({}),
            failure_count: 0,
            last_error: None,
            last_error_type: None,
            last_error_at: None,
            reviewed_at: None,
            reviewed_by: None,
            review_note: None,
            published_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn rule(conditions: Value, policy: NsfwPolicy, approval_required: bool) -> CompiledRule {
        CompiledRule::compile(distribution_rule::Model {
            id: "r1".to_string(),
            name: "tech".to_string(),
            description: None,
            match_conditions: conditions,
            nsfw_policy: policy,
            approval_required,
            auto_approve_conditions: None,
            rate_limit: None,
            time_window: None,
            priority: 0,
            enabled: true,
            created_at: Utc::now().into(),
            updated_at: None,
        })
        .unwrap()
    }

    fn chat(nsfw_chat_id: Option<&str>) -> bot_chat::Model {
        bot_chat::Model {
            id: "b1".to_string(),
            platform: "telegram".to_string(),
            chat_id: "-1001".to_string(),
            title: None,
            enabled: true,
            is_accessible: true,
            can_post: true,
            nsfw_chat_id: nsfw_chat_id.map(str::to_string),
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[test]
    fn test_tag_match_will_push() {
        let decision = decide(
            &content(&["tech"], false),
            &rule(json!({"tags": ["tech"], "tags_mode": "any"}), NsfwPolicy::Block, false),
            &chat(None),
        );
        assert_eq!(decision.bucket, Bucket::WillPush);
        assert_eq!(decision.reason, ReasonCode::RuleMatched);
        assert_eq!(decision.routed_target_id.as_deref(), Some("-1001"));
    }

    #[test]
    fn test_evaluation_order() {
        let c = content(&["Tech", "ad"], false);
        let r = rule(
            json!({"platform": "twitter", "tags_exclude": ["AD"]}),
            NsfwPolicy::Block,
            false,
        );
        assert_eq!(decide(&c, &r, &chat(None)).reason, ReasonCode::PlatformMismatch);

        let r = rule(json!({"tags_exclude": ["AD"], "tags": ["tech"]}), NsfwPolicy::Block, false);
        assert_eq!(decide(&c, &r, &chat(None)).reason, ReasonCode::TagsExcluded);
    }

    #[test]
    fn test_tags_all_mode() {
        let c = content(&["tech", "rust"], false);
        let all = rule(json!({"tags": ["tech", "go"], "tags_mode": "all"}), NsfwPolicy::Block, false);
        assert_eq!(decide(&c, &all, &chat(None)).reason, ReasonCode::TagsNotMatched);

        let any = rule(json!({"tags": ["tech", "go"]}), NsfwPolicy::Block, false);
        assert_eq!(decide(&c, &any, &chat(None)).bucket, Bucket::WillPush);
    }

    #[test]
    fn test_nsfw_condition_mismatch() {
        let r = rule(json!({"is_nsfw": false}), NsfwPolicy::Allow, false);
        assert_eq!(
            decide(&content(&[], true), &r, &chat(None)).reason,
            ReasonCode::NsfwConditionMismatch
        );
    }

    #[test]
    fn test_nsfw_policies() {
        let c = content(&[], true);

        let block = rule(json!({}), NsfwPolicy::Block, false);
        assert_eq!(decide(&c, &block, &chat(None)).reason, ReasonCode::NsfwBlocked);

        let allow = rule(json!({}), NsfwPolicy::Allow, false);
        let decision = decide(&c, &allow, &chat(Some("-2002")));
        assert_eq!(decision.routed_target_id.as_deref(), Some("-1001"));

        let separate = rule(json!({}), NsfwPolicy::SeparateChannel, false);
        let decision = decide(&c, &separate, &chat(Some("-2002")));
        assert_eq!(decision.bucket, Bucket::WillPush);
        assert_eq!(decision.routed_target_id.as_deref(), Some("-2002"));
    }

    #[test]
    fn test_nsfw_separate_channel_fails_closed() {
        let c = content(&[], true);
        let separate = rule(json!({}), NsfwPolicy::SeparateChannel, false);

        for target in [chat(None), chat(Some(""))] {
            let decision = decide(&c, &separate, &target);
            assert_eq!(decision.bucket, Bucket::Filtered);
            assert_eq!(decision.reason, ReasonCode::NsfwSeparateUnconfiguredBlocked);
            assert!(decision.routed_target_id.is_none());
        }
    }

    #[test]
    fn test_approval_gate() {
        let mut c = content(&["tech"], false);
        let r = rule(json!({"tags": ["tech"]}), NsfwPolicy::Block, true);

        let decision = decide(&c, &r, &chat(None));
        assert_eq!(decision.bucket, Bucket::PendingReview);
        assert_eq!(decision.reason, ReasonCode::ApprovalRequired);

        c.review_status = ReviewStatus::AutoApproved;
        assert_eq!(decide(&c, &r, &chat(None)).bucket, Bucket::WillPush);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let c = content(&["tech"], true);
        let r = rule(json!({"tags": ["tech"]}), NsfwPolicy::SeparateChannel, true);
        let target = chat(Some("-2002"));
        assert_eq!(decide(&c, &r, &target), decide(&c, &r, &target));
    }

    #[test]
    fn test_evaluate_rule_defers_routing() {
        let c = content(&[], true);
        let separate = rule(json!({}), NsfwPolicy::SeparateChannel, false);
        assert_eq!(evaluate_rule(&c, &separate).bucket, Bucket::WillPush);

        let block = rule(json!({}), NsfwPolicy::Block, false);
        assert_eq!(evaluate_rule(&c, &block).reason, ReasonCode::NsfwBlocked);
    }

    #[test]
    fn test_compile_rejects_malformed_conditions() {
        let mut model = rule(json!({}), NsfwPolicy::Block, false).rule;
        model.match_conditions = json!({"tags": "tech"});
        assert!(matches!(
            CompiledRule::compile(model),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_auto_approval() {
        let mut r = rule(json!({}), NsfwPolicy::Block, true);
        assert!(!matches_auto_approval(&r, &content(&["tech"], false)));

        r.auto_approve = Some(MatchConditions {
            tags: vec!["tech".to_string()],
            ..MatchConditions::default()
        });
        assert!(matches_auto_approval(&r, &content(&["TECH"], false)));
        assert!(!matches_auto_approval(&r, &content(&["news"], false)));
    }

    #[test]
    fn test_already_delivered_heuristic() {
        let pushed_at = Utc::now() - Duration::hours(1);
        let record = pushed_record::Model {
            id: "p1".to_string(),
            content_id: "c1".to_string(),
            target_id: "-1001".to_string(),
            platform: "telegram".to_string(),
            rule_id: None,
            queue_item_id: None,
            message_id: Some("1".to_string()),
            push_status: pushed_record::PushStatus::Success,
            pushed_at: pushed_at.into(),
        };

        let mut c = content(&[], false);
        c.review_status = ReviewStatus::Approved;
        c.reviewed_at = Some((pushed_at - Duration::minutes(5)).into());
        assert!(is_already_delivered(&record, &c));

        c.reviewed_at = Some(Utc::now().into());
        assert!(!is_already_delivered(&record, &c));

        // A later review that did not approve keeps the delivery.
        c.review_status = ReviewStatus::Pending;
        assert!(is_already_delivered(&record, &c));

        let mut failed = record;
        failed.push_status = pushed_record::PushStatus::Failed;
        assert!(!is_already_delivered(&failed, &content(&[], false)));
    }
}
