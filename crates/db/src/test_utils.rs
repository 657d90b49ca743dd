//! Test utilities for database operations.
//!
//! [`TestDatabase::in_memory`] gives every test its own migrated SQLite
//! database (requires the `test-utils` feature). [`TestDatabase::postgres`]
//! connects to a real server configured through `TEST_DB_*` variables.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    Statement,
};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing::info;

use crate::migrations::Migrator;

/// Postgres test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER").unwrap_or_else(|_| "fanout_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "fanout_test".to_string()),
            database: std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "fanout_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// A migrated test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
}

impl TestDatabase {
    /// Create a fresh in-memory SQLite database with all migrations applied.
    ///
    /// The pool holds a single connection: an in-memory database lives only
    /// as long as its connection. Code under test must not hold a
    /// transaction while issuing queries on the pool.
    pub async fn in_memory() -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        Migrator::up(&conn, None).await?;

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Connect to the Postgres test database and apply migrations.
    pub async fn postgres() -> Result<Self, DbErr> {
        let config = TestDbConfig::default();
        let conn = Database::connect(&config.database_url()).await?;
        Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Connected to test database");

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Get a shared handle to the connection.
    #[must_use]
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        self.conn.clone()
    }

    /// Delete every row from every pipeline table (Postgres only).
    pub async fn cleanup(&self) -> Result<(), DbErr> {
        for table in [
            "pushed_record",
            "content_queue_item",
            "task",
            "distribution_target",
            "bot_chat",
            "distribution_rule",
            "content",
        ] {
            self.conn
                .execute(Statement::from_string(
                    DatabaseBackend::Postgres,
                    format!("TRUNCATE TABLE \"{table}\" CASCADE"),
                ))
                .await?;
        }

        info!("Cleaned up test database");
        Ok(())
    }
}

/// Row builders for seeding pipeline tables in tests.
pub mod fixtures {
    use chrono::{Duration, Utc};
    use fanout_common::IdGenerator;
    use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, IntoActiveModel};
    use serde_json::{Value, json};

    use crate::entities::content::{ContentStatus, ReviewStatus};
    use crate::entities::distribution_rule::NsfwPolicy;
    use crate::entities::{bot_chat, content, distribution_rule, distribution_target};

    /// Settings of a rule to insert. Defaults: no conditions, NSFW blocked,
    /// no approval, no rate limit, enabled.
    #[derive(Debug, Clone)]
    pub struct RuleFixture {
        pub name: String,
        pub priority: i32,
        pub conditions: Value,
        pub nsfw_policy: NsfwPolicy,
        pub approval_required: bool,
        pub auto_approve: Option<Value>,
        pub rate_limit: Option<i32>,
        pub time_window: Option<i32>,
        pub enabled: bool,
    }

    impl RuleFixture {
        /// A rule matching everything.
        #[must_use]
        pub fn new(name: &str, priority: i32) -> Self {
            Self {
                name: name.to_string(),
                priority,
                conditions: json!({}),
                nsfw_policy: NsfwPolicy::Block,
                approval_required: false,
                auto_approve: None,
                rate_limit: None,
                time_window: None,
                enabled: true,
            }
        }

        /// Replace the match conditions.
        #[must_use]
        pub fn conditions(mut self, conditions: Value) -> Self {
            self.conditions = conditions;
            self
        }

        /// Require approval before delivery.
        #[must_use]
        pub const fn approval_required(mut self) -> Self {
            self.approval_required = true;
            self
        }

        /// Set the NSFW policy.
        #[must_use]
        pub const fn nsfw_policy(mut self, policy: NsfwPolicy) -> Self {
            self.nsfw_policy = policy;
            self
        }

        /// Allow `limit` deliveries per `window_secs`.
        #[must_use]
        pub const fn rate_limit(mut self, limit: i32, window_secs: i32) -> Self {
            self.rate_limit = Some(limit);
            self.time_window = Some(window_secs);
            self
        }

        /// Auto-approve content matching `conditions`.
        #[must_use]
        pub fn auto_approve(mut self, conditions: Value) -> Self {
            self.auto_approve = Some(conditions);
            self
        }
    }

    /// Insert a rule.
    pub async fn insert_rule(
        db: &DatabaseConnection,
        rule: RuleFixture,
    ) -> Result<distribution_rule::Model, DbErr> {
        distribution_rule::Model {
            id: IdGenerator::new().generate(),
            name: rule.name,
            description: None,
            match_conditions: rule.conditions,
            nsfw_policy: rule.nsfw_policy,
            approval_required: rule.approval_required,
            auto_approve_conditions: rule.auto_approve,
            rate_limit: rule.rate_limit,
            time_window: rule.time_window,
            priority: rule.priority,
            enabled: rule.enabled,
            created_at: Utc::now().into(),
            updated_at: None,
        }
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
    }

    /// Insert a deliverable telegram chat with chat id `"@{name}"`.
    pub async fn insert_bot_chat(
        db: &DatabaseConnection,
        name: &str,
        nsfw_chat_id: Option<&str>,
    ) -> Result<bot_chat::Model, DbErr> {
        bot_chat::Model {
            id: IdGenerator::new().generate(),
            platform: "telegram".to_string(),
            chat_id: format!("@{name}"),
            title: Some(name.to_string()),
            enabled: true,
            is_accessible: true,
            can_post: true,
            nsfw_chat_id: nsfw_chat_id.map(str::to_string),
            created_at: Utc::now().into(),
            updated_at: None,
        }
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
    }

    /// Bind a rule to a chat.
    pub async fn insert_target(
        db: &DatabaseConnection,
        rule_id: &str,
        bot_chat_id: &str,
        merge_forward: bool,
    ) -> Result<distribution_target::Model, DbErr> {
        distribution_target::Model {
            id: IdGenerator::new().generate(),
            rule_id: rule_id.to_string(),
            bot_chat_id: bot_chat_id.to_string(),
            enabled: true,
            merge_forward,
            render_config: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
    }

    /// Insert a parsed content. Approved statuses are stamped as reviewed an
    /// hour ago, so later pushes count as deliveries.
    pub async fn insert_parsed_content(
        db: &DatabaseConnection,
        tags: &[&str],
        is_nsfw: bool,
        review_status: ReviewStatus,
    ) -> Result<content::Model, DbErr> {
        let id = IdGenerator::new().generate();
        let now = Utc::now();
        let reviewed_at = (review_status != ReviewStatus::Pending)
            .then(|| (now - Duration::hours(1)).into());
        content::Model {
            canonical_url: format!("https://example.com/post/{id}"),
            url: format!("https://example.com/post/{id}"),
            id,
            platform: "universal".to_string(),
            status: ContentStatus::ParseSuccess,
            review_status,
            tags: json!(tags),
            is_nsfw,
            source: None,
            title: Some("fixture".to_string()),
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
            reviewed_at,
            reviewed_by: None,
            review_note: None,
            published_at: None,
            created_at: now.into(),
            updated_at: None,
        }
        .into_active_model()
        .reset_all()
        .insert(db)
        .await
    }
}
