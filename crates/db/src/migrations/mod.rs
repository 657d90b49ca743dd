//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_content_table;
mod m20250101_000002_create_distribution_rule_table;
mod m20250101_000003_create_bot_chat_table;
mod m20250101_000004_create_distribution_target_table;
mod m20250101_000005_create_content_queue_item_table;
mod m20250101_000006_create_task_table;
mod m20250101_000007_create_pushed_record_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_content_table::Migration),
            Box::new(m20250101_000002_create_distribution_rule_table::Migration),
            Box::new(m20250101_000003_create_bot_chat_table::Migration),
            Box::new(m20250101_000004_create_distribution_target_table::Migration),
            Box::new(m20250101_000005_create_content_queue_item_table::Migration),
            Box::new(m20250101_000006_create_task_table::Migration),
            Box::new(m20250101_000007_create_pushed_record_table::Migration),
        ]
    }
}
