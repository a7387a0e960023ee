use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY NOT NULL,
    content TEXT NOT NULL,
    meta TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '[]',
    origin TEXT NOT NULL DEFAULT '',
    event_type TEXT NOT NULL DEFAULT 'plain',
    ctl_id TEXT NOT NULL DEFAULT '',
    ctl_inhibit_interval TEXT NOT NULL DEFAULT '',
    ctl_recovery_after TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    group_ids TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
CREATE INDEX IF NOT EXISTS idx_events_ctl_id ON events(ctl_id);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);

CREATE TABLE IF NOT EXISTS event_groups (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    rule_snapshot TEXT NOT NULL,
    aggregate_key TEXT NOT NULL DEFAULT '',
    event_type TEXT NOT NULL DEFAULT 'plain',
    status TEXT NOT NULL DEFAULT 'collecting',
    event_count INTEGER NOT NULL DEFAULT 0,
    actions TEXT NOT NULL DEFAULT '[]',
    expected_ready_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
-- At most one collecting group per (rule, aggregate key, type); the
-- aggregator's find-or-insert races on this index.
CREATE UNIQUE INDEX IF NOT EXISTS ux_groups_collecting
    ON event_groups(rule_id, aggregate_key, event_type)
    WHERE status = 'collecting';
CREATE INDEX IF NOT EXISTS idx_groups_status ON event_groups(status);
CREATE INDEX IF NOT EXISTS idx_groups_updated_at ON event_groups(updated_at);

CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'enabled',
    match_rule TEXT NOT NULL DEFAULT '',
    ignore_rule TEXT NOT NULL DEFAULT '',
    aggregate_rule TEXT NOT NULL DEFAULT '',
    readiness TEXT NOT NULL DEFAULT 'delay',
    interval_secs INTEGER NOT NULL DEFAULT 30,
    actions TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_status ON rules(status);

CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    template_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'enabled',
    metas TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dingding_robots (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    token TEXT NOT NULL,
    secret TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_jobs (
    id TEXT PRIMARY KEY NOT NULL,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'wait',
    retry_count INTEGER NOT NULL DEFAULT 0,
    next_execute_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_jobs_status_next
    ON queue_jobs(status, next_execute_at);

CREATE TABLE IF NOT EXISTS locks (
    resource TEXT PRIMARY KEY NOT NULL,
    owner TEXT NOT NULL,
    lock_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recoveries (
    dedup_id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL DEFAULT '',
    group_id TEXT NOT NULL DEFAULT '',
    origin TEXT NOT NULL DEFAULT '',
    recovery_after_secs INTEGER NOT NULL DEFAULT 0,
    last_seen_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recoveries_last_seen ON recoveries(last_seen_at);

CREATE TABLE IF NOT EXISTS inhibits (
    dedup_id TEXT PRIMARY KEY NOT NULL,
    fired_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS inhibits;
DROP TABLE IF EXISTS recoveries;
DROP TABLE IF EXISTS locks;
DROP TABLE IF EXISTS queue_jobs;
DROP TABLE IF EXISTS dingding_robots;
DROP TABLE IF EXISTS users;
DROP TABLE IF EXISTS templates;
DROP TABLE IF EXISTS rules;
DROP TABLE IF EXISTS event_groups;
DROP TABLE IF EXISTS events;
";
