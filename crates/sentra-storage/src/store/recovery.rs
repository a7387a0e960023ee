use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Statement,
};

use sentra_common::types::Recovery;

use crate::entities::recovery::{self, Column, Entity};
use crate::error::Result;
use crate::store::Store;

fn to_recovery(m: recovery::Model) -> Recovery {
    Recovery {
        dedup_id: m.dedup_id,
        rule_id: m.rule_id,
        group_id: m.group_id,
        origin: m.origin,
        recovery_after_secs: m.recovery_after_secs,
        last_seen_at: m.last_seen_at.with_timezone(&Utc),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    /// Create or refresh the marker for a dedup id. Refreshing updates the
    /// source refs and `last_seen_at`; the deadline stays derived from
    /// `last_seen_at + recovery_after`, so only genuine silence fires.
    pub async fn upsert_recovery(&self, r: &Recovery) -> Result<()> {
        let now = Utc::now().fixed_offset();
        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "INSERT INTO recoveries \
                 (dedup_id, rule_id, group_id, origin, recovery_after_secs, last_seen_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(dedup_id) DO UPDATE SET \
                   rule_id = excluded.rule_id, \
                   group_id = excluded.group_id, \
                   origin = excluded.origin, \
                   recovery_after_secs = excluded.recovery_after_secs, \
                   last_seen_at = excluded.last_seen_at, \
                   updated_at = excluded.updated_at",
                [
                    r.dedup_id.clone().into(),
                    r.rule_id.clone().into(),
                    r.group_id.clone().into(),
                    r.origin.clone().into(),
                    r.recovery_after_secs.into(),
                    r.last_seen_at.fixed_offset().into(),
                    now.into(),
                    now.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    /// Refresh `last_seen_at` for an existing marker; a missing marker is a
    /// no-op (nothing to keep alive).
    pub async fn touch_recovery(&self, dedup_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE recoveries SET last_seen_at = ?, updated_at = ? WHERE dedup_id = ?",
                [
                    at.fixed_offset().into(),
                    Utc::now().fixed_offset().into(),
                    dedup_id.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    /// Markers whose quiet interval has fully elapsed. The table stays small
    /// (one row per live dedup id), so the deadline arithmetic runs here
    /// rather than in SQL.
    pub async fn due_recoveries(&self, now: DateTime<Utc>) -> Result<Vec<Recovery>> {
        let models = Entity::find()
            .order_by(Column::LastSeenAt, Order::Asc)
            .all(self.db())
            .await?;

        Ok(models
            .into_iter()
            .map(to_recovery)
            .filter(|r| r.last_seen_at + Duration::seconds(r.recovery_after_secs) < now)
            .collect())
    }

    pub async fn delete_recovery(&self, dedup_id: &str) -> Result<()> {
        Entity::delete_many()
            .filter(Column::DedupId.eq(dedup_id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn list_recoveries(&self, limit: u64, offset: u64) -> Result<Vec<Recovery>> {
        let models = Entity::find()
            .order_by(Column::LastSeenAt, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(models.into_iter().map(to_recovery).collect())
    }
}
