use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, Statement};

use crate::entities::inhibit::{Column, Entity};
use crate::error::Result;
use crate::store::Store;

impl Store {
    /// When the control id last produced a dispatch, if ever.
    pub async fn last_fired(&self, dedup_id: &str) -> Result<Option<DateTime<Utc>>> {
        let model = Entity::find_by_id(dedup_id).one(self.db()).await?;
        Ok(model.map(|m| m.fired_at.with_timezone(&Utc)))
    }

    /// Record a dispatch for the control id.
    pub async fn mark_fired(&self, dedup_id: &str, at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now().fixed_offset();
        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "INSERT INTO inhibits (dedup_id, fired_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(dedup_id) DO UPDATE SET \
                   fired_at = excluded.fired_at, updated_at = excluded.updated_at",
                [dedup_id.into(), at.fixed_offset().into(), now.into(), now.into()],
            ))
            .await?;
        Ok(())
    }

    /// Drop entries no inhibit window can still reference.
    pub async fn prune_inhibits(&self, before: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::FiredAt.lt(before.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
