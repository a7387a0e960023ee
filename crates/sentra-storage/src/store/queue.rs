use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Statement,
};

use sentra_common::types::QueueJobStatus;

use crate::entities::queue_job::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::Store;

/// A row in the dispatch queue.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: String,
    pub queue: String,
    pub payload: String,
    pub status: QueueJobStatus,
    pub retry_count: i64,
    pub next_execute_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_job(m: queue_job::Model) -> Result<QueueJob> {
    Ok(QueueJob {
        id: m.id,
        queue: m.queue,
        payload: m.payload,
        status: m.status.parse().map_err(StorageError::Other)?,
        retry_count: m.retry_count,
        next_execute_at: m.next_execute_at.with_timezone(&Utc),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    /// Fire-and-forget enqueue. Ordering across items is best-effort.
    pub async fn enqueue_job(
        &self,
        queue: &str,
        payload: &str,
        next_execute_at: DateTime<Utc>,
    ) -> Result<QueueJob> {
        let now = Utc::now();
        let job = QueueJob {
            id: sentra_common::id::next_id(),
            queue: queue.to_string(),
            payload: payload.to_string(),
            status: QueueJobStatus::Wait,
            retry_count: 0,
            next_execute_at,
            created_at: now,
            updated_at: now,
        };

        let am = queue_job::ActiveModel {
            id: sea_orm::ActiveValue::Set(job.id.clone()),
            queue: sea_orm::ActiveValue::Set(job.queue.clone()),
            payload: sea_orm::ActiveValue::Set(job.payload.clone()),
            status: sea_orm::ActiveValue::Set(job.status.to_string()),
            retry_count: sea_orm::ActiveValue::Set(0),
            next_execute_at: sea_orm::ActiveValue::Set(next_execute_at.fixed_offset()),
            created_at: sea_orm::ActiveValue::Set(now.fixed_offset()),
            updated_at: sea_orm::ActiveValue::Set(now.fixed_offset()),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(job)
    }

    /// Jobs eligible to run: `wait` with `next_execute_at <= now`.
    pub async fn due_queue_jobs(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<QueueJob>> {
        let models = Entity::find()
            .filter(Column::Status.eq(QueueJobStatus::Wait.to_string()))
            .filter(Column::NextExecuteAt.lte(now.fixed_offset()))
            .order_by(Column::NextExecuteAt, Order::Asc)
            .limit(limit)
            .all(self.db())
            .await?;
        models.into_iter().map(to_job).collect()
    }

    /// Conditional wait → running transition. `false` means another worker
    /// got there first.
    pub async fn claim_queue_job(&self, id: &str) -> Result<bool> {
        let res = self
            .db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE queue_jobs SET status = 'running', updated_at = ? \
                 WHERE id = ? AND status = 'wait'",
                [Utc::now().fixed_offset().into(), id.into()],
            ))
            .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Terminal transition (`succeed`, `failed`, `canceled`).
    pub async fn finish_queue_job(&self, id: &str, status: QueueJobStatus) -> Result<()> {
        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE queue_jobs SET status = ?, updated_at = ? WHERE id = ?",
                [
                    status.to_string().into(),
                    Utc::now().fixed_offset().into(),
                    id.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    /// Put a failed job back in `wait` with a bumped retry count and a
    /// backoff deadline.
    pub async fn retry_queue_job(
        &self,
        id: &str,
        retry_count: i64,
        next_execute_at: DateTime<Utc>,
    ) -> Result<()> {
        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE queue_jobs SET status = 'wait', retry_count = ?, next_execute_at = ?, updated_at = ? \
                 WHERE id = ?",
                [
                    retry_count.into(),
                    next_execute_at.fixed_offset().into(),
                    Utc::now().fixed_offset().into(),
                    id.into(),
                ],
            ))
            .await?;
        Ok(())
    }

    pub async fn count_queue_jobs(&self, status: Option<QueueJobStatus>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st.to_string()));
        }
        Ok(q.count(self.db()).await?)
    }

    pub async fn paginate_queue_jobs(
        &self,
        status: Option<QueueJobStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<QueueJob>> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st.to_string()));
        }
        let models = q
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        models.into_iter().map(to_job).collect()
    }
}
