use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter, Statement};

use crate::entities::lock::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::Store;

/// A held (or observed) lease row.
#[derive(Debug, Clone)]
pub struct Lease {
    pub resource: String,
    pub owner: String,
    pub lock_id: String,
    pub expires_at: DateTime<Utc>,
}

fn to_lease(m: lock::Model) -> Lease {
    Lease {
        resource: m.resource,
        owner: m.owner,
        lock_id: m.lock_id,
        expires_at: m.expires_at.with_timezone(&Utc),
    }
}

impl Store {
    /// Acquire the lease: insert if absent, steal if expired, otherwise
    /// [`StorageError::AlreadyLocked`]. One statement, so two nodes racing
    /// on the same store see exactly one winner.
    pub async fn acquire_lock(
        &self,
        resource: &str,
        owner: &str,
        ttl_secs: i64,
    ) -> Result<Lease> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_secs);
        let lock_id = sentra_common::id::next_id();

        let res = self
            .db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "INSERT INTO locks (resource, owner, lock_id, expires_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(resource) DO UPDATE SET \
                   owner = excluded.owner, \
                   lock_id = excluded.lock_id, \
                   expires_at = excluded.expires_at, \
                   updated_at = excluded.updated_at \
                 WHERE locks.expires_at < ?",
                [
                    resource.into(),
                    owner.into(),
                    lock_id.clone().into(),
                    expires_at.fixed_offset().into(),
                    now.fixed_offset().into(),
                    now.fixed_offset().into(),
                    now.fixed_offset().into(),
                ],
            ))
            .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::AlreadyLocked);
        }

        Ok(Lease {
            resource: resource.to_string(),
            owner: owner.to_string(),
            lock_id,
            expires_at,
        })
    }

    /// Extend a held lease. [`StorageError::LockNotFound`] when the lease id
    /// no longer owns the row (expired and taken, or released).
    pub async fn renew_lock(&self, lock_id: &str, ttl_secs: i64) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_secs);

        let res = self
            .db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE locks SET expires_at = ?, updated_at = ? WHERE lock_id = ?",
                [
                    expires_at.fixed_offset().into(),
                    now.fixed_offset().into(),
                    lock_id.into(),
                ],
            ))
            .await?;

        if res.rows_affected() == 0 {
            return Err(StorageError::LockNotFound);
        }
        Ok(())
    }

    /// Release a held lease on graceful shutdown.
    pub async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let res = Entity::delete_many()
            .filter(Column::LockId.eq(lock_id))
            .exec(self.db())
            .await?;

        if res.rows_affected == 0 {
            return Err(StorageError::LockNotFound);
        }
        Ok(())
    }

    pub async fn get_lock(&self, resource: &str) -> Result<Option<Lease>> {
        let model = Entity::find_by_id(resource).one(self.db()).await?;
        Ok(model.map(to_lease))
    }
}
