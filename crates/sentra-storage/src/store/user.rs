use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};

use crate::entities::user::{self, Column, Entity};
use crate::error::Result;
use crate::store::Store;

/// A notification recipient referenced by action `user_refs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub status: String,
    pub metas: Vec<UserMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Free-form key/value attached to a user (e.g. a personal webhook url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMeta {
    pub key: String,
    pub value: String,
}

fn to_row(m: user::Model) -> Result<UserRow> {
    Ok(UserRow {
        id: m.id,
        name: m.name,
        email: m.email,
        phone: m.phone,
        role: m.role,
        status: m.status,
        metas: serde_json::from_str(&m.metas)?,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    pub async fn insert_user(&self, u: &UserRow) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let am = user::ActiveModel {
            id: Set(u.id.clone()),
            name: Set(u.name.clone()),
            email: Set(u.email.clone()),
            phone: Set(u.phone.clone()),
            role: Set(u.role.clone()),
            status: Set(if u.status.is_empty() {
                "enabled".to_string()
            } else {
                u.status.clone()
            }),
            metas: Set(serde_json::to_string(&u.metas)?),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_row).transpose()
    }

    pub async fn find_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let models = Entity::find()
            .filter(Column::Id.is_in(ids.iter().cloned()))
            .all(self.db())
            .await?;
        models.into_iter().map(to_row).collect()
    }

    pub async fn list_users(&self, limit: u64, offset: u64) -> Result<Vec<UserRow>> {
        let models = Entity::find()
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        models.into_iter().map(to_row).collect()
    }
}
