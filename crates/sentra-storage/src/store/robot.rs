use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{EntityTrait, Order, QueryOrder, QuerySelect};

use crate::entities::dingding_robot::{self, Column, Entity};
use crate::error::Result;
use crate::store::Store;

/// A configured DingTalk robot (webhook token + optional signing secret).
#[derive(Debug, Clone)]
pub struct DingRobotRow {
    pub id: String,
    pub name: String,
    pub token: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_row(m: dingding_robot::Model) -> DingRobotRow {
    DingRobotRow {
        id: m.id,
        name: m.name,
        token: m.token,
        secret: m.secret,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn insert_robot(&self, name: &str, token: &str, secret: &str) -> Result<DingRobotRow> {
        let now = Utc::now();
        let id = sentra_common::id::next_id();
        let am = dingding_robot::ActiveModel {
            id: Set(id.clone()),
            name: Set(name.to_string()),
            token: Set(token.to_string()),
            secret: Set(secret.to_string()),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(DingRobotRow {
            id,
            name: name.to_string(),
            token: token.to_string(),
            secret: secret.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_robot(&self, id: &str) -> Result<Option<DingRobotRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_robots(&self, limit: u64, offset: u64) -> Result<Vec<DingRobotRow>> {
        let models = Entity::find()
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(models.into_iter().map(to_row).collect())
    }
}
