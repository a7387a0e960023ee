use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect};

use crate::entities::template::{self, Column, Entity};
use crate::error::Result;
use crate::store::Store;

pub const TEMPLATE_TYPE_MATCH_RULE: &str = "match_rule";
pub const TEMPLATE_TYPE_TRIGGER_RULE: &str = "trigger_rule";

/// A predefined or user-saved expression snippet offered by the rule editor.
#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub content: String,
    pub template_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_row(m: template::Model) -> TemplateRow {
    TemplateRow {
        id: m.id,
        name: m.name,
        description: m.description,
        content: m.content,
        template_type: m.template_type,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    /// Seed helper: insert only when no template with the name exists.
    /// Returns whether a row was created.
    pub async fn insert_template_if_absent(
        &self,
        name: &str,
        description: &str,
        content: &str,
        template_type: &str,
    ) -> Result<bool> {
        let existing = Entity::find()
            .filter(Column::Name.eq(name))
            .one(self.db())
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let now = Utc::now().fixed_offset();
        let am = template::ActiveModel {
            id: Set(sentra_common::id::next_id()),
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            content: Set(content.to_string()),
            template_type: Set(template_type.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(true)
    }

    pub async fn list_templates(
        &self,
        template_type: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<TemplateRow>> {
        let mut q = Entity::find();
        if let Some(tt) = template_type {
            q = q.filter(Column::TemplateType.eq(tt));
        }
        let models = q
            .order_by(Column::CreatedAt, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(models.into_iter().map(to_row).collect())
    }
}
