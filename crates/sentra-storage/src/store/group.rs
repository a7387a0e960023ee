use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Statement,
};

use sentra_common::types::{EventGroup, GroupAction, GroupRule, GroupStatus};

use crate::entities::event_group::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::Store;

fn to_group(m: event_group::Model) -> Result<EventGroup> {
    Ok(EventGroup {
        id: m.id,
        rule: serde_json::from_str(&m.rule_snapshot)?,
        aggregate_key: m.aggregate_key,
        event_type: m.event_type,
        status: m.status.parse().map_err(StorageError::Other)?,
        event_count: m.event_count,
        actions: serde_json::from_str(&m.actions)?,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    /// Find the collecting group for (rule, aggregate key, type), creating
    /// it if absent.
    ///
    /// The insert races against concurrent aggregators (a lapsed leader may
    /// still be mid-tick); the partial unique index on collecting groups
    /// makes `INSERT OR IGNORE` + re-select safe: exactly one row wins and
    /// every racer reads the winner back.
    pub async fn collecting_group(
        &self,
        rule: &GroupRule,
        aggregate_key: &str,
        event_type: &str,
        actions: &[GroupAction],
    ) -> Result<EventGroup> {
        let now = Utc::now().fixed_offset();
        let id = sentra_common::id::next_id();
        let snapshot = serde_json::to_string(rule)?;
        let actions_json = serde_json::to_string(actions)?;

        self.db()
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "INSERT OR IGNORE INTO event_groups \
                 (id, rule_id, rule_snapshot, aggregate_key, event_type, status, event_count, actions, expected_ready_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, 'collecting', 0, ?, ?, ?, ?)",
                [
                    id.into(),
                    rule.id.clone().into(),
                    snapshot.into(),
                    aggregate_key.into(),
                    event_type.into(),
                    actions_json.into(),
                    rule.expected_ready_at.fixed_offset().into(),
                    now.into(),
                    now.into(),
                ],
            ))
            .await?;

        let model = Entity::find()
            .filter(Column::RuleId.eq(&rule.id))
            .filter(Column::AggregateKey.eq(aggregate_key))
            .filter(Column::EventType.eq(event_type))
            .filter(Column::Status.eq(GroupStatus::Collecting.to_string()))
            .one(self.db())
            .await?
            .ok_or(StorageError::Other(
                "collecting group vanished between insert and select".to_string(),
            ))?;

        to_group(model)
    }

    pub async fn get_group(&self, id: &str) -> Result<Option<EventGroup>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_group).transpose()
    }

    /// Full-row replace, stamping `updated_at`.
    pub async fn update_group(&self, g: &EventGroup) -> Result<()> {
        let am = event_group::ActiveModel {
            id: Set(g.id.clone()),
            rule_id: Set(g.rule.id.clone()),
            rule_snapshot: Set(serde_json::to_string(&g.rule)?),
            aggregate_key: Set(g.aggregate_key.clone()),
            event_type: Set(g.event_type.clone()),
            status: Set(g.status.to_string()),
            event_count: Set(g.event_count),
            actions: Set(serde_json::to_string(&g.actions)?),
            expected_ready_at: Set(g.rule.expected_ready_at.fixed_offset()),
            created_at: Set(g.created_at.fixed_offset()),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        Entity::update(am).exec(self.db()).await?;
        Ok(())
    }

    pub async fn traverse_groups(&self, status: GroupStatus) -> Result<Vec<EventGroup>> {
        let models = Entity::find()
            .filter(Column::Status.eq(status.to_string()))
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        models.into_iter().map(to_group).collect()
    }

    pub async fn paginate_groups(
        &self,
        status: Option<GroupStatus>,
        rule_id: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<EventGroup>> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st.to_string()));
        }
        if let Some(rid) = rule_id {
            q = q.filter(Column::RuleId.eq(rid));
        }
        let models = q
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        models.into_iter().map(to_group).collect()
    }

    pub async fn count_groups(
        &self,
        status: Option<GroupStatus>,
        rule_id: Option<&str>,
    ) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st.to_string()));
        }
        if let Some(rid) = rule_id {
            q = q.filter(Column::RuleId.eq(rid));
        }
        Ok(q.count(self.db()).await?)
    }

    /// How many groups fired the given action since `since`, optionally
    /// narrowed to one trigger status.
    ///
    /// Action ids are snowflakes, so a coarse substring filter on the
    /// actions JSON prunes the scan; the exact check deserializes.
    pub async fn count_action_fires_since(
        &self,
        action_id: &str,
        since: DateTime<Utc>,
        status: &str,
    ) -> Result<i64> {
        let models = Entity::find()
            .filter(Column::Actions.contains(format!("\"{action_id}\"")))
            .filter(Column::UpdatedAt.gt(since.fixed_offset()))
            .all(self.db())
            .await?;

        let mut n = 0i64;
        for m in models {
            let actions: Vec<GroupAction> = serde_json::from_str(&m.actions)?;
            if actions.iter().any(|a| {
                a.id == action_id
                    && (status.is_empty() || a.trigger_status.to_string() == status)
            }) {
                n += 1;
            }
        }
        Ok(n)
    }

    /// `updated_at` of the most recent group that fired the action with the
    /// given status.
    pub async fn last_action_fire_at(
        &self,
        action_id: &str,
        status: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let models = Entity::find()
            .filter(Column::Actions.contains(format!("\"{action_id}\"")))
            .order_by(Column::UpdatedAt, Order::Desc)
            .limit(100)
            .all(self.db())
            .await?;

        for m in models {
            let actions: Vec<GroupAction> = serde_json::from_str(&m.actions)?;
            if actions.iter().any(|a| {
                a.id == action_id
                    && (status.is_empty() || a.trigger_status.to_string() == status)
            }) {
                return Ok(Some(m.updated_at.with_timezone(&Utc)));
            }
        }
        Ok(None)
    }
}
