use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use sentra_common::types::{Event, EventControl, EventStatus};

use crate::entities::event::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::Store;

fn to_event(m: event::Model) -> Result<Event> {
    Ok(Event {
        id: m.id,
        content: m.content,
        meta: serde_json::from_str(&m.meta)?,
        tags: serde_json::from_str(&m.tags)?,
        origin: m.origin,
        event_type: m.event_type,
        control: EventControl {
            id: m.ctl_id,
            inhibit_interval: m.ctl_inhibit_interval,
            recovery_after: m.ctl_recovery_after,
        },
        status: m
            .status
            .parse()
            .map_err(StorageError::Other)?,
        group_ids: serde_json::from_str(&m.group_ids)?,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn to_active_model(e: &Event) -> Result<event::ActiveModel> {
    Ok(event::ActiveModel {
        id: Set(e.id.clone()),
        content: Set(e.content.clone()),
        meta: Set(serde_json::to_string(&e.meta)?),
        tags: Set(serde_json::to_string(&e.tags)?),
        origin: Set(e.origin.clone()),
        event_type: Set(e.event_type.clone()),
        ctl_id: Set(e.control.id.clone()),
        ctl_inhibit_interval: Set(e.control.inhibit_interval.clone()),
        ctl_recovery_after: Set(e.control.recovery_after.clone()),
        status: Set(e.status.to_string()),
        group_ids: Set(serde_json::to_string(&e.group_ids)?),
        created_at: Set(e.created_at.fixed_offset()),
        updated_at: Set(e.updated_at.fixed_offset()),
    })
}

impl Store {
    pub async fn insert_event(&self, e: &Event) -> Result<()> {
        let am = to_active_model(e)?;
        Entity::insert(am).exec(self.db()).await?;
        Ok(())
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_event).transpose()
    }

    /// Full-row replace, stamping `updated_at`.
    pub async fn update_event(&self, e: &Event) -> Result<()> {
        let mut am = to_active_model(e)?;
        am.updated_at = Set(Utc::now().fixed_offset());
        Entity::update(am).exec(self.db()).await?;
        Ok(())
    }

    /// All events with the given status, in insertion order. The aggregator
    /// relies on this order being stable so a re-run is idempotent.
    pub async fn traverse_events(&self, status: EventStatus) -> Result<Vec<Event>> {
        let models = Entity::find()
            .filter(Column::Status.eq(status.to_string()))
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        models.into_iter().map(to_event).collect()
    }

    pub async fn paginate_events(
        &self,
        status: Option<EventStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Event>> {
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
        models.into_iter().map(to_event).collect()
    }

    pub async fn count_events(&self, status: Option<EventStatus>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st.to_string()));
        }
        Ok(q.count(self.db()).await?)
    }

    /// Authoritative count of events referencing a group.
    ///
    /// `group_ids` is a JSON array of quoted snowflake ids, so a substring
    /// match on the quoted id cannot produce false positives.
    pub async fn count_events_in_group(&self, group_id: &str) -> Result<i64> {
        let n = Entity::find()
            .filter(Column::GroupIds.contains(format!("\"{group_id}\"")))
            .count(self.db())
            .await?;
        Ok(n as i64)
    }

    pub async fn events_in_group(
        &self,
        group_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Event>> {
        let models = Entity::find()
            .filter(Column::GroupIds.contains(format!("\"{group_id}\"")))
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        models.into_iter().map(to_event).collect()
    }

    /// Delete all but the newest `keep` events of a group. Used by the
    /// group-cut operation; the group's `event_count` is left untouched.
    pub async fn cut_group_events(&self, group_id: &str, keep: u64) -> Result<u64> {
        let victims: Vec<String> = Entity::find()
            .filter(Column::GroupIds.contains(format!("\"{group_id}\"")))
            .order_by(Column::CreatedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .offset(keep)
            .limit(i64::MAX as u64)
            .all(self.db())
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        if victims.is_empty() {
            return Ok(0);
        }

        let res = Entity::delete_many()
            .filter(Column::Id.is_in(victims))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
