use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use sentra_common::types::{Rule, RuleStatus};

use crate::entities::rule::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::Store;

fn to_rule(m: rule::Model) -> Result<Rule> {
    let status = match m.status.as_str() {
        "enabled" => RuleStatus::Enabled,
        "disabled" => RuleStatus::Disabled,
        other => return Err(StorageError::Other(format!("unknown rule status: {other}"))),
    };
    let readiness = serde_json::from_str(&format!("\"{}\"", m.readiness))?;

    Ok(Rule {
        id: m.id,
        name: m.name,
        status,
        match_rule: m.match_rule,
        ignore_rule: m.ignore_rule,
        aggregate_rule: m.aggregate_rule,
        readiness,
        interval_secs: m.interval_secs,
        actions: serde_json::from_str(&m.actions)?,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn status_str(s: RuleStatus) -> &'static str {
    match s {
        RuleStatus::Enabled => "enabled",
        RuleStatus::Disabled => "disabled",
    }
}

fn readiness_str(r: &Rule) -> Result<String> {
    // serde gives the canonical lowercase name.
    let quoted = serde_json::to_string(&r.readiness)?;
    Ok(quoted.trim_matches('"').to_string())
}

impl Store {
    pub async fn insert_rule(&self, r: &Rule) -> Result<()> {
        let am = rule::ActiveModel {
            id: Set(r.id.clone()),
            name: Set(r.name.clone()),
            status: Set(status_str(r.status).to_string()),
            match_rule: Set(r.match_rule.clone()),
            ignore_rule: Set(r.ignore_rule.clone()),
            aggregate_rule: Set(r.aggregate_rule.clone()),
            readiness: Set(readiness_str(r)?),
            interval_secs: Set(r.interval_secs),
            actions: Set(serde_json::to_string(&r.actions)?),
            created_at: Set(r.created_at.fixed_offset()),
            updated_at: Set(r.updated_at.fixed_offset()),
        };
        Entity::insert(am).exec(self.db()).await?;
        Ok(())
    }

    pub async fn update_rule(&self, r: &Rule) -> Result<()> {
        let am = rule::ActiveModel {
            id: Set(r.id.clone()),
            name: Set(r.name.clone()),
            status: Set(status_str(r.status).to_string()),
            match_rule: Set(r.match_rule.clone()),
            ignore_rule: Set(r.ignore_rule.clone()),
            aggregate_rule: Set(r.aggregate_rule.clone()),
            readiness: Set(readiness_str(r)?),
            interval_secs: Set(r.interval_secs),
            actions: Set(serde_json::to_string(&r.actions)?),
            created_at: Set(r.created_at.fixed_offset()),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        Entity::update(am).exec(self.db()).await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_rule).transpose()
    }

    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let res = Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Enabled rules in creation order, which is the order matchers run in.
    pub async fn enabled_rules(&self) -> Result<Vec<Rule>> {
        let models = Entity::find()
            .filter(Column::Status.eq("enabled"))
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        models.into_iter().map(to_rule).collect()
    }

    pub async fn list_rules(
        &self,
        status: Option<RuleStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Rule>> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(status_str(st)));
        }
        let models = q
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        models.into_iter().map(to_rule).collect()
    }

    pub async fn count_rules(&self, status: Option<RuleStatus>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(status_str(st)));
        }
        Ok(q.count(self.db()).await?)
    }
}
