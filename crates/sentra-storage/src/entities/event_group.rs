use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "event_groups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub rule_id: String,
    /// JSON-embedded rule snapshot; rule edits never reach in-flight groups.
    pub rule_snapshot: String,
    pub aggregate_key: String,
    pub event_type: String,
    pub status: String,
    pub event_count: i64,
    /// JSON array of group actions with their runtime statuses.
    pub actions: String,
    pub expected_ready_at: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
