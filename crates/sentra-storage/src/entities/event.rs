use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub content: String,
    /// JSON object.
    pub meta: String,
    /// JSON string array.
    pub tags: String,
    pub origin: String,
    pub event_type: String,
    pub ctl_id: String,
    pub ctl_inhibit_interval: String,
    pub ctl_recovery_after: String,
    pub status: String,
    /// JSON string array.
    pub group_ids: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
