use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    #[sea_orm(string_value = "PERCENT")]
    Percent,
    #[sea_orm(string_value = "FIXED")]
    Fixed,
}

/// A named discount rule. Created and edited by the admin collaborator; this
/// subsystem only reads it and snapshots its effect onto orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promo_codes")]
pub struct Model {
    /// Normalized (trimmed, uppercased) unique code.
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,

    pub discount_type: DiscountType,

    /// 1–100 for PERCENT; smallest currency units (≥ 1) for FIXED.
    pub value: i64,

    /// Toggle independent of the time window.
    pub is_active: bool,

    /// Inclusive validity window bounds; null means unbounded on that side.
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
