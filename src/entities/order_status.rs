use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order-level delivery status.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "ACCEPTED")]
    Accepted,
    #[sea_orm(string_value = "ASSIGNED_TO_COURIER")]
    AssignedToCourier,
    #[sea_orm(string_value = "CONFIRMED_BY_COURIER")]
    ConfirmedByCourier,
    #[sea_orm(string_value = "PICKED_UP")]
    PickedUp,
    #[sea_orm(string_value = "IN_TRANSIT")]
    InTransit,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED_BY_CLIENT")]
    CancelledByClient,
    #[sea_orm(string_value = "CANCELLED_BY_COURIER")]
    CancelledByCourier,
    #[sea_orm(string_value = "CANCELLED_BY_ADMIN")]
    CancelledByAdmin,
}

impl OrderStatus {
    /// Delivered or cancelled by anyone.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::CancelledByClient
                | OrderStatus::CancelledByCourier
                | OrderStatus::CancelledByAdmin
        )
    }
}

/// The `order_statuses` ledger. Rows are only ever appended; `is_current`
/// is flipped off on older rows when a new one lands.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_statuses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    /// 1-based position of the row within its order's history.
    pub sequence: i32,
    pub status: OrderStatus,
    pub description: Option<String>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
