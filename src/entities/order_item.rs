use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order_item_status::OrderItemStatus;

/// The `order_items` table. One row per drop-off within an order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub delivery_address: String,
    pub delivery_phone: String,
    pub delivery_notes: Option<String>,
    /// Courier currently responsible for this item, if any.
    pub courier_id: Option<Uuid>,
    /// Mirror of the current ledger row; written in the same transaction as the ledger.
    pub status: OrderItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    #[sea_orm(has_many = "super::order_item_status::Entity")]
    OrderItemStatuses,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::order_item_status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItemStatuses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
