use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::LifecycleConfig,
    db::DbPool,
    entities::{
        order, order_item, order_item_status, order_status, receipt, OrderItemStatus,
        OrderStatus,
    },
    errors::{CascadeFailure, ServiceError},
    services::{
        ledger::{self, ItemStatusMeta, StatusLedger},
        transitions::validate_item_transition,
        users::UserDirectory,
    },
};

const ORDER_CREATED_DESCRIPTION: &str = "Order created and is in draft state";
const ITEM_CREATED_NOTES: &str = "Order item created";

/// One drop-off in a new order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrderItem {
    #[validate(length(min = 1, max = 500, message = "Delivery address is required"))]
    pub delivery_address: String,
    #[validate(length(min = 3, max = 32, message = "Delivery phone is required"))]
    pub delivery_phone: String,
    #[validate(length(max = 1000))]
    pub delivery_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub client_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "Pickup address is required"))]
    pub pickup_address: String,
    #[validate(length(min = 1, message = "An order needs at least one item"))]
    pub items: Vec<NewOrderItem>,
}

impl CreateOrderRequest {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

/// Fields of an order that may change while it is still open.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Pickup address must not be empty"))]
    pub pickup_address: Option<String>,
}

/// An order item with its ledger.
#[derive(Debug, Clone, Serialize)]
pub struct OrderItemDetails {
    pub item: order_item::Model,
    pub current_status: Option<order_item_status::Model>,
    pub history: Vec<order_item_status::Model>,
}

/// Everything known about an order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub current_status: Option<order_status::Model>,
    pub history: Vec<order_status::Model>,
    pub items: Vec<OrderItemDetails>,
    pub receipt: Option<receipt::Model>,
}

/// Orchestrates order and order-item status changes.
#[derive(Clone)]
pub struct OrderLifecycleService {
    db: Arc<DbPool>,
    ledger: StatusLedger,
    users: Arc<dyn UserDirectory>,
    policy: LifecycleConfig,
}

impl OrderLifecycleService {
    pub fn new(
        db: Arc<DbPool>,
        ledger: StatusLedger,
        users: Arc<dyn UserDirectory>,
        policy: LifecycleConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            users,
            policy,
        }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// Creates an order with its items, each starting in DRAFT.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, items = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        request.validate_all()?;

        if self.users.find_user(request.client_id).await?.is_none() {
            warn!(client_id = %request.client_id, "Client not found");
            return Err(ServiceError::InvalidReference(format!(
                "Client {} not found",
                request.client_id
            )));
        }

        let db = &*self.db;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            client_id: Set(request.client_id),
            pickup_address: Set(request.pickup_address),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        ledger::append_order_status_in(
            &txn,
            order_id,
            OrderStatus::Draft,
            Some(ORDER_CREATED_DESCRIPTION.to_string()),
        )
        .await?;

        for new_item in request.items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                delivery_address: Set(new_item.delivery_address),
                delivery_phone: Set(new_item.delivery_phone),
                delivery_notes: Set(new_item.delivery_notes),
                courier_id: Set(None),
                status: Set(OrderItemStatus::Draft),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            ledger::append_item_status_in(
                &txn,
                item,
                OrderItemStatus::Draft,
                ItemStatusMeta {
                    notes: Some(ITEM_CREATED_NOTES.to_string()),
                    updated_by: Some(request.client_id),
                },
            )
            .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order created");
        self.get_order(order_id).await
    }

    /// Appends a status to the order's ledger. Order-level moves are not
    /// checked against any table.
    ///
    /// PICKED_UP also moves every item of the order. Items that cannot move
    /// are reported through `ServiceError::PartialCascade`; the order's own
    /// row and any items that did move stay written.
    #[instrument(skip(self, description), fields(order_id = %order_id, status = %status))]
    pub async fn set_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        description: Option<String>,
    ) -> Result<order_status::Model, ServiceError> {
        let row = self
            .ledger
            .append_order_status(order_id, status, description)
            .await?;

        if status == OrderStatus::PickedUp {
            self.cascade_picked_up(order_id).await?;
        }

        Ok(row)
    }

    async fn cascade_picked_up(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?;

        let mut succeeded = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for item in items {
            let notes = Some("Order picked up".to_string());
            let outcome = if self.policy.cascade_enforces_item_transitions {
                self.set_order_item_status(item.id, OrderItemStatus::PickedUp, notes, None)
                    .await
            } else {
                self.ledger
                    .append_item_status(
                        item.id,
                        OrderItemStatus::PickedUp,
                        ItemStatusMeta {
                            notes,
                            updated_by: None,
                        },
                    )
                    .await
            };

            match outcome {
                Ok(_) => succeeded.push(item.id),
                Err(e) => failed.push(CascadeFailure {
                    order_item_id: item.id,
                    reason: e.to_string(),
                }),
            }
        }

        if failed.is_empty() {
            info!(order_id = %order_id, items = succeeded.len(), "Pick-up cascaded to items");
            return Ok(());
        }

        warn!(
            order_id = %order_id,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "Pick-up cascade partially applied"
        );
        Err(ServiceError::PartialCascade {
            order_id,
            succeeded,
            failed,
        })
    }

    /// Moves an item to `status` if the transition table allows it.
    #[instrument(skip(self, notes), fields(order_item_id = %order_item_id, status = %status))]
    pub async fn set_order_item_status(
        &self,
        order_item_id: Uuid,
        status: OrderItemStatus,
        notes: Option<String>,
        actor_id: Option<Uuid>,
    ) -> Result<order_item_status::Model, ServiceError> {
        let _guard = self.ledger.locks().acquire(order_item_id).await;
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for item status change");
            ServiceError::DatabaseError(e)
        })?;

        let item = ledger::find_order_item(&txn, order_item_id).await?;
        check_item_transition(&txn, order_item_id, status).await?;

        let row = ledger::append_item_status_in(
            &txn,
            item,
            status,
            ItemStatusMeta {
                notes,
                updated_by: actor_id,
            },
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit item status change");
            ServiceError::DatabaseError(e)
        })?;

        Ok(row)
    }

    /// Hands an item to a courier and moves it to ASSIGNED.
    #[instrument(skip(self), fields(order_item_id = %order_item_id, courier_id = %courier_id))]
    pub async fn assign_courier(
        &self,
        order_item_id: Uuid,
        courier_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        let courier = self.users.find_user(courier_id).await?.ok_or_else(|| {
            warn!(courier_id = %courier_id, "Courier not found");
            ServiceError::InvalidReference(format!("Courier {} not found", courier_id))
        })?;
        if !courier.is_courier() {
            warn!(courier_id = %courier_id, user_type = %courier.user_type, "User is not a courier");
            return Err(ServiceError::InvalidReference(format!(
                "User {} is not a courier",
                courier_id
            )));
        }

        let _guard = self.ledger.locks().acquire(order_item_id).await;
        let txn = self.db.begin().await?;

        let item = ledger::find_order_item(&txn, order_item_id).await?;
        check_item_transition(&txn, order_item_id, OrderItemStatus::Assigned).await?;

        let item = set_courier(&txn, item, Some(courier_id)).await?;
        ledger::append_item_status_in(
            &txn,
            item,
            OrderItemStatus::Assigned,
            ItemStatusMeta {
                notes: Some(format!("Assigned to courier {}", courier_id)),
                updated_by: None,
            },
        )
        .await?;
        let item = ledger::find_order_item(&txn, order_item_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit courier assignment");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_item_id = %order_item_id, courier_id = %courier_id, "Courier assigned");
        Ok(item)
    }

    /// Clears the courier and puts the item back to ACCEPTED. This path
    /// does not consult the transition table.
    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn unassign_courier(
        &self,
        order_item_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        let _guard = self.ledger.locks().acquire(order_item_id).await;
        let txn = self.db.begin().await?;

        let item = ledger::find_order_item(&txn, order_item_id).await?;
        let previous_courier = item.courier_id;
        let item = set_courier(&txn, item, None).await?;
        ledger::append_item_status_in(
            &txn,
            item,
            OrderItemStatus::Accepted,
            ItemStatusMeta {
                notes: Some("Courier unassigned".to_string()),
                updated_by: None,
            },
        )
        .await?;
        let item = ledger::find_order_item(&txn, order_item_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit courier unassignment");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_item_id = %order_item_id, previous_courier = ?previous_courier, "Courier unassigned");
        Ok(item)
    }

    /// Changes order fields. Delivered and cancelled orders only take status appends.
    #[instrument(skip(self, changes), fields(order_id = %order_id))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        changes: UpdateOrderRequest,
    ) -> Result<OrderDetails, ServiceError> {
        changes.validate()?;

        let _guard = self.ledger.locks().acquire(order_id).await;
        let txn = self.db.begin().await?;

        let order = ledger::ensure_order_exists(&txn, order_id).await?;
        if let Some(current) = ledger::current_order_status_in(&txn, order_id).await? {
            if current.status.is_closed() {
                warn!(order_id = %order_id, status = %current.status, "Update on closed order rejected");
                return Err(ServiceError::Conflict(format!(
                    "Order {} is {} and can no longer be changed",
                    order_id, current.status
                )));
            }
        }

        let mut active: order::ActiveModel = order.into();
        if let Some(pickup_address) = changes.pickup_address {
            active.pickup_address = Set(pickup_address);
        }
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order update");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order updated");
        self.get_order(order_id).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;
        let order = ledger::ensure_order_exists(db, order_id).await?;
        let mut details = load_details(db, vec![order]).await?;
        details.pop().ok_or_else(|| {
            ServiceError::InternalError(format!("Details for order {} went missing", order_id))
        })
    }

    /// All orders, oldest first.
    pub async fn list_orders(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        let db = &*self.db;
        let orders = order::Entity::find()
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;
        load_details(db, orders).await
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn list_client_orders(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        let db = &*self.db;
        let orders = order::Entity::find()
            .filter(order::Column::ClientId.eq(client_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;
        load_details(db, orders).await
    }

    /// Items currently held by a courier.
    #[instrument(skip(self), fields(courier_id = %courier_id))]
    pub async fn list_courier_items(
        &self,
        courier_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::CourierId.eq(courier_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn get_order_item(
        &self,
        order_item_id: Uuid,
    ) -> Result<OrderItemDetails, ServiceError> {
        let db = &*self.db;
        let item = ledger::find_order_item(db, order_item_id).await?;
        load_item_details(db, item).await
    }

    /// Removes an order with its items, both ledgers and its receipt.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.ledger.locks().acquire(order_id).await;
        let txn = self.db.begin().await?;

        ledger::ensure_order_exists(&txn, order_id).await?;

        let item_ids: Vec<Uuid> = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        if !item_ids.is_empty() {
            order_item_status::Entity::delete_many()
                .filter(order_item_status::Column::OrderItemId.is_in(item_ids.clone()))
                .exec(&txn)
                .await?;
            order_item::Entity::delete_many()
                .filter(order_item::Column::OrderId.eq(order_id))
                .exec(&txn)
                .await?;
        }
        order_status::Entity::delete_many()
            .filter(order_status::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        receipt::Entity::delete_many()
            .filter(receipt::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&txn).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order deletion");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, items = item_ids.len(), "Order deleted");
        Ok(())
    }

    /// Deletes every order and everything it owns. Returns the number of orders removed.
    #[instrument(skip(self))]
    pub async fn purge_orders(&self) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await?;

        let count = order::Entity::find().count(&txn).await?;
        order_item_status::Entity::delete_many().exec(&txn).await?;
        order_status::Entity::delete_many().exec(&txn).await?;
        order_item::Entity::delete_many().exec(&txn).await?;
        receipt::Entity::delete_many().exec(&txn).await?;
        order::Entity::delete_many().exec(&txn).await?;

        txn.commit().await?;

        warn!(orders = count, "All orders purged");
        Ok(count)
    }
}

async fn check_item_transition<C>(
    conn: &C,
    order_item_id: Uuid,
    proposed: OrderItemStatus,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let current = ledger::current_item_status_in(conn, order_item_id).await?;
    validate_item_transition(current.map(|row| row.status), proposed).map_err(|e| {
        counter!("lifecycle.transition_rejected", 1, "entity" => "order_item");
        warn!(order_item_id = %order_item_id, error = %e, "Item transition rejected");
        e
    })
}

async fn set_courier<C>(
    conn: &C,
    item: order_item::Model,
    courier_id: Option<Uuid>,
) -> Result<order_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let mut active: order_item::ActiveModel = item.into();
    active.courier_id = Set(courier_id);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

fn item_details(
    item: order_item::Model,
    history: Vec<order_item_status::Model>,
) -> OrderItemDetails {
    let current_status = history.iter().find(|row| row.is_current).cloned();
    OrderItemDetails {
        item,
        current_status,
        history,
    }
}

async fn load_item_details<C>(
    conn: &C,
    item: order_item::Model,
) -> Result<OrderItemDetails, ServiceError>
where
    C: ConnectionTrait,
{
    let history = ledger::item_history_in(conn, item.id).await?;
    Ok(item_details(item, history))
}

/// Attaches ledgers, items and receipts to `orders` with one query per table.
async fn load_details<C>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderDetails>, ServiceError>
where
    C: ConnectionTrait,
{
    if orders.is_empty() {
        return Ok(Vec::new());
    }
    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();

    let mut histories: HashMap<Uuid, Vec<order_status::Model>> = HashMap::new();
    let rows = order_status::Entity::find()
        .filter(order_status::Column::OrderId.is_in(order_ids.clone()))
        .order_by_asc(order_status::Column::Sequence)
        .all(conn)
        .await?;
    for row in rows {
        histories.entry(row.order_id).or_default().push(row);
    }

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;

    let mut item_histories: HashMap<Uuid, Vec<order_item_status::Model>> = HashMap::new();
    if !items.is_empty() {
        let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
        let rows = order_item_status::Entity::find()
            .filter(order_item_status::Column::OrderItemId.is_in(item_ids))
            .order_by_asc(order_item_status::Column::Sequence)
            .all(conn)
            .await?;
        for row in rows {
            item_histories.entry(row.order_item_id).or_default().push(row);
        }
    }

    let mut items_by_order: HashMap<Uuid, Vec<OrderItemDetails>> = HashMap::new();
    for item in items {
        let history = item_histories.remove(&item.id).unwrap_or_default();
        items_by_order
            .entry(item.order_id)
            .or_default()
            .push(item_details(item, history));
    }

    let mut receipts: HashMap<Uuid, receipt::Model> = receipt::Entity::find()
        .filter(receipt::Column::OrderId.is_in(order_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|receipt| (receipt.order_id, receipt))
        .collect();

    Ok(orders
        .into_iter()
        .map(|order| {
            let history = histories.remove(&order.id).unwrap_or_default();
            let current_status = history.iter().find(|row| row.is_current).cloned();
            OrderDetails {
                items: items_by_order.remove(&order.id).unwrap_or_default(),
                receipt: receipts.remove(&order.id),
                order,
                current_status,
                history,
            }
        })
        .collect())
}
