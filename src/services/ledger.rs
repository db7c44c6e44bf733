//! Append-only status history for orders and order items.
//!
//! Every append flips the previous current row off and inserts the new
//! current row inside one transaction. Rows carry a per-entity `sequence`
//! that is unique per entity, so two writers that raced past the in-process
//! lock cannot both land a row at the same position.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        order, order_item, order_item_status, order_status, OrderItemStatus, OrderStatus,
    },
    errors::ServiceError,
};

/// Per-entity async locks that serialize read-current, validate, append.
///
/// A slot lives only while someone holds or waits for it; the last guard
/// to release removes it.
#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `entity_id`. The lock is released when the guard drops.
    pub async fn acquire(&self, entity_id: Uuid) -> EntityGuard {
        let lock = self
            .slots
            .entry(entity_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        EntityGuard {
            entity_id,
            guard: Some(lock.lock_owned().await),
            slots: self.slots.clone(),
        }
    }

    /// Number of entities currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive hold on one entity.
#[derive(Debug)]
pub struct EntityGuard {
    entity_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold a clone of the slot, so a count of one means nobody else wants it.
        // `remove_if` runs under the shard lock that `acquire` takes to clone the slot.
        self.slots
            .remove_if(&self.entity_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Metadata recorded with an order-item status row.
#[derive(Debug, Clone, Default)]
pub struct ItemStatusMeta {
    pub notes: Option<String>,
    pub updated_by: Option<Uuid>,
}

#[derive(Clone)]
pub struct StatusLedger {
    db: Arc<DbPool>,
    locks: Arc<EntityLocks>,
}

impl StatusLedger {
    pub fn new(db: Arc<DbPool>, locks: Arc<EntityLocks>) -> Self {
        Self { db, locks }
    }

    pub fn locks(&self) -> &Arc<EntityLocks> {
        &self.locks
    }

    /// Appends a new current status to an order's history.
    #[instrument(skip(self, description), fields(order_id = %order_id, status = %status))]
    pub async fn append_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        description: Option<String>,
    ) -> Result<order_status::Model, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order status append");
            ServiceError::DatabaseError(e)
        })?;

        let row = append_order_status_in(&txn, order_id, status, description).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order status append");
            ServiceError::DatabaseError(e)
        })?;

        Ok(row)
    }

    /// The row currently marked current for the order, if any.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn current_order_status(
        &self,
        order_id: Uuid,
    ) -> Result<Option<order_status::Model>, ServiceError> {
        let db = &*self.db;
        ensure_order_exists(db, order_id).await?;
        current_order_status_in(db, order_id).await
    }

    /// Full history of an order, oldest first.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn order_history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status::Model>, ServiceError> {
        let db = &*self.db;
        ensure_order_exists(db, order_id).await?;
        order_history_in(db, order_id).await
    }

    /// Every order ledger row in the store, grouped by order and oldest first within each.
    pub async fn all_order_statuses(&self) -> Result<Vec<order_status::Model>, ServiceError> {
        let rows = order_status::Entity::find()
            .order_by_asc(order_status::Column::OrderId)
            .order_by_asc(order_status::Column::Sequence)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Appends a new current status to an order item's history without
    /// consulting the transition table.
    #[instrument(skip(self, meta), fields(order_item_id = %order_item_id, status = %status))]
    pub async fn append_item_status(
        &self,
        order_item_id: Uuid,
        status: OrderItemStatus,
        meta: ItemStatusMeta,
    ) -> Result<order_item_status::Model, ServiceError> {
        let _guard = self.locks.acquire(order_item_id).await;
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for item status append");
            ServiceError::DatabaseError(e)
        })?;

        let item = find_order_item(&txn, order_item_id).await?;
        let row = append_item_status_in(&txn, item, status, meta).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit item status append");
            ServiceError::DatabaseError(e)
        })?;

        Ok(row)
    }

    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn current_item_status(
        &self,
        order_item_id: Uuid,
    ) -> Result<Option<order_item_status::Model>, ServiceError> {
        let db = &*self.db;
        find_order_item(db, order_item_id).await?;
        current_item_status_in(db, order_item_id).await
    }

    #[instrument(skip(self), fields(order_item_id = %order_item_id))]
    pub async fn item_history(
        &self,
        order_item_id: Uuid,
    ) -> Result<Vec<order_item_status::Model>, ServiceError> {
        let db = &*self.db;
        find_order_item(db, order_item_id).await?;
        item_history_in(db, order_item_id).await
    }
}

pub(crate) async fn ensure_order_exists<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            warn!(order_id = %order_id, "Order not found");
            ServiceError::NotFound(format!("Order {} not found", order_id))
        })
}

pub(crate) async fn find_order_item<C>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<order_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order_item::Entity::find_by_id(order_item_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            warn!(order_item_id = %order_item_id, "Order item not found");
            ServiceError::NotFound(format!("Order item {} not found", order_item_id))
        })
}

/// Flip-then-insert for an order. The caller owns the transaction and has
/// already taken the order's lock.
pub(crate) async fn append_order_status_in<C>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    description: Option<String>,
) -> Result<order_status::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ensure_order_exists(conn, order_id).await?;

    let last = last_order_status(conn, order_id).await?;
    let sequence = last.as_ref().map(|row| row.sequence + 1).unwrap_or(1);

    order_status::Entity::update_many()
        .col_expr(order_status::Column::IsCurrent, Expr::value(false))
        .filter(order_status::Column::OrderId.eq(order_id))
        .filter(order_status::Column::IsCurrent.eq(true))
        .exec(conn)
        .await?;

    let row = insert_order_status_row(conn, order_id, sequence, status, description).await?;

    counter!("lifecycle.status_appended", 1, "ledger" => "order");
    info!(
        order_id = %order_id,
        previous = ?last.map(|row| row.status),
        status = %status,
        sequence,
        "Order status appended"
    );

    Ok(row)
}

pub(crate) async fn current_order_status_in<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<order_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let row = order_status::Entity::find()
        .filter(order_status::Column::OrderId.eq(order_id))
        .filter(order_status::Column::IsCurrent.eq(true))
        .one(conn)
        .await?;
    Ok(row)
}

pub(crate) async fn order_history_in<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = order_status::Entity::find()
        .filter(order_status::Column::OrderId.eq(order_id))
        .order_by_asc(order_status::Column::Sequence)
        .all(conn)
        .await?;
    Ok(rows)
}

/// Flip-then-insert for an order item, keeping `order_items.status` in step.
pub(crate) async fn append_item_status_in<C>(
    conn: &C,
    item: order_item::Model,
    status: OrderItemStatus,
    meta: ItemStatusMeta,
) -> Result<order_item_status::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let order_item_id = item.id;
    let now = Utc::now();

    let last = last_item_status(conn, order_item_id).await?;
    let sequence = last.as_ref().map(|row| row.sequence + 1).unwrap_or(1);

    order_item_status::Entity::update_many()
        .col_expr(order_item_status::Column::IsCurrent, Expr::value(false))
        .filter(order_item_status::Column::OrderItemId.eq(order_item_id))
        .filter(order_item_status::Column::IsCurrent.eq(true))
        .exec(conn)
        .await?;

    let row = insert_item_status_row(conn, order_item_id, sequence, status, meta, now).await?;

    let mut active: order_item::ActiveModel = item.into();
    active.status = Set(status);
    active.updated_at = Set(now);
    active.update(conn).await?;

    counter!("lifecycle.status_appended", 1, "ledger" => "order_item");
    debug!(
        order_item_id = %order_item_id,
        status = %status,
        sequence,
        "Order item status appended"
    );

    Ok(row)
}

pub(crate) async fn current_item_status_in<C>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<Option<order_item_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let row = order_item_status::Entity::find()
        .filter(order_item_status::Column::OrderItemId.eq(order_item_id))
        .filter(order_item_status::Column::IsCurrent.eq(true))
        .one(conn)
        .await?;
    Ok(row)
}

pub(crate) async fn item_history_in<C>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<Vec<order_item_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let rows = order_item_status::Entity::find()
        .filter(order_item_status::Column::OrderItemId.eq(order_item_id))
        .order_by_asc(order_item_status::Column::Sequence)
        .all(conn)
        .await?;
    Ok(rows)
}

async fn last_order_status<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<order_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let row = order_status::Entity::find()
        .filter(order_status::Column::OrderId.eq(order_id))
        .order_by_desc(order_status::Column::Sequence)
        .one(conn)
        .await?;
    Ok(row)
}

/// Inserts a current row at `sequence`. A row already holding that position
/// fails the write with `ConcurrentModification`.
async fn insert_order_status_row<C>(
    conn: &C,
    order_id: Uuid,
    sequence: i32,
    status: OrderStatus,
    description: Option<String>,
) -> Result<order_status::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order_status::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        sequence: Set(sequence),
        status: Set(status),
        description: Set(description),
        is_current: Set(true),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| ServiceError::from_ledger_write(e, order_id))
}

async fn last_item_status<C>(
    conn: &C,
    order_item_id: Uuid,
) -> Result<Option<order_item_status::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let row = order_item_status::Entity::find()
        .filter(order_item_status::Column::OrderItemId.eq(order_item_id))
        .order_by_desc(order_item_status::Column::Sequence)
        .one(conn)
        .await?;
    Ok(row)
}

async fn insert_item_status_row<C>(
    conn: &C,
    order_item_id: Uuid,
    sequence: i32,
    status: OrderItemStatus,
    meta: ItemStatusMeta,
    created_at: DateTime<Utc>,
) -> Result<order_item_status::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order_item_status::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_item_id: Set(order_item_id),
        sequence: Set(sequence),
        status: Set(status),
        notes: Set(meta.notes),
        is_current: Set(true),
        updated_by: Set(meta.updated_by),
        created_at: Set(created_at),
    }
    .insert(conn)
    .await
    .map_err(|e| ServiceError::from_ledger_write(e, order_item_id))
}
