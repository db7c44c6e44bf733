use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    error::SqlErr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::LifecycleConfig,
    db::DbPool,
    entities::{receipt, OrderStatus, ReceiptStatus},
    errors::ServiceError,
    services::ledger::{self, StatusLedger},
};

const PAYMENT_ACCEPTED_DESCRIPTION: &str = "Payment received, order accepted";

fn out_of_range() -> ServiceError {
    ServiceError::ValidationError("amount out of range".to_string())
}

/// Amounts and status after applying a payment or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub amount_paid: Decimal,
    pub status: ReceiptStatus,
}

/// Adds `amount` to what has been paid so far and derives the new status.
pub fn apply_payment(
    total: Decimal,
    amount_paid: Decimal,
    status: ReceiptStatus,
    amount: Decimal,
) -> Result<Settlement, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Payment amount must be greater than zero".to_string(),
        ));
    }

    let amount_paid = amount_paid.checked_add(amount).ok_or_else(out_of_range)?;
    let status = if amount_paid >= total {
        ReceiptStatus::Paid
    } else if amount_paid > Decimal::ZERO {
        ReceiptStatus::PartiallyPaid
    } else {
        status
    };

    Ok(Settlement {
        amount_paid,
        status,
    })
}

/// Returns `amount` of what has been paid and derives the new status.
pub fn apply_refund(
    total: Decimal,
    amount_paid: Decimal,
    status: ReceiptStatus,
    amount: Decimal,
) -> Result<Settlement, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Refund amount must be greater than zero".to_string(),
        ));
    }
    if amount > amount_paid {
        return Err(ServiceError::ValidationError(format!(
            "Refund amount {} exceeds amount paid {}",
            amount, amount_paid
        )));
    }

    let amount_paid = amount_paid.checked_sub(amount).ok_or_else(out_of_range)?;
    let status = if amount_paid.is_zero() {
        ReceiptStatus::Refunded
    } else if amount_paid < total {
        ReceiptStatus::PartiallyPaid
    } else {
        status
    };

    Ok(Settlement {
        amount_paid,
        status,
    })
}

fn non_negative(field: &str, value: Decimal) -> Result<Decimal, ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            field
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateReceiptRequest {
    pub order_id: Uuid,
    pub delivery_fee: Option<Decimal>,
    pub booking_fee: Option<Decimal>,
    pub discount: Option<Decimal>,
    /// Computed from the fees when absent.
    pub total: Option<Decimal>,
    pub amount_paid: Option<Decimal>,
    pub receipt_status: Option<ReceiptStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReceiptRequest {
    pub delivery_fee: Option<Decimal>,
    pub booking_fee: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// Tracks what has been paid against an order and accepts the order on payment.
#[derive(Clone)]
pub struct ReceiptService {
    db: Arc<DbPool>,
    ledger: StatusLedger,
    policy: LifecycleConfig,
}

impl ReceiptService {
    pub fn new(db: Arc<DbPool>, ledger: StatusLedger, policy: LifecycleConfig) -> Self {
        Self { db, ledger, policy }
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_receipt(
        &self,
        request: CreateReceiptRequest,
    ) -> Result<receipt::Model, ServiceError> {
        let delivery_fee = non_negative("delivery_fee", request.delivery_fee.unwrap_or_default())?;
        let booking_fee = non_negative("booking_fee", request.booking_fee.unwrap_or_default())?;
        let discount = non_negative("discount", request.discount.unwrap_or_default())?;
        let total = match request.total {
            Some(total) => non_negative("total", total)?,
            None => {
                let total = delivery_fee
                    .checked_add(booking_fee)
                    .and_then(|sum| sum.checked_sub(discount))
                    .ok_or_else(out_of_range)?;
                non_negative("total", total)?
            }
        };
        let amount_paid = non_negative("amount_paid", request.amount_paid.unwrap_or_default())?;
        let status = request.receipt_status.unwrap_or(ReceiptStatus::Pending);

        let order_id = request.order_id;
        let _guard = self.ledger.locks().acquire(order_id).await;
        let txn = self.db.begin().await?;

        ledger::ensure_order_exists(&txn, order_id).await?;
        if find_by_order(&txn, order_id).await?.is_some() {
            warn!(order_id = %order_id, "Receipt already exists for order");
            return Err(ServiceError::Conflict(format!(
                "Receipt already exists for order {}",
                order_id
            )));
        }

        let now = Utc::now();
        let receipt = receipt::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            delivery_fee: Set(delivery_fee),
            booking_fee: Set(booking_fee),
            discount: Set(discount),
            total: Set(total),
            amount_paid: Set(amount_paid),
            receipt_status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(format!(
                "Receipt already exists for order {}",
                order_id
            )),
            _ => ServiceError::DatabaseError(e),
        })?;

        if status == ReceiptStatus::Paid {
            ledger::append_order_status_in(
                &txn,
                order_id,
                OrderStatus::Accepted,
                Some(PAYMENT_ACCEPTED_DESCRIPTION.to_string()),
            )
            .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit receipt creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(receipt_id = %receipt.id, order_id = %order_id, total = %total, status = %status, "Receipt created");
        Ok(receipt)
    }

    /// Records a payment and, per policy, appends ACCEPTED to the order.
    #[instrument(skip(self), fields(receipt_id = %receipt_id, amount = %amount))]
    pub async fn pay(&self, receipt_id: Uuid, amount: Decimal) -> Result<receipt::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be greater than zero".to_string(),
            ));
        }

        let _receipt_guard = self.ledger.locks().acquire(receipt_id).await;
        let order_id = self.get_receipt(receipt_id).await?.order_id;
        let _order_guard = self.ledger.locks().acquire(order_id).await;

        let txn = self.db.begin().await?;
        let current = find_receipt(&txn, receipt_id).await?;
        ensure_open(&current)?;

        let settlement = apply_payment(
            current.total,
            current.amount_paid,
            current.receipt_status,
            amount,
        )?;
        let updated = store_settlement(&txn, current, settlement).await?;

        if self.policy.accept_on_partial_payment || settlement.status == ReceiptStatus::Paid {
            ledger::append_order_status_in(
                &txn,
                order_id,
                OrderStatus::Accepted,
                Some(PAYMENT_ACCEPTED_DESCRIPTION.to_string()),
            )
            .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment");
            ServiceError::DatabaseError(e)
        })?;

        counter!("receipts.payment_applied", 1, "status" => settlement.status.to_string());
        info!(
            receipt_id = %receipt_id,
            amount_paid = %updated.amount_paid,
            status = %updated.receipt_status,
            "Payment applied"
        );
        Ok(updated)
    }

    /// Returns money to the payer. The order ledger is not touched.
    #[instrument(skip(self), fields(receipt_id = %receipt_id, amount = %amount))]
    pub async fn refund(
        &self,
        receipt_id: Uuid,
        amount: Decimal,
    ) -> Result<receipt::Model, ServiceError> {
        let _guard = self.ledger.locks().acquire(receipt_id).await;
        let txn = self.db.begin().await?;

        let current = find_receipt(&txn, receipt_id).await?;
        ensure_open(&current)?;

        let settlement = apply_refund(
            current.total,
            current.amount_paid,
            current.receipt_status,
            amount,
        )
        .map_err(|e| {
            warn!(receipt_id = %receipt_id, error = %e, "Refund rejected");
            e
        })?;
        let updated = store_settlement(&txn, current, settlement).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit refund");
            ServiceError::DatabaseError(e)
        })?;

        counter!("receipts.refund_applied", 1, "status" => settlement.status.to_string());
        info!(
            receipt_id = %receipt_id,
            amount_paid = %updated.amount_paid,
            status = %updated.receipt_status,
            "Refund applied"
        );
        Ok(updated)
    }

    /// Marks the receipt CANCELLED. Amounts are left as they are.
    #[instrument(skip(self), fields(receipt_id = %receipt_id))]
    pub async fn cancel(&self, receipt_id: Uuid) -> Result<receipt::Model, ServiceError> {
        let _guard = self.ledger.locks().acquire(receipt_id).await;
        let db = &*self.db;

        let current = find_receipt(db, receipt_id).await?;
        let mut active: receipt::ActiveModel = current.into();
        active.receipt_status = Set(ReceiptStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        info!(receipt_id = %receipt_id, "Receipt cancelled");
        Ok(updated)
    }

    pub async fn get_receipt(&self, receipt_id: Uuid) -> Result<receipt::Model, ServiceError> {
        find_receipt(&*self.db, receipt_id).await
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_receipt_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<receipt::Model, ServiceError> {
        find_by_order(&*self.db, order_id).await?.ok_or_else(|| {
            warn!(order_id = %order_id, "No receipt for order");
            ServiceError::NotFound(format!("Receipt for order {} not found", order_id))
        })
    }

    pub async fn list_receipts(&self) -> Result<Vec<receipt::Model>, ServiceError> {
        let receipts = receipt::Entity::find()
            .order_by_asc(receipt::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(receipts)
    }

    /// Overwrites fees or total. `amount_paid` and the status are kept.
    #[instrument(skip(self, changes), fields(receipt_id = %receipt_id))]
    pub async fn update_receipt(
        &self,
        receipt_id: Uuid,
        changes: UpdateReceiptRequest,
    ) -> Result<receipt::Model, ServiceError> {
        let _guard = self.ledger.locks().acquire(receipt_id).await;
        let db = &*self.db;

        let current = find_receipt(db, receipt_id).await?;
        let mut active: receipt::ActiveModel = current.into();
        if let Some(fee) = changes.delivery_fee {
            active.delivery_fee = Set(non_negative("delivery_fee", fee)?);
        }
        if let Some(fee) = changes.booking_fee {
            active.booking_fee = Set(non_negative("booking_fee", fee)?);
        }
        if let Some(discount) = changes.discount {
            active.discount = Set(non_negative("discount", discount)?);
        }
        if let Some(total) = changes.total {
            active.total = Set(non_negative("total", total)?);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await?;
        info!(receipt_id = %receipt_id, "Receipt updated");
        Ok(updated)
    }

    /// Deletes every receipt. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn purge_receipts(&self) -> Result<u64, ServiceError> {
        let result = receipt::Entity::delete_many().exec(&*self.db).await?;
        warn!(receipts = result.rows_affected, "All receipts purged");
        Ok(result.rows_affected)
    }
}

fn ensure_open(receipt: &receipt::Model) -> Result<(), ServiceError> {
    if receipt.receipt_status == ReceiptStatus::Cancelled {
        warn!(receipt_id = %receipt.id, "Receipt is cancelled");
        return Err(ServiceError::Conflict(format!(
            "Receipt {} is cancelled",
            receipt.id
        )));
    }
    Ok(())
}

async fn find_receipt<C>(conn: &C, receipt_id: Uuid) -> Result<receipt::Model, ServiceError>
where
    C: ConnectionTrait,
{
    receipt::Entity::find_by_id(receipt_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            warn!(receipt_id = %receipt_id, "Receipt not found");
            ServiceError::NotFound(format!("Receipt {} not found", receipt_id))
        })
}

async fn find_by_order<C>(conn: &C, order_id: Uuid) -> Result<Option<receipt::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let receipt = receipt::Entity::find()
        .filter(receipt::Column::OrderId.eq(order_id))
        .one(conn)
        .await?;
    Ok(receipt)
}

async fn store_settlement<C>(
    conn: &C,
    receipt: receipt::Model,
    settlement: Settlement,
) -> Result<receipt::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let mut active: receipt::ActiveModel = receipt.into();
    active.amount_paid = Set(settlement.amount_paid);
    active.receipt_status = Set(settlement.status);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_then_full_payment() {
        let half = apply_payment(dec!(100), dec!(0), ReceiptStatus::Pending, dec!(50)).unwrap();
        assert_eq!(half.amount_paid, dec!(50));
        assert_eq!(half.status, ReceiptStatus::PartiallyPaid);

        let full = apply_payment(dec!(100), half.amount_paid, half.status, dec!(50)).unwrap();
        assert_eq!(full.amount_paid, dec!(100));
        assert_eq!(full.status, ReceiptStatus::Paid);
    }

    #[test]
    fn overpayment_still_counts_as_paid() {
        let s = apply_payment(dec!(100), dec!(90), ReceiptStatus::PartiallyPaid, dec!(25)).unwrap();
        assert_eq!(s.amount_paid, dec!(115));
        assert_eq!(s.status, ReceiptStatus::Paid);
    }

    #[test]
    fn non_positive_payment_is_rejected() {
        assert_matches!(
            apply_payment(dec!(100), dec!(0), ReceiptStatus::Pending, dec!(0)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            apply_payment(dec!(100), dec!(0), ReceiptStatus::Pending, dec!(-5)),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn payment_past_decimal_range_is_rejected() {
        assert_matches!(
            apply_payment(Decimal::ONE, Decimal::MAX, ReceiptStatus::Paid, Decimal::MAX),
            Err(ServiceError::ValidationError(msg)) if msg == "amount out of range"
        );
    }

    #[test]
    fn partial_refund_of_paid_receipt() {
        let s = apply_refund(dec!(100), dec!(100), ReceiptStatus::Paid, dec!(30)).unwrap();
        assert_eq!(s.amount_paid, dec!(70));
        assert_eq!(s.status, ReceiptStatus::PartiallyPaid);
    }

    #[test]
    fn full_refund_marks_refunded() {
        let s = apply_refund(dec!(100), dec!(100), ReceiptStatus::Paid, dec!(100)).unwrap();
        assert!(s.amount_paid.is_zero());
        assert_eq!(s.status, ReceiptStatus::Refunded);
    }

    #[test]
    fn refund_of_overpayment_can_stay_paid() {
        let s = apply_refund(dec!(100), dec!(120), ReceiptStatus::Paid, dec!(20)).unwrap();
        assert_eq!(s.amount_paid, dec!(100));
        assert_eq!(s.status, ReceiptStatus::Paid);
    }

    #[test]
    fn refund_above_amount_paid_is_rejected() {
        assert_matches!(
            apply_refund(dec!(100), dec!(40), ReceiptStatus::PartiallyPaid, dec!(41)),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn negative_fees_are_rejected() {
        assert!(non_negative("discount", dec!(-1)).is_err());
        assert!(non_negative("discount", dec!(0)).is_ok());
    }
}
