//! Legal status moves for order items.
//!
//! The table is closed: any pair not listed is rejected,
//! including moves out of PROBLEM and CONFIRMED_BY_COURIER, which have no
//! outgoing edges.

use crate::entities::OrderItemStatus;
use crate::errors::ServiceError;

/// Targets reachable from `from` in one step.
pub fn allowed_targets(from: OrderItemStatus) -> &'static [OrderItemStatus] {
    use OrderItemStatus::*;

    match from {
        Draft => &[Paid, Cancelled],
        Paid => &[Accepted, Cancelled],
        Accepted => &[Assigned, Cancelled],
        // Re-assignment to another courier keeps the item in ASSIGNED.
        Assigned => &[Assigned, ConfirmedByCourier, PickedUp, Cancelled],
        PickedUp => &[Delivered, Cancelled],
        Delivered | Cancelled => &[],
        ConfirmedByCourier | Problem => &[],
    }
}

/// Whether an item currently in `current` may move to `proposed`.
pub fn can_transition(current: OrderItemStatus, proposed: OrderItemStatus) -> bool {
    allowed_targets(current).contains(&proposed)
}

/// Statuses with no way out.
pub fn is_terminal(status: OrderItemStatus) -> bool {
    matches!(status, OrderItemStatus::Delivered | OrderItemStatus::Cancelled)
}

/// Checks a move, treating an item without history as free to take any status.
pub fn validate_item_transition(
    current: Option<OrderItemStatus>,
    proposed: OrderItemStatus,
) -> Result<(), ServiceError> {
    match current {
        None => Ok(()),
        Some(from) if can_transition(from, proposed) => Ok(()),
        Some(from) => Err(ServiceError::illegal_transition(
            "order item",
            from,
            proposed,
        )),
    }
}
