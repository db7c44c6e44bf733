//! End-to-end tests for order and order-item lifecycles.

mod common;

use assert_matches::assert_matches;
use common::{order_request, TestContext};
use delivery_lifecycle::{
    config::LifecycleConfig,
    entities::{OrderItemStatus, OrderStatus, UserType},
    services::{
        orders::{CreateOrderRequest, OrderLifecycleService, UpdateOrderRequest},
        receipts::CreateReceiptRequest,
    },
    ServiceError,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn move_to_assigned(orders: &OrderLifecycleService, item_id: Uuid, courier_id: Uuid) {
    orders
        .set_order_item_status(item_id, OrderItemStatus::Paid, None, None)
        .await
        .expect("DRAFT -> PAID");
    orders
        .set_order_item_status(item_id, OrderItemStatus::Accepted, None, None)
        .await
        .expect("PAID -> ACCEPTED");
    orders
        .assign_courier(item_id, courier_id)
        .await
        .expect("ACCEPTED -> ASSIGNED");
}

// ==================== Creation ====================

#[tokio::test]
async fn new_order_and_items_start_in_draft() {
    let ctx = TestContext::new().await;
    let details = ctx.seed_order(2).await;

    assert_eq!(details.items.len(), 2);
    assert_eq!(details.history.len(), 1);
    let current = details.current_status.expect("order has a current status");
    assert_eq!(current.status, OrderStatus::Draft);
    assert_eq!(current.sequence, 1);

    for entry in &details.items {
        assert_eq!(entry.item.status, OrderItemStatus::Draft);
        assert_eq!(entry.history.len(), 1);
        let current = entry.current_status.as_ref().expect("item has a current status");
        assert_eq!(current.status, OrderItemStatus::Draft);
        assert_eq!(current.notes.as_deref(), Some("Order item created"));
    }
    assert!(details.receipt.is_none());
}

#[tokio::test]
async fn unknown_client_is_an_invalid_reference() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .orders
        .create_order(order_request(Uuid::new_v4(), 1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidReference(_));
    assert!(ctx.services.orders.list_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn order_without_items_is_rejected() {
    let ctx = TestContext::new().await;
    let client_id = ctx.seed_user(UserType::Client).await;
    let err = ctx
        .services
        .orders
        .create_order(CreateOrderRequest {
            client_id,
            pickup_address: "1 Depot Road".to_string(),
            items: vec![],
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

// ==================== Item transitions ====================

#[tokio::test]
async fn draft_item_cannot_jump_to_delivered() {
    let ctx = TestContext::new().await;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;

    let err = ctx
        .services
        .orders
        .set_order_item_status(item_id, OrderItemStatus::Delivered, None, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::IllegalTransition { ref from, ref to, .. }
            if from == "DRAFT" && to == "DELIVERED"
    );

    let history = ctx.services.ledger.item_history(item_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OrderItemStatus::Draft);
    assert!(history[0].is_current);
}

#[tokio::test]
async fn item_walks_the_happy_path_to_delivered() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;
    let courier_id = ctx.seed_user(UserType::Courier).await;
    let actor = ctx.seed_user(UserType::Admin).await;

    move_to_assigned(orders, item_id, courier_id).await;
    orders
        .set_order_item_status(item_id, OrderItemStatus::PickedUp, Some("at depot".into()), Some(actor))
        .await
        .unwrap();
    let last = orders
        .set_order_item_status(item_id, OrderItemStatus::Delivered, None, Some(actor))
        .await
        .unwrap();
    assert_eq!(last.updated_by, Some(actor));

    let item = orders.get_order_item(item_id).await.unwrap();
    assert_eq!(item.item.status, OrderItemStatus::Delivered);
    let statuses: Vec<_> = item.history.iter().map(|row| row.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderItemStatus::Draft,
            OrderItemStatus::Paid,
            OrderItemStatus::Accepted,
            OrderItemStatus::Assigned,
            OrderItemStatus::PickedUp,
            OrderItemStatus::Delivered,
        ]
    );
    let sequences: Vec<_> = item.history.iter().map(|row| row.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(item.history.iter().filter(|row| row.is_current).count(), 1);

    // Terminal.
    let err = orders
        .set_order_item_status(item_id, OrderItemStatus::Cancelled, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IllegalTransition { .. });
}

#[tokio::test]
async fn unknown_item_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .orders
        .set_order_item_status(Uuid::new_v4(), OrderItemStatus::Paid, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

// ==================== Courier assignment ====================

#[tokio::test]
async fn assign_and_unassign_courier() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;
    let courier_id = ctx.seed_user(UserType::Courier).await;

    move_to_assigned(orders, item_id, courier_id).await;
    let held = orders.list_courier_items(courier_id).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, item_id);
    assert_eq!(held[0].status, OrderItemStatus::Assigned);

    // Re-assignment to another courier keeps the item assigned.
    let other = ctx.seed_user(UserType::Courier).await;
    let item = orders.assign_courier(item_id, other).await.unwrap();
    assert_eq!(item.courier_id, Some(other));
    assert_eq!(item.status, OrderItemStatus::Assigned);
    assert!(orders.list_courier_items(courier_id).await.unwrap().is_empty());

    let item = orders.unassign_courier(item_id).await.unwrap();
    assert_eq!(item.courier_id, None);
    assert_eq!(item.status, OrderItemStatus::Accepted);
    assert!(orders.list_courier_items(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn assignment_requires_a_courier() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;

    let client = ctx.seed_user(UserType::Client).await;
    assert_matches!(
        orders.assign_courier(item_id, client).await,
        Err(ServiceError::InvalidReference(_))
    );
    assert_matches!(
        orders.assign_courier(item_id, Uuid::new_v4()).await,
        Err(ServiceError::InvalidReference(_))
    );

    let item = orders.get_order_item(item_id).await.unwrap();
    assert_eq!(item.item.courier_id, None);
    assert_eq!(item.history.len(), 1);
}

#[tokio::test]
async fn assigning_a_draft_item_is_illegal() {
    let ctx = TestContext::new().await;
    let details = ctx.seed_order(1).await;
    let courier_id = ctx.seed_user(UserType::Courier).await;
    let item_id = details.items[0].item.id;

    let err = ctx
        .services
        .orders
        .assign_courier(item_id, courier_id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::IllegalTransition { .. });

    let item = ctx.services.orders.get_order_item(item_id).await.unwrap();
    assert_eq!(item.item.courier_id, None);
}

#[tokio::test]
async fn unassign_skips_the_transition_table() {
    let ctx = TestContext::new().await;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;

    // DRAFT -> ACCEPTED is not an edge, but unassign always lands in ACCEPTED.
    let item = ctx.services.orders.unassign_courier(item_id).await.unwrap();
    assert_eq!(item.status, OrderItemStatus::Accepted);
}

// ==================== Order status and cascade ====================

#[tokio::test]
async fn order_level_status_is_not_constrained() {
    let ctx = TestContext::new().await;
    let order_id = ctx.seed_order(1).await.order.id;
    let orders = &ctx.services.orders;

    orders
        .set_order_status(order_id, OrderStatus::Delivered, None)
        .await
        .unwrap();
    let row = orders
        .set_order_status(order_id, OrderStatus::Pending, Some("reopened".into()))
        .await
        .unwrap();
    assert_eq!(row.sequence, 3);
    assert_eq!(row.description.as_deref(), Some("reopened"));

    let current = ctx
        .services
        .ledger
        .current_order_status(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.id, row.id);
}

#[tokio::test]
async fn unknown_order_status_change_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .orders
        .set_order_status(Uuid::new_v4(), OrderStatus::Pending, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn pick_up_cascades_to_assigned_items() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(2).await;
    let courier_id = ctx.seed_user(UserType::Courier).await;
    for entry in &details.items {
        move_to_assigned(orders, entry.item.id, courier_id).await;
    }

    orders
        .set_order_status(details.order.id, OrderStatus::PickedUp, None)
        .await
        .expect("cascade succeeds");

    let details = orders.get_order(details.order.id).await.unwrap();
    assert!(details
        .items
        .iter()
        .all(|entry| entry.item.status == OrderItemStatus::PickedUp));
}

#[tokio::test]
async fn pick_up_cascade_reports_items_that_cannot_move() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(2).await;
    let courier_id = ctx.seed_user(UserType::Courier).await;
    let ready = details.items[0].item.id;
    let still_draft = details.items[1].item.id;
    move_to_assigned(orders, ready, courier_id).await;

    let err = orders
        .set_order_status(details.order.id, OrderStatus::PickedUp, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::PartialCascade { ref succeeded, ref failed, .. } => {
            assert_eq!(succeeded, &vec![ready]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].order_item_id, still_draft);
            assert!(failed[0].reason.contains("DRAFT"));
        }
    );

    // The order's own row and the item that could move are kept.
    let details = orders.get_order(details.order.id).await.unwrap();
    assert_eq!(
        details.current_status.map(|row| row.status),
        Some(OrderStatus::PickedUp)
    );
    let status_of = |id: Uuid| {
        details
            .items
            .iter()
            .find(|entry| entry.item.id == id)
            .map(|entry| entry.item.status)
    };
    assert_eq!(status_of(ready), Some(OrderItemStatus::PickedUp));
    assert_eq!(status_of(still_draft), Some(OrderItemStatus::Draft));
}

#[tokio::test]
async fn lenient_cascade_forces_every_item() {
    let ctx = TestContext::with_policy(LifecycleConfig {
        cascade_enforces_item_transitions: false,
        ..LifecycleConfig::default()
    })
    .await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(2).await;

    orders
        .set_order_status(details.order.id, OrderStatus::PickedUp, None)
        .await
        .expect("lenient cascade never fails on item rules");

    let details = orders.get_order(details.order.id).await.unwrap();
    for entry in &details.items {
        assert_eq!(entry.item.status, OrderItemStatus::PickedUp);
        assert_eq!(entry.history.len(), 2);
    }
}

// ==================== Listing ====================

#[tokio::test]
async fn client_orders_are_listed_oldest_first() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let client_id = ctx.seed_user(UserType::Client).await;

    let first = orders.create_order(order_request(client_id, 1)).await.unwrap();
    let second = orders.create_order(order_request(client_id, 3)).await.unwrap();
    ctx.seed_order(1).await;

    let listed = orders.list_client_orders(client_id).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|d| d.order.id).collect();
    assert_eq!(ids, vec![first.order.id, second.order.id]);
    assert_eq!(orders.list_orders().await.unwrap().len(), 3);
}

#[tokio::test]
async fn listed_orders_carry_their_own_items_and_ledgers() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let first = ctx.seed_order(2).await;
    let second = ctx.seed_order(1).await;

    orders
        .set_order_status(second.order.id, OrderStatus::Accepted, None)
        .await
        .unwrap();
    orders
        .set_order_item_status(first.items[1].item.id, OrderItemStatus::Paid, None, None)
        .await
        .unwrap();
    ctx.services
        .receipts
        .create_receipt(CreateReceiptRequest {
            order_id: first.order.id,
            ..Default::default()
        })
        .await
        .unwrap();

    let listed = orders.list_orders().await.unwrap();
    assert_eq!(listed.len(), 2);
    let (a, b) = (&listed[0], &listed[1]);
    assert_eq!(a.order.id, first.order.id);
    assert_eq!(b.order.id, second.order.id);

    assert_eq!(a.history.len(), 1);
    assert_eq!(a.current_status.as_ref().map(|r| r.status), Some(OrderStatus::Draft));
    assert_eq!(b.history.len(), 2);
    assert_eq!(b.current_status.as_ref().map(|r| r.status), Some(OrderStatus::Accepted));

    let item_ids: Vec<_> = a.items.iter().map(|i| i.item.id).collect();
    let seeded: Vec<_> = first.items.iter().map(|i| i.item.id).collect();
    assert_eq!(item_ids, seeded);
    assert_eq!(a.items[0].history.len(), 1);
    assert_eq!(a.items[1].history.len(), 2);
    assert_eq!(
        a.items[1].current_status.as_ref().map(|r| r.status),
        Some(OrderItemStatus::Paid)
    );
    assert_eq!(b.items.len(), 1);
    assert_eq!(b.items[0].item.id, second.items[0].item.id);

    assert!(a.receipt.is_some());
    assert!(b.receipt.is_none());
}

// ==================== Updates ====================

#[tokio::test]
async fn open_order_takes_a_new_pickup_address() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let order_id = ctx.seed_order(1).await.order.id;
    orders
        .set_order_status(order_id, OrderStatus::Accepted, None)
        .await
        .unwrap();

    let updated = orders
        .update_order(
            order_id,
            UpdateOrderRequest {
                pickup_address: Some("2 Harbour Lane".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.order.pickup_address, "2 Harbour Lane");
    assert_eq!(updated.history.len(), 2);
    assert_eq!(
        orders.get_order(order_id).await.unwrap().order.pickup_address,
        "2 Harbour Lane"
    );
}

#[tokio::test]
async fn closed_order_cannot_be_updated() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;

    for closing in [OrderStatus::Delivered, OrderStatus::CancelledByAdmin] {
        let order_id = ctx.seed_order(1).await.order.id;
        orders.set_order_status(order_id, closing, None).await.unwrap();

        let err = orders
            .update_order(
                order_id,
                UpdateOrderRequest {
                    pickup_address: Some("2 Harbour Lane".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
        assert_eq!(
            orders.get_order(order_id).await.unwrap().order.pickup_address,
            "1 Depot Road"
        );
    }
}

#[tokio::test]
async fn update_validates_and_needs_an_order() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let order_id = ctx.seed_order(1).await.order.id;

    assert_matches!(
        orders
            .update_order(
                order_id,
                UpdateOrderRequest {
                    pickup_address: Some(String::new()),
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders
            .update_order(Uuid::new_v4(), UpdateOrderRequest::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

// ==================== Removal ====================

#[tokio::test]
async fn deleting_an_order_removes_everything_it_owns() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let details = ctx.seed_order(2).await;
    let order_id = details.order.id;
    let item_id = details.items[0].item.id;

    orders.delete_order(order_id).await.unwrap();

    assert_matches!(orders.get_order(order_id).await, Err(ServiceError::NotFound(_)));
    assert_matches!(
        ctx.services.ledger.order_history(order_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        orders.get_order_item(item_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(ctx.services.ledger.all_order_statuses().await.unwrap().is_empty());
    assert_matches!(orders.delete_order(order_id).await, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn purge_removes_all_orders() {
    let ctx = TestContext::new().await;
    ctx.seed_order(1).await;
    ctx.seed_order(2).await;

    assert_eq!(ctx.services.orders.purge_orders().await.unwrap(), 2);
    assert!(ctx.services.orders.list_orders().await.unwrap().is_empty());
    assert_eq!(ctx.services.orders.purge_orders().await.unwrap(), 0);
}

#[tokio::test]
async fn entity_locks_do_not_outlive_deleted_orders() {
    let ctx = TestContext::new().await;
    let orders = &ctx.services.orders;
    let receipts = &ctx.services.receipts;

    for _ in 0..50 {
        let details = ctx.seed_order(1).await;
        let order_id = details.order.id;
        orders
            .set_order_item_status(details.items[0].item.id, OrderItemStatus::Paid, None, None)
            .await
            .unwrap();
        let receipt = receipts
            .create_receipt(CreateReceiptRequest {
                order_id,
                total: Some(dec!(10)),
                ..Default::default()
            })
            .await
            .unwrap();
        receipts.pay(receipt.id, dec!(10)).await.unwrap();
        orders.delete_order(order_id).await.unwrap();
    }

    assert!(ctx.services.ledger.locks().is_empty());
}
