//! Ledger invariants: one current row per entity and append-only history.

mod common;

use std::collections::HashMap;

use assert_matches::assert_matches;
use common::TestContext;
use delivery_lifecycle::{
    entities::{OrderItemStatus, OrderStatus, UserType},
    services::ledger::ItemStatusMeta,
    ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn appends_keep_exactly_one_current_row() {
    let ctx = TestContext::new().await;
    let ledger = &ctx.services.ledger;
    let order_id = ctx.seed_order(1).await.order.id;

    let sequence = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::AssignedToCourier,
        OrderStatus::InTransit,
    ];
    let mut previous = ledger.order_history(order_id).await.unwrap();
    for status in sequence {
        let row = ledger
            .append_order_status(order_id, status, None)
            .await
            .unwrap();
        let history = ledger.order_history(order_id).await.unwrap();

        assert_eq!(history.len(), previous.len() + 1);
        assert_eq!(history.iter().filter(|r| r.is_current).count(), 1);
        assert_eq!(history.last().map(|r| r.id), Some(row.id));
        // Earlier rows keep their status and timestamp.
        for (old, now) in previous.iter().zip(history.iter()) {
            assert_eq!(old.id, now.id);
            assert_eq!(old.status, now.status);
            assert_eq!(old.created_at, now.created_at);
        }
        previous = history;
    }

    let current = ledger.current_order_status(order_id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::InTransit);
    assert_eq!(current.sequence, 5);
}

#[tokio::test]
async fn unknown_entities_are_not_found() {
    let ctx = TestContext::new().await;
    let ledger = &ctx.services.ledger;

    assert_matches!(
        ledger
            .append_order_status(Uuid::new_v4(), OrderStatus::Pending, None)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ledger.current_item_status(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ledger
            .append_item_status(Uuid::new_v4(), OrderItemStatus::Paid, ItemStatusMeta::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn item_append_mirrors_status_onto_the_item() {
    let ctx = TestContext::new().await;
    let details = ctx.seed_order(1).await;
    let item_id = details.items[0].item.id;
    let actor = ctx.seed_user(UserType::Admin).await;

    let row = ctx
        .services
        .ledger
        .append_item_status(
            item_id,
            OrderItemStatus::Problem,
            ItemStatusMeta {
                notes: Some("recipient unreachable".into()),
                updated_by: Some(actor),
            },
        )
        .await
        .unwrap();
    assert_eq!(row.sequence, 2);
    assert_eq!(row.updated_by, Some(actor));

    let item = ctx.services.orders.get_order_item(item_id).await.unwrap();
    assert_eq!(item.item.status, OrderItemStatus::Problem);
    assert_eq!(item.current_status.map(|r| r.id), Some(row.id));
}

#[tokio::test]
async fn concurrent_appends_serialize_per_entity() {
    let ctx = TestContext::new().await;
    let order_id = ctx.seed_order(1).await.order.id;

    let mut handles = Vec::new();
    for n in 0..12 {
        let ledger = ctx.services.ledger.clone();
        let status = if n % 2 == 0 {
            OrderStatus::Pending
        } else {
            OrderStatus::Accepted
        };
        handles.push(tokio::spawn(async move {
            ledger.append_order_status(order_id, status, None).await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("append");
    }

    let history = ctx.services.ledger.order_history(order_id).await.unwrap();
    assert_eq!(history.len(), 13);
    assert_eq!(history.iter().filter(|r| r.is_current).count(), 1);
    let sequences: Vec<_> = history.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, (1..=13).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrent_item_moves_only_one_wins() {
    let ctx = TestContext::new().await;
    let item_id = ctx.seed_order(1).await.items[0].item.id;

    // DRAFT allows PAID or CANCELLED, but once either lands the other is illegal.
    let mut handles = Vec::new();
    for status in [OrderItemStatus::Paid, OrderItemStatus::Cancelled] {
        let orders = ctx.services.orders.clone();
        handles.push(tokio::spawn(async move {
            orders.set_order_item_status(item_id, status, None, None).await
        }));
    }
    let mut wins = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => wins += 1,
            Err(e) => assert_matches!(e, ServiceError::IllegalTransition { .. }),
        }
    }
    assert!(wins >= 1);

    let history = ctx.services.ledger.item_history(item_id).await.unwrap();
    assert_eq!(history.iter().filter(|r| r.is_current).count(), 1);
    // PAID -> CANCELLED is legal, CANCELLED -> PAID is not.
    assert_eq!(history.len(), wins + 1);
}

#[tokio::test]
async fn admin_listing_groups_rows_by_order() {
    let ctx = TestContext::new().await;
    let ledger = &ctx.services.ledger;
    let a = ctx.seed_order(1).await.order.id;
    let b = ctx.seed_order(1).await.order.id;
    ledger.append_order_status(a, OrderStatus::Pending, None).await.unwrap();
    ledger.append_order_status(b, OrderStatus::Pending, None).await.unwrap();
    ledger.append_order_status(a, OrderStatus::Accepted, None).await.unwrap();

    let rows = ledger.all_order_statuses().await.unwrap();
    assert_eq!(rows.len(), 5);

    let mut current_per_order: HashMap<Uuid, usize> = HashMap::new();
    for row in &rows {
        if row.is_current {
            *current_per_order.entry(row.order_id).or_default() += 1;
        }
    }
    assert_eq!(current_per_order.get(&a), Some(&1));
    assert_eq!(current_per_order.get(&b), Some(&1));
}
