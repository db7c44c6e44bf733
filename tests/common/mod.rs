use std::sync::Arc;

use chrono::Utc;
use delivery_lifecycle::{
    config::LifecycleConfig,
    db::{self, DbConfig, DbPool},
    entities::{user, UserType},
    services::{
        orders::{CreateOrderRequest, NewOrderItem, OrderDetails},
        LifecycleServices,
    },
};
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

/// Lifecycle services over a fresh, migrated in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: LifecycleServices,
}

#[allow(dead_code)]
impl TestContext {
    pub async fn new() -> Self {
        Self::with_policy(LifecycleConfig::default()).await
    }

    pub async fn with_policy(policy: LifecycleConfig) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let db = Arc::new(pool);
        let services = LifecycleServices::with_db_users(db.clone(), policy);
        Self { db, services }
    }

    pub async fn seed_user(&self, user_type: UserType) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@lifecycle.test", id.simple())),
            name: Set(Some(format!("{} {}", user_type, &id.simple().to_string()[..6]))),
            phone: Set(None),
            user_type: Set(user_type),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed user");
        id
    }

    /// Creates an order for a freshly seeded client with `items` drop-offs.
    pub async fn seed_order(&self, items: usize) -> OrderDetails {
        let client_id = self.seed_user(UserType::Client).await;
        self.services
            .orders
            .create_order(order_request(client_id, items))
            .await
            .expect("failed to create order")
    }
}

pub fn order_request(client_id: Uuid, items: usize) -> CreateOrderRequest {
    CreateOrderRequest {
        client_id,
        pickup_address: "1 Depot Road".to_string(),
        items: (0..items)
            .map(|n| NewOrderItem {
                delivery_address: format!("{} Elm Street", n + 10),
                delivery_phone: format!("555-01{:02}", n),
                delivery_notes: None,
            })
            .collect(),
    }
}
