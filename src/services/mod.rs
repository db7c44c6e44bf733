// Ledger and rules
pub mod ledger;
pub mod transitions;

// Lifecycle services
pub mod orders;
pub mod receipts;

// External collaborators
pub mod users;

use std::sync::Arc;

use crate::{config::LifecycleConfig, db::DbPool};

use self::{
    ledger::{EntityLocks, StatusLedger},
    orders::OrderLifecycleService,
    receipts::ReceiptService,
    users::{DbUserDirectory, UserDirectory},
};

/// The lifecycle services wired over one pool and one set of entity locks.
#[derive(Clone)]
pub struct LifecycleServices {
    pub ledger: StatusLedger,
    pub orders: OrderLifecycleService,
    pub receipts: ReceiptService,
}

impl LifecycleServices {
    pub fn new(
        db: Arc<DbPool>,
        users: Arc<dyn UserDirectory>,
        policy: LifecycleConfig,
    ) -> Self {
        let ledger = StatusLedger::new(db.clone(), Arc::new(EntityLocks::new()));
        let orders =
            OrderLifecycleService::new(db.clone(), ledger.clone(), users, policy.clone());
        let receipts = ReceiptService::new(db, ledger.clone(), policy);

        Self {
            ledger,
            orders,
            receipts,
        }
    }

    /// Wires the services with the `users` table as the user directory.
    pub fn with_db_users(db: Arc<DbPool>, policy: LifecycleConfig) -> Self {
        let users: Arc<dyn UserDirectory> = Arc::new(DbUserDirectory::new(db.clone()));
        Self::new(db, users, policy)
    }
}
