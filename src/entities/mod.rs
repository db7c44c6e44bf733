//! sea-orm entities for the delivery lifecycle tables.

pub mod order;
pub mod order_item;
pub mod order_item_status;
pub mod order_status;
pub mod receipt;
pub mod user;

pub use order_item_status::OrderItemStatus;
pub use order_status::OrderStatus;
pub use receipt::ReceiptStatus;
pub use user::UserType;
