//! Delivery order lifecycle engine
//!
//! Status ledgers for orders and order items, the item transition table,
//! order orchestration and receipt payment reconciliation, persisted
//! through sea-orm.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod services;

pub use config::{AppConfig, LifecycleConfig};
pub use errors::{CascadeFailure, ServiceError};
pub use services::LifecycleServices;
