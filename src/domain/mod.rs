//! Domain layer - core business logic and entities

pub mod ledger;
pub mod lock;
pub mod pending;
pub mod position;
pub mod price;
pub mod swap;
