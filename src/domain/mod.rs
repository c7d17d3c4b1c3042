//! Domain layer: value objects, records and the ports the core depends on.

pub mod account;
pub mod deposit;
pub mod identifier;
pub mod notification;
pub mod order;
pub mod ports;
pub mod record;
