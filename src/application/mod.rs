//! Application layer orchestrating the domain over the storage ports.
//!
//! The `LifecycleEngine` owns every `Pending -> terminal` transition and is
//! shared by operator actions and the `RefundWatcher`. `PurchaseService` and
//! `WalletService` are the user-facing entry points.

pub mod lifecycle;
pub mod notifier;
pub mod purchase;
pub mod watcher;
pub mod wallet;
