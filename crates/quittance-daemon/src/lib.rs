//! # quittance-daemon
//!
//! The quittance service: an append-only, tenant-scoped receipt ledger and
//! a durable task queue with lease-based worker handoff, behind an HTTP
//! surface.
//!
//! Two engines share one `SQLite` store:
//!
//! - the **receipt ledger** ([`store::ReceiptLedger`]): single-writer,
//!   append-only, serving the derived-state queries (inbox, timeline,
//!   provenance chain, derived status) that replace mutable status;
//! - the **task/lease engine** ([`store::TaskStore`]): queue discipline,
//!   linearizable lease grants, heartbeat renewal, and terminal calls that
//!   commit their receipt and the task flip in one transaction.
//!
//! The [`reaper`] sweeps expired leases in the background; the [`http`]
//! module exposes the operations and the access gate; [`config`] wires it
//! all from TOML plus environment.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod http;
pub mod reaper;
pub mod state;
pub mod store;

pub use config::DaemonConfig;
pub use state::{AppState, SharedState};
pub use store::Store;
