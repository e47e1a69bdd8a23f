//! # quittance-core
//!
//! Core library for quittance - a receipt-driven coordination substrate for
//! asynchronous multi-agent work.
//!
//! The single coordination primitive is the **receipt**: an immutable,
//! tenant-scoped, append-only record describing the acceptance, completion,
//! or transfer of an obligation. Task state, inbox contents, delegation
//! trees, and provenance chains are all derived from receipts; none of them
//! is ever stored as a mutable status field.
//!
//! ## Modules
//!
//! - [`receipt`]: The receipt model and its validation pipeline
//! - [`task`]: The durable task queue model and its status state machine
//! - [`lease`]: Lease arithmetic for time-bounded exclusive work claims
//! - [`derived`]: Task status derived from receipt history
//! - [`escalation`]: Escalation-class derivation from failure reasons
//! - [`config`]: Engine tuning knobs
//!
//! ## Example
//!
//! ```rust
//! use quittance_core::receipt::{Phase, ReceiptDraft, validate};
//!
//! let draft = ReceiptDraft::accepted("T-1", "code.generate", "summarize repo")
//!     .from_principal("planner")
//!     .for_principal("user:alice")
//!     .source_system("delegate")
//!     .recipient_ai("worker.x");
//! let receipt = draft.into_receipt("acme");
//! assert!(validate(&receipt).is_ok());
//! assert_eq!(receipt.phase, Phase::Accepted);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod derived;
pub mod escalation;
pub mod lease;
pub mod receipt;
pub mod task;

pub use config::EngineConfig;
pub use derived::DerivedStatus;
pub use lease::{Lease, LeaseError, LeaseState};
pub use receipt::{Phase, Receipt, ReceiptDraft, Status};
pub use task::{Task, TaskSpec, TaskStatus};
