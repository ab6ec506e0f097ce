//! Reconciliation and execution scheduling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PeriodicTrigger                         │
//! │   reconcile-all │ execution tick │ update DB │ cleanup       │
//! └────────┬─────────────────┬───────────────────────────────────┘
//!          │                 │
//!          ▼                 ▼
//!  ┌───────────────┐   ┌────────────────────┐
//!  │ Reconciliation│   │ ExecutionScheduler │
//!  │    Driver     │   │  queue + workers   │
//!  └──┬─────────┬──┘   └───┬────────────┬───┘
//!     │         │          │            │
//!     │         ▼          ▼            │
//!     │    ┌──────────────────┐         │
//!     │    │ HandlerRegistry  │         │
//!     │    └──────────────────┘         │
//!     ▼                                 ▼
//!  ┌──────────────────────────────────────────┐
//!  │               TaskLedger                 │
//!  └──────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconcile`] - per-owner snapshot fetch, diff and ledger apply
//! - [`executor`] - bounded queue and fixed worker pool
//! - [`handlers`] - owner handlers shared by both sides
//! - [`trigger`] - cron-driven dispatch of periodic actions
//! - [`error`] - scheduler error types

pub mod error;
pub mod executor;
pub mod handlers;
pub mod reconcile;
pub mod trigger;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::{
    ExecutionScheduler, ExecutionSnapshot, ExecutionStats, JobOutcome, JobStatus, TickOutcome,
};
pub use handlers::HandlerRegistry;
pub use reconcile::{OwnerSource, ReconcileOutcome, ReconcileStats, ReconciliationDriver};
pub use trigger::{action_fn, ActionFn, ActionStats, PeriodicTrigger, ScheduledAction};
