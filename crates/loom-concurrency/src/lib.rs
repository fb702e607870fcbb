//! Concurrency and resource model (§5): per-session serial execution
//! via a keyed lock manager, turn deadlines and per-phase soft budgets,
//! and idempotency-cache orchestration with backoff.

pub mod deadline;
pub mod idempotency;
pub mod session_lock;

pub use deadline::{remaining, run_cancellable, run_with_soft_budget, TurnDeadline};
pub use idempotency::{run_idempotent, BackoffPolicy};
pub use session_lock::{DistributedLock, DistributedLockHandle, SessionLockManager, SessionPermit};
