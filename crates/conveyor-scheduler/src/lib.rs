//! Worker pool and job scheduling for Conveyor CI.
//!
//! The [`WorkerPool`] hands out exclusive worker leases. Schedulers turn
//! change events and finished builds into jobs: a [`ChangeScheduler`]
//! debounces matching changes before firing its builders, a
//! [`TriggerScheduler`] fires test jobs as soon as a build succeeds.

pub mod change;
pub mod filter;
pub mod pool;
pub mod scheduler;
pub mod trigger;

pub use change::{ChangeScheduler, SchedulerState};
pub use filter::ChangeFilter;
pub use pool::{WorkerLease, WorkerPool};
pub use scheduler::{Scheduler, SchedulerSet};
pub use trigger::TriggerScheduler;
