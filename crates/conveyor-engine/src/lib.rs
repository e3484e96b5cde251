//! Build engine for Conveyor CI.
//!
//! The [`BuildEngine`] acquires a worker for each job, runs its stage
//! commands through a [`JobExecutor`], reports status and fires test jobs
//! when a build succeeds.

pub mod engine;
pub mod executor;
pub mod joblog;
pub mod table;

pub use engine::BuildEngine;
pub use executor::{Execution, JobExecutor};
pub use joblog::JobLog;
pub use table::JobTable;
