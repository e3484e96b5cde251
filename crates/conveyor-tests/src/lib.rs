//! Integration test infrastructure for Conveyor CI.
//!
//! Scenarios run the real engine and schedulers against a scripted
//! command runner, so no worker hosts are needed.
//!
//! # Usage
//!
//! ```ignore
//! use conveyor_tests::{ScriptedRunner, master_config, start_engine};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let runner = ScriptedRunner::new();
//!     let engine = start_engine(master_config(), runner.clone());
//!     // dispatch changes, force builds, inspect engine.jobs()
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    EnvFilter::new("warn,conveyor_engine=debug,conveyor_scheduler=debug")
                }),
        )
        .with_test_writer()
        .try_init();
}
