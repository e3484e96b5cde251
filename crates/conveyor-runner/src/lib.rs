//! Stage command execution for Conveyor CI.
//!
//! Commands run as child processes, either locally or over ssh for workers
//! with a remote endpoint. Every invocation is bounded by a timeout and can
//! be aborted through a cancellation token, which kills the process.

pub mod process;
pub mod runner;

pub use process::ProcessRunner;
pub use runner::{
    CommandContext, CommandResult, CommandRunner, OutputLine, OutputStream, RunnerConfig,
};
