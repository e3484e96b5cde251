//! Commit status reporting for Conveyor CI.
//!
//! A [`StatusReporter`] pushes job start and end to every configured sink:
//! the GitHub commit status API, a generic webhook, or the log. Delivery
//! is best effort and never changes a job's outcome.

pub mod reporter;
pub mod sinks;

pub use reporter::StatusReporter;
pub use sinks::{GithubStatusSink, LogSink, NotifyError, WebhookSink, create_sink};
