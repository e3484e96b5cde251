//! Conveyor CI Core
//!
//! Core domain types, traits, and error handling for Conveyor CI.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: workers, builder and tester specs, jobs,
//! stage templates, change events and the ports the engine calls through.

pub mod change;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod job;
pub mod ports;
pub mod stage;
pub mod worker;

pub use error::{Error, Result};
pub use ids::*;
