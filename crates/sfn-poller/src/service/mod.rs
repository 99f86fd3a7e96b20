//! Activity task queue service
//!
//! This module provides:
//! - [`ActivityService`] trait covering the four calls a poller makes
//! - [`InMemoryActivityService`] for testing and local runs

mod client;
mod memory;

pub use client::{ActivityService, ActivityTask, ServiceError};
pub use memory::{InMemoryActivityService, Operation, ReportedFailure};
