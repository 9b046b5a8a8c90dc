//! A multi-level monetary approval workflow engine.
//!
//! Workflows are ordered chains of approval steps, each gated by a minimum
//! cumulative amount and an approval mode. Requests submitted against a
//! workflow accumulate amounts across submissions and advance level by level
//! until they terminate as approved or rejected.

pub mod condition;
pub mod config;
pub mod error;
pub mod request;
pub mod service;
pub mod store;
pub mod utils;
pub mod workflow;
