//! Shared domain types for Procura.
//!
//! This crate contains the core domain types used across the workflow engine:
//! instances, checkpoints, transition records, typed payloads, approval
//! branch sets, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod error;
pub mod payload;
pub mod workflow;
