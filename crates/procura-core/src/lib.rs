//! Core workflow engine for Procura.
//!
//! Holds the storage ports (checkpoint and projection store traits), the
//! graph definition model, the execution engine, the branch aggregator, the
//! state synchronizer, collaborator traits, and the built-in procurement
//! workflow graphs. Storage adapters live in `procura-infra`.

pub mod aggregator;
pub mod collaborator;
pub mod engine;
pub mod graph;
pub mod repository;
pub mod synchronizer;
pub mod workflows;
