//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (procura-infra) implements. The core crate never depends on any
//! specific storage technology; `memory` provides in-process stores for
//! tests and ephemeral runs.

pub mod checkpoint;
pub mod memory;
pub mod projection;
