//! Infrastructure layer for Procura.
//!
//! Contains implementations of the store traits defined in `procura-core`
//! (SQLite checkpoint and projection stores over a split reader/writer
//! pool) and the `config.toml` loader.

pub mod config;
pub mod sqlite;
