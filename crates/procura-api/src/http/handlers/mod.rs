//! REST API request handlers.

pub mod instance;
