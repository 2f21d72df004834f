//! service-core: error taxonomy, configuration and tracing bootstrap shared by
//! the rate-card invoicing crates.
pub mod config;
pub mod error;
pub mod observability;
