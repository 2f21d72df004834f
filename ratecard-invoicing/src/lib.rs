//! Rate-card invoicing: turns free-text work descriptions into priced,
//! numbered invoices and tracks them through payment.

pub mod config;
pub mod domain;
pub mod models;
pub mod services;
pub mod startup;
