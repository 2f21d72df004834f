//! Client model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::tenant::DEFAULT_PAYMENT_TERMS_DAYS;

/// Invoiced party. The totals are caches of the client's invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub payment_terms: i32,
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
    pub invoice_count: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a client.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClient {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    #[validate(range(min = 0, max = 365))]
    #[serde(default = "default_payment_terms")]
    pub payment_terms: i32,
}

fn default_payment_terms() -> i32 {
    DEFAULT_PAYMENT_TERMS_DAYS
}

/// Totals recomputed from a client's invoices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClientTotals {
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
    pub invoice_count: i64,
}
