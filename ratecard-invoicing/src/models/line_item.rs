//! Invoice line item model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Line produced by pricing. Description, unit and unit price are copied
/// from the matched rate card entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLineItem {
    pub rate_entry_id: Option<Uuid>,
    pub item_key: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub matched: bool,
    pub notes: Option<String>,
    pub ordinal: i32,
}

/// Persisted line item. `unit_price` and `line_total` never change after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub rate_entry_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub matched: bool,
    pub notes: Option<String>,
    pub ordinal: i32,
    pub created_utc: DateTime<Utc>,
}
