//! Invoice model for ratecard-invoicing.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::line_item::{LineItem, PricedLineItem};

pub const DEFAULT_TEMPLATE: &str = "modern";

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Partial,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "partial" => Some(InvoiceStatus::Partial),
            "overdue" => Some(InvoiceStatus::Overdue),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub template: String,
    pub original_input: Option<String>,
    pub work_date: NaiveDate,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_name: String,
    pub tax_amount: Decimal,
    pub secondary_tax_name: Option<String>,
    pub secondary_tax_amount: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub notes: Option<String>,
    pub sent_to: Option<String>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// Remaining balance; negative when overpaid.
    pub fn outstanding(&self) -> Decimal {
        self.total - self.amount_paid
    }
}

/// Assembled invoice that has not been numbered or stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub tenant_id: Uuid,
    pub client_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub template: String,
    pub original_input: Option<String>,
    pub work_date: NaiveDate,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_name: String,
    pub tax_amount: Decimal,
    pub secondary_tax_name: Option<String>,
    pub secondary_tax_amount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub line_items: Vec<PricedLineItem>,
    pub unmatched_items: Vec<String>,
}

/// Invoice together with its line items in ordinal order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub page_size: i32,
}
