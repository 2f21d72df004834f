//! Reporting shapes for the dashboard.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::invoice::InvoiceStatus;

/// Invoice count and sums for one status.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct StatusTotals {
    pub status: InvoiceStatus,
    pub invoice_count: i64,
    pub total: Decimal,
    pub amount_paid: Decimal,
}

/// Headline numbers for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Payments received inside the period.
    pub revenue_in_period: Decimal,
    /// Everything ever paid, cancelled invoices included.
    pub total_revenue: Decimal,
    /// Unpaid balance on draft, sent, partial and overdue invoices.
    pub outstanding: Decimal,
    pub total_invoices: i64,
    pub overdue_count: i64,
    /// One row per status that has invoices, in status order.
    pub status_breakdown: Vec<StatusTotals>,
}

/// Activity in one calendar month. `month` is the first day of the month.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct MonthlyActivity {
    pub month: NaiveDate,
    /// Payments received in the month.
    pub revenue: Decimal,
    /// Invoices dated in the month.
    pub invoice_count: i64,
}

/// Client ranked by amount billed on non-cancelled invoices.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TopClient {
    pub client_id: Uuid,
    pub name: String,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub invoice_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverdueInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub outstanding: Decimal,
    pub due_date: NaiveDate,
    pub days_overdue: i64,
}
