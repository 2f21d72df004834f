//! Persistence seam for the invoicing core.
//!
//! Every method is scoped by tenant: a row that belongs to another tenant is
//! reported exactly like a missing row (`Ok(None)`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    Client, ClientTotals, CreateClient, CreateRateCardEntry, CreateSchedule, Invoice,
    InvoiceDetail, LineItem, ListInvoicesFilter, MonthlyActivity, NewInvoice, Payment,
    RateCardEntry, RecordPayment, RecurringSchedule, ScheduleAdvance, StatusTotals, Tenant,
    TenantSettings, TopClient, UpdateRateCardEntry,
};

pub const DEFAULT_PAGE_SIZE: i32 = 50;
pub const MAX_PAGE_SIZE: i32 = 200;

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: i32) -> i32 {
    if requested <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        requested.min(MAX_PAGE_SIZE)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Tenants

    /// Return the tenant owning `email`, creating it with `settings` if absent.
    async fn get_or_create_tenant(
        &self,
        email: &str,
        settings: &TenantSettings,
    ) -> Result<Tenant, AppError>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;

    async fn update_tenant_settings(
        &self,
        tenant_id: Uuid,
        settings: &TenantSettings,
    ) -> Result<Option<Tenant>, AppError>;

    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError>;

    // Rate card

    async fn create_rate_entry(&self, input: &CreateRateCardEntry) -> Result<RateCardEntry, AppError>;

    /// Any status.
    async fn get_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError>;

    /// Active entries in creation order (created_utc, then entry_id).
    async fn list_active_rate_entries(&self, tenant_id: Uuid) -> Result<Vec<RateCardEntry>, AppError>;

    /// Entries with the given ids, any status. Unknown ids are skipped.
    async fn get_rate_entries(
        &self,
        tenant_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<Vec<RateCardEntry>, AppError>;

    async fn update_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateRateCardEntry,
    ) -> Result<Option<RateCardEntry>, AppError>;

    async fn retire_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError>;

    // Clients

    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError>;

    async fn get_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>, AppError>;

    /// Case-insensitive exact name match; the oldest client wins.
    async fn find_client_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Client>, AppError>;

    /// Totals summed from the client's non-cancelled invoices.
    async fn client_totals(&self, tenant_id: Uuid, client_id: Uuid) -> Result<ClientTotals, AppError>;

    async fn set_client_totals(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        totals: &ClientTotals,
    ) -> Result<Option<Client>, AppError>;

    // Invoices

    /// Number of the most recently created invoice.
    async fn latest_invoice_number(&self, tenant_id: Uuid) -> Result<Option<String>, AppError>;

    /// Store a draft invoice with its lines and bump the client's cached totals.
    /// With `advance`, the schedule is moved forward in the same unit of work,
    /// and the whole insert fails with `Conflict` if the schedule's `next_due`
    /// no longer equals `advance.expected_next_due`.
    async fn insert_invoice(
        &self,
        invoice_number: &str,
        invoice: &NewInvoice,
        advance: Option<&ScheduleAdvance>,
    ) -> Result<InvoiceDetail, AppError>;

    async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Line items sorted by ordinal.
    async fn get_line_items(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError>;

    /// Newest first.
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Stamp delivery and move the invoice to its post-send status, decided
    /// from the invoice as it is at write time. Cancelled invoices are rejected.
    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_to: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<Invoice>, AppError>;

    /// Cancel under the invoice lock; the client's cached totals drop the invoice.
    async fn cancel_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Apply a payment atomically: the invoice's paid amount and status, the
    /// payment record and the client's `total_paid` change together.
    async fn record_payment(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        payment: &RecordPayment,
    ) -> Result<Option<(Invoice, Payment)>, AppError>;

    /// Oldest first.
    async fn list_payments(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>, AppError>;

    /// Flag sent/partial invoices past due with a balance. Returns how many changed.
    async fn mark_overdue_invoices(&self, tenant_id: Uuid, today: NaiveDate) -> Result<u64, AppError>;

    // Recurring schedules

    async fn create_schedule(
        &self,
        input: &CreateSchedule,
        template: &str,
    ) -> Result<RecurringSchedule, AppError>;

    async fn get_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError>;

    /// Active schedules with `next_due <= today`, oldest due first.
    async fn list_due_schedules(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<RecurringSchedule>, AppError>;

    async fn deactivate_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError>;

    // Reporting

    /// Sum of payments received in `[from, to)`.
    async fn revenue_between(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal, AppError>;

    /// Count and sums per status, ordered by status name. Statuses without invoices are absent.
    async fn status_totals(&self, tenant_id: Uuid) -> Result<Vec<StatusTotals>, AppError>;

    /// Months on or after `since` with payments received (UTC) or invoices dated
    /// in them, oldest first. Quiet months are absent.
    async fn monthly_activity(
        &self,
        tenant_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<MonthlyActivity>, AppError>;

    /// Clients by amount billed on non-cancelled invoices, largest first, then by name.
    async fn top_clients(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TopClient>, AppError>;

    /// Sent, partial or overdue invoices with a balance that fell due before
    /// `today`, earliest due first.
    async fn list_overdue_invoices(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Invoice>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(-3), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(10), 10);
        assert_eq!(page_size(10_000), MAX_PAGE_SIZE);
    }
}
