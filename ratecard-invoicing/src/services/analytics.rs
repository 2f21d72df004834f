//! Dashboard reporting over a tenant's invoices and payments.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use service_core::error::AppError;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::invoicing::InvoicingService;
use crate::domain::reporting::{chart_months, fill_months, overdue_entry, summarize};
use crate::models::{DashboardStats, MonthlyActivity, OverdueInvoice, TopClient};

pub const DEFAULT_PERIOD_DAYS: i64 = 30;
pub const MAX_PERIOD_DAYS: i64 = 3650;
pub const DEFAULT_CHART_MONTHS: u32 = 6;
pub const MAX_CHART_MONTHS: u32 = 60;
pub const DEFAULT_TOP_CLIENTS: i64 = 5;
pub const MAX_TOP_CLIENTS: i64 = 100;

impl InvoicingService {
    /// Headline figures; revenue in period counts payments received in the
    /// `days` before `now`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn dashboard_stats(
        &self,
        tenant_id: Uuid,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<DashboardStats, AppError> {
        if !(1..=MAX_PERIOD_DAYS).contains(&days) {
            return Err(AppError::invalid(
                "days",
                format!("must be between 1 and {}", MAX_PERIOD_DAYS),
            ));
        }
        self.tenant(tenant_id).await?;

        let period_start = now - Duration::days(days);
        let revenue_in_period = self
            .store()
            .revenue_between(tenant_id, period_start, now)
            .await?;
        let status_breakdown = self.store().status_totals(tenant_id).await?;
        let summary = summarize(&status_breakdown);

        debug!(
            invoices = summary.total_invoices,
            outstanding = %summary.outstanding,
            "Dashboard stats computed"
        );
        Ok(DashboardStats {
            period_start,
            period_end: now,
            revenue_in_period,
            total_revenue: summary.total_revenue,
            outstanding: summary.outstanding,
            total_invoices: summary.total_invoices,
            overdue_count: summary.overdue_count,
            status_breakdown,
        })
    }

    /// One entry per month for the `months` months ending with `today`'s,
    /// oldest first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn revenue_chart(
        &self,
        tenant_id: Uuid,
        months: u32,
        today: NaiveDate,
    ) -> Result<Vec<MonthlyActivity>, AppError> {
        if !(1..=MAX_CHART_MONTHS).contains(&months) {
            return Err(AppError::invalid(
                "months",
                format!("must be between 1 and {}", MAX_CHART_MONTHS),
            ));
        }
        self.tenant(tenant_id).await?;

        let chart = chart_months(months, today)
            .ok_or_else(|| AppError::invalid("months", "reaches outside the supported calendar"))?;
        let since = chart.first().copied().unwrap_or(today);
        let activity = self.store().monthly_activity(tenant_id, since).await?;
        Ok(fill_months(&chart, &activity))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn top_clients(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TopClient>, AppError> {
        if !(1..=MAX_TOP_CLIENTS).contains(&limit) {
            return Err(AppError::invalid(
                "limit",
                format!("must be between 1 and {}", MAX_TOP_CLIENTS),
            ));
        }
        self.tenant(tenant_id).await?;
        self.store().top_clients(tenant_id, limit).await
    }

    /// Unpaid invoices past due as of `today`, earliest due first. Invoices
    /// not yet flagged by the overdue sweep are included.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, today = %today))]
    pub async fn overdue_invoices(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<OverdueInvoice>, AppError> {
        self.tenant(tenant_id).await?;
        let invoices = self.store().list_overdue_invoices(tenant_id, today).await?;
        Ok(invoices
            .iter()
            .map(|invoice| overdue_entry(invoice, today))
            .collect())
    }
}
