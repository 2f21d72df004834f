//! Dashboard figures derived from invoice aggregates.

use chrono::{Datelike, Days, Months, NaiveDate};
use rust_decimal::Decimal;

use crate::models::{Invoice, InvoiceStatus, MonthlyActivity, OverdueInvoice, StatusTotals};

/// Statuses whose unpaid balance still counts as owed.
pub fn is_collectible(status: InvoiceStatus) -> bool {
    matches!(
        status,
        InvoiceStatus::Draft | InvoiceStatus::Sent | InvoiceStatus::Partial | InvoiceStatus::Overdue
    )
}

/// Delivered, unpaid and past due. Unlike [`crate::domain::ledger::is_overdue`]
/// this includes invoices already flagged overdue.
pub fn is_past_due(invoice: &Invoice, today: NaiveDate) -> bool {
    matches!(
        invoice.status,
        InvoiceStatus::Sent | InvoiceStatus::Partial | InvoiceStatus::Overdue
    ) && invoice.due_date < today
        && invoice.outstanding() > Decimal::ZERO
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// First days of the `count` months ending with `today`'s month, oldest first.
/// `None` if the range leaves chrono's calendar.
pub fn chart_months(count: u32, today: NaiveDate) -> Option<Vec<NaiveDate>> {
    let current = month_start(today);
    (0..count)
        .rev()
        .map(|back| current.checked_sub_months(Months::new(back)))
        .collect()
}

/// One entry per month in `months`; months without activity are zero.
pub fn fill_months(months: &[NaiveDate], activity: &[MonthlyActivity]) -> Vec<MonthlyActivity> {
    months
        .iter()
        .map(|&month| {
            activity
                .iter()
                .find(|a| a.month == month)
                .cloned()
                .unwrap_or(MonthlyActivity {
                    month,
                    revenue: Decimal::ZERO,
                    invoice_count: 0,
                })
        })
        .collect()
}

/// Totals read off the per-status breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BreakdownSummary {
    pub total_revenue: Decimal,
    pub outstanding: Decimal,
    pub total_invoices: i64,
    pub overdue_count: i64,
}

pub fn summarize(breakdown: &[StatusTotals]) -> BreakdownSummary {
    breakdown
        .iter()
        .fold(BreakdownSummary::default(), |mut summary, row| {
            summary.total_revenue += row.amount_paid;
            summary.total_invoices += row.invoice_count;
            if is_collectible(row.status) {
                summary.outstanding += row.total - row.amount_paid;
            }
            if row.status == InvoiceStatus::Overdue {
                summary.overdue_count += row.invoice_count;
            }
            summary
        })
}

pub fn overdue_entry(invoice: &Invoice, today: NaiveDate) -> OverdueInvoice {
    OverdueInvoice {
        invoice_id: invoice.invoice_id,
        invoice_number: invoice.invoice_number.clone(),
        client_id: invoice.client_id,
        status: invoice.status,
        total: invoice.total,
        amount_paid: invoice.amount_paid,
        outstanding: invoice.outstanding(),
        due_date: invoice.due_date,
        days_overdue: (today - invoice.due_date).num_days(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(status: InvoiceStatus, count: i64, total: Decimal, paid: Decimal) -> StatusTotals {
        StatusTotals {
            status,
            invoice_count: count,
            total,
            amount_paid: paid,
        }
    }

    #[test]
    fn chart_months_cross_year_boundaries() {
        assert_eq!(
            chart_months(3, date(2024, 2, 29)).unwrap(),
            vec![date(2023, 12, 1), date(2024, 1, 1), date(2024, 2, 1)]
        );
        assert_eq!(chart_months(1, date(2024, 5, 1)).unwrap(), vec![date(2024, 5, 1)]);
        assert!(chart_months(0, date(2024, 5, 1)).unwrap().is_empty());
    }

    #[test]
    fn fill_months_zeroes_quiet_months() {
        let months = [date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)];
        let activity = [MonthlyActivity {
            month: date(2024, 2, 1),
            revenue: dec!(120),
            invoice_count: 2,
        }];

        let filled = fill_months(&months, &activity);
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].revenue, Decimal::ZERO);
        assert_eq!(filled[1].invoice_count, 2);
        assert_eq!(filled[2].month, date(2024, 3, 1));
    }

    #[test]
    fn summary_skips_paid_and_cancelled_balances() {
        let summary = summarize(&[
            row(InvoiceStatus::Cancelled, 1, dec!(500), dec!(0)),
            row(InvoiceStatus::Draft, 2, dec!(200), dec!(0)),
            row(InvoiceStatus::Overdue, 1, dec!(100), dec!(40)),
            row(InvoiceStatus::Paid, 3, dec!(300), dec!(310)),
        ]);

        assert_eq!(summary.total_invoices, 7);
        assert_eq!(summary.total_revenue, dec!(350));
        assert_eq!(summary.outstanding, dec!(260));
        assert_eq!(summary.overdue_count, 1);
    }
}
