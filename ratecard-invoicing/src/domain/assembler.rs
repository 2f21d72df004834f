//! Turn a pricing result into an unsaved invoice and assign invoice numbers.

use anyhow::anyhow;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::pricing::{PricingResult, TaxRates};
use crate::models::{Client, NewInvoice, Tenant, DEFAULT_TEMPLATE};

const WORK_DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything besides the priced lines that goes onto an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceMeta {
    pub tenant_id: Uuid,
    pub client_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub template: String,
    pub original_input: Option<String>,
    pub work_date: NaiveDate,
    pub invoice_date: NaiveDate,
    pub payment_terms_days: i32,
    pub tax_name: String,
    pub secondary_tax_name: Option<String>,
    pub notes: Option<String>,
}

impl InvoiceMeta {
    /// Defaults from the tenant's settings, with the client's payment terms
    /// taking precedence when a client is attached.
    pub fn for_tenant(tenant: &Tenant, client: Option<&Client>, invoice_date: NaiveDate) -> Self {
        let settings = &tenant.settings;
        Self {
            tenant_id: tenant.tenant_id,
            client_id: client.map(|c| c.client_id),
            schedule_id: None,
            template: DEFAULT_TEMPLATE.to_string(),
            original_input: None,
            work_date: invoice_date,
            invoice_date,
            payment_terms_days: client
                .map(|c| c.payment_terms)
                .unwrap_or(settings.default_payment_terms),
            tax_name: settings.tax_name.clone(),
            secondary_tax_name: settings
                .secondary_tax_rate
                .and(settings.secondary_tax_name.clone()),
            notes: None,
        }
    }

    pub fn due_date(&self) -> NaiveDate {
        self.invoice_date + Duration::days(i64::from(self.payment_terms_days))
    }
}

/// Tax rates currently configured for a tenant.
pub fn tenant_tax_rates(tenant: &Tenant) -> TaxRates {
    TaxRates::new(tenant.settings.tax_rate, tenant.settings.secondary_tax_rate)
}

/// Build the unsaved invoice. Line ordinals are their position in the result.
pub fn assemble(pricing: PricingResult, meta: InvoiceMeta) -> NewInvoice {
    let due_date = meta.due_date();
    let line_items = pricing
        .line_items
        .into_iter()
        .enumerate()
        .map(|(position, mut line)| {
            line.ordinal = position as i32;
            line
        })
        .collect();

    NewInvoice {
        tenant_id: meta.tenant_id,
        client_id: meta.client_id,
        schedule_id: meta.schedule_id,
        template: meta.template,
        original_input: meta.original_input,
        work_date: meta.work_date,
        invoice_date: meta.invoice_date,
        due_date,
        subtotal: pricing.subtotal,
        tax_name: meta.tax_name,
        tax_amount: pricing.tax_amount,
        secondary_tax_name: meta.secondary_tax_name,
        secondary_tax_amount: pricing.secondary_tax_amount,
        total: pricing.total,
        notes: meta.notes,
        line_items,
        unmatched_items: pricing.unmatched_items,
    }
}

/// Parse an extractor-supplied `YYYY-MM-DD` date, falling back when absent
/// or malformed.
pub fn resolve_work_date(raw: Option<&str>, fallback: NaiveDate) -> NaiveDate {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveDate::parse_from_str(s, WORK_DATE_FORMAT).ok())
        .unwrap_or(fallback)
}

/// Next number after `last`: `{year}-{suffix + 1:04}`. The suffix keeps
/// counting across years; a non-numeric suffix restarts at 0001.
pub fn next_invoice_number(last: Option<&str>, year: i32) -> Result<String, AppError> {
    let digits = last
        .and_then(|number| number.rsplit('-').next())
        .map(str::trim)
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()));
    let next = match digits {
        None => 1,
        Some(suffix) => suffix
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| {
                AppError::Conflict(anyhow!("Invoice number sequence exhausted after '{}'", suffix))
            })?,
    };
    Ok(format!("{}-{:04}", year, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::total_lines;
    use crate::models::{PricedLineItem, TenantSettings};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tenant() -> Tenant {
        Tenant {
            tenant_id: Uuid::new_v4(),
            email: "owner@example.com".to_string(),
            settings: TenantSettings::new("Spark Electric"),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn line(description: &str, quantity: Decimal, unit_price: Decimal, ordinal: i32) -> PricedLineItem {
        PricedLineItem {
            rate_entry_id: Some(Uuid::new_v4()),
            item_key: format!("labor.{}", description),
            description: description.to_string(),
            quantity,
            unit: "hour".to_string(),
            unit_price,
            line_total: quantity * unit_price,
            matched: true,
            notes: None,
            ordinal,
        }
    }

    #[test]
    fn invoice_numbering() {
        assert_eq!(next_invoice_number(Some("2024-0007"), 2024).unwrap(), "2024-0008");
        assert_eq!(next_invoice_number(None, 2025).unwrap(), "2025-0001");
        assert_eq!(next_invoice_number(Some("2024-9999"), 2024).unwrap(), "2024-10000");
    }

    #[test]
    fn invoice_suffix_continues_across_years() {
        assert_eq!(next_invoice_number(Some("2024-0041"), 2025).unwrap(), "2025-0042");
    }

    #[test]
    fn unparseable_last_number_restarts() {
        assert_eq!(next_invoice_number(Some("INV-ABC"), 2024).unwrap(), "2024-0001");
        assert_eq!(next_invoice_number(Some(""), 2024).unwrap(), "2024-0001");
    }

    #[test]
    fn large_suffixes_do_not_wrap() {
        assert_eq!(
            next_invoice_number(Some("2024-4294967295"), 2024).unwrap(),
            "2024-4294967296"
        );
        for last in ["2024-18446744073709551615", "2024-99999999999999999999999"] {
            assert!(matches!(
                next_invoice_number(Some(last), 2024),
                Err(AppError::Conflict(_))
            ));
        }
    }

    #[test]
    fn work_date_parses_or_falls_back() {
        let fallback = date(2024, 6, 1);
        assert_eq!(resolve_work_date(Some("2024-05-17"), fallback), date(2024, 5, 17));
        assert_eq!(resolve_work_date(Some(" 2024-05-17 "), fallback), date(2024, 5, 17));
        assert_eq!(resolve_work_date(Some("last tuesday"), fallback), fallback);
        assert_eq!(resolve_work_date(Some("2024-02-30"), fallback), fallback);
        assert_eq!(resolve_work_date(None, fallback), fallback);
    }

    #[test]
    fn assemble_restamps_ordinals_and_copies_totals() {
        let pricing = total_lines(
            vec![
                line("wiring", dec!(2), dec!(85), 7),
                line("inspection", dec!(1), dec!(40), 3),
            ],
            vec!["labor.x (qty: 1)".to_string()],
            TaxRates::new(dec!(0.05), None),
        )
        .unwrap();
        let tenant = tenant();
        let meta = InvoiceMeta::for_tenant(&tenant, None, date(2024, 3, 10));

        let invoice = assemble(pricing, meta);

        assert_eq!(invoice.line_items[0].ordinal, 0);
        assert_eq!(invoice.line_items[1].ordinal, 1);
        assert_eq!(invoice.line_items[1].description, "inspection");
        assert_eq!(invoice.subtotal, dec!(210.00));
        assert_eq!(invoice.tax_amount, dec!(10.50));
        assert_eq!(invoice.total, dec!(220.50));
        assert_eq!(invoice.tax_name, "GST");
        assert_eq!(invoice.secondary_tax_name, None);
        assert_eq!(invoice.unmatched_items, vec!["labor.x (qty: 1)"]);
        assert_eq!(invoice.template, DEFAULT_TEMPLATE);
        assert_eq!(invoice.due_date, date(2024, 4, 9));
    }

    #[test]
    fn client_payment_terms_override_tenant_default() {
        let tenant = tenant();
        let client = Client {
            client_id: Uuid::new_v4(),
            tenant_id: tenant.tenant_id,
            name: "Acme".to_string(),
            email: None,
            phone: None,
            address: None,
            company: None,
            notes: None,
            payment_terms: 15,
            total_invoiced: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            invoice_count: 0,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };

        let meta = InvoiceMeta::for_tenant(&tenant, Some(&client), date(2024, 12, 20));
        assert_eq!(meta.client_id, Some(client.client_id));
        assert_eq!(meta.due_date(), date(2025, 1, 4));
    }

    #[test]
    fn secondary_tax_name_only_when_rate_is_set() {
        let mut tenant = tenant();
        tenant.settings.secondary_tax_name = Some("PST".to_string());
        let meta = InvoiceMeta::for_tenant(&tenant, None, date(2024, 1, 1));
        assert_eq!(meta.secondary_tax_name, None);

        tenant.settings.secondary_tax_rate = Some(dec!(0.07));
        let meta = InvoiceMeta::for_tenant(&tenant, None, date(2024, 1, 1));
        assert_eq!(meta.secondary_tax_name.as_deref(), Some("PST"));
        assert_eq!(tenant_tax_rates(&tenant).secondary, Some(dec!(0.07)));
    }
}
