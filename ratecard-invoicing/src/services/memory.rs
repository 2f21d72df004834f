//! In-process store used for local runs and the test suite.
//!
//! All state sits behind one async mutex, so every trait method is a single
//! atomic unit of work. Vectors keep insertion order, which stands in for
//! creation time.

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::ledger::{apply_payment, ensure_cancellable, is_overdue, status_after_send};
use crate::domain::reporting::{is_past_due, month_start};
use crate::models::{
    Client, ClientTotals, CreateClient, CreateRateCardEntry, CreateSchedule, Invoice,
    InvoiceDetail, InvoiceStatus, LineItem, ListInvoicesFilter, MonthlyActivity, NewInvoice,
    Payment, RateCardEntry, RateCardStatus, RecordPayment, RecurringSchedule, ScheduleAdvance,
    ScheduleLine, StatusTotals, Tenant, TenantSettings, TopClient, UpdateRateCardEntry,
};
use crate::services::store::{page_size, Store};

#[derive(Default)]
struct State {
    tenants: Vec<Tenant>,
    entries: Vec<RateCardEntry>,
    clients: Vec<Client>,
    invoices: Vec<Invoice>,
    line_items: Vec<LineItem>,
    payments: Vec<Payment>,
    schedules: Vec<RecurringSchedule>,
}

impl State {
    fn invoice_mut(&mut self, tenant_id: Uuid, invoice_id: Uuid) -> Option<&mut Invoice> {
        self.invoices
            .iter_mut()
            .find(|i| i.tenant_id == tenant_id && i.invoice_id == invoice_id)
    }

    fn client_mut(&mut self, tenant_id: Uuid, client_id: Uuid) -> Option<&mut Client> {
        self.clients
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.client_id == client_id)
    }

    fn schedule_mut(&mut self, tenant_id: Uuid, schedule_id: Uuid) -> Option<&mut RecurringSchedule> {
        self.schedules
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.schedule_id == schedule_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    #[instrument(skip(self, settings), fields(email = %email))]
    async fn get_or_create_tenant(
        &self,
        email: &str,
        settings: &TenantSettings,
    ) -> Result<Tenant, AppError> {
        let mut state = self.state.lock().await;
        let email = email.trim();
        if let Some(existing) = state
            .tenants
            .iter()
            .find(|t| t.email.eq_ignore_ascii_case(email))
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let tenant = Tenant {
            tenant_id: Uuid::new_v4(),
            email: email.to_string(),
            settings: settings.clone(),
            created_utc: now,
            updated_utc: now,
        };
        state.tenants.push(tenant.clone());
        info!(tenant_id = %tenant.tenant_id, "Tenant provisioned");
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        let state = self.state.lock().await;
        Ok(state.tenants.iter().find(|t| t.tenant_id == tenant_id).cloned())
    }

    async fn update_tenant_settings(
        &self,
        tenant_id: Uuid,
        settings: &TenantSettings,
    ) -> Result<Option<Tenant>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state
            .tenants
            .iter_mut()
            .find(|t| t.tenant_id == tenant_id)
            .map(|tenant| {
                tenant.settings = settings.clone();
                tenant.updated_utc = Utc::now();
                tenant.clone()
            }))
    }

    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let state = self.state.lock().await;
        Ok(state.tenants.iter().map(|t| t.tenant_id).collect())
    }

    async fn create_rate_entry(&self, input: &CreateRateCardEntry) -> Result<RateCardEntry, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let entry = RateCardEntry {
            entry_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            category: input.category,
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            rate: input.rate,
            unit: input.unit.trim().to_string(),
            aliases: input.aliases.clone(),
            status: RateCardStatus::Active,
            created_utc: now,
            updated_utc: now,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.entry_id == entry_id)
            .cloned())
    }

    async fn list_active_rate_entries(&self, tenant_id: Uuid) -> Result<Vec<RateCardEntry>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.is_active())
            .cloned()
            .collect())
    }

    async fn get_rate_entries(
        &self,
        tenant_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<Vec<RateCardEntry>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && entry_ids.contains(&e.entry_id))
            .cloned()
            .collect())
    }

    async fn update_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateRateCardEntry,
    ) -> Result<Option<RateCardEntry>, AppError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.entry_id == entry_id)
        else {
            return Ok(None);
        };

        if let Some(name) = &input.name {
            entry.name = name.trim().to_string();
        }
        if let Some(description) = &input.description {
            entry.description = Some(description.clone());
        }
        if let Some(rate) = input.rate {
            entry.rate = rate;
        }
        if let Some(unit) = &input.unit {
            entry.unit = unit.trim().to_string();
        }
        if let Some(aliases) = &input.aliases {
            entry.aliases = aliases.clone();
        }
        entry.updated_utc = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn retire_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state
            .entries
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.entry_id == entry_id)
            .map(|entry| {
                entry.status = RateCardStatus::Retired;
                entry.updated_utc = Utc::now();
                entry.clone()
            }))
    }

    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let client = Client {
            client_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            name: input.name.trim().to_string(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            address: input.address.clone(),
            company: input.company.clone(),
            notes: input.notes.clone(),
            payment_terms: input.payment_terms,
            total_invoiced: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            invoice_count: 0,
            created_utc: now,
            updated_utc: now,
        };
        state.clients.push(client.clone());
        Ok(client)
    }

    async fn get_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .clients
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.client_id == client_id)
            .cloned())
    }

    async fn find_client_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Client>, AppError> {
        let state = self.state.lock().await;
        let wanted = name.trim().to_lowercase();
        Ok(state
            .clients
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn client_totals(&self, tenant_id: Uuid, client_id: Uuid) -> Result<ClientTotals, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.client_id == Some(client_id)
                    && i.status != InvoiceStatus::Cancelled
            })
            .fold(ClientTotals::default(), |mut totals, invoice| {
                totals.total_invoiced += invoice.total;
                totals.total_paid += invoice.amount_paid;
                totals.invoice_count += 1;
                totals
            }))
    }

    async fn set_client_totals(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        totals: &ClientTotals,
    ) -> Result<Option<Client>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state.client_mut(tenant_id, client_id).map(|client| {
            client.total_invoiced = totals.total_invoiced;
            client.total_paid = totals.total_paid;
            client.invoice_count = i32::try_from(totals.invoice_count).unwrap_or(i32::MAX);
            client.updated_utc = Utc::now();
            client.clone()
        }))
    }

    async fn latest_invoice_number(&self, tenant_id: Uuid) -> Result<Option<String>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .find(|i| i.tenant_id == tenant_id)
            .map(|i| i.invoice_number.clone()))
    }

    #[instrument(skip(self, invoice, advance), fields(tenant_id = %invoice.tenant_id, invoice_number = %invoice_number))]
    async fn insert_invoice(
        &self,
        invoice_number: &str,
        invoice: &NewInvoice,
        advance: Option<&ScheduleAdvance>,
    ) -> Result<InvoiceDetail, AppError> {
        let mut state = self.state.lock().await;

        if state
            .invoices
            .iter()
            .any(|i| i.tenant_id == invoice.tenant_id && i.invoice_number == invoice_number)
        {
            return Err(AppError::Conflict(anyhow!(
                "Invoice number {} already exists",
                invoice_number
            )));
        }

        if let Some(advance) = advance {
            let schedule = state
                .schedule_mut(invoice.tenant_id, advance.schedule_id)
                .filter(|s| s.active && s.next_due == advance.expected_next_due)
                .ok_or_else(|| {
                    AppError::Conflict(anyhow!(
                        "Schedule {} is no longer due on {}",
                        advance.schedule_id,
                        advance.expected_next_due
                    ))
                })?;
            schedule.next_due = advance.next_due;
            schedule.active = advance.active;
            schedule.updated_utc = Utc::now();
        }

        let now = Utc::now();
        let stored = Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: invoice.tenant_id,
            client_id: invoice.client_id,
            schedule_id: invoice.schedule_id,
            invoice_number: invoice_number.to_string(),
            status: InvoiceStatus::Draft,
            template: invoice.template.clone(),
            original_input: invoice.original_input.clone(),
            work_date: invoice.work_date,
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
            subtotal: invoice.subtotal,
            tax_name: invoice.tax_name.clone(),
            tax_amount: invoice.tax_amount,
            secondary_tax_name: invoice.secondary_tax_name.clone(),
            secondary_tax_amount: invoice.secondary_tax_amount,
            total: invoice.total,
            amount_paid: Decimal::ZERO,
            payment_method: None,
            payment_reference: None,
            notes: invoice.notes.clone(),
            sent_to: None,
            sent_utc: None,
            paid_utc: None,
            created_utc: now,
            updated_utc: now,
        };

        let mut line_items: Vec<LineItem> = invoice
            .line_items
            .iter()
            .map(|line| LineItem {
                line_item_id: Uuid::new_v4(),
                invoice_id: stored.invoice_id,
                tenant_id: stored.tenant_id,
                rate_entry_id: line.rate_entry_id,
                description: line.description.clone(),
                quantity: line.quantity,
                unit: line.unit.clone(),
                unit_price: line.unit_price,
                line_total: line.line_total,
                matched: line.matched,
                notes: line.notes.clone(),
                ordinal: line.ordinal,
                created_utc: now,
            })
            .collect();
        line_items.sort_by_key(|line| line.ordinal);

        if let Some(client_id) = stored.client_id {
            if let Some(client) = state.client_mut(stored.tenant_id, client_id) {
                client.total_invoiced += stored.total;
                client.invoice_count += 1;
                client.updated_utc = now;
            }
        }

        state.invoices.push(stored.clone());
        state.line_items.extend(line_items.iter().cloned());

        info!(invoice_id = %stored.invoice_id, total = %stored.total, "Invoice stored");

        Ok(InvoiceDetail {
            invoice: stored,
            line_items,
        })
    }

    async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.tenant_id == tenant_id && i.invoice_id == invoice_id)
            .cloned())
    }

    async fn get_line_items(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let state = self.state.lock().await;
        let mut lines: Vec<LineItem> = state
            .line_items
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.invoice_id == invoice_id)
            .cloned()
            .collect();
        lines.sort_by_key(|line| line.ordinal);
        Ok(lines)
    }

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .filter(|i| i.tenant_id == tenant_id)
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.client_id.map_or(true, |c| i.client_id == Some(c)))
            .take(page_size(filter.page_size) as usize)
            .cloned()
            .collect())
    }

    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_to: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoice_mut(tenant_id, invoice_id) else {
            return Ok(None);
        };
        invoice.status = status_after_send(invoice.status)?;
        invoice.sent_to = Some(sent_to.to_string());
        invoice.sent_utc = Some(sent_utc);
        invoice.updated_utc = Utc::now();
        Ok(Some(invoice.clone()))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn cancel_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoice_mut(tenant_id, invoice_id) else {
            return Ok(None);
        };
        ensure_cancellable(invoice)?;

        invoice.status = InvoiceStatus::Cancelled;
        invoice.updated_utc = Utc::now();
        let cancelled = invoice.clone();

        if let Some(client_id) = cancelled.client_id {
            if let Some(client) = state.client_mut(tenant_id, client_id) {
                client.total_invoiced -= cancelled.total;
                client.invoice_count = (client.invoice_count - 1).max(0);
                client.updated_utc = cancelled.updated_utc;
            }
        }

        info!(invoice_number = %cancelled.invoice_number, "Invoice cancelled");
        Ok(Some(cancelled))
    }

    #[instrument(skip(self, payment), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn record_payment(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        payment: &RecordPayment,
    ) -> Result<Option<(Invoice, Payment)>, AppError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state.invoice_mut(tenant_id, invoice_id) else {
            return Ok(None);
        };
        let applied = apply_payment(invoice, payment)?;

        let now = Utc::now();
        invoice.amount_paid = applied.amount_paid;
        invoice.status = applied.status;
        invoice.paid_utc = applied.paid_utc;
        invoice.payment_method = Some(payment.method.as_str().to_string());
        invoice.payment_reference = payment.reference.clone();
        invoice.updated_utc = now;
        let updated = invoice.clone();

        let recorded = Payment {
            payment_id: Uuid::new_v4(),
            tenant_id,
            invoice_id,
            client_id: updated.client_id,
            amount: payment.amount,
            method: payment.method,
            reference: payment.reference.clone(),
            received_utc: payment.received_utc,
            created_utc: now,
        };
        state.payments.push(recorded.clone());

        if let Some(client_id) = updated.client_id {
            if let Some(client) = state.client_mut(tenant_id, client_id) {
                client.total_paid += payment.amount;
                client.updated_utc = now;
            }
        }

        info!(payment_id = %recorded.payment_id, amount = %recorded.amount, status = %updated.status, "Payment recorded");
        Ok(Some((updated, recorded)))
    }

    async fn list_payments(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.received_utc);
        Ok(payments)
    }

    async fn mark_overdue_invoices(&self, tenant_id: Uuid, today: NaiveDate) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for invoice in state
            .invoices
            .iter_mut()
            .filter(|i| i.tenant_id == tenant_id && is_overdue(i, today))
        {
            invoice.status = InvoiceStatus::Overdue;
            invoice.updated_utc = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn create_schedule(
        &self,
        input: &CreateSchedule,
        template: &str,
    ) -> Result<RecurringSchedule, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let schedule_id = Uuid::new_v4();
        let schedule = RecurringSchedule {
            schedule_id,
            tenant_id: input.tenant_id,
            client_id: input.client_id,
            frequency: input.frequency,
            start_date: input.start_date,
            end_date: input.end_date,
            next_due: input.start_date,
            active: true,
            template: template.to_string(),
            notes: input.notes.clone(),
            created_utc: now,
            updated_utc: now,
            lines: input
                .lines
                .iter()
                .enumerate()
                .map(|(ordinal, line)| ScheduleLine {
                    schedule_id,
                    rate_entry_id: line.rate_entry_id,
                    quantity: line.quantity,
                    description: line.description.clone(),
                    ordinal: ordinal as i32,
                })
                .collect(),
        };
        state.schedules.push(schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .schedules
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.schedule_id == schedule_id)
            .cloned())
    }

    async fn list_due_schedules(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<RecurringSchedule>, AppError> {
        let state = self.state.lock().await;
        let mut due: Vec<RecurringSchedule> = state
            .schedules
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.active && s.next_due <= today)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_due);
        Ok(due)
    }

    async fn deactivate_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state.schedule_mut(tenant_id, schedule_id).map(|schedule| {
            schedule.active = false;
            schedule.updated_utc = Utc::now();
            schedule.clone()
        }))
    }

    async fn revenue_between(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.received_utc >= from && p.received_utc < to)
            .map(|p| p.amount)
            .sum())
    }

    async fn status_totals(&self, tenant_id: Uuid) -> Result<Vec<StatusTotals>, AppError> {
        let state = self.state.lock().await;
        let mut totals: Vec<StatusTotals> = Vec::new();
        for invoice in state.invoices.iter().filter(|i| i.tenant_id == tenant_id) {
            match totals.iter_mut().find(|t| t.status == invoice.status) {
                Some(row) => {
                    row.invoice_count += 1;
                    row.total += invoice.total;
                    row.amount_paid += invoice.amount_paid;
                }
                None => totals.push(StatusTotals {
                    status: invoice.status,
                    invoice_count: 1,
                    total: invoice.total,
                    amount_paid: invoice.amount_paid,
                }),
            }
        }
        totals.sort_by_key(|t| t.status.as_str());
        Ok(totals)
    }

    async fn monthly_activity(
        &self,
        tenant_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<MonthlyActivity>, AppError> {
        let state = self.state.lock().await;
        let mut months: BTreeMap<NaiveDate, MonthlyActivity> = BTreeMap::new();
        let blank = |month: &NaiveDate| MonthlyActivity {
            month: *month,
            revenue: Decimal::ZERO,
            invoice_count: 0,
        };

        for payment in state
            .payments
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.received_utc.date_naive() >= since)
        {
            months
                .entry(month_start(payment.received_utc.date_naive()))
                .or_insert_with_key(blank)
                .revenue += payment.amount;
        }
        for invoice in state
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id && i.invoice_date >= since)
        {
            months
                .entry(month_start(invoice.invoice_date))
                .or_insert_with_key(blank)
                .invoice_count += 1;
        }
        Ok(months.into_values().collect())
    }

    async fn top_clients(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TopClient>, AppError> {
        let state = self.state.lock().await;
        let mut ranked: Vec<TopClient> = state
            .clients
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .filter_map(|client| {
                let billed: Vec<&Invoice> = state
                    .invoices
                    .iter()
                    .filter(|i| {
                        i.tenant_id == tenant_id
                            && i.client_id == Some(client.client_id)
                            && i.status != InvoiceStatus::Cancelled
                    })
                    .collect();
                (!billed.is_empty()).then(|| TopClient {
                    client_id: client.client_id,
                    name: client.name.clone(),
                    total_billed: billed.iter().map(|i| i.total).sum(),
                    total_paid: billed.iter().map(|i| i.amount_paid).sum(),
                    invoice_count: billed.len() as i64,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.total_billed
                .cmp(&a.total_billed)
                .then_with(|| a.name.cmp(&b.name))
        });
        ranked.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(ranked)
    }

    async fn list_overdue_invoices(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut overdue: Vec<Invoice> = state
            .invoices
            .iter()
            .filter(|i| i.tenant_id == tenant_id && is_past_due(i, today))
            .cloned()
            .collect();
        overdue.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        Ok(overdue)
    }
}
