//! Invoicing operations: extraction, pricing, numbering, payments, delivery
//! and recurrence, composed over the store and the external collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::delivery::{invoice_body, invoice_subject, DeliveryReport, InvoiceEmail, InvoiceMailer};
use super::extraction::{validate_extraction, WorkExtractor};
use super::metrics::{
    record_error, DELIVERIES_TOTAL, INVOICES_CREATED_TOTAL, PAYMENTS_TOTAL, RECURRENCE_RUNS_TOTAL,
    UNMATCHED_ITEMS_TOTAL,
};
use super::rendering::{format_currency, validate_template, InvoiceDocument, InvoiceRenderer};
use super::store::Store;
use super::tenant_locks::TenantLocks;
use crate::domain::ledger::{status_after_send, validate_payment};
use crate::domain::pricing::{line_total, total_lines, validate_quantity};
use crate::domain::recurrence::advance;
use crate::domain::{
    assemble, entry_key, lookup_keys, match_items, next_invoice_number, price, resolve_work_date,
    schedule_state, tenant_tax_rates, InvoiceMeta, PricingResult, RateCardIndex, ScheduleState,
};
use crate::models::{
    Client, CreateClient, CreateRateCardEntry, CreateSchedule, Extraction, Invoice, InvoiceDetail,
    ListInvoicesFilter, NewInvoice, Payment, PricedLineItem, RateCardEntry, RecordPayment,
    RecurringSchedule, ScheduleAdvance, Tenant, TenantSettings, TenantSettingsUpdate,
    UpdateRateCardEntry, DEFAULT_TEMPLATE,
};

/// Priced view of a piece of free text. Nothing is stored.
#[derive(Debug, Clone, Serialize)]
pub struct InvoicePreview {
    pub pricing: PricingResult,
    pub client_name_guess: Option<String>,
    pub client: Option<Client>,
    pub work_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub tenant_id: Uuid,
    pub text: String,
    /// Takes precedence over the extractor's client name guess.
    pub client_id: Option<Uuid>,
    pub template: Option<String>,
    pub invoice_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvoice {
    pub detail: InvoiceDetail,
    pub unmatched_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleFailure {
    pub tenant_id: Uuid,
    pub schedule_id: Uuid,
    pub error: String,
}

/// What one recurrence tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecurrenceReport {
    pub processed: usize,
    pub created: Vec<Uuid>,
    pub failed: Vec<ScheduleFailure>,
    pub deactivated: Vec<Uuid>,
    pub overdue_marked: u64,
}

pub struct InvoicingService {
    store: Arc<dyn Store>,
    extractor: Arc<dyn WorkExtractor>,
    renderer: Arc<dyn InvoiceRenderer>,
    mailer: Arc<dyn InvoiceMailer>,
    numbering: TenantLocks,
}

fn not_found(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow!("{} {} not found", what, id))
}

impl InvoicingService {
    pub fn new(
        store: Arc<dyn Store>,
        extractor: Arc<dyn WorkExtractor>,
        renderer: Arc<dyn InvoiceRenderer>,
        mailer: Arc<dyn InvoiceMailer>,
    ) -> Self {
        Self {
            store,
            extractor,
            renderer,
            mailer,
            numbering: TenantLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // Tenants

    /// Idempotent: the same email always yields the same tenant.
    #[instrument(skip(self))]
    pub async fn provision_tenant(&self, email: &str, business_name: &str) -> Result<Tenant, AppError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::invalid("email", "must be an email address"));
        }
        let settings = TenantSettings::new(business_name.trim());
        settings.validate()?;

        let tenant = self.store.get_or_create_tenant(email, &settings).await?;
        info!(tenant_id = %tenant.tenant_id, "Tenant provisioned");
        Ok(tenant)
    }

    pub async fn tenant(&self, tenant_id: Uuid) -> Result<Tenant, AppError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| not_found("Tenant", tenant_id))
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id))]
    pub async fn update_settings(
        &self,
        tenant_id: Uuid,
        update: &TenantSettingsUpdate,
    ) -> Result<Tenant, AppError> {
        let tenant = self.tenant(tenant_id).await?;
        let settings = update.apply_to(&tenant.settings)?;
        let tenant = self
            .store
            .update_tenant_settings(tenant_id, &settings)
            .await?
            .ok_or_else(|| not_found("Tenant", tenant_id))?;
        info!(tenant_id = %tenant_id, "Tenant settings updated");
        Ok(tenant)
    }

    // Rate card

    async fn rate_card_index(&self, tenant_id: Uuid) -> Result<RateCardIndex, AppError> {
        let entries = self.store.list_active_rate_entries(tenant_id).await?;
        Ok(RateCardIndex::build(entries))
    }

    async fn configured_index(&self, tenant_id: Uuid) -> Result<RateCardIndex, AppError> {
        let index = self.rate_card_index(tenant_id).await?;
        if index.is_empty() {
            return Err(AppError::NotConfigured(anyhow!(
                "Tenant {} has no active rate card entries",
                tenant_id
            )));
        }
        Ok(index)
    }

    /// Active entries ordered by category, then name.
    pub async fn list_rate_card(&self, tenant_id: Uuid) -> Result<Vec<RateCardEntry>, AppError> {
        let mut entries = self.store.list_active_rate_entries(tenant_id).await?;
        entries.sort_by(|a, b| {
            a.category
                .as_str()
                .cmp(b.category.as_str())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(entries)
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, name = %input.name))]
    pub async fn add_rate_entry(&self, input: &CreateRateCardEntry) -> Result<RateCardEntry, AppError> {
        input.check()?;
        self.tenant(input.tenant_id).await?;

        let index = self.rate_card_index(input.tenant_id).await?;
        let keys = lookup_keys(input.category, &input.name, &input.aliases);
        if let Some((key, owner)) = index.find_conflict(&keys, None) {
            warn!(key = %key, owner = %owner, "Rate card key already taken");
            return Err(AppError::Conflict(anyhow!(
                "Key '{}' is already used by entry {}",
                key,
                owner
            )));
        }

        let entry = self.store.create_rate_entry(input).await?;
        info!(entry_id = %entry.entry_id, key = %entry_key(entry.category, &entry.name), "Rate card entry added");
        Ok(entry)
    }

    /// Past invoice lines keep the price they were created with.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, entry_id = %entry_id))]
    pub async fn update_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateRateCardEntry,
    ) -> Result<RateCardEntry, AppError> {
        input.check()?;
        let existing = self
            .store
            .get_rate_entry(tenant_id, entry_id)
            .await?
            .ok_or_else(|| not_found("Rate card entry", entry_id))?;
        if !existing.is_active() {
            return Err(AppError::Conflict(anyhow!(
                "Rate card entry {} is retired",
                entry_id
            )));
        }

        let name = input.name.as_deref().unwrap_or(&existing.name);
        let aliases = input.aliases.as_deref().unwrap_or(&existing.aliases);
        let keys = lookup_keys(existing.category, name, aliases);
        let index = self.rate_card_index(tenant_id).await?;
        if let Some((key, owner)) = index.find_conflict(&keys, Some(entry_id)) {
            return Err(AppError::Conflict(anyhow!(
                "Key '{}' is already used by entry {}",
                key,
                owner
            )));
        }

        let entry = self
            .store
            .update_rate_entry(tenant_id, entry_id, input)
            .await?
            .ok_or_else(|| not_found("Rate card entry", entry_id))?;
        info!(rate = %entry.rate, "Rate card entry updated");
        Ok(entry)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %entry_id))]
    pub async fn retire_rate_entry(&self, tenant_id: Uuid, entry_id: Uuid) -> Result<RateCardEntry, AppError> {
        let entry = self
            .store
            .retire_rate_entry(tenant_id, entry_id)
            .await?
            .ok_or_else(|| not_found("Rate card entry", entry_id))?;
        info!("Rate card entry retired");
        Ok(entry)
    }

    // Clients

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        input.validate()?;
        self.tenant(input.tenant_id).await?;
        let client = self.store.create_client(input).await?;
        info!(client_id = %client.client_id, "Client created");
        Ok(client)
    }

    pub async fn get_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Client, AppError> {
        self.store
            .get_client(tenant_id, client_id)
            .await?
            .ok_or_else(|| not_found("Client", client_id))
    }

    /// Recompute a client's cached totals from its invoices.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, client_id = %client_id))]
    pub async fn reconcile_client_stats(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Client, AppError> {
        self.get_client(tenant_id, client_id).await?;
        let totals = self.store.client_totals(tenant_id, client_id).await?;
        let client = self
            .store
            .set_client_totals(tenant_id, client_id, &totals)
            .await?
            .ok_or_else(|| not_found("Client", client_id))?;
        info!(
            total_invoiced = %client.total_invoiced,
            total_paid = %client.total_paid,
            invoice_count = client.invoice_count,
            "Client totals reconciled"
        );
        Ok(client)
    }

    // Parsing and invoice creation

    async fn extract(&self, index: &RateCardIndex, text: &str) -> Result<Extraction, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::invalid("text", "must not be empty"));
        }
        let raw = self.extractor.extract(text, &index.catalog_keys()).await?;
        validate_extraction(raw)
    }

    fn price_extraction(
        tenant: &Tenant,
        index: &RateCardIndex,
        extraction: &Extraction,
        operation: &str,
    ) -> Result<PricingResult, AppError> {
        let matches = match_items(index, &extraction.items);
        let pricing = price(&matches, tenant_tax_rates(tenant))?
            .with_unmatched_hints(&extraction.unmatched_hints);
        if !pricing.unmatched_items.is_empty() {
            UNMATCHED_ITEMS_TOTAL
                .with_label_values(&[operation])
                .inc_by(pricing.unmatched_items.len() as f64);
        }
        Ok(pricing)
    }

    async fn guess_client(&self, tenant_id: Uuid, guess: Option<&str>) -> Result<Option<Client>, AppError> {
        match guess {
            Some(name) => self.store.find_client_by_name(tenant_id, name).await,
            None => Ok(None),
        }
    }

    /// Extract, match and price `text` without storing anything.
    #[instrument(skip(self, text), fields(tenant_id = %tenant_id, text_len = text.len()))]
    pub async fn preview(&self, tenant_id: Uuid, text: &str, today: NaiveDate) -> Result<InvoicePreview, AppError> {
        let tenant = self.tenant(tenant_id).await?;
        let index = self.configured_index(tenant_id).await?;
        let extraction = self.extract(&index, text).await?;
        self.preview_with(&tenant, &index, extraction, today).await
    }

    /// Price an extraction the caller already holds.
    #[instrument(skip(self, extraction), fields(tenant_id = %tenant_id, items = extraction.items.len()))]
    pub async fn preview_extracted(
        &self,
        tenant_id: Uuid,
        extraction: Extraction,
        today: NaiveDate,
    ) -> Result<InvoicePreview, AppError> {
        let tenant = self.tenant(tenant_id).await?;
        let index = self.configured_index(tenant_id).await?;
        self.preview_with(&tenant, &index, extraction, today).await
    }

    async fn preview_with(
        &self,
        tenant: &Tenant,
        index: &RateCardIndex,
        extraction: Extraction,
        today: NaiveDate,
    ) -> Result<InvoicePreview, AppError> {
        let pricing = Self::price_extraction(tenant, index, &extraction, "preview")?;
        let client = self
            .guess_client(tenant.tenant_id, extraction.client_name.as_deref())
            .await?;

        Ok(InvoicePreview {
            pricing,
            work_date: resolve_work_date(extraction.work_date.as_deref(), today),
            client_name_guess: extraction.client_name,
            client,
            notes: extraction.notes,
        })
    }

    /// Extract, price and store a draft invoice. Unmatched items are
    /// returned for review but not stored.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create_invoice(&self, request: &CreateInvoiceRequest) -> Result<CreatedInvoice, AppError> {
        let template = request.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        validate_template(template)?;

        let tenant = self.tenant(request.tenant_id).await?;
        let client = match request.client_id {
            Some(client_id) => Some(self.get_client(tenant.tenant_id, client_id).await?),
            None => None,
        };
        let index = self.configured_index(tenant.tenant_id).await?;
        let extraction = self.extract(&index, &request.text).await?;
        let pricing = Self::price_extraction(&tenant, &index, &extraction, "create")?;

        let client = match client {
            Some(client) => Some(client),
            None => {
                self.guess_client(tenant.tenant_id, extraction.client_name.as_deref())
                    .await?
            }
        };

        let mut meta = InvoiceMeta::for_tenant(&tenant, client.as_ref(), request.invoice_date);
        meta.template = template.to_string();
        meta.original_input = Some(request.text.clone());
        meta.work_date = resolve_work_date(extraction.work_date.as_deref(), request.invoice_date);
        meta.notes = request.notes.clone().or(extraction.notes);

        let invoice = assemble(pricing, meta);
        let unmatched_items = invoice.unmatched_items.clone();
        let detail = self.store_numbered(&invoice, None, request.invoice_date).await?;

        INVOICES_CREATED_TOTAL.with_label_values(&["manual"]).inc();
        info!(
            invoice_id = %detail.invoice.invoice_id,
            invoice_number = %detail.invoice.invoice_number,
            total = %detail.invoice.total,
            unmatched = unmatched_items.len(),
            "Invoice created"
        );

        Ok(CreatedInvoice {
            detail,
            unmatched_items,
        })
    }

    /// Number and store an invoice while holding the tenant's numbering lock.
    /// The number's year is the year it was created on, not the invoice date's.
    async fn store_numbered(
        &self,
        invoice: &NewInvoice,
        schedule_advance: Option<&ScheduleAdvance>,
        created_on: NaiveDate,
    ) -> Result<InvoiceDetail, AppError> {
        let _guard = self.numbering.lock(invoice.tenant_id).await;
        let latest = self.store.latest_invoice_number(invoice.tenant_id).await?;
        let number = next_invoice_number(latest.as_deref(), created_on.year())?;
        self.store
            .insert_invoice(&number, invoice, schedule_advance)
            .await
            .inspect_err(record_error)
    }

    // Invoices

    pub async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self
            .store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;
        let line_items = self.store.get_line_items(tenant_id, invoice_id).await?;
        Ok(InvoiceDetail { invoice, line_items })
    }

    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(tenant_id, filter).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn cancel_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .cancel_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;
        info!(invoice_number = %invoice.invoice_number, "Invoice cancelled");
        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn mark_overdue(&self, tenant_id: Uuid, today: NaiveDate) -> Result<u64, AppError> {
        let marked = self.store.mark_overdue_invoices(tenant_id, today).await?;
        if marked > 0 {
            info!(marked, "Invoices marked overdue");
        }
        Ok(marked)
    }

    // Payments

    #[instrument(skip(self, payment), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, amount = %payment.amount))]
    pub async fn record_payment(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        payment: &RecordPayment,
    ) -> Result<(Invoice, Payment), AppError> {
        validate_payment(payment)?;
        let (invoice, recorded) = self
            .store
            .record_payment(tenant_id, invoice_id, payment)
            .await
            .inspect_err(record_error)?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc();
        info!(
            payment_id = %recorded.payment_id,
            amount_paid = %invoice.amount_paid,
            status = %invoice.status,
            "Payment recorded"
        );
        Ok((invoice, recorded))
    }

    pub async fn list_payments(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        self.store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;
        self.store.list_payments(tenant_id, invoice_id).await
    }

    // Delivery

    /// Render and email an invoice. A failed delivery is reported in the
    /// returned value and leaves the invoice untouched.
    #[instrument(skip(self, recipient, message), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        recipient: Option<&str>,
        message: Option<&str>,
    ) -> Result<DeliveryReport, AppError> {
        let tenant = self.tenant(tenant_id).await?;
        let InvoiceDetail { invoice, line_items } = self.get_invoice(tenant_id, invoice_id).await?;
        status_after_send(invoice.status)?;

        let client = match invoice.client_id {
            Some(client_id) => self.store.get_client(tenant_id, client_id).await?,
            None => None,
        };
        let to = recipient
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| client.as_ref().and_then(|c| c.email.clone()))
            .ok_or_else(|| {
                AppError::invalid("recipient", "no recipient given and the client has no email")
            })?;

        let business = &tenant.settings;
        let to_name = client.as_ref().map(|c| c.name.clone()).unwrap_or_else(|| "there".to_string());
        let email = InvoiceEmail {
            subject: invoice_subject(&invoice.invoice_number, &business.business_name),
            body: invoice_body(
                &to_name,
                &invoice.invoice_number,
                &format_currency(invoice.total),
                message,
                &business.business_name,
            ),
            attachment: self.renderer.render(
                &invoice.template,
                &InvoiceDocument {
                    invoice: invoice.clone(),
                    line_items,
                    client,
                },
                business,
            )?,
            to: to.clone(),
        };

        if let Err(e) = self.mailer.deliver(&email).await {
            warn!(error = %e, to = %to, "Invoice delivery failed");
            record_error(&e);
            DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
            return Ok(DeliveryReport {
                delivered: false,
                recipient: to,
                detail: Some(e.to_string()),
            });
        }

        self.store
            .mark_invoice_sent(tenant_id, invoice_id, &to, Utc::now())
            .await?
            .ok_or_else(|| not_found("Invoice", invoice_id))?;
        DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
        info!(to = %to, invoice_number = %invoice.invoice_number, "Invoice sent");

        Ok(DeliveryReport {
            delivered: true,
            recipient: to,
            detail: None,
        })
    }

    // Recurring schedules

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, client_id = %input.client_id))]
    pub async fn create_schedule(&self, input: &CreateSchedule) -> Result<RecurringSchedule, AppError> {
        let template = input.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        validate_template(template)?;
        if input.lines.is_empty() {
            return Err(AppError::invalid("lines", "at least one line is required"));
        }
        if input.end_date.is_some_and(|end| end < input.start_date) {
            return Err(AppError::invalid("end_date", "must not be before start_date"));
        }
        for (i, line) in input.lines.iter().enumerate() {
            validate_quantity(&format!("lines[{}].quantity", i), line.quantity)?;
        }

        self.tenant(input.tenant_id).await?;
        self.get_client(input.tenant_id, input.client_id).await?;

        let ids: Vec<Uuid> = input.lines.iter().map(|l| l.rate_entry_id).collect();
        let entries: HashMap<Uuid, RateCardEntry> = self
            .store
            .get_rate_entries(input.tenant_id, &ids)
            .await?
            .into_iter()
            .map(|e| (e.entry_id, e))
            .collect();
        for (i, line) in input.lines.iter().enumerate() {
            match entries.get(&line.rate_entry_id) {
                None => return Err(not_found("Rate card entry", line.rate_entry_id)),
                Some(entry) if !entry.is_active() => {
                    return Err(AppError::invalid(
                        format!("lines[{}].rate_entry_id", i),
                        format!("rate card entry {} is retired", entry.entry_id),
                    ));
                }
                Some(_) => {}
            }
        }

        let schedule = self.store.create_schedule(input, template).await?;
        info!(
            schedule_id = %schedule.schedule_id,
            frequency = %schedule.frequency,
            next_due = %schedule.next_due,
            "Recurring schedule created"
        );
        Ok(schedule)
    }

    pub async fn get_schedule(&self, tenant_id: Uuid, schedule_id: Uuid) -> Result<RecurringSchedule, AppError> {
        self.store
            .get_schedule(tenant_id, schedule_id)
            .await?
            .ok_or_else(|| not_found("Schedule", schedule_id))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    pub async fn deactivate_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<RecurringSchedule, AppError> {
        let schedule = self
            .store
            .deactivate_schedule(tenant_id, schedule_id)
            .await?
            .ok_or_else(|| not_found("Schedule", schedule_id))?;
        info!("Recurring schedule deactivated");
        Ok(schedule)
    }

    /// Materialize at most one occurrence of every due schedule, then flag
    /// overdue invoices. A failing schedule does not stop the others.
    #[instrument(skip(self))]
    pub async fn run_recurrence_tick(&self, today: NaiveDate) -> Result<RecurrenceReport, AppError> {
        let mut report = RecurrenceReport::default();

        for tenant_id in self.store.list_tenant_ids().await? {
            let Some(tenant) = self.store.get_tenant(tenant_id).await? else {
                continue;
            };

            for schedule in self.store.list_due_schedules(tenant_id, today).await? {
                report.processed += 1;
                match schedule_state(&schedule, today) {
                    ScheduleState::Pending => {
                        RECURRENCE_RUNS_TOTAL.with_label_values(&["skipped"]).inc();
                    }
                    ScheduleState::Exhausted => {
                        self.store
                            .deactivate_schedule(tenant_id, schedule.schedule_id)
                            .await?;
                        RECURRENCE_RUNS_TOTAL.with_label_values(&["deactivated"]).inc();
                        info!(schedule_id = %schedule.schedule_id, "Schedule past its end date deactivated");
                        report.deactivated.push(schedule.schedule_id);
                    }
                    ScheduleState::Due => match self.materialize(&tenant, &schedule, today).await {
                        Ok(detail) => {
                            RECURRENCE_RUNS_TOTAL.with_label_values(&["created"]).inc();
                            INVOICES_CREATED_TOTAL.with_label_values(&["recurring"]).inc();
                            info!(
                                schedule_id = %schedule.schedule_id,
                                invoice_number = %detail.invoice.invoice_number,
                                occurrence = %schedule.next_due,
                                "Recurring invoice created"
                            );
                            report.created.push(detail.invoice.invoice_id);
                        }
                        Err(e) => {
                            RECURRENCE_RUNS_TOTAL.with_label_values(&["failed"]).inc();
                            warn!(schedule_id = %schedule.schedule_id, error = %e, "Recurring invoice failed");
                            report.failed.push(ScheduleFailure {
                                tenant_id,
                                schedule_id: schedule.schedule_id,
                                error: e.to_string(),
                            });
                        }
                    },
                }
            }

            report.overdue_marked += self.mark_overdue(tenant_id, today).await?;
        }

        info!(
            processed = report.processed,
            created = report.created.len(),
            failed = report.failed.len(),
            deactivated = report.deactivated.len(),
            overdue_marked = report.overdue_marked,
            "Recurrence tick finished"
        );
        Ok(report)
    }

    /// Price the schedule's lines at today's rates and store the occurrence
    /// at `next_due`, advancing the schedule in the same store call.
    async fn materialize(
        &self,
        tenant: &Tenant,
        schedule: &RecurringSchedule,
        today: NaiveDate,
    ) -> Result<InvoiceDetail, AppError> {
        let client = self.get_client(tenant.tenant_id, schedule.client_id).await?;

        let ids: Vec<Uuid> = schedule.lines.iter().map(|l| l.rate_entry_id).collect();
        let entries: HashMap<Uuid, RateCardEntry> = self
            .store
            .get_rate_entries(tenant.tenant_id, &ids)
            .await?
            .into_iter()
            .filter(|e| e.is_active())
            .map(|e| (e.entry_id, e))
            .collect();

        let mut lines = Vec::with_capacity(schedule.lines.len());
        for (i, line) in schedule.lines.iter().enumerate() {
            let Some(entry) = entries.get(&line.rate_entry_id) else {
                warn!(
                    schedule_id = %schedule.schedule_id,
                    rate_entry_id = %line.rate_entry_id,
                    "Schedule line dropped, rate card entry is retired or missing"
                );
                continue;
            };
            lines.push(PricedLineItem {
                rate_entry_id: Some(entry.entry_id),
                item_key: entry_key(entry.category, &entry.name),
                description: line.description.clone().unwrap_or_else(|| entry.name.clone()),
                quantity: line.quantity,
                unit: entry.unit.clone(),
                unit_price: entry.rate,
                line_total: line_total(&format!("lines[{}].quantity", i), line.quantity, entry.rate)?,
                matched: true,
                notes: None,
                ordinal: lines.len() as i32,
            });
        }
        if lines.is_empty() {
            return Err(AppError::NotConfigured(anyhow!(
                "Schedule {} has no active rate card entries",
                schedule.schedule_id
            )));
        }

        let pricing = total_lines(lines, Vec::new(), tenant_tax_rates(tenant))?;
        let mut meta = InvoiceMeta::for_tenant(tenant, Some(&client), schedule.next_due);
        meta.schedule_id = Some(schedule.schedule_id);
        meta.template = schedule.template.clone();
        meta.notes = schedule.notes.clone();

        let invoice = assemble(pricing, meta);
        self.store_numbered(&invoice, Some(&advance(schedule)), today).await
    }
}
