//! PostgreSQL store for ratecard-invoicing.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::ledger::{apply_payment, ensure_cancellable, status_after_send};
use crate::models::{
    Client, ClientTotals, CreateClient, CreateRateCardEntry, CreateSchedule, Invoice,
    InvoiceDetail, InvoiceStatus, LineItem, ListInvoicesFilter, MonthlyActivity, NewInvoice,
    Payment, RateCardEntry, RateCardStatus, RecordPayment, RecurringSchedule, ScheduleAdvance,
    ScheduleLine, StatusTotals, Tenant, TenantSettings, TopClient, UpdateRateCardEntry,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{page_size, Store};

const TENANT_COLUMNS: &str = "tenant_id, email, business_name, business_address, business_phone, \
    business_email, tax_name, tax_rate, secondary_tax_name, secondary_tax_rate, \
    default_payment_terms, created_utc, updated_utc";

const ENTRY_COLUMNS: &str = "entry_id, tenant_id, category, name, description, rate, unit, aliases, \
    status, created_utc, updated_utc";

const CLIENT_COLUMNS: &str = "client_id, tenant_id, name, email, phone, address, company, notes, \
    payment_terms, total_invoiced, total_paid, invoice_count, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, tenant_id, client_id, schedule_id, invoice_number, status, \
    template, original_input, work_date, invoice_date, due_date, subtotal, tax_name, tax_amount, \
    secondary_tax_name, secondary_tax_amount, total, amount_paid, payment_method, payment_reference, \
    notes, sent_to, sent_utc, paid_utc, created_utc, updated_utc";

const LINE_ITEM_COLUMNS: &str = "line_item_id, invoice_id, tenant_id, rate_entry_id, description, \
    quantity, unit, unit_price, line_total, matched, notes, ordinal, created_utc";

const PAYMENT_COLUMNS: &str = "payment_id, tenant_id, invoice_id, client_id, amount, method, reference, \
    received_utc, created_utc";

const SCHEDULE_COLUMNS: &str = "schedule_id, tenant_id, client_id, frequency, start_date, end_date, \
    next_due, active, template, notes, created_utc, updated_utc";

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow!("Failed to {}: {}", action, e))
}

/// Like [`db_error`], but unique violations surface as `Conflict`.
fn write_error(action: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow!("Failed to {}: {}", action, e))
        }
        _ => AppError::DatabaseError(anyhow!("Failed to {}: {}", action, e)),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ratecard-invoicing"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn attach_lines(
        &self,
        mut schedules: Vec<RecurringSchedule>,
    ) -> Result<Vec<RecurringSchedule>, AppError> {
        if schedules.is_empty() {
            return Ok(schedules);
        }
        let ids: Vec<Uuid> = schedules.iter().map(|s| s.schedule_id).collect();
        let lines = sqlx::query_as::<_, ScheduleLine>(
            r#"
            SELECT schedule_id, rate_entry_id, quantity, description, ordinal
            FROM schedule_lines
            WHERE schedule_id = ANY($1)
            ORDER BY schedule_id, ordinal
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("load schedule lines"))?;

        let mut by_schedule: HashMap<Uuid, Vec<ScheduleLine>> = HashMap::new();
        for line in lines {
            by_schedule.entry(line.schedule_id).or_default().push(line);
        }
        for schedule in &mut schedules {
            schedule.lines = by_schedule.remove(&schedule.schedule_id).unwrap_or_default();
        }
        Ok(schedules)
    }

    async fn attach_lines_one(
        &self,
        schedule: Option<RecurringSchedule>,
    ) -> Result<Option<RecurringSchedule>, AppError> {
        match schedule {
            Some(schedule) => Ok(self.attach_lines(vec![schedule]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tenant Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, settings), fields(email = %email))]
    async fn get_or_create_tenant(
        &self,
        email: &str,
        settings: &TenantSettings,
    ) -> Result<Tenant, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_or_create_tenant"])
            .start_timer();

        let inserted = sqlx::query(
            r#"
            INSERT INTO tenants (
                tenant_id, email, business_name, business_address, business_phone, business_email,
                tax_name, tax_rate, secondary_tax_name, secondary_tax_rate, default_payment_terms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT ((LOWER(email))) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email.trim())
        .bind(&settings.business_name)
        .bind(&settings.business_address)
        .bind(&settings.business_phone)
        .bind(&settings.business_email)
        .bind(&settings.tax_name)
        .bind(settings.tax_rate)
        .bind(&settings.secondary_tax_name)
        .bind(settings.secondary_tax_rate)
        .bind(settings.default_payment_terms)
        .execute(&self.pool)
        .await
        .map_err(db_error("create tenant"))?
        .rows_affected();

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE LOWER(email) = LOWER($1)",
            TENANT_COLUMNS
        ))
        .bind(email.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("fetch tenant"))?;

        timer.observe_duration();

        if inserted > 0 {
            info!(tenant_id = %tenant.tenant_id, "Tenant provisioned");
        }

        Ok(tenant)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE tenant_id = $1",
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get tenant"))?;

        timer.observe_duration();
        Ok(tenant)
    }

    #[instrument(skip(self, settings), fields(tenant_id = %tenant_id))]
    async fn update_tenant_settings(
        &self,
        tenant_id: Uuid,
        settings: &TenantSettings,
    ) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_tenant_settings"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            UPDATE tenants
            SET business_name = $2, business_address = $3, business_phone = $4, business_email = $5,
                tax_name = $6, tax_rate = $7, secondary_tax_name = $8, secondary_tax_rate = $9,
                default_payment_terms = $10, updated_utc = NOW()
            WHERE tenant_id = $1
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&settings.business_name)
        .bind(&settings.business_address)
        .bind(&settings.business_phone)
        .bind(&settings.business_email)
        .bind(&settings.tax_name)
        .bind(settings.tax_rate)
        .bind(&settings.secondary_tax_name)
        .bind(settings.secondary_tax_rate)
        .bind(settings.default_payment_terms)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update tenant settings"))?;

        timer.observe_duration();
        Ok(tenant)
    }

    #[instrument(skip(self))]
    async fn list_tenant_ids(&self) -> Result<Vec<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>("SELECT tenant_id FROM tenants ORDER BY created_utc")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list tenants"))
    }

    // -------------------------------------------------------------------------
    // Rate Card Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn create_rate_entry(&self, input: &CreateRateCardEntry) -> Result<RateCardEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_rate_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, RateCardEntry>(&format!(
            r#"
            INSERT INTO rate_card_entries (entry_id, tenant_id, category, name, description, rate, unit, aliases, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.category.as_str())
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(input.rate)
        .bind(input.unit.trim())
        .bind(&input.aliases)
        .bind("active")
        .fetch_one(&self.pool)
        .await
        .map_err(write_error("create rate card entry"))?;

        timer.observe_duration();

        info!(entry_id = %entry.entry_id, category = %entry.category, name = %entry.name, "Rate card entry created");

        Ok(entry)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %entry_id))]
    async fn get_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError> {
        sqlx::query_as::<_, RateCardEntry>(&format!(
            "SELECT {} FROM rate_card_entries WHERE tenant_id = $1 AND entry_id = $2",
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get rate card entry"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_active_rate_entries(&self, tenant_id: Uuid) -> Result<Vec<RateCardEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_rate_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, RateCardEntry>(&format!(
            r#"
            SELECT {}
            FROM rate_card_entries
            WHERE tenant_id = $1 AND status = 'active'
            ORDER BY created_utc, entry_id
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list rate card entries"))?;

        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self, entry_ids), fields(tenant_id = %tenant_id, count = entry_ids.len()))]
    async fn get_rate_entries(
        &self,
        tenant_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<Vec<RateCardEntry>, AppError> {
        sqlx::query_as::<_, RateCardEntry>(&format!(
            r#"
            SELECT {}
            FROM rate_card_entries
            WHERE tenant_id = $1 AND entry_id = ANY($2)
            ORDER BY created_utc, entry_id
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(entry_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("get rate card entries"))
    }

    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, entry_id = %entry_id))]
    async fn update_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateRateCardEntry,
    ) -> Result<Option<RateCardEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_rate_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, RateCardEntry>(&format!(
            r#"
            UPDATE rate_card_entries
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                rate = COALESCE($5, rate),
                unit = COALESCE($6, unit),
                aliases = COALESCE($7, aliases),
                updated_utc = NOW()
            WHERE tenant_id = $1 AND entry_id = $2
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(entry_id)
        .bind(input.name.as_deref().map(str::trim))
        .bind(&input.description)
        .bind(input.rate)
        .bind(input.unit.as_deref().map(str::trim))
        .bind(&input.aliases)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update rate card entry"))?;

        timer.observe_duration();
        Ok(entry)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %entry_id))]
    async fn retire_rate_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<RateCardEntry>, AppError> {
        let entry = sqlx::query_as::<_, RateCardEntry>(&format!(
            r#"
            UPDATE rate_card_entries
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND entry_id = $2
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(tenant_id)
        .bind(entry_id)
        .bind(RateCardStatus::Retired)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("retire rate card entry"))?;

        if entry.is_some() {
            info!("Rate card entry retired");
        }
        Ok(entry)
    }

    // -------------------------------------------------------------------------
    // Client Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        let client = sqlx::query_as::<_, Client>(&format!(
            r#"
            INSERT INTO clients (client_id, tenant_id, name, email, phone, address, company, notes, payment_terms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.name.trim())
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.company)
        .bind(&input.notes)
        .bind(input.payment_terms)
        .fetch_one(&self.pool)
        .await
        .map_err(write_error("create client"))?;

        info!(client_id = %client.client_id, "Client created");
        Ok(client)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, client_id = %client_id))]
    async fn get_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>(&format!(
            "SELECT {} FROM clients WHERE tenant_id = $1 AND client_id = $2",
            CLIENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get client"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_client_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>(&format!(
            r#"
            SELECT {}
            FROM clients
            WHERE tenant_id = $1 AND LOWER(name) = LOWER($2)
            ORDER BY created_utc, client_id
            LIMIT 1
            "#,
            CLIENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find client"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, client_id = %client_id))]
    async fn client_totals(&self, tenant_id: Uuid, client_id: Uuid) -> Result<ClientTotals, AppError> {
        sqlx::query_as::<_, ClientTotals>(
            r#"
            SELECT COALESCE(SUM(total), 0) AS total_invoiced,
                   COALESCE(SUM(amount_paid), 0) AS total_paid,
                   COUNT(*) AS invoice_count
            FROM invoices
            WHERE tenant_id = $1 AND client_id = $2 AND status <> 'cancelled'
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("sum client invoices"))
    }

    #[instrument(skip(self, totals), fields(tenant_id = %tenant_id, client_id = %client_id))]
    async fn set_client_totals(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        totals: &ClientTotals,
    ) -> Result<Option<Client>, AppError> {
        sqlx::query_as::<_, Client>(&format!(
            r#"
            UPDATE clients
            SET total_invoiced = $3, total_paid = $4, invoice_count = $5, updated_utc = NOW()
            WHERE tenant_id = $1 AND client_id = $2
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(client_id)
        .bind(totals.total_invoiced)
        .bind(totals.total_paid)
        .bind(i32::try_from(totals.invoice_count).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update client totals"))
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn latest_invoice_number(&self, tenant_id: Uuid) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT invoice_number
            FROM invoices
            WHERE tenant_id = $1
            ORDER BY created_utc DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("read latest invoice number"))
    }

    #[instrument(skip(self, invoice, advance), fields(tenant_id = %invoice.tenant_id, invoice_number = %invoice_number))]
    async fn insert_invoice(
        &self,
        invoice_number: &str,
        invoice: &NewInvoice,
        advance: Option<&ScheduleAdvance>,
    ) -> Result<InvoiceDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        if let Some(advance) = advance {
            let moved = sqlx::query(
                r#"
                UPDATE recurring_schedules
                SET next_due = $3, active = $4, updated_utc = NOW()
                WHERE tenant_id = $1 AND schedule_id = $2 AND next_due = $5 AND active
                "#,
            )
            .bind(invoice.tenant_id)
            .bind(advance.schedule_id)
            .bind(advance.next_due)
            .bind(advance.active)
            .bind(advance.expected_next_due)
            .execute(&mut *tx)
            .await
            .map_err(db_error("advance schedule"))?
            .rows_affected();

            if moved == 0 {
                tx.rollback().await.ok();
                return Err(AppError::Conflict(anyhow!(
                    "Schedule {} is no longer due on {}",
                    advance.schedule_id,
                    advance.expected_next_due
                )));
            }
        }

        let stored = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, tenant_id, client_id, schedule_id, invoice_number, status, template,
                original_input, work_date, invoice_date, due_date, subtotal, tax_name, tax_amount,
                secondary_tax_name, secondary_tax_amount, total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(invoice.tenant_id)
        .bind(invoice.client_id)
        .bind(invoice.schedule_id)
        .bind(invoice_number)
        .bind(InvoiceStatus::Draft)
        .bind(&invoice.template)
        .bind(&invoice.original_input)
        .bind(invoice.work_date)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.subtotal)
        .bind(&invoice.tax_name)
        .bind(invoice.tax_amount)
        .bind(&invoice.secondary_tax_name)
        .bind(invoice.secondary_tax_amount)
        .bind(invoice.total)
        .bind(&invoice.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(write_error("insert invoice"))?;

        let mut line_items = Vec::with_capacity(invoice.line_items.len());
        for line in &invoice.line_items {
            let inserted = sqlx::query_as::<_, LineItem>(&format!(
                r#"
                INSERT INTO invoice_line_items (
                    line_item_id, invoice_id, tenant_id, rate_entry_id, description, quantity, unit,
                    unit_price, line_total, matched, notes, ordinal
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING {}
                "#,
                LINE_ITEM_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(stored.invoice_id)
            .bind(stored.tenant_id)
            .bind(line.rate_entry_id)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(&line.unit)
            .bind(line.unit_price)
            .bind(line.line_total)
            .bind(line.matched)
            .bind(&line.notes)
            .bind(line.ordinal)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("insert line item"))?;
            line_items.push(inserted);
        }

        if let Some(client_id) = stored.client_id {
            sqlx::query(
                r#"
                UPDATE clients
                SET total_invoiced = total_invoiced + $3, invoice_count = invoice_count + 1, updated_utc = NOW()
                WHERE tenant_id = $1 AND client_id = $2
                "#,
            )
            .bind(stored.tenant_id)
            .bind(client_id)
            .bind(stored.total)
            .execute(&mut *tx)
            .await
            .map_err(db_error("update client totals"))?;
        }

        tx.commit().await.map_err(db_error("commit transaction"))?;

        timer.observe_duration();

        info!(
            invoice_id = %stored.invoice_id,
            invoice_number = %stored.invoice_number,
            total = %stored.total,
            line_count = line_items.len(),
            "Invoice stored"
        );

        line_items.sort_by_key(|line| line.ordinal);
        Ok(InvoiceDetail {
            invoice: stored,
            line_items,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get invoice"))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_line_items(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        sqlx::query_as::<_, LineItem>(&format!(
            r#"
            SELECT {}
            FROM invoice_line_items
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY ordinal
            "#,
            LINE_ITEM_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("get line items"))
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE tenant_id = $1
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR client_id = $3)
            ORDER BY created_utc DESC, invoice_number DESC
            LIMIT $4
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.client_id)
        .bind(i64::from(page_size(filter.page_size)))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list invoices"))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn mark_invoice_sent(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        sent_to: &str,
        sent_utc: DateTime<Utc>,
    ) -> Result<Option<Invoice>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let current = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock invoice"))?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        // Payments may have landed while the mail was in flight.
        let status = status_after_send(current.status)?;

        let sent = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $3, sent_to = $4, sent_utc = $5, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(status)
        .bind(sent_to)
        .bind(sent_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("mark invoice sent"))?;

        tx.commit().await.map_err(db_error("commit transaction"))?;
        Ok(Some(sent))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn cancel_invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let current = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock invoice"))?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        ensure_cancellable(&current)?;

        let cancelled = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(InvoiceStatus::Cancelled)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("cancel invoice"))?;

        if let Some(client_id) = cancelled.client_id {
            sqlx::query(
                r#"
                UPDATE clients
                SET total_invoiced = total_invoiced - $3, invoice_count = GREATEST(invoice_count - 1, 0),
                    updated_utc = NOW()
                WHERE tenant_id = $1 AND client_id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(client_id)
            .bind(cancelled.total)
            .execute(&mut *tx)
            .await
            .map_err(db_error("update client totals"))?;
        }

        tx.commit().await.map_err(db_error("commit transaction"))?;

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
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let current = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("lock invoice"))?;

        let Some(current) = current else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        let applied = apply_payment(&current, payment)?;

        let updated = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET amount_paid = $3, status = $4, paid_utc = $5, payment_method = $6,
                payment_reference = $7, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(applied.amount_paid)
        .bind(applied.status)
        .bind(applied.paid_utc)
        .bind(payment.method.as_str())
        .bind(&payment.reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("update invoice payment"))?;

        let recorded = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, tenant_id, invoice_id, client_id, amount, method, reference, received_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(updated.client_id)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(&payment.reference)
        .bind(payment.received_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("insert payment"))?;

        if let Some(client_id) = updated.client_id {
            sqlx::query(
                r#"
                UPDATE clients
                SET total_paid = total_paid + $3, updated_utc = NOW()
                WHERE tenant_id = $1 AND client_id = $2
                "#,
            )
            .bind(tenant_id)
            .bind(client_id)
            .bind(payment.amount)
            .execute(&mut *tx)
            .await
            .map_err(db_error("update client totals"))?;
        }

        tx.commit().await.map_err(db_error("commit transaction"))?;

        timer.observe_duration();

        info!(
            payment_id = %recorded.payment_id,
            amount = %recorded.amount,
            status = %updated.status,
            "Payment recorded"
        );

        Ok(Some((updated, recorded)))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn list_payments(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY received_utc, created_utc
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list payments"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, today = %today))]
    async fn mark_overdue_invoices(&self, tenant_id: Uuid, today: NaiveDate) -> Result<u64, AppError> {
        let changed = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue', updated_utc = NOW()
            WHERE tenant_id = $1
              AND status IN ('sent', 'partial')
              AND due_date < $2
              AND total - amount_paid > 0
            "#,
        )
        .bind(tenant_id)
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(db_error("mark overdue invoices"))?
        .rows_affected();

        if changed > 0 {
            info!(count = changed, "Invoices marked overdue");
        }
        Ok(changed)
    }

    // -------------------------------------------------------------------------
    // Recurring Schedule Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, client_id = %input.client_id))]
    async fn create_schedule(
        &self,
        input: &CreateSchedule,
        template: &str,
    ) -> Result<RecurringSchedule, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;

        let mut schedule = sqlx::query_as::<_, RecurringSchedule>(&format!(
            r#"
            INSERT INTO recurring_schedules (
                schedule_id, tenant_id, client_id, frequency, start_date, end_date, next_due, template, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $5, $7, $8)
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.client_id)
        .bind(input.frequency)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(template)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("create schedule"))?;

        for (ordinal, line) in input.lines.iter().enumerate() {
            let stored = sqlx::query_as::<_, ScheduleLine>(
                r#"
                INSERT INTO schedule_lines (schedule_id, rate_entry_id, quantity, description, ordinal)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING schedule_id, rate_entry_id, quantity, description, ordinal
                "#,
            )
            .bind(schedule.schedule_id)
            .bind(line.rate_entry_id)
            .bind(line.quantity)
            .bind(&line.description)
            .bind(ordinal as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("create schedule line"))?;
            schedule.lines.push(stored);
        }

        tx.commit().await.map_err(db_error("commit transaction"))?;

        info!(
            schedule_id = %schedule.schedule_id,
            frequency = %schedule.frequency,
            next_due = %schedule.next_due,
            "Recurring schedule created"
        );
        Ok(schedule)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    async fn get_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError> {
        let schedule = sqlx::query_as::<_, RecurringSchedule>(&format!(
            "SELECT {} FROM recurring_schedules WHERE tenant_id = $1 AND schedule_id = $2",
            SCHEDULE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("get schedule"))?;

        self.attach_lines_one(schedule).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, today = %today))]
    async fn list_due_schedules(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<RecurringSchedule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_schedules"])
            .start_timer();

        let schedules = sqlx::query_as::<_, RecurringSchedule>(&format!(
            r#"
            SELECT {}
            FROM recurring_schedules
            WHERE tenant_id = $1 AND active AND next_due <= $2
            ORDER BY next_due, created_utc
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list due schedules"))?;

        let schedules = self.attach_lines(schedules).await?;
        timer.observe_duration();
        Ok(schedules)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, schedule_id = %schedule_id))]
    async fn deactivate_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<RecurringSchedule>, AppError> {
        let schedule = sqlx::query_as::<_, RecurringSchedule>(&format!(
            r#"
            UPDATE recurring_schedules
            SET active = FALSE, updated_utc = NOW()
            WHERE tenant_id = $1 AND schedule_id = $2
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("deactivate schedule"))?;

        if schedule.is_some() {
            info!("Recurring schedule deactivated");
        }
        self.attach_lines_one(schedule).await
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn revenue_between(
        &self,
        tenant_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal, AppError> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM payments
            WHERE tenant_id = $1 AND received_utc >= $2 AND received_utc < $3
            "#,
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("sum payments"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn status_totals(&self, tenant_id: Uuid) -> Result<Vec<StatusTotals>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["status_totals"])
            .start_timer();

        let totals = sqlx::query_as::<_, StatusTotals>(
            r#"
            SELECT status,
                   COUNT(*) AS invoice_count,
                   COALESCE(SUM(total), 0) AS total,
                   COALESCE(SUM(amount_paid), 0) AS amount_paid
            FROM invoices
            WHERE tenant_id = $1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("sum invoices by status"))?;

        timer.observe_duration();
        Ok(totals)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, since = %since))]
    async fn monthly_activity(
        &self,
        tenant_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<MonthlyActivity>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["monthly_activity"])
            .start_timer();

        let since_utc = since.and_time(NaiveTime::MIN).and_utc();
        let months = sqlx::query_as::<_, MonthlyActivity>(
            r#"
            WITH paid AS (
                SELECT date_trunc('month', received_utc AT TIME ZONE 'UTC')::date AS month,
                       SUM(amount) AS revenue
                FROM payments
                WHERE tenant_id = $1 AND received_utc >= $3
                GROUP BY 1
            ), dated AS (
                SELECT date_trunc('month', invoice_date)::date AS month,
                       COUNT(*) AS invoice_count
                FROM invoices
                WHERE tenant_id = $1 AND invoice_date >= $2
                GROUP BY 1
            )
            SELECT COALESCE(paid.month, dated.month) AS month,
                   COALESCE(paid.revenue, 0) AS revenue,
                   COALESCE(dated.invoice_count, 0) AS invoice_count
            FROM paid
            FULL OUTER JOIN dated ON paid.month = dated.month
            ORDER BY 1
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .bind(since_utc)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("sum monthly activity"))?;

        timer.observe_duration();
        Ok(months)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn top_clients(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TopClient>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["top_clients"])
            .start_timer();

        let clients = sqlx::query_as::<_, TopClient>(
            r#"
            SELECT c.client_id,
                   c.name,
                   SUM(i.total) AS total_billed,
                   SUM(i.amount_paid) AS total_paid,
                   COUNT(*) AS invoice_count
            FROM clients c
            JOIN invoices i ON i.client_id = c.client_id AND i.tenant_id = c.tenant_id
            WHERE c.tenant_id = $1 AND i.status <> 'cancelled'
            GROUP BY c.client_id, c.name
            ORDER BY total_billed DESC, c.name
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("rank clients"))?;

        timer.observe_duration();
        Ok(clients)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, today = %today))]
    async fn list_overdue_invoices(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE tenant_id = $1
              AND status IN ('sent', 'partial', 'overdue')
              AND due_date < $2
              AND total - amount_paid > 0
            ORDER BY due_date, invoice_number
            "#,
            INVOICE_COLUMNS
        ))
        .bind(tenant_id)
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list overdue invoices"))
    }
}
