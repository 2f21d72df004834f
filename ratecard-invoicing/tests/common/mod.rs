//! Common test utilities for ratecard-invoicing integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use ratecard_invoicing::models::{
    Client, CreateClient, CreateRateCardEntry, PaymentMethod, RateCardEntry, RateCategory,
    RecordPayment, Tenant,
};
use ratecard_invoicing::services::{
    CreateInvoiceRequest, CreatedInvoice, InvoicingService, MemoryStore, MockMailer, RawExtraction,
    TextRenderer, WorkExtractor,
};
use rust_decimal::Decimal;
use serde_json::Value;
use service_core::error::AppError;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ratecard_invoicing=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Text that makes [`ScriptedExtractor`] fail like a timed-out call.
pub const UNREACHABLE: &str = "extractor is down";

/// Extractor that answers from a script keyed by the input text.
#[derive(Default)]
pub struct ScriptedExtractor {
    responses: Mutex<HashMap<String, Value>>,
    last_catalog: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn script(&self, text: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(text.to_string(), response);
    }

    pub fn last_catalog(&self) -> Vec<String> {
        self.last_catalog.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkExtractor for ScriptedExtractor {
    async fn extract(&self, text: &str, catalog_keys: &[String]) -> Result<RawExtraction, AppError> {
        *self.last_catalog.lock().unwrap() = catalog_keys.to_vec();
        if text == UNREACHABLE {
            return Err(AppError::ExternalServiceError(anyhow!("Extraction timed out")));
        }
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        serde_json::from_value(response)
            .map_err(|e| AppError::ExternalServiceError(anyhow!("bad script: {}", e)))
    }
}

pub struct TestApp {
    pub service: Arc<InvoicingService>,
    pub store: Arc<MemoryStore>,
    pub extractor: Arc<ScriptedExtractor>,
    pub mailer: Arc<MockMailer>,
    pub tenant: Tenant,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_mailer(MockMailer::new()).await
    }

    pub async fn spawn_with_mailer(mailer: MockMailer) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let extractor = Arc::new(ScriptedExtractor::default());
        let mailer = Arc::new(mailer);
        let service = Arc::new(InvoicingService::new(
            store.clone(),
            extractor.clone(),
            Arc::new(TextRenderer),
            mailer.clone(),
        ));
        let tenant = service
            .provision_tenant("owner@sparkelectric.test", "Spark Electric")
            .await
            .expect("Failed to provision tenant");

        Self {
            service,
            store,
            extractor,
            mailer,
            tenant,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant.tenant_id
    }

    pub async fn add_entry(
        &self,
        category: RateCategory,
        name: &str,
        rate: Decimal,
        unit: &str,
        aliases: &[&str],
    ) -> RateCardEntry {
        self.service
            .add_rate_entry(&CreateRateCardEntry {
                tenant_id: self.tenant_id(),
                category,
                name: name.to_string(),
                description: None,
                rate,
                unit: unit.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            })
            .await
            .expect("Failed to add rate card entry")
    }

    /// Troubleshooting at $85/hour and a 30A breaker at $22 each.
    pub async fn seed_electrical_rate_card(&self) -> (RateCardEntry, RateCardEntry) {
        let labor = self
            .add_entry(
                RateCategory::Labor,
                "Troubleshooting",
                Decimal::new(85, 0),
                "hour",
                &["diagnose"],
            )
            .await;
        let breaker = self
            .add_entry(
                RateCategory::Materials,
                "Breaker-30A",
                Decimal::new(22, 0),
                "each",
                &[],
            )
            .await;
        (labor, breaker)
    }

    pub async fn add_client(&self, name: &str, email: Option<&str>, payment_terms: i32) -> Client {
        self.service
            .create_client(&CreateClient {
                tenant_id: self.tenant_id(),
                name: name.to_string(),
                email: email.map(str::to_string),
                phone: None,
                address: None,
                company: None,
                notes: None,
                payment_terms,
            })
            .await
            .expect("Failed to create client")
    }

    pub fn request(&self, text: &str, invoice_date: NaiveDate) -> CreateInvoiceRequest {
        CreateInvoiceRequest {
            tenant_id: self.tenant_id(),
            text: text.to_string(),
            client_id: None,
            template: None,
            invoice_date,
            notes: None,
        }
    }

    /// Script `text` to extract the given `(key, quantity)` pairs and create an invoice from it.
    pub async fn create_invoice(&self, text: &str, items: &[(&str, &str)], invoice_date: NaiveDate) -> CreatedInvoice {
        let line_items: Vec<Value> = items
            .iter()
            .map(|(key, quantity)| serde_json::json!({"key": key, "quantity": quantity}))
            .collect();
        self.extractor
            .script(text, serde_json::json!({ "line_items": line_items }));
        self.service
            .create_invoice(&self.request(text, invoice_date))
            .await
            .expect("Failed to create invoice")
    }
}

pub fn payment(amount: Decimal) -> RecordPayment {
    RecordPayment {
        amount,
        method: PaymentMethod::Etransfer,
        reference: Some("ref-001".to_string()),
        received_utc: Utc::now(),
    }
}
