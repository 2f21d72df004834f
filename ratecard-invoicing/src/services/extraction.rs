//! Client for the external step that reads free text and proposes work items.
//!
//! The extractor's answer is untrusted. It is decoded loosely into
//! [`RawExtraction`] and then checked field by field by [`validate_extraction`]
//! before anything is priced.

use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service_core::error::AppError;
use tracing::{debug, instrument};

use crate::domain::pricing::validate_quantity;
use crate::models::{ExtractedWorkItem, Extraction};

#[async_trait]
pub trait WorkExtractor: Send + Sync {
    /// Propose work items for `text`, using keys from `catalog_keys` where possible.
    async fn extract(&self, text: &str, catalog_keys: &[String]) -> Result<RawExtraction, AppError>;
}

/// One proposed item, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWorkItem {
    #[serde(default, alias = "item_key")]
    pub key: Value,
    #[serde(default)]
    pub quantity: Value,
    #[serde(default, alias = "notes")]
    pub note: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Extractor response as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub line_items: Vec<RawWorkItem>,
    #[serde(default, alias = "unmatched_items")]
    pub unmatched_hints: Vec<Value>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub work_date: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

fn parse_quantity(field: &str, value: &Value) -> Result<Decimal, AppError> {
    let parsed = match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    };
    let quantity = parsed.ok_or_else(|| AppError::invalid(field, format!("{} is not a number", value)))?;
    validate_quantity(field, quantity)?;
    Ok(quantity)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Check every field of an extractor response.
pub fn validate_extraction(raw: RawExtraction) -> Result<Extraction, AppError> {
    let mut items = Vec::with_capacity(raw.line_items.len());

    for (i, item) in raw.line_items.into_iter().enumerate() {
        let key = item
            .key
            .as_str()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AppError::invalid(format!("line_items[{}].key", i), "must be a non-empty string")
            })?
            .to_string();
        let quantity = parse_quantity(&format!("line_items[{}].quantity", i), &item.quantity)?;

        items.push(ExtractedWorkItem {
            key,
            quantity,
            note: non_empty(item.note),
            unit: non_empty(item.unit),
        });
    }

    let unmatched_hints = raw
        .unmatched_hints
        .into_iter()
        .filter_map(|hint| match hint {
            Value::String(s) => non_empty(Some(s)),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect();

    Ok(Extraction {
        items,
        unmatched_hints,
        client_name: non_empty(raw.client_name),
        work_date: non_empty(raw.work_date),
        notes: non_empty(raw.notes),
    })
}

#[derive(Debug, Serialize)]
struct ExtractionRequest<'a> {
    text: &'a str,
    catalog_keys: &'a [String],
}

/// Extractor reached over HTTP. One attempt per call; no retries.
pub struct HttpExtractor {
    endpoint: String,
    client: Client,
}

impl HttpExtractor {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl WorkExtractor for HttpExtractor {
    #[instrument(skip(self, text, catalog_keys), fields(text_len = text.len(), catalog_size = catalog_keys.len()))]
    async fn extract(&self, text: &str, catalog_keys: &[String]) -> Result<RawExtraction, AppError> {
        debug!(endpoint = %self.endpoint, "Sending extraction request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractionRequest { text, catalog_keys })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExternalServiceError(anyhow!("Extraction timed out: {}", e))
                } else {
                    AppError::ExternalServiceError(anyhow!("Extraction request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(anyhow!(
                "Extraction returned {}: {}",
                status,
                body
            )));
        }

        response.json::<RawExtraction>().await.map_err(|e| {
            AppError::ExternalServiceError(anyhow!("Extraction response was not valid JSON: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn raw(value: Value) -> RawExtraction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        let extraction = validate_extraction(raw(json!({
            "line_items": [
                {"item_key": "labor.troubleshooting", "quantity": 3, "notes": "panel"},
                {"key": "materials.breaker-30a", "quantity": "1.5", "unit": " each "},
                {"key": "materials.wire", "quantity": 0.25}
            ],
            "unmatched_items": ["fixed doorbell", "", null],
            "client_name": " Acme ",
            "work_date": "2024-05-17"
        })))
        .unwrap();

        assert_eq!(extraction.items.len(), 3);
        assert_eq!(extraction.items[0].key, "labor.troubleshooting");
        assert_eq!(extraction.items[0].quantity, dec!(3));
        assert_eq!(extraction.items[0].note.as_deref(), Some("panel"));
        assert_eq!(extraction.items[1].quantity, dec!(1.5));
        assert_eq!(extraction.items[1].unit.as_deref(), Some("each"));
        assert_eq!(extraction.items[2].quantity, dec!(0.25));
        assert_eq!(extraction.unmatched_hints, vec!["fixed doorbell"]);
        assert_eq!(extraction.client_name.as_deref(), Some("Acme"));
        assert_eq!(extraction.work_date.as_deref(), Some("2024-05-17"));
    }

    #[test]
    fn rejects_bad_quantities_with_field() {
        for quantity in [
            json!(0),
            json!(-2),
            json!("lots"),
            json!(null),
            json!([1]),
            json!("79228162514264337593543950335"),
        ] {
            let err = validate_extraction(raw(json!({
                "line_items": [
                    {"key": "labor.a", "quantity": 1},
                    {"key": "labor.b", "quantity": quantity}
                ]
            })))
            .unwrap_err();
            assert_eq!(err.field(), Some("line_items[1].quantity"));
        }
    }

    #[test]
    fn rejects_missing_or_non_string_key() {
        for key in [json!(null), json!(42), json!("  ")] {
            let err = validate_extraction(raw(json!({
                "line_items": [{"key": key, "quantity": 1}]
            })))
            .unwrap_err();
            assert_eq!(err.field(), Some("line_items[0].key"));
        }
    }

    #[test]
    fn empty_response_is_valid() {
        let extraction = validate_extraction(raw(json!({}))).unwrap();
        assert!(extraction.items.is_empty());
        assert!(extraction.client_name.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_external_error() {
        let extractor = HttpExtractor::new("http://127.0.0.1:9/extract", Duration::from_millis(500)).unwrap();
        let err = extractor.extract("did some work", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError(_)));
    }
}
