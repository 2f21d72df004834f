//! Validated output of the external extraction step.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One item of work the extractor found, already checked for shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedWorkItem {
    pub key: String,
    pub quantity: Decimal,
    pub note: Option<String>,
    pub unit: Option<String>,
}

impl ExtractedWorkItem {
    pub fn new(key: &str, quantity: Decimal) -> Self {
        Self {
            key: key.to_string(),
            quantity,
            note: None,
            unit: None,
        }
    }
}

/// Everything the extractor returned for one piece of free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub items: Vec<ExtractedWorkItem>,
    pub unmatched_hints: Vec<String>,
    pub client_name: Option<String>,
    pub work_date: Option<String>,
    pub notes: Option<String>,
}
