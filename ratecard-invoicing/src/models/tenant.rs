//! Tenant (business account) model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_TAX_NAME: &str = "GST";
pub const DEFAULT_PAYMENT_TERMS_DAYS: i32 = 30;
pub const MAX_PAYMENT_TERMS_DAYS: i32 = 365;
pub const TAX_RATE_SCALE: u32 = 6;

/// Business account owning a rate card, clients and invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub email: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub settings: TenantSettings,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Business profile and tax configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TenantSettings {
    pub business_name: String,
    pub business_address: Option<String>,
    pub business_phone: Option<String>,
    pub business_email: Option<String>,
    pub tax_name: String,
    pub tax_rate: Decimal,
    pub secondary_tax_name: Option<String>,
    pub secondary_tax_rate: Option<Decimal>,
    pub default_payment_terms: i32,
}

impl TenantSettings {
    /// Settings for a freshly provisioned tenant.
    pub fn new(business_name: &str) -> Self {
        Self {
            business_name: business_name.to_string(),
            business_address: None,
            business_phone: None,
            business_email: None,
            tax_name: DEFAULT_TAX_NAME.to_string(),
            tax_rate: Decimal::new(5, 2),
            secondary_tax_name: None,
            secondary_tax_rate: None,
            default_payment_terms: DEFAULT_PAYMENT_TERMS_DAYS,
        }
    }

    /// Check every recognized field.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.business_name.trim().is_empty() {
            return Err(AppError::invalid("business_name", "must not be empty"));
        }
        if self.tax_name.trim().is_empty() {
            return Err(AppError::invalid("tax_name", "must not be empty"));
        }
        validate_tax_rate("tax_rate", self.tax_rate)?;
        if let Some(rate) = self.secondary_tax_rate {
            validate_tax_rate("secondary_tax_rate", rate)?;
            if self
                .secondary_tax_name
                .as_deref()
                .map_or(true, |name| name.trim().is_empty())
            {
                return Err(AppError::invalid(
                    "secondary_tax_name",
                    "is required when a secondary tax rate is set",
                ));
            }
        }
        if !(0..=MAX_PAYMENT_TERMS_DAYS).contains(&self.default_payment_terms) {
            return Err(AppError::invalid(
                "default_payment_terms",
                format!("must be between 0 and {} days", MAX_PAYMENT_TERMS_DAYS),
            ));
        }
        Ok(())
    }
}

/// Tax rates are fractions: 0.05 means 5%.
pub fn validate_tax_rate(field: &str, rate: Decimal) -> Result<(), AppError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(AppError::invalid(
            field,
            format!("{} is outside [0, 1]", rate),
        ));
    }
    if rate.normalize().scale() > TAX_RATE_SCALE {
        return Err(AppError::invalid(
            field,
            format!("{} has more than {} decimal places", rate, TAX_RATE_SCALE),
        ));
    }
    Ok(())
}

/// Partial settings update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantSettingsUpdate {
    pub business_name: Option<String>,
    pub business_address: Option<Option<String>>,
    pub business_phone: Option<Option<String>>,
    pub business_email: Option<Option<String>>,
    pub tax_name: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub secondary_tax_name: Option<Option<String>>,
    pub secondary_tax_rate: Option<Option<Decimal>>,
    pub default_payment_terms: Option<i32>,
}

impl TenantSettingsUpdate {
    /// Merge onto `current` and validate the result.
    pub fn apply_to(&self, current: &TenantSettings) -> Result<TenantSettings, AppError> {
        let merged = TenantSettings {
            business_name: self
                .business_name
                .clone()
                .unwrap_or_else(|| current.business_name.clone()),
            business_address: self
                .business_address
                .clone()
                .unwrap_or_else(|| current.business_address.clone()),
            business_phone: self
                .business_phone
                .clone()
                .unwrap_or_else(|| current.business_phone.clone()),
            business_email: self
                .business_email
                .clone()
                .unwrap_or_else(|| current.business_email.clone()),
            tax_name: self
                .tax_name
                .clone()
                .unwrap_or_else(|| current.tax_name.clone()),
            tax_rate: self.tax_rate.unwrap_or(current.tax_rate),
            secondary_tax_name: self
                .secondary_tax_name
                .clone()
                .unwrap_or_else(|| current.secondary_tax_name.clone()),
            secondary_tax_rate: self
                .secondary_tax_rate
                .unwrap_or(current.secondary_tax_rate),
            default_payment_terms: self
                .default_payment_terms
                .unwrap_or(current.default_payment_terms),
        };
        merged.validate()?;
        Ok(merged)
    }
}
