//! Rate card (price list) model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Rates carry at most cent precision.
pub const RATE_SCALE: u32 = 2;
/// Largest rate the rate card column holds (9,999,999,999.99).
pub const MAX_RATE: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2); // == Decimal::new(999_999_999_999, 2)

/// Rate card category, the first half of every lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    Labor,
    Materials,
    Other,
}

impl RateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Labor => "labor",
            RateCategory::Materials => "materials",
            RateCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s.trim().to_lowercase().as_str() {
            "labor" => Ok(RateCategory::Labor),
            "materials" => Ok(RateCategory::Materials),
            "other" => Ok(RateCategory::Other),
            other => Err(AppError::invalid(
                "category",
                format!("unknown category '{}'", other),
            )),
        }
    }
}

impl std::fmt::Display for RateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entries are never deleted; retiring hides them from every read path
/// used for pricing while past invoice lines keep pointing at them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RateCardStatus {
    Active,
    Retired,
}

/// Canonical priced catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateCardEntry {
    pub entry_id: Uuid,
    pub tenant_id: Uuid,
    pub category: RateCategory,
    pub name: String,
    pub description: Option<String>,
    pub rate: Decimal,
    pub unit: String,
    pub aliases: Vec<String>,
    pub status: RateCardStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl RateCardEntry {
    pub fn is_active(&self) -> bool {
        self.status == RateCardStatus::Active
    }
}

/// Input for creating a rate card entry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRateCardEntry {
    pub tenant_id: Uuid,
    pub category: RateCategory,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub rate: Decimal,
    #[validate(length(min = 1, max = 50))]
    pub unit: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CreateRateCardEntry {
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        validate_rate(self.rate)?;
        validate_aliases(&self.aliases)
    }
}

/// Input for editing a rate card entry. Category is fixed at creation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRateCardEntry {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub rate: Option<Decimal>,
    #[validate(length(min = 1, max = 50))]
    pub unit: Option<String>,
    pub aliases: Option<Vec<String>>,
}

impl UpdateRateCardEntry {
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        if let Some(rate) = self.rate {
            validate_rate(rate)?;
        }
        if let Some(aliases) = &self.aliases {
            validate_aliases(aliases)?;
        }
        Ok(())
    }
}

fn validate_rate(rate: Decimal) -> Result<(), AppError> {
    if rate < Decimal::ZERO {
        return Err(AppError::invalid("rate", "must not be negative"));
    }
    if rate > MAX_RATE {
        return Err(AppError::invalid(
            "rate",
            format!("{} exceeds the maximum of {}", rate, MAX_RATE),
        ));
    }
    if rate.normalize().scale() > RATE_SCALE {
        return Err(AppError::invalid(
            "rate",
            format!("{} has more than {} decimal places", rate, RATE_SCALE),
        ));
    }
    Ok(())
}

fn validate_aliases(aliases: &[String]) -> Result<(), AppError> {
    for (i, alias) in aliases.iter().enumerate() {
        if alias.trim().is_empty() {
            return Err(AppError::invalid(
                format!("aliases[{}]", i),
                "must not be empty",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create(rate: Decimal) -> CreateRateCardEntry {
        CreateRateCardEntry {
            tenant_id: Uuid::new_v4(),
            category: RateCategory::Labor,
            name: "Troubleshooting".to_string(),
            description: None,
            rate,
            unit: "hour".to_string(),
            aliases: vec!["diagnose".to_string()],
        }
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(RateCategory::parse(" Labor ").unwrap(), RateCategory::Labor);
        assert_eq!(
            RateCategory::parse("MATERIALS").unwrap(),
            RateCategory::Materials
        );
        assert!(RateCategory::parse("travel").is_err());
    }

    #[test]
    fn zero_rate_is_legal() {
        assert!(create(dec!(0)).check().is_ok());
        assert!(create(dec!(85.00)).check().is_ok());
    }

    #[test]
    fn negative_or_sub_cent_rates_are_rejected() {
        let err = create(dec!(-1)).check().unwrap_err();
        assert_eq!(err.field(), Some("rate"));

        let err = create(dec!(12.345)).check().unwrap_err();
        assert_eq!(err.field(), Some("rate"));
    }

    #[test]
    fn blank_alias_is_rejected() {
        let mut input = create(dec!(10));
        input.aliases.push("   ".to_string());
        let err = input.check().unwrap_err();
        assert_eq!(err.field(), Some("aliases[1]"));
    }

    #[test]
    fn empty_name_fails_derive_validation() {
        let mut input = create(dec!(10));
        input.name = String::new();
        assert!(matches!(
            input.check(),
            Err(AppError::ValidationError(_))
        ));
    }
}
