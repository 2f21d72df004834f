//! Line and tax arithmetic.
//!
//! Line totals and the subtotal are kept at full precision. Each tax is
//! `round(subtotal * rate)` on the unrounded subtotal, independently of the
//! other tax. The total is the rounded subtotal plus both taxes. All rounding
//! is to cents with banker's rounding (half to even).

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use service_core::error::AppError;

use super::matcher::{unmatched_label, MatchResult};
use crate::models::PricedLineItem;

pub const CURRENCY_SCALE: u32 = 2;
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointNearestEven;

/// Largest quantity accepted on a single line.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0); // == Decimal::new(1_000_000, 0)
/// Largest money amount the ledger columns hold (999,999,999,999.99).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2); // == Decimal::new(99_999_999_999_999, 2)

pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, ROUNDING)
}

/// Primary and optional secondary tax, as fractions of the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaxRates {
    pub primary: Decimal,
    pub secondary: Option<Decimal>,
}

impl TaxRates {
    pub fn new(primary: Decimal, secondary: Option<Decimal>) -> Self {
        Self { primary, secondary }
    }

    pub fn none() -> Self {
        Self::new(Decimal::ZERO, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingResult {
    pub line_items: Vec<PricedLineItem>,
    pub unmatched_items: Vec<String>,
    /// Sum of line totals before rounding.
    pub subtotal_exact: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub secondary_tax_amount: Decimal,
    pub total: Decimal,
}

impl PricingResult {
    /// Put the extractor's own unmatched notes ahead of the unmatched items.
    pub fn with_unmatched_hints(mut self, hints: &[String]) -> Self {
        if !hints.is_empty() {
            let mut unmatched = hints.to_vec();
            unmatched.append(&mut self.unmatched_items);
            self.unmatched_items = unmatched;
        }
        self
    }
}

pub fn validate_quantity(field: &str, quantity: Decimal) -> Result<(), AppError> {
    if quantity <= Decimal::ZERO {
        return Err(AppError::invalid(
            field,
            format!("{} must be greater than zero", quantity),
        ));
    }
    if quantity > MAX_QUANTITY {
        return Err(AppError::invalid(
            field,
            format!("{} exceeds the maximum quantity of {}", quantity, MAX_QUANTITY),
        ));
    }
    Ok(())
}

/// Reject results of checked arithmetic that overflowed or left the money range.
pub fn bounded_amount(field: &str, amount: Option<Decimal>) -> Result<Decimal, AppError> {
    match amount {
        Some(value) if value.abs() <= MAX_AMOUNT => Ok(value),
        _ => Err(AppError::invalid(
            field,
            format!("amount exceeds the maximum of {}", MAX_AMOUNT),
        )),
    }
}

/// `quantity * unit_price` at full precision.
pub fn line_total(field: &str, quantity: Decimal, unit_price: Decimal) -> Result<Decimal, AppError> {
    bounded_amount(field, quantity.checked_mul(unit_price))
}

/// Price matched items and carry unmatched ones through as labels.
pub fn price(matches: &[MatchResult], rates: TaxRates) -> Result<PricingResult, AppError> {
    for (i, result) in matches.iter().enumerate() {
        validate_quantity(&format!("line_items[{}].quantity", i), result.quantity())?;
    }

    let mut line_items = Vec::new();
    let mut unmatched_items = Vec::new();

    for (i, result) in matches.iter().enumerate() {
        match result {
            MatchResult::Matched(item) => {
                let unit_price = item.entry.rate;
                let line_total = line_total(&format!("line_items[{}].quantity", i), item.quantity, unit_price)?;
                line_items.push(PricedLineItem {
                    rate_entry_id: Some(item.entry.entry_id),
                    item_key: item.key.clone(),
                    description: item.entry.name.clone(),
                    quantity: item.quantity,
                    unit: item.unit.clone(),
                    unit_price,
                    line_total,
                    matched: true,
                    notes: item.note.clone(),
                    ordinal: line_items.len() as i32,
                });
            }
            MatchResult::Unmatched { key, quantity } => {
                unmatched_items.push(unmatched_label(key, *quantity));
            }
        }
    }

    total_lines(line_items, unmatched_items, rates)
}

/// Compute subtotal, taxes and total for already-priced lines.
pub fn total_lines(
    line_items: Vec<PricedLineItem>,
    unmatched_items: Vec<String>,
    rates: TaxRates,
) -> Result<PricingResult, AppError> {
    let subtotal_exact = line_items.iter().try_fold(Decimal::ZERO, |sum, line| {
        bounded_amount("subtotal", sum.checked_add(line.line_total))
    })?;
    let tax_amount = round_currency(bounded_amount(
        "tax_amount",
        subtotal_exact.checked_mul(rates.primary),
    )?);
    let secondary_tax_amount = match rates.secondary {
        Some(rate) => round_currency(bounded_amount(
            "secondary_tax_amount",
            subtotal_exact.checked_mul(rate),
        )?),
        None => Decimal::ZERO,
    };
    let subtotal = round_currency(subtotal_exact);
    let total = bounded_amount(
        "total",
        subtotal
            .checked_add(tax_amount)
            .and_then(|sum| sum.checked_add(secondary_tax_amount)),
    )?;

    Ok(PricingResult {
        line_items,
        unmatched_items,
        subtotal_exact,
        subtotal,
        tax_amount,
        secondary_tax_amount,
        total,
    })
}
