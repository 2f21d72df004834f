//! Resolve extracted work items against the rate card index.
//!
//! Matching is an exact key lookup. It never looks at prices; the price of a
//! matched item is whatever the entry says.

use rust_decimal::Decimal;
use serde::Serialize;

use super::rate_card_index::RateCardIndex;
use crate::models::{ExtractedWorkItem, RateCardEntry};

/// Item resolved to a rate card entry.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedItem {
    pub entry: RateCardEntry,
    pub key: String,
    pub quantity: Decimal,
    pub unit: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub enum MatchResult {
    Matched(MatchedItem),
    /// Carried verbatim for the user to review.
    Unmatched { key: String, quantity: Decimal },
}

impl MatchResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }

    pub fn quantity(&self) -> Decimal {
        match self {
            MatchResult::Matched(item) => item.quantity,
            MatchResult::Unmatched { quantity, .. } => *quantity,
        }
    }
}

/// Human-readable form of an unmatched item, e.g. `labor.unknown-task (qty: 1)`.
pub fn unmatched_label(key: &str, quantity: Decimal) -> String {
    format!("{} (qty: {})", key, quantity.normalize())
}

pub fn match_item(index: &RateCardIndex, item: &ExtractedWorkItem) -> MatchResult {
    match index.get(&item.key) {
        Some(entry) => MatchResult::Matched(MatchedItem {
            entry: entry.clone(),
            key: item.key.clone(),
            quantity: item.quantity,
            unit: item
                .unit
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or(&entry.unit)
                .to_string(),
            note: item.note.clone(),
        }),
        None => MatchResult::Unmatched {
            key: item.key.clone(),
            quantity: item.quantity,
        },
    }
}

/// Match every item, preserving input order.
pub fn match_items(index: &RateCardIndex, items: &[ExtractedWorkItem]) -> Vec<MatchResult> {
    items.iter().map(|item| match_item(index, item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RateCardStatus, RateCategory};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn index() -> RateCardIndex {
        RateCardIndex::build(vec![RateCardEntry {
            entry_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            category: RateCategory::Materials,
            name: "Wire".to_string(),
            description: Some("14/2 NM-B".to_string()),
            rate: dec!(1.25),
            unit: "ft".to_string(),
            aliases: vec!["romex".to_string()],
            status: RateCardStatus::Active,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }])
    }

    #[test]
    fn matched_item_uses_entry_unit() {
        let result = match_item(&index(), &ExtractedWorkItem::new("materials.romex", dec!(50)));
        match result {
            MatchResult::Matched(item) => {
                assert_eq!(item.entry.name, "Wire");
                assert_eq!(item.unit, "ft");
                assert_eq!(item.quantity, dec!(50));
                assert_eq!(item.key, "materials.romex");
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn unit_override_replaces_entry_unit() {
        let mut item = ExtractedWorkItem::new("materials.wire", dec!(2));
        item.unit = Some("spool".to_string());
        match match_item(&index(), &item) {
            MatchResult::Matched(matched) => assert_eq!(matched.unit, "spool"),
            other => panic!("expected match, got {:?}", other),
        }

        item.unit = Some("  ".to_string());
        match match_item(&index(), &item) {
            MatchResult::Matched(matched) => assert_eq!(matched.unit, "ft"),
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn unknown_key_is_carried_verbatim() {
        let result = match_item(&index(), &ExtractedWorkItem::new("labor.Unknown-Task", dec!(1.50)));
        match result {
            MatchResult::Unmatched { key, quantity } => {
                assert_eq!(key, "labor.Unknown-Task");
                assert_eq!(quantity, dec!(1.50));
                assert_eq!(unmatched_label(&key, quantity), "labor.Unknown-Task (qty: 1.5)");
            }
            other => panic!("expected unmatched, got {:?}", other),
        }
    }

    #[test]
    fn match_items_preserves_order() {
        let items = vec![
            ExtractedWorkItem::new("labor.nothing", dec!(1)),
            ExtractedWorkItem::new("materials.wire", dec!(3)),
        ];
        let results = match_items(&index(), &items);
        assert!(!results[0].is_matched());
        assert!(results[1].is_matched());
        assert_eq!(results[1].quantity(), dec!(3));
    }
}
