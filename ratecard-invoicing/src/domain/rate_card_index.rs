//! Per-request lookup table over a tenant's active rate card.
//!
//! Every entry is reachable under `"{category}.{name}"` and under
//! `"{category}.{alias}"` for each of its aliases, all normalized. When two
//! entries claim the same key the one inserted first keeps it; the later
//! claim is recorded as a [`KeyCollision`] and skipped. Callers pass entries
//! in creation order, so the oldest entry wins.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::models::{RateCardEntry, RateCategory};

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lookup key for a category/name pair.
pub fn entry_key(category: RateCategory, name: &str) -> String {
    format!("{}.{}", category.as_str(), normalize_key(name))
}

/// All keys an entry answers to: its name first, then each alias.
pub fn lookup_keys(category: RateCategory, name: &str, aliases: &[String]) -> Vec<String> {
    let mut keys = vec![entry_key(category, name)];
    for alias in aliases {
        let key = entry_key(category, alias);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// A key that two entries wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCollision {
    pub key: String,
    pub kept: Uuid,
    pub skipped: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct RateCardIndex {
    entries: Vec<RateCardEntry>,
    by_key: HashMap<String, usize>,
    primary_keys: Vec<String>,
    collisions: Vec<KeyCollision>,
}

impl RateCardIndex {
    /// Build from entries in insertion order. Retired entries are ignored.
    pub fn build(entries: impl IntoIterator<Item = RateCardEntry>) -> Self {
        let mut index = RateCardIndex::default();

        for entry in entries.into_iter().filter(|e| e.is_active()) {
            let slot = index.entries.len();
            let keys = lookup_keys(entry.category, &entry.name, &entry.aliases);
            let mut claimed_any = false;

            for (position, key) in keys.into_iter().enumerate() {
                if let Some(&owner) = index.by_key.get(&key) {
                    let collision = KeyCollision {
                        key,
                        kept: index.entries[owner].entry_id,
                        skipped: entry.entry_id,
                    };
                    warn!(
                        key = %collision.key,
                        kept = %collision.kept,
                        skipped = %collision.skipped,
                        "Rate card key collision, keeping first entry"
                    );
                    index.collisions.push(collision);
                    continue;
                }
                if position == 0 {
                    index.primary_keys.push(key.clone());
                }
                index.by_key.insert(key, slot);
                claimed_any = true;
            }

            if claimed_any {
                index.entries.push(entry);
            }
        }

        index.primary_keys.sort();
        index
    }

    /// Exact, case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&RateCardEntry> {
        self.by_key
            .get(&normalize_key(key))
            .map(|&slot| &self.entries[slot])
    }

    /// Keys offered to the extractor, sorted. Aliases are included so the
    /// extractor may emit either form.
    pub fn catalog_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Canonical `"{category}.{name}"` keys, sorted.
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// First entry (other than `ignore`) already owning one of `keys`.
    pub fn find_conflict(&self, keys: &[String], ignore: Option<Uuid>) -> Option<(String, Uuid)> {
        keys.iter().find_map(|key| {
            let owner = &self.entries[*self.by_key.get(key)?];
            if Some(owner.entry_id) == ignore {
                None
            } else {
                Some((key.clone(), owner.entry_id))
            }
        })
    }

    pub fn collisions(&self) -> &[KeyCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
