//! Pricing and reconciliation core. Everything here is pure and synchronous.

pub mod assembler;
pub mod ledger;
pub mod matcher;
pub mod pricing;
pub mod rate_card_index;
pub mod recurrence;
pub mod reporting;

pub use assembler::{assemble, next_invoice_number, resolve_work_date, tenant_tax_rates, InvoiceMeta};
pub use ledger::{apply_payment, PaymentApplication};
pub use matcher::{match_item, match_items, MatchResult, MatchedItem};
pub use pricing::{price, round_currency, PricingResult, TaxRates};
pub use rate_card_index::{entry_key, lookup_keys, normalize_key, RateCardIndex};
pub use recurrence::{next_occurrence, schedule_state, ScheduleState};
