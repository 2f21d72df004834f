//! Services module for ratecard-invoicing.

pub mod analytics;
pub mod database;
pub mod delivery;
pub mod extraction;
pub mod invoicing;
pub mod memory;
pub mod metrics;
pub mod rendering;
pub mod store;
pub mod tenant_locks;

pub use database::Database;
pub use delivery::{DeliveryReport, InvoiceMailer, MockMailer, SmtpMailer};
pub use extraction::{HttpExtractor, RawExtraction, RawWorkItem, WorkExtractor};
pub use invoicing::{
    CreateInvoiceRequest, CreatedInvoice, InvoicePreview, InvoicingService, RecurrenceReport,
};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use rendering::{InvoiceRenderer, TextRenderer};
pub use store::Store;
pub use tenant_locks::TenantLocks;
