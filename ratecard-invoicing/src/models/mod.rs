//! Domain models for ratecard-invoicing.

mod analytics;
mod client;
mod extraction;
mod invoice;
mod line_item;
mod payment;
mod rate_card;
mod schedule;
mod tenant;

pub use analytics::{
    DashboardStats, MonthlyActivity, OverdueInvoice, StatusTotals, TopClient,
};
pub use client::{Client, ClientTotals, CreateClient};
pub use extraction::{ExtractedWorkItem, Extraction};
pub use invoice::{
    Invoice, InvoiceDetail, InvoiceStatus, ListInvoicesFilter, NewInvoice, DEFAULT_TEMPLATE,
};
pub use line_item::{LineItem, PricedLineItem};
pub use payment::{Payment, PaymentMethod, RecordPayment};
pub use rate_card::{
    CreateRateCardEntry, RateCardEntry, RateCardStatus, RateCategory, UpdateRateCardEntry,
};
pub use schedule::{
    CreateSchedule, Frequency, RecurringSchedule, ScheduleAdvance, ScheduleLine,
    ScheduleLineInput,
};
pub use tenant::{
    validate_tax_rate, Tenant, TenantSettings, TenantSettingsUpdate, DEFAULT_PAYMENT_TERMS_DAYS,
};
