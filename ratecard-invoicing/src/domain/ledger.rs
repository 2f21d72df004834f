//! Payment application and invoice status rules.

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;

use super::pricing::{bounded_amount, CURRENCY_SCALE, MAX_AMOUNT};
use crate::models::{Invoice, InvoiceStatus, RecordPayment};

/// Invoice fields after a payment has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentApplication {
    pub amount_paid: Decimal,
    pub status: InvoiceStatus,
    pub paid_utc: Option<DateTime<Utc>>,
}

pub fn validate_payment(payment: &RecordPayment) -> Result<(), AppError> {
    if payment.amount <= Decimal::ZERO {
        return Err(AppError::invalid(
            "amount",
            format!("{} must be greater than zero", payment.amount),
        ));
    }
    if payment.amount.normalize().scale() > CURRENCY_SCALE {
        return Err(AppError::invalid(
            "amount",
            format!("{} has more than {} decimal places", payment.amount, CURRENCY_SCALE),
        ));
    }
    if payment.amount > MAX_AMOUNT {
        return Err(AppError::invalid(
            "amount",
            format!("{} exceeds the maximum of {}", payment.amount, MAX_AMOUNT),
        ));
    }
    Ok(())
}

/// Add `payment` to the invoice's running total. Overpayment is accepted.
pub fn apply_payment(invoice: &Invoice, payment: &RecordPayment) -> Result<PaymentApplication, AppError> {
    validate_payment(payment)?;
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(AppError::BadRequest(anyhow!(
            "Invoice {} is cancelled",
            invoice.invoice_number
        )));
    }

    let amount_paid = bounded_amount("amount", invoice.amount_paid.checked_add(payment.amount))?;
    let status = if amount_paid >= invoice.total {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    };
    let paid_utc = match (status, invoice.paid_utc) {
        (InvoiceStatus::Paid, None) => Some(payment.received_utc),
        (_, existing) => existing,
    };

    Ok(PaymentApplication {
        amount_paid,
        status,
        paid_utc,
    })
}

pub fn ensure_cancellable(invoice: &Invoice) -> Result<(), AppError> {
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(AppError::Conflict(anyhow!(
            "Invoice {} is already cancelled",
            invoice.invoice_number
        )));
    }
    if invoice.amount_paid > Decimal::ZERO {
        return Err(AppError::Conflict(anyhow!(
            "Invoice {} has payments and cannot be cancelled",
            invoice.invoice_number
        )));
    }
    Ok(())
}

/// Sent or partially paid, past due, with money still owed.
pub fn is_overdue(invoice: &Invoice, today: NaiveDate) -> bool {
    matches!(invoice.status, InvoiceStatus::Sent | InvoiceStatus::Partial)
        && invoice.due_date < today
        && invoice.outstanding() > Decimal::ZERO
}

/// Status once an invoice has been delivered. Re-sending keeps payment state.
pub fn status_after_send(status: InvoiceStatus) -> Result<InvoiceStatus, AppError> {
    match status {
        InvoiceStatus::Draft | InvoiceStatus::Overdue | InvoiceStatus::Sent => Ok(InvoiceStatus::Sent),
        InvoiceStatus::Partial => Ok(InvoiceStatus::Partial),
        InvoiceStatus::Paid => Ok(InvoiceStatus::Paid),
        InvoiceStatus::Cancelled => Err(AppError::BadRequest(anyhow!(
            "Cancelled invoices cannot be sent"
        ))),
    }
}
