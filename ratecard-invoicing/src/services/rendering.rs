//! Turning a stored invoice into a document.

use serde::Serialize;
use service_core::error::AppError;

use crate::domain::pricing::round_currency;
use crate::models::{Client, Invoice, LineItem, TenantSettings};
use rust_decimal::Decimal;

pub const TEMPLATES: [&str; 4] = ["modern", "classic", "minimal", "bold"];

pub fn validate_template(template: &str) -> Result<(), AppError> {
    if TEMPLATES.contains(&template) {
        Ok(())
    } else {
        Err(AppError::invalid(
            "template",
            format!("unknown template '{}', expected one of {}", template, TEMPLATES.join(", ")),
        ))
    }
}

/// Immutable snapshot handed to a renderer.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    pub client: Option<Client>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait InvoiceRenderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        document: &InvoiceDocument,
        business: &TenantSettings,
    ) -> Result<RenderedDocument, AppError>;
}

/// `$1,234.56`, rounded to cents.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = round_currency(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{}${}.{}", sign, grouped, cents)
}

/// Plain-text invoice, used as the mail body and attachment.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl TextRenderer {
    fn heading(template: &str, title: &str) -> String {
        match template {
            "bold" => format!("*** {} ***", title.to_uppercase()),
            "classic" => format!("{}\n{}", title, "=".repeat(title.len())),
            "minimal" => title.to_string(),
            _ => format!("{}\n{}", title, "-".repeat(title.len())),
        }
    }
}

impl InvoiceRenderer for TextRenderer {
    fn render(
        &self,
        template: &str,
        document: &InvoiceDocument,
        business: &TenantSettings,
    ) -> Result<RenderedDocument, AppError> {
        validate_template(template)?;
        let invoice = &document.invoice;
        let mut out = Vec::new();

        out.push(Self::heading(template, &format!("Invoice {}", invoice.invoice_number)));
        out.push(business.business_name.clone());
        for line in [&business.business_address, &business.business_phone, &business.business_email]
            .into_iter()
            .flatten()
        {
            out.push(line.clone());
        }
        out.push(String::new());

        if let Some(client) = &document.client {
            out.push(format!("Bill to: {}", client.name));
            if let Some(company) = &client.company {
                out.push(format!("         {}", company));
            }
        }
        out.push(format!("Invoice date: {}", invoice.invoice_date.format("%B %d, %Y")));
        out.push(format!("Work date:    {}", invoice.work_date.format("%B %d, %Y")));
        out.push(format!("Due date:     {}", invoice.due_date.format("%B %d, %Y")));
        out.push(String::new());

        for line in &document.line_items {
            out.push(format!(
                "{:<40} {:>8} {:<6} @ {:>12} = {:>12}",
                line.description,
                line.quantity.normalize(),
                line.unit,
                format_currency(line.unit_price),
                format_currency(line.line_total)
            ));
            if let Some(notes) = &line.notes {
                out.push(format!("    {}", notes));
            }
        }
        out.push(String::new());

        out.push(format!("{:>60} {:>14}", "Subtotal", format_currency(invoice.subtotal)));
        out.push(format!("{:>60} {:>14}", invoice.tax_name, format_currency(invoice.tax_amount)));
        if let Some(name) = &invoice.secondary_tax_name {
            out.push(format!("{:>60} {:>14}", name, format_currency(invoice.secondary_tax_amount)));
        }
        out.push(format!("{:>60} {:>14}", "Total", format_currency(invoice.total)));
        if invoice.amount_paid > Decimal::ZERO {
            out.push(format!("{:>60} {:>14}", "Paid", format_currency(invoice.amount_paid)));
            out.push(format!("{:>60} {:>14}", "Balance due", format_currency(invoice.outstanding())));
        }

        if let Some(notes) = &invoice.notes {
            out.push(String::new());
            out.push(notes.clone());
        }

        let mut text = out.join("\n");
        text.push('\n');

        Ok(RenderedDocument {
            file_name: format!("invoice-{}.txt", invoice.invoice_number),
            content_type: "text/plain; charset=utf-8".to_string(),
            bytes: text.into_bytes(),
        })
    }
}
