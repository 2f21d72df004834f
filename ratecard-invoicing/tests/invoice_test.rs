//! Invoice creation, numbering and lifecycle tests.

mod common;

use std::collections::HashSet;

use common::{date, payment, TestApp};
use futures::future::join_all;
use ratecard_invoicing::models::{
    InvoiceStatus, ListInvoicesFilter, NewInvoice, UpdateRateCardEntry,
};
use ratecard_invoicing::services::Store;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

fn empty_invoice(tenant_id: Uuid, invoice_date: chrono::NaiveDate) -> NewInvoice {
    NewInvoice {
        tenant_id,
        client_id: None,
        schedule_id: None,
        template: "modern".to_string(),
        original_input: None,
        work_date: invoice_date,
        invoice_date,
        due_date: invoice_date,
        subtotal: Decimal::ZERO,
        tax_name: "GST".to_string(),
        tax_amount: Decimal::ZERO,
        secondary_tax_name: None,
        secondary_tax_amount: Decimal::ZERO,
        total: Decimal::ZERO,
        notes: None,
        line_items: Vec::new(),
        unmatched_items: Vec::new(),
    }
}

#[tokio::test]
async fn first_invoice_is_numbered_0001_and_stored_as_draft() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;

    let created = app
        .create_invoice(
            "panel work",
            &[("labor.troubleshooting", "3"), ("materials.breaker-30a", "1"), ("labor.unknown-task", "1")],
            date(2024, 5, 17),
        )
        .await;
    let invoice = &created.detail.invoice;

    assert_eq!(invoice.invoice_number, "2024-0001");
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.total, dec!(290.85));
    assert_eq!(invoice.original_input.as_deref(), Some("panel work"));
    assert_eq!(invoice.template, "modern");
    assert_eq!(created.unmatched_items, vec!["labor.unknown-task (qty: 1)"]);

    // Only matched lines are stored, in order.
    let lines = &created.detail.line_items;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].ordinal, 0);
    assert_eq!(lines[1].ordinal, 1);
    assert_eq!(lines[0].description, "Troubleshooting");
}

#[tokio::test]
async fn numbering_continues_from_the_latest_invoice() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.store
        .insert_invoice("2024-0007", &empty_invoice(app.tenant_id(), date(2024, 3, 1)), None)
        .await
        .unwrap();

    let created = app
        .create_invoice("more work", &[("labor.troubleshooting", "1")], date(2024, 5, 17))
        .await;
    assert_eq!(created.detail.invoice.invoice_number, "2024-0008");

    // The suffix keeps counting into the new year.
    let created = app
        .create_invoice("new year", &[("labor.troubleshooting", "1")], date(2025, 1, 2))
        .await;
    assert_eq!(created.detail.invoice.invoice_number, "2025-0009");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_assigns_unique_numbers() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "busy day",
        json!({"line_items": [{"key": "labor.troubleshooting", "quantity": 1}]}),
    );

    let tasks = (0..12).map(|_| {
        let service = app.service.clone();
        let request = app.request("busy day", date(2024, 6, 1));
        tokio::spawn(async move { service.create_invoice(&request).await })
    });
    let numbers: HashSet<String> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().detail.invoice.invoice_number)
        .collect();

    assert_eq!(numbers.len(), 12);
    assert!(numbers.contains("2024-0001"));
    assert!(numbers.contains("2024-0012"));
}

#[tokio::test]
async fn due_date_follows_client_terms_then_tenant_default() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let client = app.add_client("Quick Pay Ltd", None, 7).await;
    app.extractor.script(
        "job",
        json!({"line_items": [{"key": "labor.troubleshooting", "quantity": 1}]}),
    );

    let mut request = app.request("job", date(2024, 5, 17));
    request.client_id = Some(client.client_id);
    let with_client = app.service.create_invoice(&request).await.unwrap();
    assert_eq!(with_client.detail.invoice.due_date, date(2024, 5, 24));
    assert_eq!(with_client.detail.invoice.client_id, Some(client.client_id));

    let without_client = app
        .service
        .create_invoice(&app.request("job", date(2024, 5, 17)))
        .await
        .unwrap();
    assert_eq!(without_client.detail.invoice.due_date, date(2024, 6, 16));
}

#[tokio::test]
async fn rate_changes_do_not_touch_existing_lines() {
    let app = TestApp::spawn().await;
    let (labor, _) = app.seed_electrical_rate_card().await;
    let created = app
        .create_invoice("two hours", &[("labor.troubleshooting", "2")], date(2024, 5, 17))
        .await;

    app.service
        .update_rate_entry(
            app.tenant_id(),
            labor.entry_id,
            &UpdateRateCardEntry {
                rate: Some(dec!(95)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = app
        .service
        .get_invoice(app.tenant_id(), created.detail.invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored.line_items[0].unit_price, dec!(85));
    assert_eq!(stored.line_items[0].line_total, dec!(170));
    assert_eq!(stored.invoice.subtotal, dec!(170.00));

    let repriced = app
        .create_invoice("two more hours", &[("labor.troubleshooting", "2")], date(2024, 5, 18))
        .await;
    assert_eq!(repriced.detail.line_items[0].unit_price, dec!(95));
}

#[tokio::test]
async fn unknown_client_and_template_are_rejected() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;

    let mut request = app.request("job", date(2024, 5, 17));
    request.client_id = Some(Uuid::new_v4());
    let err = app.service.create_invoice(&request).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let mut request = app.request("job", date(2024, 5, 17));
    request.template = Some("glitter".to_string());
    let err = app.service.create_invoice(&request).await.unwrap_err();
    assert_eq!(err.field(), Some("template"));
}

#[tokio::test]
async fn other_tenants_cannot_see_invoices() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let created = app
        .create_invoice("job", &[("labor.troubleshooting", "1")], date(2024, 5, 17))
        .await;

    let other = app
        .service
        .provision_tenant("someone@else.test", "Other Co")
        .await
        .unwrap();
    assert_ne!(other.tenant_id, app.tenant_id());

    let err = app
        .service
        .get_invoice(other.tenant_id, created.detail.invoice.invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn provisioning_is_idempotent() {
    let app = TestApp::spawn().await;

    let again = app
        .service
        .provision_tenant("OWNER@sparkelectric.test", "Renamed")
        .await
        .unwrap();

    assert_eq!(again.tenant_id, app.tenant_id());
    assert_eq!(again.settings.business_name, "Spark Electric");
}

#[tokio::test]
async fn client_totals_track_invoices_and_cancellation() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let client = app.add_client("Acme", None, 30).await;
    app.extractor.script(
        "acme job",
        json!({
            "line_items": [{"key": "labor.troubleshooting", "quantity": 2}],
            "client_name": "ACME"
        }),
    );

    let first = app
        .service
        .create_invoice(&app.request("acme job", date(2024, 5, 17)))
        .await
        .unwrap();
    let second = app
        .service
        .create_invoice(&app.request("acme job", date(2024, 5, 18)))
        .await
        .unwrap();
    assert_eq!(first.detail.invoice.client_id, Some(client.client_id));

    let cached = app
        .service
        .get_client(app.tenant_id(), client.client_id)
        .await
        .unwrap();
    assert_eq!(cached.invoice_count, 2);
    assert_eq!(cached.total_invoiced, dec!(357.00));

    app.service
        .cancel_invoice(app.tenant_id(), second.detail.invoice.invoice_id)
        .await
        .unwrap();
    app.service
        .record_payment(app.tenant_id(), first.detail.invoice.invoice_id, &payment(dec!(100)))
        .await
        .unwrap();

    let reconciled = app
        .service
        .reconcile_client_stats(app.tenant_id(), client.client_id)
        .await
        .unwrap();
    assert_eq!(reconciled.invoice_count, 1);
    assert_eq!(reconciled.total_invoiced, dec!(178.50));
    assert_eq!(reconciled.total_paid, dec!(100));

    let cached = app
        .service
        .get_client(app.tenant_id(), client.client_id)
        .await
        .unwrap();
    assert_eq!(cached.invoice_count, reconciled.invoice_count);
    assert_eq!(cached.total_invoiced, reconciled.total_invoiced);
}

#[tokio::test]
async fn cancelled_invoices_cannot_be_cancelled_again() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let created = app
        .create_invoice("job", &[("labor.troubleshooting", "1")], date(2024, 5, 17))
        .await;
    let id = created.detail.invoice.invoice_id;

    let cancelled = app.service.cancel_invoice(app.tenant_id(), id).await.unwrap();
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

    let err = app.service.cancel_invoice(app.tenant_id(), id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn list_filters_by_status_newest_first() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let a = app
        .create_invoice("a", &[("labor.troubleshooting", "1")], date(2024, 5, 1))
        .await;
    let b = app
        .create_invoice("b", &[("labor.troubleshooting", "1")], date(2024, 5, 2))
        .await;
    app.service
        .cancel_invoice(app.tenant_id(), a.detail.invoice.invoice_id)
        .await
        .unwrap();

    let all = app
        .service
        .list_invoices(app.tenant_id(), &ListInvoicesFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].invoice_id, b.detail.invoice.invoice_id);

    let drafts = app
        .service
        .list_invoices(
            app.tenant_id(),
            &ListInvoicesFilter {
                status: Some(InvoiceStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].invoice_number, "2024-0002");
}
