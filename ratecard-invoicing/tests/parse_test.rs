//! Preview (parse without storing) tests.

mod common;

use common::{date, TestApp, UNREACHABLE};
use ratecard_invoicing::models::{ListInvoicesFilter, RateCategory};
use rust_decimal_macros::dec;
use serde_json::json;
use service_core::error::AppError;

#[tokio::test]
async fn prices_matched_items_and_echoes_unmatched() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "fixed the panel",
        json!({
            "line_items": [
                {"key": "labor.troubleshooting", "quantity": 3},
                {"key": "materials.breaker-30a", "quantity": 1},
                {"key": "labor.unknown-task", "quantity": 1}
            ]
        }),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "fixed the panel", date(2024, 5, 17))
        .await
        .unwrap();
    let pricing = &preview.pricing;

    assert_eq!(pricing.subtotal, dec!(277.00));
    assert_eq!(pricing.tax_amount, dec!(13.85));
    assert_eq!(pricing.secondary_tax_amount, dec!(0));
    assert_eq!(pricing.total, dec!(290.85));
    assert_eq!(pricing.unmatched_items, vec!["labor.unknown-task (qty: 1)"]);

    assert_eq!(pricing.line_items.len(), 2);
    assert_eq!(pricing.line_items[0].description, "Troubleshooting");
    assert_eq!(pricing.line_items[0].line_total, dec!(255));
    assert_eq!(pricing.line_items[1].unit, "each");

    // Nothing is stored by a preview.
    let stored = app
        .service
        .list_invoices(app.tenant_id(), &ListInvoicesFilter::default())
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn catalog_keys_are_offered_to_the_extractor() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;

    app.service
        .preview(app.tenant_id(), "anything", date(2024, 5, 17))
        .await
        .unwrap();

    assert_eq!(
        app.extractor.last_catalog(),
        vec![
            "labor.diagnose".to_string(),
            "labor.troubleshooting".to_string(),
            "materials.breaker-30a".to_string(),
        ]
    );
}

#[tokio::test]
async fn aliases_and_case_resolve_to_the_entry() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "diagnosed",
        json!({"line_items": [{"key": "Labor.Diagnose", "quantity": "1.5"}]}),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "diagnosed", date(2024, 5, 17))
        .await
        .unwrap();

    assert!(preview.pricing.unmatched_items.is_empty());
    assert_eq!(preview.pricing.line_items[0].description, "Troubleshooting");
    assert_eq!(preview.pricing.line_items[0].line_total, dec!(127.5));
}

#[tokio::test]
async fn extractor_hints_come_before_unmatched_keys() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "mixed",
        json!({
            "line_items": [{"key": "labor.painting", "quantity": 2}],
            "unmatched_items": ["swept the garage"]
        }),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "mixed", date(2024, 5, 17))
        .await
        .unwrap();

    assert_eq!(
        preview.pricing.unmatched_items,
        vec!["swept the garage", "labor.painting (qty: 2)"]
    );
    assert_eq!(preview.pricing.total, dec!(0));
}

#[tokio::test]
async fn empty_rate_card_is_not_configured() {
    let app = TestApp::spawn().await;

    let err = app
        .service
        .preview(app.tenant_id(), "did some work", date(2024, 5, 17))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotConfigured(_)));
}

#[tokio::test]
async fn bad_quantity_is_rejected_with_its_field() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "negative",
        json!({"line_items": [
            {"key": "labor.troubleshooting", "quantity": 2},
            {"key": "materials.breaker-30a", "quantity": -1}
        ]}),
    );

    let err = app
        .service
        .preview(app.tenant_id(), "negative", date(2024, 5, 17))
        .await
        .unwrap_err();

    assert_eq!(err.field(), Some("line_items[1].quantity"));
}

#[tokio::test]
async fn huge_quantities_are_rejected_for_preview_and_create() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    app.extractor.script(
        "a galaxy of hours",
        json!({"line_items": [
            {"key": "labor.troubleshooting", "quantity": "79228162514264337593543950335"}
        ]}),
    );

    let err = app
        .service
        .preview(app.tenant_id(), "a galaxy of hours", date(2024, 5, 17))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("line_items[0].quantity"));

    let err = app
        .service
        .create_invoice(&app.request("a galaxy of hours", date(2024, 5, 17)))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("line_items[0].quantity"));
    let stored = app
        .service
        .list_invoices(app.tenant_id(), &ListInvoicesFilter::default())
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn extractor_failure_is_external() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;

    let err = app
        .service
        .preview(app.tenant_id(), UNREACHABLE, date(2024, 5, 17))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalServiceError(_)));
}

#[tokio::test]
async fn retired_entries_do_not_match() {
    let app = TestApp::spawn().await;
    let (_, breaker) = app.seed_electrical_rate_card().await;
    app.service
        .retire_rate_entry(app.tenant_id(), breaker.entry_id)
        .await
        .unwrap();
    app.extractor.script(
        "breaker",
        json!({"line_items": [{"key": "materials.breaker-30a", "quantity": 1}]}),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "breaker", date(2024, 5, 17))
        .await
        .unwrap();

    assert!(preview.pricing.line_items.is_empty());
    assert_eq!(preview.pricing.unmatched_items, vec!["materials.breaker-30a (qty: 1)"]);
}

#[tokio::test]
async fn client_guess_and_work_date_are_resolved() {
    let app = TestApp::spawn().await;
    app.seed_electrical_rate_card().await;
    let client = app.add_client("Acme Property", None, 15).await;
    app.extractor.script(
        "acme",
        json!({
            "line_items": [{"key": "labor.troubleshooting", "quantity": 1}],
            "client_name": "acme property",
            "work_date": "2024-05-10"
        }),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "acme", date(2024, 5, 17))
        .await
        .unwrap();

    assert_eq!(preview.client.map(|c| c.client_id), Some(client.client_id));
    assert_eq!(preview.client_name_guess.as_deref(), Some("acme property"));
    assert_eq!(preview.work_date, date(2024, 5, 10));
}

#[tokio::test]
async fn secondary_tax_is_computed_from_the_subtotal() {
    let app = TestApp::spawn().await;
    app.add_entry(RateCategory::Labor, "Install", dec!(170), "job", &[])
        .await;
    app.service
        .update_settings(
            app.tenant_id(),
            &ratecard_invoicing::models::TenantSettingsUpdate {
                secondary_tax_name: Some(Some("PST".to_string())),
                secondary_tax_rate: Some(Some(dec!(0.07))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    app.extractor.script(
        "install",
        json!({"line_items": [{"key": "labor.install", "quantity": 1}]}),
    );

    let preview = app
        .service
        .preview(app.tenant_id(), "install", date(2024, 5, 17))
        .await
        .unwrap();

    assert_eq!(preview.pricing.tax_amount, dec!(8.50));
    assert_eq!(preview.pricing.secondary_tax_amount, dec!(11.90));
    assert_eq!(preview.pricing.total, dec!(190.40));
}
