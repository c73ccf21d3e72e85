// libs/payment-cell/tests/invoice_test.rs

mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{mount_auth, mount_cancel, mount_check, mount_invoice, paid_check, unpaid_check, PaymentHarness, INVOICE_ID};
use payment_cell::models::{CallbackOutcome, CallbackPayload, PaymentError, VerifyPaymentRequest, EXPIRED_MESSAGE};
use shared_database::ClinicStore;
use shared_models::appointment::AppointmentStatus;
use shared_models::payment::{PaymentMethod, PaymentStatus};
use shared_utils::clock::Clock;
use shared_utils::test_utils::{TestConfig, TestUser};

#[tokio::test]
async fn create_invoice_reuses_the_open_invoice() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    Mock::given(method("POST"))
        .and(path("/invoice"))
        .and(body_partial_json(json!({
            "invoice_code": "TEST_INVOICE",
            "invoice_receiver_code": "99001122",
            "invoice_description": "Appointment booking fee - Dr. Oyun",
            "amount": 25000
        })))
        .respond_with(common::invoice_response(INVOICE_ID))
        .expect(1)
        .mount(&h.qpay)
        .await;
    let appointment = h.book("09:00").await;

    let first = h.service.create_invoice(appointment.id).await.unwrap();
    let second = h.service.create_invoice(appointment.id).await.unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.payment_id, second.payment_id);
    assert_eq!(first.invoice_id.as_deref(), Some(INVOICE_ID));
    assert_eq!(second.invoice_id, first.invoice_id);
    assert_eq!(first.amount, 25_000);
    assert_eq!(first.qr_url.as_deref(), Some("https://s.qpay.mn/inv-001"));
    assert_eq!(
        first.expires_at,
        Some(h.clinic.clock.now() + Duration::minutes(15))
    );
}

#[tokio::test]
async fn concurrent_invoice_requests_share_one_payment() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    Mock::given(method("POST"))
        .and(path("/invoice"))
        .respond_with(common::invoice_response(INVOICE_ID))
        .expect(1..=2)
        .mount(&h.qpay)
        .await;
    mount_cancel(&h.qpay).await;
    let appointment = h.book("09:00").await;

    let results = join_all((0..2).map(|_| h.service.create_invoice(appointment.id))).await;

    let ids: Vec<Uuid> = results.into_iter().map(|r| r.unwrap().payment_id).collect();
    assert_eq!(ids[0], ids[1]);
    assert_eq!(h.clinic.store.list_payments(appointment.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invoice_requires_a_pending_appointment() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 0).await;
    let appointment = h.book("09:00").await;
    h.clinic
        .store
        .update_appointment_status(appointment.id, &[AppointmentStatus::Pending], AppointmentStatus::Confirmed)
        .await
        .unwrap();

    assert_matches!(
        h.service.create_invoice(appointment.id).await,
        Err(PaymentError::InvalidState(_))
    );
    assert_matches!(
        h.service.create_invoice(Uuid::new_v4()).await,
        Err(PaymentError::AppointmentNotFound)
    );
}

#[tokio::test]
async fn poll_confirms_payment_and_appointment_together() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, paid_check(25_000)).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let status = h.service.check_status(invoice.payment_id).await.unwrap();

    assert_eq!(status.status, PaymentStatus::Completed);
    assert!(status.paid_at.is_some());
    assert_eq!(status.appointment.unwrap().status, AppointmentStatus::Paid);

    let payment = h.clinic.store.get_payment(invoice.payment_id).await.unwrap().unwrap();
    let appointment = h.clinic.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(appointment.status, AppointmentStatus::Paid);
    assert_eq!(payment.transaction_id.as_deref(), Some("qpay-payment-1"));
}

#[tokio::test]
async fn poll_leaves_unpaid_invoice_pending() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, unpaid_check()).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let status = h.service.check_status(invoice.payment_id).await.unwrap();

    assert_eq!(status.status, PaymentStatus::Pending);
    assert!(status.message.is_none());
    assert_eq!(status.appointment.unwrap().status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn poll_survives_provider_errors() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, ResponseTemplate::new(503).set_body_string("maintenance")).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let status = h.service.check_status(invoice.payment_id).await.unwrap();

    assert_eq!(status.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn expiry_wins_over_a_paid_provider_report() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 2).await;
    Mock::given(method("POST"))
        .and(path("/payment/check"))
        .respond_with(paid_check(25_000))
        .expect(0)
        .mount(&h.qpay)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/invoice/{}", INVOICE_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.qpay)
        .await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    h.clinic.clock.advance(Duration::minutes(16));
    let status = h.service.check_status(invoice.payment_id).await.unwrap();

    assert_eq!(status.status, PaymentStatus::Expired);
    assert_eq!(status.message.as_deref(), Some(EXPIRED_MESSAGE));
    assert_eq!(status.appointment.unwrap().status, AppointmentStatus::Pending);

    // The appointment may retry with a fresh invoice.
    let retry = h.service.create_invoice(appointment.id).await.unwrap();
    assert_ne!(retry.payment_id, invoice.payment_id);
    assert!(!retry.reused);
}

#[tokio::test]
async fn lapsed_pending_invoice_is_replaced_on_retry() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 2).await;
    mount_cancel(&h.qpay).await;
    let appointment = h.book("09:00").await;
    let first = h.service.create_invoice(appointment.id).await.unwrap();

    h.clinic.clock.advance(Duration::minutes(20));
    let second = h.service.create_invoice(appointment.id).await.unwrap();

    assert_ne!(first.payment_id, second.payment_id);
    let old = h.clinic.store.get_payment(first.payment_id).await.unwrap().unwrap();
    assert_eq!(old.status, PaymentStatus::Expired);
}

#[tokio::test]
async fn cancelled_appointment_is_never_marked_paid() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, paid_check(25_000)).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();
    h.clinic
        .store
        .update_appointment_status(appointment.id, &[AppointmentStatus::Pending], AppointmentStatus::Cancelled)
        .await
        .unwrap();

    let status = h.service.check_status(invoice.payment_id).await.unwrap();

    assert_eq!(status.status, PaymentStatus::Pending);
    assert_eq!(status.appointment.unwrap().status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn callback_is_verified_and_idempotent() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, paid_check(25_000)).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();
    let payment = h.clinic.store.get_payment(invoice.payment_id).await.unwrap().unwrap();
    let reference = payment.metadata_str("sender_invoice_no").unwrap().to_string();

    let outcome = h
        .service
        .handle_callback(Some(reference.clone()), CallbackPayload::default())
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Completed);

    let again = h
        .service
        .handle_callback(Some(reference), CallbackPayload::default())
        .await
        .unwrap();
    assert_eq!(again, CallbackOutcome::AlreadyProcessed(PaymentStatus::Completed));

    let appointment = h.clinic.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Paid);
}

#[tokio::test]
async fn callback_for_unknown_invoice_is_acknowledged() {
    let h = PaymentHarness::new().await;

    let outcome = h
        .service
        .handle_callback(Some("BK-NOPE".to_string()), CallbackPayload::from_bytes(b"{}"))
        .await
        .unwrap();

    assert_eq!(outcome, CallbackOutcome::UnknownInvoice);
}

#[tokio::test]
async fn callback_after_expiry_is_not_honored() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_cancel(&h.qpay).await;
    mount_check(&h.qpay, paid_check(25_000)).await;
    let appointment = h.book("09:00").await;
    h.service.create_invoice(appointment.id).await.unwrap();

    h.clinic.clock.advance(Duration::minutes(16));
    let payload = CallbackPayload::from_bytes(br#"{"invoice_id":"inv-001","status":"PAID","amount":25000}"#);
    let outcome = h.service.handle_callback(None, payload).await.unwrap();

    assert_eq!(outcome, CallbackOutcome::Expired);
    let appointment = h.clinic.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn unverifiable_callback_falls_back_to_its_own_signal() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, ResponseTemplate::new(500)).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let payload = CallbackPayload::from_bytes(
        br#"{"invoiceId":"inv-001","transactionId":"tx-42","status":"SUCCESS","amount":25000}"#,
    );
    let outcome = h.service.handle_callback(None, payload).await.unwrap();

    assert_eq!(outcome, CallbackOutcome::Completed);
    let payment = h.clinic.store.get_payment(invoice.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.transaction_id.as_deref(), Some("tx-42"));
    assert_eq!(payment.metadata_str("confirmed_via"), Some("callback"));
}

#[tokio::test]
async fn callback_amount_mismatch_fails_the_payment() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, ResponseTemplate::new(503).set_body_string("maintenance")).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let payload = CallbackPayload::from_bytes(br#"{"invoiceId":"inv-001","status":"PAID","amount":100}"#);
    let outcome = h.service.handle_callback(None, payload).await.unwrap();

    assert_eq!(outcome, CallbackOutcome::Failed);
    let status = h.service.check_status(invoice.payment_id).await.unwrap();
    assert_eq!(status.status, PaymentStatus::Failed);
    assert_eq!(status.message.as_deref(), Some("Payment failed, please retry"));
}

#[tokio::test]
async fn paid_callback_is_not_trusted_when_provider_saw_no_payment() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, unpaid_check()).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let payload = CallbackPayload::from_bytes(br#"{"invoice_id":"inv-001","status":"PAID","amount":25000}"#);
    let outcome = h.service.handle_callback(None, payload).await.unwrap();

    assert_eq!(outcome, CallbackOutcome::StillPending);
    let payment = h.clinic.store.get_payment(invoice.payment_id).await.unwrap().unwrap();
    let appointment = h.clinic.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.transaction_id.is_none());
    assert_eq!(appointment.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn underpaid_invoice_fails_on_callback() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, paid_check(10_000)).await;
    let appointment = h.book("09:00").await;
    h.service.create_invoice(appointment.id).await.unwrap();

    let outcome = h
        .service
        .handle_callback(Some(INVOICE_ID.to_string()), CallbackPayload::default())
        .await
        .unwrap();

    assert_eq!(outcome, CallbackOutcome::Failed);
}

#[tokio::test]
async fn admin_verification_confirms_the_appointment() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();
    let admin = TestUser::admin("admin@clinic.mn").to_user();

    let confirmed = h
        .service
        .verify(
            invoice.payment_id,
            &admin,
            VerifyPaymentRequest {
                transaction_id: None,
                notes: Some("paid at the front desk".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    let payment = h.clinic.store.get_payment(invoice.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.method, PaymentMethod::AdminOverride);
    assert_eq!(payment.metadata_str("verified_by"), Some("admin@clinic.mn"));
    assert!(payment.transaction_id.unwrap().starts_with("ADMIN-"));

    assert_matches!(
        h.service.verify(invoice.payment_id, &admin, VerifyPaymentRequest::default()).await,
        Err(PaymentError::InvalidState(_))
    );
}

#[tokio::test]
async fn refund_keeps_the_appointment_status() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    mount_check(&h.qpay, paid_check(25_000)).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    assert_matches!(
        h.service.refund(invoice.payment_id, "changed plans").await,
        Err(PaymentError::InvalidState(_))
    );

    h.service.check_status(invoice.payment_id).await.unwrap();
    assert_matches!(
        h.service.refund(invoice.payment_id, "   ").await,
        Err(PaymentError::ValidationError(_))
    );

    let refunded = h.service.refund(invoice.payment_id, "doctor unavailable").await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_reason.as_deref(), Some("doctor unavailable"));
    assert!(refunded.refunded_at.is_some());

    let appointment = h.clinic.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Paid);
}

#[tokio::test]
async fn simulation_is_refused_in_production() {
    let h = PaymentHarness::with_config(TestConfig::default().production()).await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    assert_matches!(
        h.service.simulate(invoice.payment_id).await,
        Err(PaymentError::Forbidden(_))
    );
}

#[tokio::test]
async fn simulation_marks_the_appointment_paid() {
    let h = PaymentHarness::new().await;
    mount_auth(&h.qpay).await;
    mount_invoice(&h.qpay, 1).await;
    let appointment = h.book("09:00").await;
    let invoice = h.service.create_invoice(appointment.id).await.unwrap();

    let paid = h.service.simulate(invoice.payment_id).await.unwrap();
    assert_eq!(paid.status, AppointmentStatus::Paid);

    let payments = h.service.list_for_appointment(appointment.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert!(payments[0].transaction_id.as_deref().unwrap().starts_with("SIM-"));
}
