#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::services::{PaymentInvoiceService, PaymentProvider, QPayClient};
use shared_database::ClinicStore;
use shared_models::appointment::{Appointment, AppointmentStatus, NewAppointment, PatientDetails};
use shared_utils::test_utils::{time, TestClinic, TestConfig};

pub const INVOICE_ID: &str = "inv-001";

/// A seeded clinic wired to a stubbed QPay.
pub struct PaymentHarness {
    pub clinic: TestClinic,
    pub qpay: MockServer,
    pub service: PaymentInvoiceService,
}

impl PaymentHarness {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(config: TestConfig) -> Self {
        let qpay = MockServer::start().await;
        let clinic = TestClinic::with_config(config.with_qpay_url(&qpay.uri())).await;
        let provider: Arc<dyn PaymentProvider> = Arc::new(QPayClient::new(&clinic.config).unwrap());
        let service = PaymentInvoiceService::new(clinic.context(), provider);

        Self { clinic, qpay, service }
    }

    /// A PENDING appointment next Monday at `at`.
    pub async fn book(&self, at: &str) -> Appointment {
        let patient = self
            .clinic
            .store
            .upsert_patient(&PatientDetails {
                name: "Saraa".to_string(),
                phone: "99001122".to_string(),
                email: None,
            })
            .await
            .unwrap();

        self.clinic
            .store
            .insert_appointment(&NewAppointment {
                patient_id: patient.id,
                doctor_id: self.clinic.doctor.id,
                service_id: None,
                date: self.clinic.next_monday(),
                time: time(at),
                status: AppointmentStatus::Pending,
                notes: None,
            })
            .await
            .unwrap()
    }
}

pub async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "bearer",
            "access_token": "token-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "refresh_expires_in": 7200
        })))
        .mount(server)
        .await;
}

pub fn invoice_response(invoice_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "invoice_id": invoice_id,
        "qr_text": "0002010102121531279404962794049600",
        "qr_image": "iVBORw0KGgo=",
        "qPay_shortUrl": format!("https://s.qpay.mn/{}", invoice_id),
        "urls": []
    }))
}

pub async fn mount_invoice(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/invoice"))
        .respond_with(invoice_response(INVOICE_ID))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_cancel(server: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/invoice/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

pub fn paid_check(amount: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "count": 1,
        "paid_amount": amount,
        "rows": [{
            "payment_id": "qpay-payment-1",
            "payment_status": "PAID",
            "payment_amount": format!("{}.00", amount),
            "payment_currency": "MNT"
        }]
    }))
}

pub fn unpaid_check() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "count": 0, "paid_amount": 0, "rows": [] }))
}

pub async fn mount_check(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/payment/check"))
        .respond_with(response)
        .mount(server)
        .await;
}
