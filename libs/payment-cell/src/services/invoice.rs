// libs/payment-cell/src/services/invoice.rs
use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{StoreError, PAYMENT_REFERENCE_KEY};
use shared_models::appointment::{Appointment, AppointmentStatus};
use shared_models::auth::User;
use shared_models::payment::{
    NewPayment, Payment, PaymentCompletion, PaymentMethod, PaymentStatus, PaymentTransition, PaymentType,
};
use shared_utils::context::AppContext;

use crate::models::{
    CallbackOutcome, CallbackPayload, InvoiceRequest, InvoiceResponse, PaymentError,
    PaymentStatusResponse, VerifyPaymentRequest,
};
use crate::services::lifecycle::{PaymentLifecycleService, ADMIN_VERIFIABLE};
use crate::services::qpay::PaymentProvider;

/// Drives booking-fee payments from invoice to confirmation.
///
/// Every write that depends on current state goes through a store-level
/// compare-and-swap; nothing here holds a lock across calls.
#[derive(Clone)]
pub struct PaymentInvoiceService {
    ctx: Arc<AppContext>,
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentInvoiceService {
    pub fn new(ctx: Arc<AppContext>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { ctx, provider }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.ctx.config.clone()
    }

    async fn payment(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        self.ctx
            .store
            .get_payment(payment_id)
            .await?
            .ok_or(PaymentError::NotFound)
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Appointment, PaymentError> {
        self.ctx
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or(PaymentError::AppointmentNotFound)
    }

    // ==========================================================================
    // INVOICE CREATION
    // ==========================================================================

    /// Issues a QR invoice for a PENDING appointment, or hands back the one
    /// that is still open.
    pub async fn create_invoice(&self, appointment_id: Uuid) -> Result<InvoiceResponse, PaymentError> {
        let appointment = self.appointment(appointment_id).await?;

        if appointment.status != AppointmentStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "Appointment is {} and not awaiting payment",
                appointment.status
            )));
        }

        let now = self.ctx.now();
        let payments = self.ctx.store.list_payments(appointment_id).await?;

        if let Some(open) = payments.iter().find(|p| p.is_reusable_at(now)) {
            debug!("Reusing open invoice {} for appointment {}", open.id, appointment_id);
            return Ok(InvoiceResponse::from_payment(open, true));
        }

        // A lapsed PENDING fee still holds the one-pending-fee guard.
        for stale in payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.payment_type == PaymentType::BookingFee)
        {
            self.expire(stale).await?;
        }

        let patient = self.ctx.store.get_patient(appointment.patient_id).await?;
        let doctor = self.ctx.store.get_doctor(appointment.doctor_id).await?;

        let reference = sender_invoice_no();
        let request = InvoiceRequest {
            sender_invoice_no: reference.clone(),
            receiver_code: patient
                .map(|p| p.phone)
                .unwrap_or_else(|| appointment.patient_id.to_string()),
            description: match doctor {
                Some(doctor) => format!("Appointment booking fee - {}", doctor.name),
                None => "Appointment booking fee".to_string(),
            },
            amount: self.ctx.config.booking_fee,
        };

        let invoice = self.provider.create_invoice(&request).await?;

        let new_payment = NewPayment {
            appointment_id,
            amount: request.amount,
            payment_type: PaymentType::BookingFee,
            status: PaymentStatus::Pending,
            method: PaymentMethod::Qpay,
            qr_code: invoice.qr_text.clone(),
            qr_url: invoice.short_url.clone(),
            invoice_id: Some(invoice.invoice_id.clone()),
            expires_at: Some(now + Duration::minutes(self.ctx.config.payment_expiry_minutes)),
            metadata: Some(json!({ PAYMENT_REFERENCE_KEY: reference })),
        };

        match self.ctx.store.insert_payment(&new_payment).await {
            Ok(payment) => {
                info!(
                    "Payment {} created for appointment {} (invoice {}, expires {:?})",
                    payment.id, appointment_id, invoice.invoice_id, payment.expires_at
                );
                Ok(InvoiceResponse::from_payment(&payment, false))
            }
            Err(StoreError::Conflict(msg)) => {
                // A concurrent request stored its invoice first; ours is orphaned.
                warn!("Lost invoice race for appointment {}: {}", appointment_id, msg);
                self.cancel_best_effort(&invoice.invoice_id).await;

                let winner = self
                    .ctx
                    .store
                    .list_payments(appointment_id)
                    .await?
                    .into_iter()
                    .find(|p| p.is_reusable_at(now))
                    .ok_or(PaymentError::Store(StoreError::Conflict(msg)))?;
                Ok(InvoiceResponse::from_payment(&winner, true))
            }
            Err(e) => {
                error!("Failed to store payment for appointment {}: {}", appointment_id, e);
                self.cancel_best_effort(&invoice.invoice_id).await;
                Err(e.into())
            }
        }
    }

    // ==========================================================================
    // RECONCILIATION
    // ==========================================================================

    /// Poll path. Expiry is decided before the provider is consulted.
    pub async fn check_status(&self, payment_id: Uuid) -> Result<PaymentStatusResponse, PaymentError> {
        let mut payment = self.payment(payment_id).await?;
        let now = self.ctx.now();

        if payment.status == PaymentStatus::Pending && payment.is_expired_at(now) {
            payment = self.expire(&payment).await?;
        } else if payment.status == PaymentStatus::Pending {
            if let Some(invoice_id) = payment.invoice_id.clone() {
                match self.provider.check_payment(&invoice_id).await {
                    Ok(check) if check.covers(payment.amount) => {
                        let metadata = payment.metadata_with(json!({ "provider_check": check }));
                        if let Some(completed) = self
                            .confirm_from_provider(&payment, check.transaction_id(), metadata)
                            .await?
                        {
                            payment = completed;
                        }
                    }
                    Ok(check) => {
                        debug!(
                            "Payment {} not yet covered: {} of {}",
                            payment_id,
                            check.total_paid(),
                            payment.amount
                        );
                    }
                    Err(e) => {
                        warn!("Payment check for {} failed, returning stored status: {}", payment_id, e);
                    }
                }
            }
        }

        let appointment = self.ctx.store.get_appointment(payment.appointment_id).await?;
        Ok(PaymentStatusResponse::new(&payment, appointment))
    }

    /// Webhook path. Resolves the payment by provider invoice id or by our
    /// own invoice number, then re-verifies with the provider.
    pub async fn handle_callback(
        &self,
        query_invoice_id: Option<String>,
        payload: CallbackPayload,
    ) -> Result<CallbackOutcome, PaymentError> {
        let keys: Vec<String> = query_invoice_id
            .into_iter()
            .chain(payload.invoice_id.clone())
            .filter(|key| !key.trim().is_empty())
            .collect();

        let Some(payment) = self.resolve_callback_payment(&keys).await? else {
            warn!("Payment callback for unknown invoice {:?}", keys);
            return Ok(CallbackOutcome::UnknownInvoice);
        };

        if payment.status != PaymentStatus::Pending {
            debug!("Payment {} already {}, ignoring callback", payment.id, payment.status);
            return Ok(CallbackOutcome::AlreadyProcessed(payment.status));
        }

        let now = self.ctx.now();
        if payment.is_expired_at(now) {
            self.expire(&payment).await?;
            return Ok(CallbackOutcome::Expired);
        }

        let Some(invoice_id) = payment.invoice_id.as_deref() else {
            debug!("Payment {} has no provider invoice yet", payment.id);
            return Ok(CallbackOutcome::StillPending);
        };

        match self.provider.check_payment(invoice_id).await {
            Ok(check) if check.covers(payment.amount) => {
                let metadata = payment.metadata_with(json!({ "provider_check": check }));
                let completed = self
                    .confirm_from_provider(&payment, check.transaction_id(), metadata)
                    .await?;
                Ok(completed_outcome(completed))
            }
            Ok(check) if check.has_payments() => {
                warn!(
                    "Payment {} underpaid: {} of {}",
                    payment.id,
                    check.total_paid(),
                    payment.amount
                );
                self.fail(&payment, json!({ "error": "Amount mismatch", "provider_check": check }))
                    .await
            }
            // The provider answered and has seen no money; the body alone
            // never upgrades a payment.
            Ok(_) => {
                if payload.signals_success() {
                    warn!(
                        "Callback for payment {} claims success but the provider reports no payment",
                        payment.id
                    );
                }
                Ok(CallbackOutcome::StillPending)
            }
            Err(e) => {
                warn!("Could not verify callback for payment {}: {}", payment.id, e);
                self.apply_unverified_callback(&payment, payload).await
            }
        }
    }

    /// Provider unreachable: settle on the callback body, but only when its
    /// amount agrees with ours.
    async fn apply_unverified_callback(
        &self,
        payment: &Payment,
        payload: CallbackPayload,
    ) -> Result<CallbackOutcome, PaymentError> {
        if !payload.amount_matches(payment.amount) {
            warn!(
                "Callback amount {:?} does not match payment {} amount {}",
                payload.amount(),
                payment.id,
                payment.amount
            );
            return self
                .fail(
                    payment,
                    json!({
                        "error": "Amount mismatch",
                        "received": payload.amount,
                        "expected": payment.amount,
                    }),
                )
                .await;
        }

        if payload.signals_success() {
            warn!("Confirming payment {} from unverified callback", payment.id);
            let metadata = payment.metadata_with(json!({
                "confirmed_via": "callback",
                "callback": payload,
            }));
            let completed = self
                .confirm_from_provider(payment, payload.transaction_id.as_deref(), metadata)
                .await?;
            return Ok(completed_outcome(completed));
        }

        if payload.signals_failure() {
            return self.fail(payment, json!({ "callback": payload })).await;
        }

        Ok(CallbackOutcome::StillPending)
    }

    async fn resolve_callback_payment(&self, keys: &[String]) -> Result<Option<Payment>, PaymentError> {
        for key in keys {
            if let Some(payment) = self.ctx.store.find_payment_by_invoice(key).await? {
                return Ok(Some(payment));
            }
            if let Some(payment) = self.ctx.store.find_payment_by_reference(key).await? {
                return Ok(Some(payment));
            }
        }
        Ok(None)
    }

    /// PENDING -> COMPLETED with the appointment PENDING -> PAID, as one
    /// unit. Returns `None` when the store refused because either row moved
    /// on or the invoice expired meanwhile.
    async fn confirm_from_provider(
        &self,
        payment: &Payment,
        transaction_id: Option<&str>,
        metadata: Value,
    ) -> Result<Option<Payment>, PaymentError> {
        PaymentLifecycleService::validate_transition(payment.status, PaymentStatus::Completed)?;

        let now = self.ctx.now();
        let completion = PaymentCompletion {
            allowed_from: vec![PaymentStatus::Pending],
            valid_at: Some(now),
            appointment_from: vec![AppointmentStatus::Pending],
            appointment_status: AppointmentStatus::Paid,
            method: PaymentMethod::Qpay,
            transaction_id: transaction_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("QPAY-{}", now.timestamp_millis())),
            paid_at: now,
            metadata: Some(metadata),
        };

        match self.ctx.store.complete_payment(payment.id, &completion).await {
            Ok((payment, appointment)) => {
                info!(
                    "Payment {} completed, appointment {} now {}",
                    payment.id, appointment.id, appointment.status
                );
                Ok(Some(payment))
            }
            Err(StoreError::StaleState(msg)) => {
                warn!("Payment {} not confirmed: {}", payment.id, msg);
                Ok(None)
            }
            Err(e) => {
                error!("Failed to complete payment {}: {}", payment.id, e);
                Err(e.into())
            }
        }
    }

    /// PENDING -> EXPIRED, then a best-effort cancel at the provider.
    async fn expire(&self, payment: &Payment) -> Result<Payment, PaymentError> {
        PaymentLifecycleService::validate_transition(payment.status, PaymentStatus::Expired)?;

        let transition = PaymentTransition::new(PaymentStatus::Pending, PaymentStatus::Expired);
        let expired = match self.ctx.store.transition_payment(payment.id, &transition).await {
            Ok(expired) => expired,
            Err(StoreError::StaleState(_)) => {
                debug!("Payment {} changed before it could expire", payment.id);
                return self.payment(payment.id).await;
            }
            Err(e) => return Err(e.into()),
        };

        info!("Payment {} expired", payment.id);
        if let Some(invoice_id) = payment.invoice_id.as_deref() {
            self.cancel_best_effort(invoice_id).await;
        }
        Ok(expired)
    }

    async fn fail(&self, payment: &Payment, detail: Value) -> Result<CallbackOutcome, PaymentError> {
        PaymentLifecycleService::validate_transition(payment.status, PaymentStatus::Failed)?;

        let transition = PaymentTransition::new(PaymentStatus::Pending, PaymentStatus::Failed)
            .with_metadata(payment.metadata_with(detail));

        match self.ctx.store.transition_payment(payment.id, &transition).await {
            Ok(_) => {
                info!("Payment {} failed", payment.id);
                Ok(CallbackOutcome::Failed)
            }
            Err(StoreError::StaleState(_)) => {
                let current = self.payment(payment.id).await?;
                Ok(CallbackOutcome::AlreadyProcessed(current.status))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_best_effort(&self, invoice_id: &str) {
        if let Err(e) = self.provider.cancel_invoice(invoice_id).await {
            warn!("Could not cancel invoice {} at provider: {}", invoice_id, e);
        }
    }

    // ==========================================================================
    // ADMIN ACTIONS
    // ==========================================================================

    /// Manual confirmation regardless of provider state. The appointment
    /// ends up CONFIRMED and the authorizing admin is recorded.
    pub async fn verify(
        &self,
        payment_id: Uuid,
        user: &User,
        request: VerifyPaymentRequest,
    ) -> Result<Appointment, PaymentError> {
        let payment = self.payment(payment_id).await?;
        PaymentLifecycleService::validate_admin_verification(payment.status)?;

        let now = self.ctx.now();
        let completion = PaymentCompletion {
            allowed_from: ADMIN_VERIFIABLE.to_vec(),
            valid_at: None,
            appointment_from: vec![AppointmentStatus::Pending, AppointmentStatus::Paid],
            appointment_status: AppointmentStatus::Confirmed,
            method: PaymentMethod::AdminOverride,
            transaction_id: request
                .transaction_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("ADMIN-{}", now.timestamp_millis())),
            paid_at: now,
            metadata: Some(payment.metadata_with(json!({
                "verified_by": user.audit_name(),
                "notes": request.notes,
            }))),
        };

        let (payment, appointment) = self.ctx.store.complete_payment(payment_id, &completion).await?;

        info!(
            "Payment {} verified by {}, appointment {} confirmed",
            payment.id,
            user.audit_name(),
            appointment.id
        );
        Ok(appointment)
    }

    /// COMPLETED -> REFUNDED. The appointment is left as it is.
    pub async fn refund(&self, payment_id: Uuid, reason: &str) -> Result<Payment, PaymentError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PaymentError::ValidationError("Refund reason is required".to_string()));
        }

        let payment = self.payment(payment_id).await?;
        PaymentLifecycleService::validate_transition(payment.status, PaymentStatus::Refunded)
            .map_err(|_| PaymentError::InvalidState("Only completed payments can be refunded".to_string()))?;

        let mut transition = PaymentTransition::new(PaymentStatus::Completed, PaymentStatus::Refunded);
        transition.refunded_at = Some(self.ctx.now());
        transition.refund_reason = Some(reason.to_string());

        let refunded = self.ctx.store.transition_payment(payment_id, &transition).await?;

        info!("Payment {} refunded: {}", payment_id, reason);
        Ok(refunded)
    }

    pub async fn list_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.ctx.store.list_payments(appointment_id).await?)
    }

    /// Confirms a PENDING payment without the provider. Refused in production.
    pub async fn simulate(&self, payment_id: Uuid) -> Result<Appointment, PaymentError> {
        if self.ctx.config.is_production() {
            return Err(PaymentError::Forbidden(
                "Payment simulation is disabled in production".to_string(),
            ));
        }

        let payment = self.payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "Payment is already {}",
                payment.status
            )));
        }

        let now = self.ctx.now();
        let completion = PaymentCompletion {
            allowed_from: vec![PaymentStatus::Pending],
            valid_at: Some(now),
            appointment_from: vec![AppointmentStatus::Pending],
            appointment_status: AppointmentStatus::Paid,
            method: payment.method,
            transaction_id: format!("SIM-{}", now.timestamp_millis()),
            paid_at: now,
            metadata: Some(payment.metadata_with(json!({ "simulated": true }))),
        };

        let (_, appointment) = self.ctx.store.complete_payment(payment_id, &completion).await?;

        info!("Payment {} completed by simulation", payment_id);
        Ok(appointment)
    }
}

fn completed_outcome(completed: Option<Payment>) -> CallbackOutcome {
    match completed {
        Some(_) => CallbackOutcome::Completed,
        None => CallbackOutcome::StillPending,
    }
}

/// Our own invoice number, sent to the provider and echoed on callbacks.
fn sender_invoice_no() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("BK-{}", &id[..12])
}
