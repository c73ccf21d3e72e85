//! Persistence seam for the booking core.
//!
//! Every method that both checks and writes (`insert_appointment`,
//! `insert_payment`, `update_appointment_status`, `transition_payment`,
//! `complete_payment`, `apply_schedule_plan`) must do so as one atomic unit
//! in the backing store. Callers never hold locks across calls.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use shared_models::appointment::{
    Appointment, AppointmentFilter, AppointmentPage, AppointmentStatus, NewAppointment, PageRequest, Patient,
    PatientDetails,
};
use shared_models::payment::{NewPayment, Payment, PaymentCompletion, PaymentTransition};
use shared_models::scheduling::{DayOfWeek, Doctor, Schedule, ScheduleEntry, SchedulePlan};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A uniqueness guard rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A compare-and-swap precondition no longer holds.
    #[error("Stale state: {0}")]
    StaleState(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ClinicStore: Send + Sync {
    async fn get_doctor(&self, doctor_id: Uuid) -> StoreResult<Option<Doctor>>;

    /// All schedule rows of a doctor, active or not, Monday first.
    async fn list_schedules(&self, doctor_id: Uuid) -> StoreResult<Vec<Schedule>>;

    async fn get_active_schedule(
        &self,
        doctor_id: Uuid,
        day: DayOfWeek,
    ) -> StoreResult<Option<Schedule>>;

    /// Creates or overwrites the `(doctor, weekday)` row and activates it.
    async fn upsert_schedule(&self, doctor_id: Uuid, entry: &ScheduleEntry) -> StoreResult<Schedule>;

    /// Applies a replacement plan in one transaction and returns every row
    /// of the doctor afterwards.
    async fn apply_schedule_plan(
        &self,
        doctor_id: Uuid,
        plan: &SchedulePlan,
    ) -> StoreResult<Vec<Schedule>>;

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> StoreResult<Schedule>;

    /// Start times on `date` held by an appointment in an occupying status.
    async fn occupied_times(&self, doctor_id: Uuid, date: NaiveDate) -> StoreResult<Vec<NaiveTime>>;

    /// Finds the patient by phone and refreshes name/email, or creates one.
    /// A missing email never clears a stored one.
    async fn upsert_patient(&self, details: &PatientDetails) -> StoreResult<Patient>;

    async fn get_patient(&self, patient_id: Uuid) -> StoreResult<Option<Patient>>;

    /// Fails with `Conflict` when the slot is already held by an occupying
    /// appointment.
    async fn insert_appointment(&self, appointment: &NewAppointment) -> StoreResult<Appointment>;

    async fn get_appointment(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>>;

    /// Matching appointments, newest date first and earliest time first
    /// within a date. Without a page every match is returned.
    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<AppointmentPage>;

    /// Moves the appointment to `to` only if its status is one of `from`.
    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> StoreResult<Appointment>;

    /// Payments of an appointment, newest first.
    async fn list_payments(&self, appointment_id: Uuid) -> StoreResult<Vec<Payment>>;

    /// Fails with `Conflict` when the appointment already has a PENDING
    /// booking-fee payment.
    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment>;

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn find_payment_by_invoice(&self, invoice_id: &str) -> StoreResult<Option<Payment>>;

    /// Lookup by the locally generated sender invoice number kept in metadata.
    async fn find_payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>>;

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        transition: &PaymentTransition,
    ) -> StoreResult<Payment>;

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completion: &PaymentCompletion,
    ) -> StoreResult<(Payment, Appointment)>;
}

/// Metadata key holding the sender invoice number sent to the provider.
pub const PAYMENT_REFERENCE_KEY: &str = "sender_invoice_no";
