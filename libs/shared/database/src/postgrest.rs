// libs/shared/database/src/postgrest.rs
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::appointment::{
    Appointment, AppointmentFilter, AppointmentPage, AppointmentStatus, NewAppointment, PageRequest, Patient,
    PatientDetails,
};
use shared_models::payment::{NewPayment, Payment, PaymentCompletion, PaymentTransition};
use shared_models::scheduling::{DayOfWeek, Doctor, Schedule, ScheduleEntry, SchedulePlan};
use shared_models::time::{format_time_of_day, hhmm};

use crate::store::{ClinicStore, StoreError, StoreResult, PAYMENT_REFERENCE_KEY};
use crate::supabase::{SupabaseClient, SupabaseError};

const UNIQUE_VIOLATION: &str = "23505";
const RAISE_EXCEPTION: &str = "P0001";
const NO_DATA_FOUND: &str = "P0002";

const RETURN_ROWS: &str = "return=representation";
const UPSERT_ROWS: &str = "resolution=merge-duplicates,return=representation";

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match (err.sql_state(), err.status()) {
            (Some(UNIQUE_VIOLATION), _) | (_, Some(409)) => StoreError::Conflict(err.to_string()),
            (Some(NO_DATA_FOUND), _) => StoreError::NotFound(err.to_string()),
            (Some(RAISE_EXCEPTION), _) => StoreError::StaleState(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct TimeRow {
    #[serde(with = "hhmm")]
    time: NaiveTime,
}

#[derive(Deserialize)]
struct CompletionRow {
    payment: Payment,
    appointment: Appointment,
}

fn status_list(statuses: &[AppointmentStatus]) -> String {
    statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

fn appointment_filters(filter: &AppointmentFilter) -> Vec<String> {
    let mut query_parts = Vec::new();

    if let Some(date) = filter.date {
        query_parts.push(format!("date=eq.{}", date));
    }
    if let Some(doctor_id) = filter.doctor_id {
        query_parts.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(patient_id) = filter.patient_id {
        query_parts.push(format!("patient_id=eq.{}", patient_id));
    }
    if let Some(status) = filter.status {
        query_parts.push(format!("status=eq.{}", status));
    }

    query_parts
}

fn entry_json(doctor_id: Uuid, entry: &ScheduleEntry) -> Value {
    json!({
        "doctor_id": doctor_id,
        "day_of_week": entry.day_of_week,
        "start_time": format_time_of_day(&entry.start_time),
        "end_time": format_time_of_day(&entry.end_time),
        "slot_duration": entry.slot_duration,
        "is_active": true,
        "updated_at": Utc::now().to_rfc3339(),
    })
}

/// `ClinicStore` over Supabase's PostgREST API.
///
/// Uniqueness and multi-row atomicity live in the database
/// (see `supabase/migrations`); this type only maps rows and errors.
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub fn with_client(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    async fn fetch_one<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        let rows: Vec<T> = self.supabase.request(Method::GET, path, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn patch_one<T: DeserializeOwned>(&self, path: &str, body: Value) -> StoreResult<Option<T>> {
        let rows: Vec<T> = self
            .supabase
            .request_returning(Method::PATCH, path, body, RETURN_ROWS)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_one<T: DeserializeOwned>(&self, path: &str, body: Value, prefer: &'static str) -> StoreResult<T> {
        let rows: Vec<T> = self
            .supabase
            .request_returning(Method::POST, path, body, prefer)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Database(format!("insert into {} returned no rows", path)))
    }
}

#[async_trait]
impl ClinicStore for SupabaseStore {
    async fn get_doctor(&self, doctor_id: Uuid) -> StoreResult<Option<Doctor>> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&select=id,name,specialization,is_active",
            doctor_id
        );
        self.fetch_one(&path).await
    }

    async fn list_schedules(&self, doctor_id: Uuid) -> StoreResult<Vec<Schedule>> {
        let path = format!("/rest/v1/schedules?doctor_id=eq.{}", doctor_id);
        let mut schedules: Vec<Schedule> = self.supabase.request(Method::GET, &path, None).await?;
        schedules.sort_by_key(|s| s.day_of_week);
        Ok(schedules)
    }

    async fn get_active_schedule(&self, doctor_id: Uuid, day: DayOfWeek) -> StoreResult<Option<Schedule>> {
        let path = format!(
            "/rest/v1/schedules?doctor_id=eq.{}&day_of_week=eq.{}&is_active=eq.true&limit=1",
            doctor_id, day
        );
        self.fetch_one(&path).await
    }

    async fn upsert_schedule(&self, doctor_id: Uuid, entry: &ScheduleEntry) -> StoreResult<Schedule> {
        self.insert_one(
            "/rest/v1/schedules?on_conflict=doctor_id,day_of_week",
            entry_json(doctor_id, entry),
            UPSERT_ROWS,
        )
        .await
    }

    async fn apply_schedule_plan(&self, doctor_id: Uuid, plan: &SchedulePlan) -> StoreResult<Vec<Schedule>> {
        debug!(
            "Replacing schedules for doctor {}: {} upserts, {} deactivations",
            doctor_id,
            plan.upserts.len(),
            plan.deactivate.len()
        );

        let upserts: Vec<Value> = plan.upserts.iter().map(|e| entry_json(doctor_id, e)).collect();
        let mut schedules: Vec<Schedule> = self
            .supabase
            .rpc(
                "replace_doctor_schedules",
                json!({
                    "p_doctor_id": doctor_id,
                    "p_upserts": upserts,
                    "p_deactivate": plan.deactivate,
                }),
            )
            .await?;
        schedules.sort_by_key(|s| s.day_of_week);
        Ok(schedules)
    }

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> StoreResult<Schedule> {
        let path = format!("/rest/v1/schedules?id=eq.{}", schedule_id);
        self.patch_one(&path, json!({ "is_active": false, "updated_at": Utc::now().to_rfc3339() }))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", schedule_id)))
    }

    async fn occupied_times(&self, doctor_id: Uuid, date: NaiveDate) -> StoreResult<Vec<NaiveTime>> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=in.({})&select=time",
            doctor_id,
            date,
            status_list(&AppointmentStatus::OCCUPYING)
        );
        let rows: Vec<TimeRow> = self.supabase.request(Method::GET, &path, None).await?;
        Ok(rows.into_iter().map(|row| row.time).collect())
    }

    async fn upsert_patient(&self, details: &PatientDetails) -> StoreResult<Patient> {
        let mut body = serde_json::to_value(details)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        body["updated_at"] = json!(Utc::now().to_rfc3339());

        self.insert_one("/rest/v1/patients?on_conflict=phone", body, UPSERT_ROWS).await
    }

    async fn get_patient(&self, patient_id: Uuid) -> StoreResult<Option<Patient>> {
        self.fetch_one(&format!("/rest/v1/patients?id=eq.{}", patient_id)).await
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> StoreResult<Appointment> {
        let body = serde_json::to_value(appointment)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.insert_one("/rest/v1/appointments", body, RETURN_ROWS).await
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        self.fetch_one(&format!("/rest/v1/appointments?id=eq.{}", appointment_id)).await
    }

    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<AppointmentPage> {
        let filters = appointment_filters(filter);

        let mut query_parts = filters.clone();
        query_parts.push("order=date.desc,time.asc".to_string());
        if let Some(page) = page {
            query_parts.push(format!("limit={}", page.limit));
            query_parts.push(format!("offset={}", page.offset()));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let appointments: Vec<Appointment> = self.supabase.request(Method::GET, &path, None).await?;

        let total = match page {
            Some(_) => {
                let mut count_parts = vec!["select=id".to_string()];
                count_parts.extend(filters);
                self.supabase
                    .count(&format!("/rest/v1/appointments?{}", count_parts.join("&")))
                    .await?
            }
            None => appointments.len() as u64,
        };

        Ok(AppointmentPage { appointments, total })
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> StoreResult<Appointment> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=in.({})",
            appointment_id,
            status_list(from)
        );
        let body = json!({ "status": to, "updated_at": Utc::now().to_rfc3339() });

        if let Some(updated) = self.patch_one(&path, body).await? {
            return Ok(updated);
        }

        match self.get_appointment(appointment_id).await? {
            Some(current) => Err(StoreError::StaleState(format!(
                "appointment {} is {}",
                appointment_id, current.status
            ))),
            None => Err(StoreError::NotFound(format!("appointment {}", appointment_id))),
        }
    }

    async fn list_payments(&self, appointment_id: Uuid) -> StoreResult<Vec<Payment>> {
        let path = format!(
            "/rest/v1/payments?appointment_id=eq.{}&order=created_at.desc",
            appointment_id
        );
        Ok(self.supabase.request(Method::GET, &path, None).await?)
    }

    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment> {
        let body = serde_json::to_value(payment)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.insert_one("/rest/v1/payments", body, RETURN_ROWS).await
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        self.fetch_one(&format!("/rest/v1/payments?id=eq.{}", payment_id)).await
    }

    async fn find_payment_by_invoice(&self, invoice_id: &str) -> StoreResult<Option<Payment>> {
        let path = format!(
            "/rest/v1/payments?invoice_id=eq.{}&limit=1",
            urlencoding::encode(invoice_id)
        );
        self.fetch_one(&path).await
    }

    async fn find_payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>> {
        let path = format!(
            "/rest/v1/payments?metadata->>{}=eq.{}&limit=1",
            PAYMENT_REFERENCE_KEY,
            urlencoding::encode(reference)
        );
        self.fetch_one(&path).await
    }

    async fn transition_payment(&self, payment_id: Uuid, transition: &PaymentTransition) -> StoreResult<Payment> {
        let path = format!(
            "/rest/v1/payments?id=eq.{}&status=eq.{}",
            payment_id, transition.from
        );

        let mut body = json!({
            "status": transition.to,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if let Some(refunded_at) = transition.refunded_at {
            body["refunded_at"] = json!(refunded_at.to_rfc3339());
        }
        if let Some(reason) = &transition.refund_reason {
            body["refund_reason"] = json!(reason);
        }
        if let Some(metadata) = &transition.metadata {
            body["metadata"] = metadata.clone();
        }

        if let Some(updated) = self.patch_one(&path, body).await? {
            return Ok(updated);
        }

        match self.get_payment(payment_id).await? {
            Some(current) => {
                warn!(
                    "Payment {} transition {} -> {} lost: now {}",
                    payment_id, transition.from, transition.to, current.status
                );
                Err(StoreError::StaleState(format!(
                    "payment {} is {}",
                    payment_id, current.status
                )))
            }
            None => Err(StoreError::NotFound(format!("payment {}", payment_id))),
        }
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completion: &PaymentCompletion,
    ) -> StoreResult<(Payment, Appointment)> {
        let row: CompletionRow = self
            .supabase
            .rpc(
                "complete_booking_payment",
                json!({
                    "p_payment_id": payment_id,
                    "p_allowed_from": completion.allowed_from,
                    "p_valid_at": completion.valid_at.map(|t| t.to_rfc3339()),
                    "p_appointment_from": completion.appointment_from,
                    "p_appointment_status": completion.appointment_status,
                    "p_method": completion.method,
                    "p_transaction_id": completion.transaction_id,
                    "p_paid_at": completion.paid_at.to_rfc3339(),
                    "p_metadata": completion.metadata,
                }),
            )
            .await?;

        Ok((row.payment, row.appointment))
    }
}
