// libs/shared/database/src/memory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::appointment::{
    Appointment, AppointmentFilter, AppointmentPage, AppointmentStatus, NewAppointment, PageRequest, Patient,
    PatientDetails,
};
use shared_models::payment::{
    NewPayment, Payment, PaymentCompletion, PaymentStatus, PaymentTransition, PaymentType,
};
use shared_models::scheduling::{DayOfWeek, Doctor, Schedule, ScheduleEntry, SchedulePlan};

use crate::store::{ClinicStore, StoreError, StoreResult, PAYMENT_REFERENCE_KEY};

#[derive(Default)]
struct Tables {
    doctors: HashMap<Uuid, Doctor>,
    schedules: Vec<Schedule>,
    patients: Vec<Patient>,
    appointments: Vec<Appointment>,
    payments: Vec<Payment>,
}

impl Tables {
    fn upsert_schedule(&mut self, doctor_id: Uuid, entry: &ScheduleEntry) -> Schedule {
        let now = Utc::now();

        if let Some(existing) = self
            .schedules
            .iter_mut()
            .find(|s| s.doctor_id == doctor_id && s.day_of_week == entry.day_of_week)
        {
            existing.start_time = entry.start_time;
            existing.end_time = entry.end_time;
            existing.slot_duration = entry.slot_duration;
            existing.is_active = true;
            existing.updated_at = now;
            return existing.clone();
        }

        let schedule = Schedule {
            id: Uuid::new_v4(),
            doctor_id,
            day_of_week: entry.day_of_week,
            start_time: entry.start_time,
            end_time: entry.end_time,
            slot_duration: entry.slot_duration,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.schedules.push(schedule.clone());
        schedule
    }

    fn schedules_of(&self, doctor_id: Uuid) -> Vec<Schedule> {
        let mut rows: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|s| s.doctor_id == doctor_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.day_of_week);
        rows
    }

    fn slot_taken(&self, doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> bool {
        self.appointments.iter().any(|a| {
            a.doctor_id == doctor_id && a.date == date && a.time == time && a.status.occupies_slot()
        })
    }

    fn appointment_mut(&mut self, appointment_id: Uuid) -> StoreResult<&mut Appointment> {
        self.appointments
            .iter_mut()
            .find(|a| a.id == appointment_id)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {}", appointment_id)))
    }

    fn payment_index(&self, payment_id: Uuid) -> StoreResult<usize> {
        self.payments
            .iter()
            .position(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment_id)))
    }
}

/// Process-local `ClinicStore` with the same uniqueness and
/// compare-and-swap rules as the database schema. Every check-and-write
/// runs under a single write lock.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Doctors are managed outside the booking core; this seeds one.
    pub async fn insert_doctor(&self, doctor: Doctor) {
        self.tables.write().await.doctors.insert(doctor.id, doctor);
    }
}

#[async_trait]
impl ClinicStore for InMemoryStore {
    async fn get_doctor(&self, doctor_id: Uuid) -> StoreResult<Option<Doctor>> {
        Ok(self.tables.read().await.doctors.get(&doctor_id).cloned())
    }

    async fn list_schedules(&self, doctor_id: Uuid) -> StoreResult<Vec<Schedule>> {
        Ok(self.tables.read().await.schedules_of(doctor_id))
    }

    async fn get_active_schedule(&self, doctor_id: Uuid, day: DayOfWeek) -> StoreResult<Option<Schedule>> {
        let tables = self.tables.read().await;
        Ok(tables
            .schedules
            .iter()
            .find(|s| s.doctor_id == doctor_id && s.day_of_week == day && s.is_active)
            .cloned())
    }

    async fn upsert_schedule(&self, doctor_id: Uuid, entry: &ScheduleEntry) -> StoreResult<Schedule> {
        Ok(self.tables.write().await.upsert_schedule(doctor_id, entry))
    }

    async fn apply_schedule_plan(&self, doctor_id: Uuid, plan: &SchedulePlan) -> StoreResult<Vec<Schedule>> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        for schedule in tables
            .schedules
            .iter_mut()
            .filter(|s| s.doctor_id == doctor_id && plan.deactivate.contains(&s.day_of_week))
        {
            schedule.is_active = false;
            schedule.updated_at = now;
        }

        for entry in &plan.upserts {
            tables.upsert_schedule(doctor_id, entry);
        }

        Ok(tables.schedules_of(doctor_id))
    }

    async fn deactivate_schedule(&self, schedule_id: Uuid) -> StoreResult<Schedule> {
        let mut tables = self.tables.write().await;
        let schedule = tables
            .schedules
            .iter_mut()
            .find(|s| s.id == schedule_id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", schedule_id)))?;

        schedule.is_active = false;
        schedule.updated_at = Utc::now();
        Ok(schedule.clone())
    }

    async fn occupied_times(&self, doctor_id: Uuid, date: NaiveDate) -> StoreResult<Vec<NaiveTime>> {
        let tables = self.tables.read().await;
        Ok(tables
            .appointments
            .iter()
            .filter(|a| a.doctor_id == doctor_id && a.date == date && a.status.occupies_slot())
            .map(|a| a.time)
            .collect())
    }

    async fn upsert_patient(&self, details: &PatientDetails) -> StoreResult<Patient> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        if let Some(existing) = tables.patients.iter_mut().find(|p| p.phone == details.phone) {
            existing.name = details.name.clone();
            if details.email.is_some() {
                existing.email = details.email.clone();
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let patient = Patient {
            id: Uuid::new_v4(),
            name: details.name.clone(),
            phone: details.phone.clone(),
            email: details.email.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.patients.push(patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, patient_id: Uuid) -> StoreResult<Option<Patient>> {
        let tables = self.tables.read().await;
        Ok(tables.patients.iter().find(|p| p.id == patient_id).cloned())
    }

    async fn insert_appointment(&self, new: &NewAppointment) -> StoreResult<Appointment> {
        let mut tables = self.tables.write().await;

        if new.status.occupies_slot() && tables.slot_taken(new.doctor_id, new.date, new.time) {
            debug!("Slot {} {} already held for doctor {}", new.date, new.time, new.doctor_id);
            return Err(StoreError::Conflict(format!(
                "doctor {} is already booked at {} {}",
                new.doctor_id, new.date, new.time
            )));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            service_id: new.service_id,
            date: new.date,
            time: new.time,
            status: new.status,
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.appointments.push(appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> StoreResult<Option<Appointment>> {
        let tables = self.tables.read().await;
        Ok(tables.appointments.iter().find(|a| a.id == appointment_id).cloned())
    }

    async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<AppointmentPage> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Appointment> = tables
            .appointments
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(a.time.cmp(&b.time)));

        let total = rows.len() as u64;
        if let Some(page) = page {
            rows = rows
                .into_iter()
                .skip(page.offset() as usize)
                .take(page.limit as usize)
                .collect();
        }

        Ok(AppointmentPage {
            appointments: rows,
            total,
        })
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        from: &[AppointmentStatus],
        to: AppointmentStatus,
    ) -> StoreResult<Appointment> {
        let mut tables = self.tables.write().await;
        let appointment = tables.appointment_mut(appointment_id)?;

        if !from.contains(&appointment.status) {
            return Err(StoreError::StaleState(format!(
                "appointment {} is {}",
                appointment_id, appointment.status
            )));
        }

        appointment.status = to;
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    async fn list_payments(&self, appointment_id: Uuid) -> StoreResult<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .rev()
            .filter(|p| p.appointment_id == appointment_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&self, new: &NewPayment) -> StoreResult<Payment> {
        let mut tables = self.tables.write().await;

        let guarded = new.status == PaymentStatus::Pending && new.payment_type == PaymentType::BookingFee;
        if guarded
            && tables.payments.iter().any(|p| {
                p.appointment_id == new.appointment_id
                    && p.status == PaymentStatus::Pending
                    && p.payment_type == PaymentType::BookingFee
            })
        {
            return Err(StoreError::Conflict(format!(
                "appointment {} already has a pending booking fee",
                new.appointment_id
            )));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            appointment_id: new.appointment_id,
            amount: new.amount,
            payment_type: new.payment_type,
            status: new.status,
            method: new.method,
            qr_code: new.qr_code.clone(),
            qr_url: new.qr_url.clone(),
            invoice_id: new.invoice_id.clone(),
            transaction_id: None,
            paid_at: None,
            expires_at: new.expires_at,
            refunded_at: None,
            refund_reason: None,
            metadata: new.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.payments.push(payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn find_payment_by_invoice(&self, invoice_id: &str) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.invoice_id.as_deref() == Some(invoice_id))
            .cloned())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> StoreResult<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.metadata_str(PAYMENT_REFERENCE_KEY) == Some(reference))
            .cloned())
    }

    async fn transition_payment(&self, payment_id: Uuid, transition: &PaymentTransition) -> StoreResult<Payment> {
        let mut tables = self.tables.write().await;
        let index = tables.payment_index(payment_id)?;
        let payment = &mut tables.payments[index];

        if payment.status != transition.from {
            return Err(StoreError::StaleState(format!(
                "payment {} is {}",
                payment_id, payment.status
            )));
        }

        payment.status = transition.to;
        if transition.refunded_at.is_some() {
            payment.refunded_at = transition.refunded_at;
        }
        if transition.refund_reason.is_some() {
            payment.refund_reason = transition.refund_reason.clone();
        }
        if transition.metadata.is_some() {
            payment.metadata = transition.metadata.clone();
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn complete_payment(
        &self,
        payment_id: Uuid,
        completion: &PaymentCompletion,
    ) -> StoreResult<(Payment, Appointment)> {
        let mut tables = self.tables.write().await;
        let index = tables.payment_index(payment_id)?;

        // Both preconditions are checked before either row is written.
        let payment = &tables.payments[index];
        if !completion.allowed_from.contains(&payment.status) {
            return Err(StoreError::StaleState(format!(
                "payment {} is {}",
                payment_id, payment.status
            )));
        }
        if let Some(valid_at) = completion.valid_at {
            if payment.is_expired_at(valid_at) {
                return Err(StoreError::StaleState(format!("payment {} has expired", payment_id)));
            }
        }

        let appointment_id = payment.appointment_id;
        let appointment = tables.appointment_mut(appointment_id)?;
        if !completion.appointment_from.contains(&appointment.status) {
            return Err(StoreError::StaleState(format!(
                "appointment {} is {}",
                appointment_id, appointment.status
            )));
        }

        let now = Utc::now();
        appointment.status = completion.appointment_status;
        appointment.updated_at = now;
        let appointment = appointment.clone();

        let payment = &mut tables.payments[index];
        payment.status = PaymentStatus::Completed;
        payment.method = completion.method;
        payment.transaction_id = Some(completion.transaction_id.clone());
        payment.paid_at = Some(completion.paid_at);
        if completion.metadata.is_some() {
            payment.metadata = completion.metadata.clone();
        }
        payment.updated_at = now;

        Ok((payment.clone(), appointment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::json;
    use shared_models::payment::PaymentMethod;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn new_appointment(doctor_id: Uuid, time: NaiveTime) -> NewAppointment {
        NewAppointment {
            patient_id: Uuid::new_v4(),
            doctor_id,
            service_id: None,
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            time,
            status: AppointmentStatus::Pending,
            notes: None,
        }
    }

    fn pending_fee(appointment_id: Uuid) -> NewPayment {
        NewPayment {
            appointment_id,
            amount: 25_000,
            payment_type: PaymentType::BookingFee,
            status: PaymentStatus::Pending,
            method: PaymentMethod::Qpay,
            qr_code: None,
            qr_url: None,
            invoice_id: Some(format!("inv-{}", appointment_id)),
            expires_at: Some(Utc::now() + Duration::minutes(15)),
            metadata: Some(json!({ PAYMENT_REFERENCE_KEY: "BK-1" })),
        }
    }

    fn completion() -> PaymentCompletion {
        PaymentCompletion {
            allowed_from: vec![PaymentStatus::Pending],
            valid_at: None,
            appointment_from: vec![AppointmentStatus::Pending],
            appointment_status: AppointmentStatus::Paid,
            method: PaymentMethod::Qpay,
            transaction_id: "tx-1".to_string(),
            paid_at: Utc::now(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn occupied_slot_rejects_second_insert_until_cancelled() {
        let store = InMemoryStore::new();
        let doctor_id = Uuid::new_v4();

        let first = store.insert_appointment(&new_appointment(doctor_id, at(9, 0))).await.unwrap();
        assert_matches!(
            store.insert_appointment(&new_appointment(doctor_id, at(9, 0))).await,
            Err(StoreError::Conflict(_))
        );

        store
            .update_appointment_status(first.id, &[AppointmentStatus::Pending], AppointmentStatus::Cancelled)
            .await
            .unwrap();
        assert!(store.insert_appointment(&new_appointment(doctor_id, at(9, 0))).await.is_ok());
    }

    #[tokio::test]
    async fn listing_orders_filters_and_pages() {
        let store = InMemoryStore::new();
        let doctor_id = Uuid::new_v4();
        let mut later = new_appointment(doctor_id, at(9, 0));
        later.date = later.date + Duration::days(7);
        store.insert_appointment(&later).await.unwrap();
        let ten = store.insert_appointment(&new_appointment(doctor_id, at(10, 0))).await.unwrap();
        let nine = store.insert_appointment(&new_appointment(doctor_id, at(9, 0))).await.unwrap();
        store.insert_appointment(&new_appointment(Uuid::new_v4(), at(9, 0))).await.unwrap();

        let filter = AppointmentFilter {
            doctor_id: Some(doctor_id),
            ..AppointmentFilter::default()
        };
        let all = store.list_appointments(&filter, None).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.appointments[0].date, later.date);
        assert_eq!(all.appointments[1].id, nine.id);
        assert_eq!(all.appointments[2].id, ten.id);

        let second_page = store
            .list_appointments(&filter, Some(PageRequest { page: 2, limit: 2 }))
            .await
            .unwrap();
        assert_eq!(second_page.total, 3);
        assert_eq!(second_page.appointments.len(), 1);
        assert_eq!(second_page.appointments[0].id, ten.id);

        let mine = store
            .list_appointments(&AppointmentFilter::for_patient(nine.patient_id), None)
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.appointments[0].id, nine.id);
    }

    #[tokio::test]
    async fn status_swap_reports_stale_state() {
        let store = InMemoryStore::new();
        let appointment = store
            .insert_appointment(&new_appointment(Uuid::new_v4(), at(10, 0)))
            .await
            .unwrap();

        assert_matches!(
            store
                .update_appointment_status(appointment.id, &[AppointmentStatus::Paid], AppointmentStatus::Confirmed)
                .await,
            Err(StoreError::StaleState(_))
        );
        assert_matches!(
            store
                .update_appointment_status(Uuid::new_v4(), &[AppointmentStatus::Pending], AppointmentStatus::Cancelled)
                .await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn only_one_pending_booking_fee_per_appointment() {
        let store = InMemoryStore::new();
        let appointment_id = Uuid::new_v4();

        let first = store.insert_payment(&pending_fee(appointment_id)).await.unwrap();
        assert_matches!(
            store.insert_payment(&pending_fee(appointment_id)).await,
            Err(StoreError::Conflict(_))
        );

        store
            .transition_payment(first.id, &PaymentTransition::new(PaymentStatus::Pending, PaymentStatus::Expired))
            .await
            .unwrap();
        let second = store.insert_payment(&pending_fee(appointment_id)).await.unwrap();

        let listed = store.list_payments(appointment_id).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn completion_writes_nothing_when_appointment_moved_on() {
        let store = InMemoryStore::new();
        let appointment = store
            .insert_appointment(&new_appointment(Uuid::new_v4(), at(11, 0)))
            .await
            .unwrap();
        let payment = store.insert_payment(&pending_fee(appointment.id)).await.unwrap();

        store
            .update_appointment_status(appointment.id, &[AppointmentStatus::Pending], AppointmentStatus::Cancelled)
            .await
            .unwrap();

        assert_matches!(
            store.complete_payment(payment.id, &completion()).await,
            Err(StoreError::StaleState(_))
        );
        let payment = store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.transaction_id.is_none());
    }

    #[tokio::test]
    async fn completion_moves_both_rows() {
        let store = InMemoryStore::new();
        let appointment = store
            .insert_appointment(&new_appointment(Uuid::new_v4(), at(11, 30)))
            .await
            .unwrap();
        let payment = store.insert_payment(&pending_fee(appointment.id)).await.unwrap();

        let (payment, appointment) = store.complete_payment(payment.id, &completion()).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(appointment.status, AppointmentStatus::Paid);

        let found = store.find_payment_by_reference("BK-1").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
    }

    #[tokio::test]
    async fn schedule_plan_keeps_one_row_per_weekday() {
        let store = InMemoryStore::new();
        let doctor_id = Uuid::new_v4();
        let entry = |day, start: NaiveTime| ScheduleEntry {
            day_of_week: day,
            start_time: start,
            end_time: at(17, 0),
            slot_duration: 30,
        };

        store.upsert_schedule(doctor_id, &entry(DayOfWeek::Friday, at(9, 0))).await.unwrap();
        store.upsert_schedule(doctor_id, &entry(DayOfWeek::Monday, at(9, 0))).await.unwrap();

        let plan = SchedulePlan {
            upserts: vec![entry(DayOfWeek::Monday, at(10, 0))],
            deactivate: vec![DayOfWeek::Friday],
        };
        let rows = store.apply_schedule_plan(doctor_id, &plan).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].day_of_week, DayOfWeek::Monday);
        assert_eq!(rows[0].start_time, at(10, 0));
        assert!(!rows[1].is_active);
        assert!(store
            .get_active_schedule(doctor_id, DayOfWeek::Friday)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn patient_upsert_keeps_email_when_absent() {
        let store = InMemoryStore::new();
        let first = store
            .upsert_patient(&PatientDetails {
                name: "Bat".to_string(),
                phone: "99112233".to_string(),
                email: Some("bat@example.mn".to_string()),
            })
            .await
            .unwrap();
        let second = store
            .upsert_patient(&PatientDetails {
                name: "Bat-Erdene".to_string(),
                phone: "99112233".to_string(),
                email: None,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Bat-Erdene");
        assert_eq!(second.email.as_deref(), Some("bat@example.mn"));
    }
}
