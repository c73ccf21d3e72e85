// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::services::AvailabilityService;
use patient_cell::PatientService;
use shared_database::StoreError;
use shared_models::appointment::{Appointment, AppointmentFilter, AppointmentStatus, NewAppointment, PageRequest};
use shared_models::auth::User;
use shared_models::time::parse_time_of_day;
use shared_utils::context::AppContext;
use shared_utils::time::{is_time_format, parse_date};

use crate::models::{
    AppointmentDetails, AppointmentError, AppointmentListQuery, AppointmentListResponse, CreateAppointmentRequest,
    Pagination,
};
use crate::services::lifecycle::{AppointmentLifecycleService, PATIENT_CANCELLABLE};

pub struct BookingService {
    ctx: Arc<AppContext>,
    availability: AvailabilityService,
    patients: PatientService,
}

impl BookingService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            availability: AvailabilityService::new(ctx.clone()),
            patients: PatientService::new(ctx.clone()),
            ctx,
        }
    }

    fn parse_slot(&self, request: &CreateAppointmentRequest) -> Result<(NaiveDate, NaiveTime), AppointmentError> {
        let date = parse_date(&request.date, self.ctx.config.clinic_utc_offset_hours)
            .ok_or_else(|| AppointmentError::ValidationError("Invalid date format".to_string()))?;

        let time = if is_time_format(request.time.trim()) {
            parse_time_of_day(&request.time)
        } else {
            None
        }
        .ok_or_else(|| AppointmentError::ValidationError("Invalid time format, expected HH:MM".to_string()))?;

        Ok((date, time))
    }

    /// Validates a booking against the doctor's schedule and existing
    /// bookings, then records it as PENDING. The first failing check wins.
    pub async fn create_appointment(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let (date, time) = self.parse_slot(&request)?;
        let patient = PatientService::normalize(&request.patient())?;
        let doctor_id = request.doctor_id;

        debug!("Booking request for doctor {} at {} {}", doctor_id, date, time);

        if date < self.ctx.today() {
            return Err(AppointmentError::PastDate);
        }

        self.availability.active_doctor(doctor_id).await?;

        let schedule = self
            .availability
            .working_schedule(doctor_id, date)
            .await?
            .ok_or(AppointmentError::NotWorkingDay)?;

        if !schedule.covers(&time) {
            return Err(AppointmentError::OutsideSchedule);
        }

        if !schedule.is_on_grid(&time) {
            return Err(AppointmentError::OffGrid);
        }

        // Fast rejection only; the store's uniqueness guard is what decides races.
        if self.ctx.store.occupied_times(doctor_id, date).await?.contains(&time) {
            return Err(AppointmentError::SlotTaken);
        }

        let local_now = self.ctx.local_now();
        if date == local_now.date() && time <= local_now.time() {
            return Err(AppointmentError::PastTime);
        }

        let patient = self.patients.upsert_by_phone(&patient).await?;

        let appointment = self
            .ctx
            .store
            .insert_appointment(&NewAppointment {
                patient_id: patient.id,
                doctor_id,
                service_id: request.service_id,
                date,
                time,
                status: AppointmentStatus::Pending,
                notes: request.notes.filter(|notes| !notes.trim().is_empty()),
            })
            .await
            .map_err(|e| {
                if matches!(e, StoreError::Conflict(_)) {
                    warn!("Lost booking race for doctor {} at {} {}", doctor_id, date, time);
                }
                AppointmentError::from(e)
            })?;

        info!(
            "Appointment {} booked: doctor {} at {} {} for patient {}",
            appointment.id, doctor_id, date, time, patient.id
        );
        Ok(appointment)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<AppointmentDetails, AppointmentError> {
        debug!("Fetching appointment {}", appointment_id);

        let appointment = self
            .ctx
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let patient = self.ctx.store.get_patient(appointment.patient_id).await?;
        let doctor = self.ctx.store.get_doctor(appointment.doctor_id).await?;

        Ok(AppointmentDetails {
            appointment,
            patient,
            doctor,
        })
    }

    /// Admin listing with optional date, doctor and status filters.
    pub async fn list_appointments(&self, query: AppointmentListQuery) -> Result<AppointmentListResponse, AppointmentError> {
        let page = query.page.unwrap_or(1);
        if page < 1 {
            return Err(AppointmentError::ValidationError("page must be at least 1".to_string()));
        }

        let limit = query.limit.unwrap_or(PageRequest::DEFAULT_LIMIT);
        if !(1..=PageRequest::MAX_LIMIT).contains(&limit) {
            return Err(AppointmentError::ValidationError(format!(
                "limit must be between 1 and {}",
                PageRequest::MAX_LIMIT
            )));
        }

        let date = match query.date.as_deref() {
            Some(raw) => Some(
                parse_date(raw, self.ctx.config.clinic_utc_offset_hours)
                    .ok_or_else(|| AppointmentError::ValidationError("Invalid date format".to_string()))?,
            ),
            None => None,
        };

        let filter = AppointmentFilter {
            date,
            doctor_id: query.doctor_id,
            patient_id: None,
            status: query.status,
        };
        let request = PageRequest { page, limit };

        let result = self.ctx.store.list_appointments(&filter, Some(request)).await?;
        debug!("Listed {} of {} appointments", result.appointments.len(), result.total);

        Ok(AppointmentListResponse {
            pagination: Pagination::new(request, result.total),
            appointments: result.appointments,
        })
    }

    /// Appointments of the signed-in patient. The token subject is the
    /// patient id.
    pub async fn patient_appointments(&self, user: &User) -> Result<Vec<Appointment>, AppointmentError> {
        let patient_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::Forbidden("Patient access required".to_string()))?;

        let result = self
            .ctx
            .store
            .list_appointments(&AppointmentFilter::for_patient(patient_id), None)
            .await?;

        Ok(result.appointments)
    }

    /// Patient cancellation. The row stays; only its status changes.
    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let current = self
            .ctx
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        if !PATIENT_CANCELLABLE.contains(&current.status) {
            return Err(AppointmentError::InvalidStatusTransition {
                from: current.status,
                to: AppointmentStatus::Cancelled,
            });
        }

        let cancelled = self
            .ctx
            .store
            .update_appointment_status(appointment_id, &PATIENT_CANCELLABLE, AppointmentStatus::Cancelled)
            .await?;

        info!("Appointment {} cancelled from {}", appointment_id, current.status);
        Ok(cancelled)
    }

    /// Admin status override, checked against the lifecycle table.
    pub async fn update_status(&self, appointment_id: Uuid, to: AppointmentStatus) -> Result<Appointment, AppointmentError> {
        let current = self
            .ctx
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        AppointmentLifecycleService::validate_status_transition(current.status, to)?;

        let updated = self
            .ctx
            .store
            .update_appointment_status(appointment_id, &[current.status], to)
            .await?;

        info!("Appointment {} moved {} -> {}", appointment_id, current.status, to);
        Ok(updated)
    }
}
