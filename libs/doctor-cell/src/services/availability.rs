use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;
use uuid::Uuid;

use shared_models::scheduling::{DayOfWeek, Doctor, Schedule};
use shared_utils::context::AppContext;

use crate::models::{DoctorSlots, ScheduleError, TimeSlot, NOT_WORKING_DAY};

/// Turns a schedule into slots, marking occupied ones and, when `cutoff` is
/// set, every slot starting at or before it.
pub fn build_slots(schedule: &Schedule, occupied: &HashSet<NaiveTime>, cutoff: Option<NaiveTime>) -> Vec<TimeSlot> {
    schedule
        .slot_times()
        .into_iter()
        .map(|time| {
            let elapsed = cutoff.map(|now| time <= now).unwrap_or(false);
            TimeSlot {
                time,
                available: !occupied.contains(&time) && !elapsed,
            }
        })
        .collect()
}

pub struct AvailabilityService {
    ctx: Arc<AppContext>,
}

impl AvailabilityService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Doctor that can take bookings; inactive doctors are reported as missing.
    pub async fn active_doctor(&self, doctor_id: Uuid) -> Result<Doctor, ScheduleError> {
        match self.ctx.store.get_doctor(doctor_id).await? {
            Some(doctor) if doctor.is_active => Ok(doctor),
            _ => Err(ScheduleError::DoctorNotFound),
        }
    }

    pub async fn working_schedule(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Option<Schedule>, ScheduleError> {
        let day = DayOfWeek::from_date(date);
        Ok(self.ctx.store.get_active_schedule(doctor_id, day).await?)
    }

    pub fn ensure_not_past(&self, date: NaiveDate) -> Result<(), ScheduleError> {
        if date < self.ctx.today() {
            return Err(ScheduleError::Validation("Cannot select a past date".to_string()));
        }
        Ok(())
    }

    pub async fn get_available_slots(&self, doctor_id: Uuid, date: NaiveDate) -> Result<DoctorSlots, ScheduleError> {
        debug!("Fetching slots for doctor {} on {}", doctor_id, date);

        self.ensure_not_past(date)?;
        self.active_doctor(doctor_id).await?;

        let Some(schedule) = self.working_schedule(doctor_id, date).await? else {
            debug!("Doctor {} has no active schedule on {}", doctor_id, DayOfWeek::from_date(date));
            return Ok(DoctorSlots {
                date,
                doctor_id,
                slots: Vec::new(),
                message: Some(NOT_WORKING_DAY.to_string()),
            });
        };

        let occupied: HashSet<NaiveTime> = self
            .ctx
            .store
            .occupied_times(doctor_id, date)
            .await?
            .into_iter()
            .collect();

        let local_now = self.ctx.local_now();
        let cutoff = (date == local_now.date()).then(|| local_now.time());

        let slots = build_slots(&schedule, &occupied, cutoff);
        debug!(
            "Doctor {} on {}: {} slots, {} occupied",
            doctor_id,
            date,
            slots.len(),
            occupied.len()
        );

        Ok(DoctorSlots {
            date,
            doctor_id,
            slots,
            message: None,
        })
    }
}
