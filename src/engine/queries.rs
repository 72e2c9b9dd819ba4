use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;
use crate::notify::Change;
use crate::store::SalonStore;

use super::{compute_available_slots, timed, Engine, EngineError};

impl<S: SalonStore> Engine<S> {
    /// Candidate slots for `service` with `professional` on `date`, each
    /// marked free or taken.
    pub async fn available_slots(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        timed("available_slots", async {
            let professional = self.load_professional(salon_id, professional_id).await?;
            let service = self.load_service(salon_id, service_id).await?;
            let midnight = day_start(date);
            let day = Span::new(midnight, midnight + DAY_MS);
            let existing = self
                .store
                .list_appointments(salon_id, professional_id, day, OCCUPYING)
                .await?;
            compute_available_slots(
                professional_id,
                service.duration_minutes as i64,
                date,
                &existing,
                professional.work_window,
                self.granularity_minutes,
            )
        })
        .await
    }

    pub async fn get_request(&self, salon_id: Ulid, id: Ulid) -> Result<BookingRequest, EngineError> {
        self.load_request(salon_id, id).await
    }

    pub async fn get_appointment(&self, salon_id: Ulid, id: Ulid) -> Result<Appointment, EngineError> {
        self.load_appointment(salon_id, id).await
    }

    /// Appointments of one professional overlapping `range`, in start order.
    /// An empty `statuses` means every status.
    pub async fn list_appointments(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        range: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError> {
        const ALL: &[AppointmentStatus] = &[
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Canceled,
            AppointmentStatus::Completed,
        ];
        let statuses = if statuses.is_empty() { ALL } else { statuses };
        self.store
            .list_appointments(salon_id, professional_id, range, statuses)
            .await
    }

    /// The ledger row of one professional and month; `None` until the first
    /// recompute for that month.
    pub async fn get_commission(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        month: u32,
        year: i32,
    ) -> Result<Option<MonthlyCommission>, EngineError> {
        let period = MonthKey::new(year, month)
            .ok_or_else(|| EngineError::validation(format!("invalid month: {year}-{month}")))?;
        self.store.get_commission(salon_id, professional_id, period).await
    }

    pub async fn get_commission_by_id(&self, salon_id: Ulid, id: Ulid) -> Result<MonthlyCommission, EngineError> {
        self.store
            .get_commission_by_id(salon_id, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_payments(&self, salon_id: Ulid, commission_id: Ulid) -> Result<Vec<CommissionPayment>, EngineError> {
        self.store.list_payments(salon_id, commission_id).await
    }

    /// Committed changes of one salon, as they happen.
    pub fn subscribe(&self, salon_id: Ulid) -> broadcast::Receiver<Change> {
        self.notify.subscribe(salon_id)
    }
}
