use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::ChangeKind;
use crate::store::{AppointmentUpdate, SalonStore};

use super::conflict::{
    check_no_conflict, check_within_hours, optional_text, validate_client, validate_span, validate_timestamp,
};
use super::{timed, Engine, EngineError};

/// Direct staff booking, bypassing the request flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub client: ClientRef,
    pub notes: Option<String>,
    /// `Confirmed` or `Pending`.
    pub status: AppointmentStatus,
    pub created_by: Ulid,
}

/// A completed appointment and the ledger row it now counts toward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub appointment: Appointment,
    pub commission: MonthlyCommission,
}

impl<S: SalonStore> Engine<S> {
    pub async fn create_appointment(&self, input: NewAppointment) -> Result<Appointment, EngineError> {
        timed("create_appointment", async {
            if !input.status.occupies() {
                return Err(EngineError::validation(format!(
                    "new appointments must be pending or confirmed, got {}",
                    input.status
                )));
            }
            if let ClientRef::Guest(info) = &input.client {
                validate_client(info)?;
            }
            optional_text(input.notes.as_deref(), MAX_NOTES_LEN)?;
            validate_timestamp(input.start)?;
            let now = self.now();
            if input.start - now > MAX_BOOKING_HORIZON_MS {
                return Err(EngineError::LimitExceeded("appointment start too far ahead"));
            }

            let professional = self.load_professional(input.salon_id, input.professional_id).await?;
            let service = self.load_service(input.salon_id, input.service_id).await?;
            let span = Span::new(input.start, input.start + service.duration_ms());
            validate_span(&span)?;
            check_within_hours(&professional.work_window, &span)?;

            let lock = self.schedule_lock(ScheduleKey::new(input.salon_id, input.professional_id));
            let _guard = lock.lock().await;

            let existing = self
                .store
                .list_appointments(input.salon_id, input.professional_id, span, OCCUPYING)
                .await?;
            if let Err(e) = check_no_conflict(&existing, &span) {
                warn!(professional = %input.professional_id, error = %e, "direct booking refused, slot taken");
                return Err(e);
            }

            let appointment = self
                .store
                .create_appointment(Appointment {
                    id: Ulid::new(),
                    salon_id: input.salon_id,
                    professional_id: input.professional_id,
                    service_id: input.service_id,
                    client: input.client,
                    span,
                    status: input.status,
                    cancellation_reason: None,
                    completed_at: None,
                    price: service.price,
                    notes: input.notes,
                    created_at: now,
                    request_id: None,
                    commission_id: None,
                })
                .await?;

            info!(appointment = %appointment.id, by = %input.created_by, status = %appointment.status, "appointment booked");
            self.notify.send(appointment.salon_id, appointment.id, ChangeKind::AppointmentCreated);
            Ok(appointment)
        })
        .await
    }

    /// Mark the appointment done and fold it into its professional's ledger
    /// for the month of completion.
    ///
    /// The completion and the ledger row are committed together; if the
    /// ledger row cannot be built or written the appointment keeps its
    /// status.
    pub async fn complete_appointment(&self, salon_id: Ulid, appointment_id: Ulid) -> Result<Completion, EngineError> {
        timed("complete_appointment", async {
            let appointment = self.load_appointment(salon_id, appointment_id).await?;
            let lock = self.schedule_lock(ScheduleKey::new(salon_id, appointment.professional_id));
            let _guard = lock.lock().await;

            let appointment = self.load_appointment(salon_id, appointment_id).await?;
            if appointment.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    entity: appointment_id,
                    from: appointment.status.as_str(),
                    to: AppointmentStatus::Completed.as_str(),
                });
            }
            let now = self.now();
            let period = MonthKey::containing(now).ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
            let key = CommissionKey {
                salon_id,
                professional_id: appointment.professional_id,
                period,
            };

            let ledger = self.ledger_lock(key);
            let _ledger_guard = ledger.lock().await;

            let mut completing = appointment;
            completing.status = AppointmentStatus::Completed;
            completing.completed_at = Some(now);
            let committed = match self.tally(key, Some(&completing)).await {
                Ok((commission, contributing)) => {
                    let update = AppointmentUpdate::completed(now);
                    self.store
                        .commit_completion(salon_id, appointment_id, update, commission, contributing)
                        .await
                }
                Err(e) => Err(e),
            };
            let (appointment, commission) = match committed {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(appointment = %appointment_id, period = %period, error = %e, "completion refused");
                    return Err(e);
                }
            };

            info!(appointment = %appointment_id, period = %period, "appointment completed");
            self.notify.send(salon_id, appointment_id, ChangeKind::AppointmentCompleted);
            self.ledger_written(key, &commission);
            Ok(Completion { appointment, commission })
        })
        .await
    }

    /// Cancel a pending or confirmed appointment. Frees the slot; the ledger
    /// is untouched.
    pub async fn cancel_appointment(
        &self,
        salon_id: Ulid,
        appointment_id: Ulid,
        actor: Ulid,
        reason: &str,
    ) -> Result<Appointment, EngineError> {
        timed("cancel_appointment", async {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(EngineError::validation("cancellation reason is required"));
            }
            if reason.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("cancellation reason too long"));
            }

            let appointment = self.load_appointment(salon_id, appointment_id).await?;
            let lock = self.schedule_lock(ScheduleKey::new(salon_id, appointment.professional_id));
            let _guard = lock.lock().await;

            let appointment = self.load_appointment(salon_id, appointment_id).await?;
            if appointment.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    entity: appointment_id,
                    from: appointment.status.as_str(),
                    to: AppointmentStatus::Canceled.as_str(),
                });
            }
            let appointment = self
                .store
                .update_appointment(salon_id, appointment_id, AppointmentUpdate::canceled(reason.to_string()))
                .await?;

            info!(appointment = %appointment_id, by = %actor, "appointment canceled");
            self.notify.send(salon_id, appointment_id, ChangeKind::AppointmentCanceled);
            Ok(appointment)
        })
        .await
    }
}
