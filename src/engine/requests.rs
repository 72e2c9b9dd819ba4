use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::ChangeKind;
use crate::store::{RequestDecision, SalonStore};

use super::conflict::{
    check_no_conflict, check_within_hours, optional_text, validate_client, validate_span, validate_timestamp,
};
use super::{timed, Engine, EngineError};

/// A client's ask for a time slot, before staff review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookingRequest {
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub requested_start: Ms,
    pub client: ClientInfo,
    pub notes: Option<String>,
}

/// Result of approving a request: both rows committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub request: BookingRequest,
    pub appointment: Appointment,
}

impl<S: SalonStore> Engine<S> {
    /// Record a pending request. The slot must be in the future, inside the
    /// professional's hours and free at submission time; approval checks the
    /// slot again.
    pub async fn submit_request(&self, input: NewBookingRequest) -> Result<BookingRequest, EngineError> {
        timed("submit_request", async {
            validate_client(&input.client)?;
            optional_text(input.notes.as_deref(), MAX_NOTES_LEN)?;
            validate_timestamp(input.requested_start)?;

            let now = self.now();
            if input.requested_start <= now {
                return Err(EngineError::validation("requested start must be in the future"));
            }
            if input.requested_start - now > MAX_BOOKING_HORIZON_MS {
                return Err(EngineError::LimitExceeded("requested start too far ahead"));
            }

            let professional = self.load_professional(input.salon_id, input.professional_id).await?;
            let service = self.load_service(input.salon_id, input.service_id).await?;
            let span = Span::new(input.requested_start, input.requested_start + service.duration_ms());
            validate_span(&span)?;
            check_within_hours(&professional.work_window, &span)?;

            let key = ScheduleKey::new(input.salon_id, input.professional_id);
            let lock = self.schedule_lock(key);
            let _guard = lock.lock().await;

            let existing = self
                .store
                .list_appointments(input.salon_id, input.professional_id, span, OCCUPYING)
                .await?;
            check_no_conflict(&existing, &span)?;

            let request = self
                .store
                .create_request(BookingRequest {
                    id: Ulid::new(),
                    salon_id: input.salon_id,
                    professional_id: input.professional_id,
                    service_id: input.service_id,
                    requested_start: input.requested_start,
                    client: input.client,
                    notes: input.notes,
                    status: RequestStatus::Pending,
                    rejection_reason: None,
                    created_at: now,
                    decided_by: None,
                    decided_at: None,
                    appointment_id: None,
                })
                .await?;

            info!(request = %request.id, professional = %request.professional_id, start = request.requested_start, "booking request submitted");
            self.notify.send(request.salon_id, request.id, ChangeKind::RequestSubmitted);
            Ok(request)
        })
        .await
    }

    /// Turn a pending request into a confirmed appointment.
    ///
    /// The overlap check and the commit run under the professional's schedule
    /// lock, so of two approvals for overlapping times exactly one wins; the
    /// other gets `SlotConflict` and its request stays pending.
    pub async fn approve_request(
        &self,
        salon_id: Ulid,
        request_id: Ulid,
        decided_by: Ulid,
    ) -> Result<Approval, EngineError> {
        timed("approve_request", async {
            let request = self.load_request(salon_id, request_id).await?;
            let lock = self.schedule_lock(ScheduleKey::new(salon_id, request.professional_id));
            let _guard = lock.lock().await;

            let request = self.load_request(salon_id, request_id).await?;
            if request.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    entity: request_id,
                    from: request.status.as_str(),
                    to: RequestStatus::Approved.as_str(),
                });
            }

            let service = self.load_service(salon_id, request.service_id).await?;
            let span = Span::new(request.requested_start, request.requested_start + service.duration_ms());
            let existing = self
                .store
                .list_appointments(salon_id, request.professional_id, span, OCCUPYING)
                .await?;
            if let Err(e) = check_no_conflict(&existing, &span) {
                warn!(request = %request_id, error = %e, "approval refused, slot taken");
                return Err(e);
            }

            let now = self.now();
            let appointment = Appointment {
                id: Ulid::new(),
                salon_id,
                professional_id: request.professional_id,
                service_id: request.service_id,
                client: ClientRef::Guest(request.client.clone()),
                span,
                status: AppointmentStatus::Confirmed,
                cancellation_reason: None,
                completed_at: None,
                price: service.price,
                notes: request.notes.clone(),
                created_at: now,
                request_id: Some(request_id),
                commission_id: None,
            };
            let decision = RequestDecision {
                status: RequestStatus::Approved,
                decided_by,
                decided_at: now,
                rejection_reason: None,
            };
            let (request, appointment) = self
                .store
                .commit_approval(salon_id, request_id, decision, appointment)
                .await?;

            info!(request = %request.id, appointment = %appointment.id, by = %decided_by, "booking request approved");
            self.notify.send(salon_id, request.id, ChangeKind::RequestApproved);
            self.notify.send(salon_id, appointment.id, ChangeKind::AppointmentCreated);
            Ok(Approval { request, appointment })
        })
        .await
    }

    /// Decline a pending request. A reason is mandatory.
    pub async fn reject_request(
        &self,
        salon_id: Ulid,
        request_id: Ulid,
        decided_by: Ulid,
        reason: &str,
    ) -> Result<BookingRequest, EngineError> {
        timed("reject_request", async {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(EngineError::validation("rejection reason is required"));
            }
            if reason.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("rejection reason too long"));
            }
            let decision = RequestDecision {
                status: RequestStatus::Rejected,
                decided_by,
                decided_at: self.now(),
                rejection_reason: Some(reason.to_string()),
            };
            let request = self.decide_request(salon_id, request_id, decision).await?;
            info!(request = %request.id, by = %decided_by, "booking request rejected");
            self.notify.send(salon_id, request.id, ChangeKind::RequestRejected);
            Ok(request)
        })
        .await
    }

    /// Withdraw a pending request, by the client or by staff.
    pub async fn cancel_request(
        &self,
        salon_id: Ulid,
        request_id: Ulid,
        actor: Ulid,
    ) -> Result<BookingRequest, EngineError> {
        timed("cancel_request", async {
            let decision = RequestDecision {
                status: RequestStatus::Canceled,
                decided_by: actor,
                decided_at: self.now(),
                rejection_reason: None,
            };
            let request = self.decide_request(salon_id, request_id, decision).await?;
            info!(request = %request.id, by = %actor, "booking request canceled");
            self.notify.send(salon_id, request.id, ChangeKind::RequestCanceled);
            Ok(request)
        })
        .await
    }

    /// Move a pending request to a terminal status without creating anything.
    async fn decide_request(
        &self,
        salon_id: Ulid,
        request_id: Ulid,
        decision: RequestDecision,
    ) -> Result<BookingRequest, EngineError> {
        let request = self.load_request(salon_id, request_id).await?;
        let lock = self.schedule_lock(ScheduleKey::new(salon_id, request.professional_id));
        let _guard = lock.lock().await;

        let request = self.load_request(salon_id, request_id).await?;
        if request.status.is_terminal() {
            debug!(request = %request_id, from = request.status.as_str(), to = decision.status.as_str(), "transition refused");
            return Err(EngineError::InvalidTransition {
                entity: request_id,
                from: request.status.as_str(),
                to: decision.status.as_str(),
            });
        }
        self.store.update_request(salon_id, request_id, decision).await
    }
}
