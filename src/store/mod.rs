//! Storage boundary of the engine.
//!
//! The engine only talks to storage through these traits. Every lookup is
//! scoped by `salon_id`; a row owned by another salon is reported as absent.
//! Methods that touch more than one row (`commit_approval`,
//! `upsert_commission`, `commit_completion`, `append_payment`) must apply all
//! of their effects or none.

mod journaled;

pub use journaled::JournaledStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Status change applied to a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDecision {
    pub status: RequestStatus,
    pub decided_by: Ulid,
    pub decided_at: Ms,
    pub rejection_reason: Option<String>,
}

/// Status change applied to an appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentUpdate {
    pub status: AppointmentStatus,
    pub completed_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
}

impl AppointmentUpdate {
    pub fn completed(at: Ms) -> Self {
        Self {
            status: AppointmentStatus::Completed,
            completed_at: Some(at),
            cancellation_reason: None,
        }
    }

    pub fn canceled(reason: String) -> Self {
        Self {
            status: AppointmentStatus::Canceled,
            completed_at: None,
            cancellation_reason: Some(reason),
        }
    }
}

#[async_trait]
pub trait AppointmentReader: Send + Sync {
    async fn get_appointment(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Appointment>, EngineError>;

    /// Appointments of one professional overlapping `range` whose status is in
    /// `statuses`, ordered by start.
    async fn list_appointments(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        range: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError>;

    /// Completed appointments whose `completed_at` falls inside `range`.
    async fn list_completed_between(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        range: Span,
    ) -> Result<Vec<Appointment>, EngineError>;

    /// Completed appointments with no commission back-reference yet, across
    /// all salons.
    async fn list_unreflected_completions(&self) -> Result<Vec<Appointment>, EngineError>;
}

#[async_trait]
pub trait AppointmentWriter: Send + Sync {
    async fn create_appointment(&self, appointment: Appointment) -> Result<Appointment, EngineError>;

    async fn update_appointment(
        &self,
        salon_id: Ulid,
        id: Ulid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, EngineError>;
}

#[async_trait]
pub trait BookingRequestStore: Send + Sync {
    async fn create_request(&self, request: BookingRequest) -> Result<BookingRequest, EngineError>;

    async fn get_request(&self, salon_id: Ulid, id: Ulid) -> Result<Option<BookingRequest>, EngineError>;

    async fn update_request(
        &self,
        salon_id: Ulid,
        id: Ulid,
        decision: RequestDecision,
    ) -> Result<BookingRequest, EngineError>;

    /// Mark the request approved and create its appointment as one unit.
    async fn commit_approval(
        &self,
        salon_id: Ulid,
        id: Ulid,
        decision: RequestDecision,
        appointment: Appointment,
    ) -> Result<(BookingRequest, Appointment), EngineError>;
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn get_commission(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        period: MonthKey,
    ) -> Result<Option<MonthlyCommission>, EngineError>;

    async fn get_commission_by_id(&self, salon_id: Ulid, id: Ulid) -> Result<Option<MonthlyCommission>, EngineError>;

    /// Write the row and point every `contributing` appointment at it.
    async fn upsert_commission(
        &self,
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    ) -> Result<MonthlyCommission, EngineError>;

    /// Mark the appointment completed and write the ledger row it counts
    /// toward as one unit. `contributing` includes the appointment.
    async fn commit_completion(
        &self,
        salon_id: Ulid,
        id: Ulid,
        update: AppointmentUpdate,
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    ) -> Result<(Appointment, MonthlyCommission), EngineError>;

    /// Append the payment and store the row it settles against as one unit.
    async fn append_payment(
        &self,
        payment: CommissionPayment,
        commission: MonthlyCommission,
    ) -> Result<(CommissionPayment, MonthlyCommission), EngineError>;

    /// Payments of one commission row, oldest first.
    async fn list_payments(&self, salon_id: Ulid, commission_id: Ulid) -> Result<Vec<CommissionPayment>, EngineError>;
}

#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_service(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Service>, EngineError>;

    async fn get_professional(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Professional>, EngineError>;
}

/// Everything the engine needs from storage.
pub trait SalonStore:
    AppointmentReader + AppointmentWriter + BookingRequestStore + CommissionStore + CatalogReader + 'static
{
}

impl<T> SalonStore for T where
    T: AppointmentReader + AppointmentWriter + BookingRequestStore + CommissionStore + CatalogReader + 'static
{
}
