mod appointments;
mod availability;
pub(crate) mod conflict;
mod error;
mod ledger;
mod queries;
mod requests;

pub use appointments::{Completion, NewAppointment};
pub use availability::{compute_available_slots, merge_overlapping, parse_day};
pub use error::EngineError;
pub use ledger::{summarize, LedgerSummary, NewPayment, ReconcileReport};
pub use requests::{Approval, NewBookingRequest};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::{MAX_SLOT_GRANULARITY_MINUTES, MIN_SLOT_GRANULARITY_MINUTES};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::store::SalonStore;

pub const DEFAULT_SLOT_GRANULARITY_MINUTES: i64 = 30;

/// Booking and settlement services over a [`SalonStore`].
///
/// Two lock tables serialize the read-check-write sequences:
/// - one mutex per professional schedule, held by every operation that can
///   make a time range occupied or change a request's status;
/// - one mutex per ledger row key, held by commission writers.
///
/// Operations needing both take the schedule lock first.
pub struct Engine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notify: Arc<NotifyHub>,
    granularity_minutes: i64,
    schedule_locks: DashMap<ScheduleKey, Arc<Mutex<()>>>,
    ledger_locks: DashMap<CommissionKey, Arc<Mutex<()>>>,
    /// Ledger rows whose reconciliation failed; recomputed before the next payment.
    stale_ledgers: DashSet<CommissionKey>,
}

impl<S: SalonStore> Engine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notify: Arc::new(NotifyHub::new()),
            granularity_minutes: DEFAULT_SLOT_GRANULARITY_MINUTES,
            schedule_locks: DashMap::new(),
            ledger_locks: DashMap::new(),
            stale_ledgers: DashSet::new(),
        }
    }

    pub fn with_slot_granularity(mut self, minutes: i64) -> Result<Self, EngineError> {
        if minutes <= 0 {
            return Err(EngineError::validation("slot granularity must be positive"));
        }
        if !(MIN_SLOT_GRANULARITY_MINUTES..=MAX_SLOT_GRANULARITY_MINUTES).contains(&minutes) {
            return Err(EngineError::LimitExceeded("slot granularity out of range"));
        }
        self.granularity_minutes = minutes;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn slot_granularity(&self) -> i64 {
        self.granularity_minutes
    }

    pub fn stale_ledger_count(&self) -> usize {
        self.stale_ledgers.len()
    }

    fn now(&self) -> Ms {
        self.clock.now()
    }

    fn schedule_lock(&self, key: ScheduleKey) -> Arc<Mutex<()>> {
        self.schedule_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn ledger_lock(&self, key: CommissionKey) -> Arc<Mutex<()>> {
        self.ledger_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn mark_stale(&self, key: CommissionKey) {
        self.stale_ledgers.insert(key);
        metrics::gauge!(observability::STALE_LEDGERS).set(self.stale_ledgers.len() as f64);
    }

    fn clear_stale(&self, key: &CommissionKey) {
        if self.stale_ledgers.remove(key).is_some() {
            metrics::gauge!(observability::STALE_LEDGERS).set(self.stale_ledgers.len() as f64);
        }
    }

    // ── Salon-scoped loaders ─────────────────────────────────

    async fn load_service(&self, salon_id: Ulid, id: Ulid) -> Result<Service, EngineError> {
        self.store
            .get_service(salon_id, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    async fn load_professional(&self, salon_id: Ulid, id: Ulid) -> Result<Professional, EngineError> {
        self.store
            .get_professional(salon_id, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    async fn load_request(&self, salon_id: Ulid, id: Ulid) -> Result<BookingRequest, EngineError> {
        self.store
            .get_request(salon_id, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    async fn load_appointment(&self, salon_id: Ulid, id: Ulid) -> Result<Appointment, EngineError> {
        self.store
            .get_appointment(salon_id, id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }
}

/// Run one public operation, counting and timing it.
async fn timed<T>(
    op: &'static str,
    operation: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = operation.await;
    observability::record_operation(op, started, &result);
    result
}
