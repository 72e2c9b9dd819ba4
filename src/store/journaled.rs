use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::conflict::{optional_text, required_text};
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::*;

// ── Group-commit journal channel ─────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends into the batch.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![first];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes don't leak into
    // the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Row counts, for maintenance reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub services: usize,
    pub professionals: usize,
    pub requests: usize,
    pub appointments: usize,
    pub commissions: usize,
    pub payments: usize,
}

/// In-memory store whose every mutation is one journaled [`Event`].
///
/// A mutation is appended to the journal and only then applied to memory, so
/// a multi-row change (approval, payment) is either fully replayed after a
/// crash or not at all.
pub struct JournaledStore {
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by mutations, exclusive for compaction: a snapshot must not
    /// miss an event that is journaled but not yet applied.
    gate: RwLock<()>,
    services: DashMap<Ulid, Service>,
    professionals: DashMap<Ulid, Professional>,
    requests: DashMap<Ulid, BookingRequest>,
    appointments: DashMap<Ulid, Appointment>,
    schedules: DashMap<ScheduleKey, Schedule>,
    commissions: DashMap<Ulid, MonthlyCommission>,
    commission_ids: DashMap<CommissionKey, Ulid>,
    /// commission id → payments, oldest first.
    payments: DashMap<Ulid, Vec<CommissionPayment>>,
}

impl JournaledStore {
    /// Replay the journal at `path` (creating it if missing) and start the
    /// writer task. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.torn_tail {
            warn!(path = %path.display(), valid_len = replay.valid_len, "discarding torn journal tail");
        }
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            wal_tx,
            gate: RwLock::new(()),
            services: DashMap::new(),
            professionals: DashMap::new(),
            requests: DashMap::new(),
            appointments: DashMap::new(),
            schedules: DashMap::new(),
            commissions: DashMap::new(),
            commission_ids: DashMap::new(),
            payments: DashMap::new(),
        };
        for event in &replay.events {
            store.apply(event);
        }
        info!(path = %path.display(), events = replay.events.len(), "journal replayed");
        Ok(store)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Journal, then apply.
    async fn persist(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::ServiceRegistered(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ProfessionalRegistered(professional) => {
                self.professionals.insert(professional.id, professional.clone());
            }
            Event::RequestSubmitted(request) | Event::RequestDecided(request) => {
                self.requests.insert(request.id, request.clone());
            }
            Event::RequestApproved { request, appointment } => {
                self.requests.insert(request.id, request.clone());
                self.put_appointment(appointment);
            }
            Event::AppointmentCreated(appointment) | Event::AppointmentUpdated(appointment) => {
                self.put_appointment(appointment);
            }
            Event::CommissionUpserted {
                commission,
                contributing,
            } => self.put_commission(commission, contributing),
            Event::AppointmentCompleted {
                appointment,
                commission,
                contributing,
            } => {
                self.put_appointment(appointment);
                self.put_commission(commission, contributing);
            }
            Event::PaymentRecorded { payment, commission } => {
                self.payments
                    .entry(payment.commission_id)
                    .or_default()
                    .push(payment.clone());
                self.commissions.insert(commission.id, commission.clone());
            }
        }
    }

    /// Upsert the row; index it in its professional's schedule the first
    /// time it is seen. The span of an appointment never changes.
    fn put_appointment(&self, appointment: &Appointment) {
        let first_seen = self
            .appointments
            .insert(appointment.id, appointment.clone())
            .is_none();
        if first_seen {
            self.schedules
                .entry(ScheduleKey::new(appointment.salon_id, appointment.professional_id))
                .or_default()
                .insert(Interval {
                    appointment_id: appointment.id,
                    span: appointment.span,
                });
        }
    }

    /// Store the row and point every contributing appointment at it.
    fn put_commission(&self, commission: &MonthlyCommission, contributing: &[Ulid]) {
        self.commission_ids.insert(commission.key(), commission.id);
        self.commissions.insert(commission.id, commission.clone());
        for id in contributing {
            if let Some(mut appointment) = self.appointments.get_mut(id) {
                appointment.commission_id = Some(commission.id);
            }
        }
    }

    /// One ledger row per key: a different id for an existing key is refused.
    fn check_commission_key(&self, commission: &MonthlyCommission) -> Result<(), EngineError> {
        if let Some(existing) = self.commission_ids.get(&commission.key())
            && *existing.value() != commission.id {
                return Err(EngineError::validation(format!(
                    "ledger row for {} already exists as {}",
                    commission.period,
                    existing.value()
                )));
            }
        Ok(())
    }

    // ── Catalog ──────────────────────────────────────────────

    pub async fn register_service(&self, service: Service) -> Result<Service, EngineError> {
        required_text("service name", &service.name, MAX_NAME_LEN)?;
        if service.duration_minutes == 0 {
            return Err(EngineError::validation("service duration must be positive"));
        }
        if service.duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("service duration too long"));
        }
        if service.price < Decimal::ZERO {
            return Err(EngineError::validation("service price must not be negative"));
        }
        if service.price > Decimal::from(MAX_MONEY_AMOUNT) {
            return Err(EngineError::LimitExceeded("service price too high"));
        }
        self.persist(Event::ServiceRegistered(service.clone())).await?;
        Ok(service)
    }

    pub async fn register_professional(&self, professional: Professional) -> Result<Professional, EngineError> {
        required_text("professional name", &professional.name, MAX_NAME_LEN)?;
        if professional.commission_percentage < Decimal::ZERO
            || professional.commission_percentage > Decimal::ONE_HUNDRED
        {
            return Err(EngineError::validation("commission percentage must be within 0-100"));
        }
        if professional.work_window.close_minute > MINUTES_PER_DAY {
            return Err(EngineError::validation("work window must end within the day"));
        }
        self.persist(Event::ProfessionalRegistered(professional.clone())).await?;
        Ok(professional)
    }

    // ── Maintenance ──────────────────────────────────────────

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            services: self.services.len(),
            professionals: self.professionals.len(),
            requests: self.requests.len(),
            appointments: self.appointments.len(),
            commissions: self.commissions.len(),
            payments: self.payments.iter().map(|e| e.value().len()).sum(),
        }
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the journal as the minimal set of events recreating the
    /// current state. Returns the number of events written.
    pub async fn compact(&self) -> Result<usize, EngineError> {
        let _gate = self.gate.write().await;
        let events = self.snapshot();
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!(events = written, "journal compacted");
        Ok(written)
    }

    /// Compact once at least `threshold` events were appended since the last
    /// compaction.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, EngineError> {
        if self.appends_since_compact().await < threshold {
            return Ok(false);
        }
        self.compact().await.map(|_| true)
    }

    fn snapshot(&self) -> Vec<Event> {
        fn sorted<T: Clone>(map: &DashMap<Ulid, T>) -> Vec<T> {
            let mut rows: Vec<(Ulid, T)> = map.iter().map(|e| (*e.key(), e.value().clone())).collect();
            rows.sort_by_key(|(id, _)| *id);
            rows.into_iter().map(|(_, row)| row).collect()
        }

        let mut events = Vec::new();
        events.extend(sorted(&self.services).into_iter().map(Event::ServiceRegistered));
        events.extend(sorted(&self.professionals).into_iter().map(Event::ProfessionalRegistered));
        events.extend(sorted(&self.requests).into_iter().map(Event::RequestSubmitted));
        events.extend(sorted(&self.appointments).into_iter().map(Event::AppointmentCreated));
        for commission in sorted(&self.commissions) {
            let payments = self
                .payments
                .get(&commission.id)
                .map(|p| p.value().clone())
                .unwrap_or_default();
            events.push(Event::CommissionUpserted {
                commission: commission.clone(),
                contributing: Vec::new(),
            });
            events.extend(payments.into_iter().map(|payment| Event::PaymentRecorded {
                payment,
                commission: commission.clone(),
            }));
        }
        events
    }

    fn request_in(&self, salon_id: Ulid, id: Ulid) -> Option<BookingRequest> {
        self.requests
            .get(&id)
            .filter(|r| r.salon_id == salon_id)
            .map(|r| r.value().clone())
    }

    fn appointment_in(&self, salon_id: Ulid, id: Ulid) -> Option<Appointment> {
        self.appointments
            .get(&id)
            .filter(|a| a.salon_id == salon_id)
            .map(|a| a.value().clone())
    }

    fn commission_in(&self, salon_id: Ulid, id: Ulid) -> Option<MonthlyCommission> {
        self.commissions
            .get(&id)
            .filter(|c| c.salon_id == salon_id)
            .map(|c| c.value().clone())
    }

    /// Every appointment id in one professional's schedule overlapping `range`.
    fn schedule_ids(&self, key: ScheduleKey, range: Option<Span>) -> Vec<Ulid> {
        let Some(schedule) = self.schedules.get(&key) else {
            return Vec::new();
        };
        let ids = match range {
            Some(range) => schedule.overlapping(&range).map(|i| i.appointment_id).collect(),
            None => schedule.intervals.iter().map(|i| i.appointment_id).collect(),
        };
        ids
    }
}

#[async_trait]
impl AppointmentReader for JournaledStore {
    async fn get_appointment(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Appointment>, EngineError> {
        Ok(self.appointment_in(salon_id, id))
    }

    async fn list_appointments(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        range: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError> {
        let ids = self.schedule_ids(ScheduleKey::new(salon_id, professional_id), Some(range));
        Ok(ids
            .into_iter()
            .filter_map(|id| self.appointment_in(salon_id, id))
            .filter(|a| statuses.contains(&a.status))
            .collect())
    }

    async fn list_completed_between(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        range: Span,
    ) -> Result<Vec<Appointment>, EngineError> {
        let ids = self.schedule_ids(ScheduleKey::new(salon_id, professional_id), None);
        Ok(ids
            .into_iter()
            .filter_map(|id| self.appointment_in(salon_id, id))
            .filter(|a| a.status == AppointmentStatus::Completed)
            .filter(|a| a.completed_at.is_some_and(|t| range.contains_instant(t)))
            .collect())
    }

    async fn list_unreflected_completions(&self) -> Result<Vec<Appointment>, EngineError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.status == AppointmentStatus::Completed && a.commission_id.is_none())
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by_key(|a| a.id);
        Ok(rows)
    }
}

#[async_trait]
impl AppointmentWriter for JournaledStore {
    async fn create_appointment(&self, appointment: Appointment) -> Result<Appointment, EngineError> {
        if self.appointments.contains_key(&appointment.id) {
            return Err(EngineError::validation(format!("appointment {} already exists", appointment.id)));
        }
        self.persist(Event::AppointmentCreated(appointment.clone())).await?;
        Ok(appointment)
    }

    async fn update_appointment(
        &self,
        salon_id: Ulid,
        id: Ulid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, EngineError> {
        let mut appointment = self.appointment_in(salon_id, id).ok_or(EngineError::NotFound(id))?;
        appointment.status = update.status;
        appointment.completed_at = update.completed_at;
        appointment.cancellation_reason = update.cancellation_reason;
        self.persist(Event::AppointmentUpdated(appointment.clone())).await?;
        Ok(appointment)
    }
}

#[async_trait]
impl BookingRequestStore for JournaledStore {
    async fn create_request(&self, request: BookingRequest) -> Result<BookingRequest, EngineError> {
        if self.requests.contains_key(&request.id) {
            return Err(EngineError::validation(format!("request {} already exists", request.id)));
        }
        optional_text(request.notes.as_deref(), MAX_NOTES_LEN)?;
        self.persist(Event::RequestSubmitted(request.clone())).await?;
        Ok(request)
    }

    async fn get_request(&self, salon_id: Ulid, id: Ulid) -> Result<Option<BookingRequest>, EngineError> {
        Ok(self.request_in(salon_id, id))
    }

    async fn update_request(
        &self,
        salon_id: Ulid,
        id: Ulid,
        decision: RequestDecision,
    ) -> Result<BookingRequest, EngineError> {
        let mut request = self.request_in(salon_id, id).ok_or(EngineError::NotFound(id))?;
        request.status = decision.status;
        request.decided_by = Some(decision.decided_by);
        request.decided_at = Some(decision.decided_at);
        request.rejection_reason = decision.rejection_reason;
        self.persist(Event::RequestDecided(request.clone())).await?;
        Ok(request)
    }

    async fn commit_approval(
        &self,
        salon_id: Ulid,
        id: Ulid,
        decision: RequestDecision,
        appointment: Appointment,
    ) -> Result<(BookingRequest, Appointment), EngineError> {
        let mut request = self.request_in(salon_id, id).ok_or(EngineError::NotFound(id))?;
        if self.appointments.contains_key(&appointment.id) {
            return Err(EngineError::validation(format!("appointment {} already exists", appointment.id)));
        }
        request.status = decision.status;
        request.decided_by = Some(decision.decided_by);
        request.decided_at = Some(decision.decided_at);
        request.rejection_reason = None;
        request.appointment_id = Some(appointment.id);
        self.persist(Event::RequestApproved {
            request: request.clone(),
            appointment: appointment.clone(),
        })
        .await?;
        Ok((request, appointment))
    }
}

#[async_trait]
impl CommissionStore for JournaledStore {
    async fn get_commission(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        period: MonthKey,
    ) -> Result<Option<MonthlyCommission>, EngineError> {
        let key = CommissionKey {
            salon_id,
            professional_id,
            period,
        };
        let Some(id) = self.commission_ids.get(&key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.commission_in(salon_id, id))
    }

    async fn get_commission_by_id(&self, salon_id: Ulid, id: Ulid) -> Result<Option<MonthlyCommission>, EngineError> {
        Ok(self.commission_in(salon_id, id))
    }

    async fn upsert_commission(
        &self,
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    ) -> Result<MonthlyCommission, EngineError> {
        self.check_commission_key(&commission)?;
        self.persist(Event::CommissionUpserted {
            commission: commission.clone(),
            contributing,
        })
        .await?;
        Ok(commission)
    }

    async fn commit_completion(
        &self,
        salon_id: Ulid,
        id: Ulid,
        update: AppointmentUpdate,
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    ) -> Result<(Appointment, MonthlyCommission), EngineError> {
        let mut appointment = self.appointment_in(salon_id, id).ok_or(EngineError::NotFound(id))?;
        if commission.salon_id != salon_id || commission.professional_id != appointment.professional_id {
            return Err(EngineError::validation("ledger row does not belong to this appointment"));
        }
        self.check_commission_key(&commission)?;
        appointment.status = update.status;
        appointment.completed_at = update.completed_at;
        appointment.cancellation_reason = update.cancellation_reason;
        appointment.commission_id = Some(commission.id);
        self.persist(Event::AppointmentCompleted {
            appointment: appointment.clone(),
            commission: commission.clone(),
            contributing,
        })
        .await?;
        Ok((appointment, commission))
    }

    async fn append_payment(
        &self,
        payment: CommissionPayment,
        commission: MonthlyCommission,
    ) -> Result<(CommissionPayment, MonthlyCommission), EngineError> {
        if payment.commission_id != commission.id {
            return Err(EngineError::validation("payment does not belong to this commission"));
        }
        if self.commission_in(commission.salon_id, commission.id).is_none() {
            return Err(EngineError::NotFound(commission.id));
        }
        self.persist(Event::PaymentRecorded {
            payment: payment.clone(),
            commission: commission.clone(),
        })
        .await?;
        Ok((payment, commission))
    }

    async fn list_payments(&self, salon_id: Ulid, commission_id: Ulid) -> Result<Vec<CommissionPayment>, EngineError> {
        if self.commission_in(salon_id, commission_id).is_none() {
            return Err(EngineError::NotFound(commission_id));
        }
        Ok(self
            .payments
            .get(&commission_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogReader for JournaledStore {
    async fn get_service(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Service>, EngineError> {
        Ok(self
            .services
            .get(&id)
            .filter(|s| s.salon_id == salon_id)
            .map(|s| s.value().clone()))
    }

    async fn get_professional(&self, salon_id: Ulid, id: Ulid) -> Result<Option<Professional>, EngineError> {
        Ok(self
            .professionals
            .get(&id)
            .filter(|p| p.salon_id == salon_id)
            .map(|p| p.value().clone()))
    }
}
