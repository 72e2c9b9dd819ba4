use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::MAX_NOTES_LEN;
use crate::model::*;
use crate::notify::ChangeKind;
use crate::observability::COMMISSION_RECOMPUTES_TOTAL;
use crate::store::SalonStore;

use super::conflict::{check_amount_ceiling, optional_text};
use super::{timed, Engine, EngineError};

/// Aggregates of one professional's completed work in one month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total_appointments: u32,
    pub total_service_value: Decimal,
    pub contributing: Vec<Ulid>,
}

/// Count and sum completed appointments. Anything not completed is skipped.
pub fn summarize(appointments: &[Appointment]) -> Result<LedgerSummary, EngineError> {
    appointments
        .iter()
        .filter(|a| a.status == AppointmentStatus::Completed)
        .try_fold(LedgerSummary::default(), |mut acc, a| {
            acc.total_appointments += 1;
            acc.total_service_value = acc
                .total_service_value
                .checked_add(a.price)
                .ok_or(EngineError::LimitExceeded("amount out of range"))?;
            acc.contributing.push(a.id);
            Ok(acc)
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub recorded_by: Ulid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub recomputed: usize,
    pub failed: usize,
}

impl<S: SalonStore> Engine<S> {
    /// Rebuild one ledger row from the completed appointments of its month.
    ///
    /// Aggregates are replaced, `amount_paid` is kept, and balance and status
    /// are derived again. Running it twice in a row changes nothing.
    pub async fn recompute_commission(
        &self,
        salon_id: Ulid,
        professional_id: Ulid,
        month: u32,
        year: i32,
    ) -> Result<MonthlyCommission, EngineError> {
        timed("recompute_commission", async {
            let period = MonthKey::new(year, month)
                .ok_or_else(|| EngineError::validation(format!("invalid month: {year}-{month}")))?;
            self.recompute_locked(CommissionKey {
                salon_id,
                professional_id,
                period,
            })
            .await
        })
        .await
    }

    pub(super) async fn recompute_locked(&self, key: CommissionKey) -> Result<MonthlyCommission, EngineError> {
        let lock = self.ledger_lock(key);
        let _guard = lock.lock().await;
        self.recompute(key).await
    }

    /// Caller holds the ledger lock for `key`.
    async fn recompute(&self, key: CommissionKey) -> Result<MonthlyCommission, EngineError> {
        let (commission, contributing) = self.tally(key, None).await?;
        let commission = self.store.upsert_commission(commission, contributing).await?;
        self.ledger_written(key, &commission);
        Ok(commission)
    }

    /// The ledger row for `key` as it should read, plus the appointments
    /// counted in it. `completing` is counted as if it were already
    /// committed as completed. Caller holds the ledger lock for `key`.
    pub(super) async fn tally(
        &self,
        key: CommissionKey,
        completing: Option<&Appointment>,
    ) -> Result<(MonthlyCommission, Vec<Ulid>), EngineError> {
        let professional = self.load_professional(key.salon_id, key.professional_id).await?;
        let range = key.period.span().ok_or(EngineError::LimitExceeded("month out of range"))?;
        let mut completed = self
            .store
            .list_completed_between(key.salon_id, key.professional_id, range)
            .await?;
        if let Some(appointment) = completing {
            completed.retain(|a| a.id != appointment.id);
            completed.push(appointment.clone());
        }
        let summary = summarize(&completed)?;

        let now = self.now();
        let mut commission = match self
            .store
            .get_commission(key.salon_id, key.professional_id, key.period)
            .await?
        {
            Some(existing) => existing,
            None => MonthlyCommission::open(Ulid::new(), key, now),
        };
        commission.total_appointments = summary.total_appointments;
        commission.total_service_value = summary.total_service_value;
        commission.commission_percentage = professional.commission_percentage;
        commission.commission_total = commission_amount(summary.total_service_value, professional.commission_percentage)
            .ok_or(EngineError::LimitExceeded("amount out of range"))?;
        commission.updated_at = now;
        commission.settle();
        Ok((commission, summary.contributing))
    }

    /// Bookkeeping after a ledger row for `key` was committed.
    pub(super) fn ledger_written(&self, key: CommissionKey, commission: &MonthlyCommission) {
        self.clear_stale(&key);
        metrics::counter!(COMMISSION_RECOMPUTES_TOTAL).increment(1);
        debug!(
            commission = %commission.id,
            period = %commission.period,
            total = %commission.commission_total,
            balance = %commission.balance_due,
            "commission recomputed"
        );
        self.notify.send(key.salon_id, commission.id, ChangeKind::CommissionRecomputed);
    }

    /// Record money paid to the professional against a ledger row.
    /// Overpayment is allowed and leaves a negative balance.
    pub async fn register_payment(
        &self,
        salon_id: Ulid,
        commission_id: Ulid,
        payment: NewPayment,
    ) -> Result<(CommissionPayment, MonthlyCommission), EngineError> {
        timed("register_payment", async {
            if payment.amount <= Decimal::ZERO {
                return Err(EngineError::validation("payment amount must be positive"));
            }
            if payment.amount.normalize().scale() > 2 {
                return Err(EngineError::validation("payment amount has more than two decimal places"));
            }
            check_amount_ceiling(payment.amount)?;
            optional_text(payment.notes.as_deref(), MAX_NOTES_LEN)?;

            let row = self
                .store
                .get_commission_by_id(salon_id, commission_id)
                .await?
                .ok_or(EngineError::NotFound(commission_id))?;
            let key = row.key();
            let lock = self.ledger_lock(key);
            let _guard = lock.lock().await;

            if self.stale_ledgers.contains(&key) {
                self.recompute(key).await?;
            }
            let mut commission = self
                .store
                .get_commission_by_id(salon_id, commission_id)
                .await?
                .ok_or(EngineError::NotFound(commission_id))?;

            let now = self.now();
            let record = CommissionPayment {
                id: Ulid::new(),
                commission_id,
                salon_id,
                amount: payment.amount,
                paid_at: now,
                method: payment.method,
                notes: payment.notes,
                recorded_by: payment.recorded_by,
            };
            commission.amount_paid = commission
                .amount_paid
                .checked_add(payment.amount)
                .ok_or(EngineError::LimitExceeded("amount out of range"))?;
            commission.updated_at = now;
            commission.settle();

            let (record, commission) = self.store.append_payment(record, commission).await?;
            info!(
                commission = %commission_id,
                amount = %record.amount,
                balance = %commission.balance_due,
                status = commission.status.as_str(),
                "commission payment registered"
            );
            self.notify.send(salon_id, record.id, ChangeKind::PaymentRegistered);
            Ok((record, commission))
        })
        .await
    }

    /// Re-run every recompute that may be missing: keys whose recompute
    /// failed in this process, and months holding completed appointments
    /// without a ledger back-reference. Failures are logged and kept for the
    /// next run.
    pub async fn reconcile_ledgers(&self) -> Result<ReconcileReport, EngineError> {
        timed("reconcile_ledgers", async {
            let mut keys: BTreeSet<CommissionKey> = self.stale_ledgers.iter().map(|k| *k.key()).collect();
            for appointment in self.store.list_unreflected_completions().await? {
                let Some(period) = appointment.completed_at.and_then(MonthKey::containing) else {
                    warn!(appointment = %appointment.id, "completed appointment without a usable completion time");
                    continue;
                };
                keys.insert(CommissionKey {
                    salon_id: appointment.salon_id,
                    professional_id: appointment.professional_id,
                    period,
                });
            }

            let mut report = ReconcileReport::default();
            for key in keys {
                match self.recompute_locked(key).await {
                    Ok(_) => report.recomputed += 1,
                    Err(e) => {
                        report.failed += 1;
                        self.mark_stale(key);
                        warn!(professional = %key.professional_id, period = %key.period, error = %e, "ledger reconciliation failed");
                    }
                }
            }
            if report.recomputed + report.failed > 0 {
                info!(recomputed = report.recomputed, failed = report.failed, "ledgers reconciled");
            }
            Ok(report)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(price: i64) -> Appointment {
        Appointment {
            id: Ulid::new(),
            salon_id: Ulid::new(),
            professional_id: Ulid::new(),
            service_id: Ulid::new(),
            client: ClientRef::Registered(Ulid::new()),
            span: Span::new(0, 1),
            status: AppointmentStatus::Completed,
            cancellation_reason: None,
            completed_at: Some(1),
            price: Decimal::new(price, 0),
            notes: None,
            created_at: 0,
            request_id: None,
            commission_id: None,
        }
    }

    #[test]
    fn summarize_counts_only_completed() {
        let mut canceled = completed(999);
        canceled.status = AppointmentStatus::Canceled;
        let rows = vec![completed(100), completed(150), canceled, completed(200)];

        let summary = summarize(&rows).unwrap();
        assert_eq!(summary.total_appointments, 3);
        assert_eq!(summary.total_service_value, Decimal::new(450, 0));
        assert_eq!(summary.contributing.len(), 3);
        assert!(!summary.contributing.contains(&rows[2].id));
    }

    #[test]
    fn summarize_empty_month() {
        assert_eq!(summarize(&[]), Ok(LedgerSummary::default()));
    }

    #[test]
    fn summarize_refuses_overflowing_total() {
        let mut huge = completed(0);
        huge.price = Decimal::MAX;
        assert_eq!(
            summarize(&[huge.clone(), huge]),
            Err(EngineError::LimitExceeded("amount out of range"))
        );
    }
}
