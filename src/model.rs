use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;
pub const MINUTES_PER_DAY: u32 = 1_440;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// `[s1, e1)` and `[s2, e2)` overlap iff `s1 < e2 && s2 < e1`.
    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Midnight UTC of `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar day (UTC) containing `t`.
pub fn date_of(t: Ms) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(t).single().map(|dt| dt.date_naive())
}

/// Daily opening hours of a professional, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkWindow {
    pub open_minute: u32,
    pub close_minute: u32,
}

impl WorkWindow {
    pub fn new(open_minute: u32, close_minute: u32) -> Self {
        Self {
            open_minute,
            close_minute,
        }
    }

    pub fn hours(open_hour: u32, close_hour: u32) -> Self {
        Self::new(open_hour * 60, close_hour * 60)
    }

    pub fn is_empty(&self) -> bool {
        self.open_minute >= self.close_minute
    }

    /// The window projected onto `date`; `None` when `open >= close`.
    pub fn on(&self, date: NaiveDate) -> Option<Span> {
        if self.is_empty() {
            return None;
        }
        let midnight = day_start(date);
        Some(Span::new(
            midnight + self.open_minute as Ms * MINUTE_MS,
            midnight + self.close_minute as Ms * MINUTE_MS,
        ))
    }
}

impl Default for WorkWindow {
    fn default() -> Self {
        Self::hours(8, 18)
    }
}

/// A calendar month, the bucket of the commission ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// Month (UTC) containing `t`.
    pub fn containing(t: Ms) -> Option<Self> {
        let date = date_of(t)?;
        Some(Self {
            year: date.year(),
            month: date.month(),
        })
    }

    /// `[first day of month, first day of next month)`.
    pub fn span(&self) -> Option<Span> {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1)?;
        let next = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)?
        };
        Some(Span::new(day_start(first), day_start(next)))
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ── Catalog (read-only inputs) ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub price: Decimal,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        self.duration_minutes as Ms * MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub work_window: WorkWindow,
    /// 0–100.
    pub commission_percentage: Decimal,
}

// ── Clients ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Who an appointment is for: a registered client or inline contact data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRef {
    Registered(Ulid),
    Guest(ClientInfo),
}

// ── Booking requests ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub requested_start: Ms,
    pub client: ClientInfo,
    pub notes: Option<String>,
    pub status: RequestStatus,
    /// Set iff `status == Rejected`.
    pub rejection_reason: Option<String>,
    pub created_at: Ms,
    pub decided_by: Option<Ulid>,
    pub decided_at: Option<Ms>,
    /// Appointment materialized by approval.
    pub appointment_id: Option<Ulid>,
}

// ── Appointments ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

/// Statuses that block the professional's time.
pub const OCCUPYING: &[AppointmentStatus] = &[AppointmentStatus::Pending, AppointmentStatus::Confirmed];

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Canceled | AppointmentStatus::Completed)
    }

    pub fn occupies(&self) -> bool {
        OCCUPYING.contains(self)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub client: ClientRef,
    /// `[start, start + service duration)`.
    pub span: Span,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<Ms>,
    /// Service price at booking time.
    pub price: Decimal,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub request_id: Option<Ulid>,
    pub commission_id: Option<Ulid>,
}

/// Time-ordered index of one professional's appointments.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub appointment_id: Ulid,
    pub span: Span,
}

impl Schedule {
    pub fn insert(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Intervals overlapping `query`. Everything starting at or after
    /// `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self.intervals.partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }
}

// ── Commission ledger ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionStatus {
    Open,
    Paid,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Open => "open",
            CommissionStatus::Paid => "paid",
        }
    }
}

/// `value × percentage / 100`, rounded half-up to cents. `None` on overflow.
pub fn commission_amount(value: Decimal, percentage: Decimal) -> Option<Decimal> {
    let amount = value.checked_mul(percentage)?.checked_div(Decimal::ONE_HUNDRED)?;
    Some(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCommission {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub period: MonthKey,
    pub total_appointments: u32,
    pub total_service_value: Decimal,
    pub commission_percentage: Decimal,
    pub commission_total: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub status: CommissionStatus,
    pub updated_at: Ms,
}

impl MonthlyCommission {
    /// Fresh ledger row with nothing accrued or paid.
    pub fn open(id: Ulid, key: CommissionKey, now: Ms) -> Self {
        Self {
            id,
            salon_id: key.salon_id,
            professional_id: key.professional_id,
            period: key.period,
            total_appointments: 0,
            total_service_value: Decimal::ZERO,
            commission_percentage: Decimal::ZERO,
            commission_total: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            balance_due: Decimal::ZERO,
            status: CommissionStatus::Paid,
            updated_at: now,
        }
    }

    pub fn key(&self) -> CommissionKey {
        CommissionKey {
            salon_id: self.salon_id,
            professional_id: self.professional_id,
            period: self.period,
        }
    }

    /// Derive `balance_due` and `status`. Overpayment stays negative.
    pub fn settle(&mut self) {
        self.balance_due = self.commission_total - self.amount_paid;
        self.status = if self.balance_due <= Decimal::ZERO {
            CommissionStatus::Paid
        } else {
            CommissionStatus::Open
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Pix,
    BankTransfer,
    CreditCard,
    DebitCard,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPayment {
    pub id: Ulid,
    pub commission_id: Ulid,
    pub salon_id: Ulid,
    pub amount: Decimal,
    pub paid_at: Ms,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub recorded_by: Ulid,
}

// ── Keys ───────────────────────────────────────────────────────────

/// One professional's calendar within a salon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey {
    pub salon_id: Ulid,
    pub professional_id: Ulid,
}

impl ScheduleKey {
    pub fn new(salon_id: Ulid, professional_id: Ulid) -> Self {
        Self {
            salon_id,
            professional_id,
        }
    }
}

/// Unique key of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommissionKey {
    pub salon_id: Ulid,
    pub professional_id: Ulid,
    pub period: MonthKey,
}

// ── Availability output ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    pub available: bool,
}

/// Journal record format. Every variant carries the full post-state of the
/// rows it touches, so applying a record is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceRegistered(Service),
    ProfessionalRegistered(Professional),
    RequestSubmitted(BookingRequest),
    RequestDecided(BookingRequest),
    RequestApproved {
        request: BookingRequest,
        appointment: Appointment,
    },
    AppointmentCreated(Appointment),
    AppointmentUpdated(Appointment),
    CommissionUpserted {
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    },
    AppointmentCompleted {
        appointment: Appointment,
        commission: MonthlyCommission,
        contributing: Vec<Ulid>,
    },
    PaymentRecorded {
        payment: CommissionPayment,
        commission: MonthlyCommission,
    },
}
