use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Lay fixed-length candidate slots over a professional's working day and
/// mark each one free or taken.
///
/// Candidates start at `open`, `open + g`, `open + 2g`, ... and are kept only
/// while `start + duration <= close`. A candidate is taken when it overlaps a
/// pending/confirmed appointment of `professional_id`; other appointments in
/// `existing` are ignored. Taken slots are returned with `available = false`,
/// never dropped.
pub fn compute_available_slots(
    professional_id: Ulid,
    duration_minutes: i64,
    date: NaiveDate,
    existing: &[Appointment],
    window: WorkWindow,
    granularity_minutes: i64,
) -> Result<Vec<Slot>, EngineError> {
    if duration_minutes <= 0 {
        return Err(EngineError::validation("service duration must be positive"));
    }
    if granularity_minutes <= 0 {
        return Err(EngineError::validation("slot granularity must be positive"));
    }
    if duration_minutes > MAX_SERVICE_DURATION_MINUTES as i64 {
        return Err(EngineError::LimitExceeded("service duration too long"));
    }
    let Some(day) = window.on(date) else {
        return Ok(Vec::new());
    };

    let calendar_day = Span::new(day_start(date), day_start(date) + DAY_MS);
    let mut occupied: Vec<Span> = existing
        .iter()
        .filter(|a| a.professional_id == professional_id && a.status.occupies())
        .filter(|a| a.span.overlaps(&calendar_day))
        .map(|a| a.span)
        .collect();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    let duration = duration_minutes * MINUTE_MS;
    let step = granularity_minutes * MINUTE_MS;
    let mut slots = Vec::new();
    let mut ri = 0;
    let mut start = day.start;

    while start + duration <= day.end {
        let candidate = Span::new(start, start + duration);
        // Candidates only move forward, so busy spans ending at or before
        // this start can never block a later one.
        while ri < occupied.len() && occupied[ri].end <= candidate.start {
            ri += 1;
        }
        let available = occupied.get(ri).is_none_or(|busy| !busy.overlaps(&candidate));
        slots.push(Slot {
            start: candidate.start,
            end: candidate.end,
            available,
        });
        start += step;
    }

    Ok(slots)
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_day(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("malformed date: {s:?}")))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}
