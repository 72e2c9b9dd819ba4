use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Must run before any arithmetic on a caller-supplied instant.
pub(crate) fn validate_timestamp(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn check_amount_ceiling(amount: Decimal) -> Result<(), EngineError> {
    if amount > Decimal::from(MAX_MONEY_AMOUNT) {
        return Err(EngineError::LimitExceeded("amount out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SERVICE_DURATION_MINUTES as Ms * MINUTE_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First occupying appointment in `existing` that overlaps `span`, as a
/// `SlotConflict`.
pub(crate) fn check_no_conflict(existing: &[Appointment], span: &Span) -> Result<(), EngineError> {
    match existing
        .iter()
        .find(|a| a.status.occupies() && a.span.overlaps(span))
    {
        Some(a) => Err(EngineError::SlotConflict(a.id)),
        None => Ok(()),
    }
}

/// The span must sit inside the professional's hours on the day it starts.
pub(crate) fn check_within_hours(window: &WorkWindow, span: &Span) -> Result<(), EngineError> {
    let date = date_of(span.start).ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    match window.on(date) {
        Some(hours) if hours.contains_span(span) => Ok(()),
        _ => Err(EngineError::validation("requested time is outside working hours")),
    }
}

pub(crate) fn required_text(field: &str, value: &str, max_len: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} must not be empty")));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

pub(crate) fn optional_text(value: Option<&str>, max_len: usize) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.len() > max_len {
            return Err(EngineError::LimitExceeded("text field too long"));
        }
    Ok(())
}

pub(crate) fn validate_client(client: &ClientInfo) -> Result<(), EngineError> {
    required_text("client name", &client.name, MAX_NAME_LEN)?;
    required_text("client phone", &client.phone, MAX_PHONE_LEN)?;
    if let Some(email) = &client.email {
        optional_text(Some(email), MAX_EMAIL_LEN)?;
        if !email.contains('@') {
            return Err(EngineError::validation("client email is malformed"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    use super::*;

    const H: Ms = 3_600_000;

    fn base() -> Ms {
        day_start(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
    }

    fn appointment(span: Span, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            salon_id: Ulid::new(),
            professional_id: Ulid::new(),
            service_id: Ulid::new(),
            client: ClientRef::Registered(Ulid::new()),
            span,
            status,
            cancellation_reason: None,
            completed_at: None,
            price: Decimal::ZERO,
            notes: None,
            created_at: 0,
            request_id: None,
            commission_id: None,
        }
    }

    #[test]
    fn conflict_reports_blocking_appointment() {
        let blocking = appointment(Span::new(base() + 9 * H, base() + 10 * H), AppointmentStatus::Confirmed);
        let existing = vec![blocking.clone()];
        let result = check_no_conflict(&existing, &Span::new(base() + 9 * H + 1, base() + 11 * H));
        assert_eq!(result, Err(EngineError::SlotConflict(blocking.id)));
        assert!(check_no_conflict(&existing, &Span::new(base() + 10 * H, base() + 11 * H)).is_ok());
    }

    #[test]
    fn canceled_never_conflicts() {
        let existing = vec![appointment(Span::new(base(), base() + H), AppointmentStatus::Canceled)];
        assert!(check_no_conflict(&existing, &Span::new(base(), base() + H)).is_ok());
    }

    #[test]
    fn within_hours() {
        let window = WorkWindow::hours(8, 18);
        assert!(check_within_hours(&window, &Span::new(base() + 8 * H, base() + 9 * H)).is_ok());
        assert!(check_within_hours(&window, &Span::new(base() + 17 * H, base() + 18 * H)).is_ok());
        assert!(matches!(
            check_within_hours(&window, &Span::new(base() + 17 * H, base() + 19 * H)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            check_within_hours(&window, &Span::new(base() + 7 * H, base() + 8 * H)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::new(base(), base() + H)).is_ok());
        assert_eq!(
            validate_span(&Span::new(0, H)),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        );
        assert_eq!(
            validate_span(&Span::new(base(), base() + 2 * DAY_MS)),
            Err(EngineError::LimitExceeded("span too wide"))
        );
    }

    #[test]
    fn timestamp_and_amount_bounds() {
        assert!(validate_timestamp(base()).is_ok());
        for at in [Ms::MIN, -1, 0, MAX_VALID_TIMESTAMP_MS, Ms::MAX] {
            assert_eq!(validate_timestamp(at), Err(EngineError::LimitExceeded("timestamp out of range")));
        }
        assert!(check_amount_ceiling(Decimal::from(MAX_MONEY_AMOUNT)).is_ok());
        assert_eq!(
            check_amount_ceiling(Decimal::MAX),
            Err(EngineError::LimitExceeded("amount out of range"))
        );
    }

    #[test]
    fn client_validation() {
        let ok = ClientInfo {
            name: "Ana".into(),
            phone: "+55 11 99999-0000".into(),
            email: Some("ana@example.com".into()),
        };
        assert!(validate_client(&ok).is_ok());

        let blank_name = ClientInfo {
            name: "   ".into(),
            ..ok.clone()
        };
        assert!(matches!(validate_client(&blank_name), Err(EngineError::Validation(_))));

        let bad_email = ClientInfo {
            email: Some("nope".into()),
            ..ok
        };
        assert!(matches!(validate_client(&bad_email), Err(EngineError::Validation(_))));
    }
}
