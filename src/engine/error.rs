use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad input shape or value.
    Validation(String),
    NotFound(Ulid),
    /// Illegal state-machine move.
    InvalidTransition {
        entity: Ulid,
        from: &'static str,
        to: &'static str,
    },
    /// The requested time overlaps this occupying appointment.
    SlotConflict(Ulid),
    LimitExceeded(&'static str),
    Storage(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTransition { entity, from, to } => {
                write!(f, "invalid transition for {entity}: {from} -> {to}")
            }
            EngineError::SlotConflict(id) => {
                write!(f, "slot conflicts with appointment: {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
