use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    RequestSubmitted,
    RequestApproved,
    RequestRejected,
    RequestCanceled,
    AppointmentCreated,
    AppointmentCompleted,
    AppointmentCanceled,
    CommissionRecomputed,
    PaymentRegistered,
}

/// A committed change, published after the unit of work succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub salon_id: Ulid,
    pub entity_id: Ulid,
    pub kind: ChangeKind,
}

/// Broadcast hub of committed changes, one channel per salon. Presentation
/// layers subscribe here instead of re-fetching after every mutation.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a salon's changes. Creates the channel if needed.
    pub fn subscribe(&self, salon_id: Ulid) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(salon_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, salon_id: Ulid, entity_id: Ulid, kind: ChangeKind) {
        if let Some(sender) = self.channels.get(&salon_id) {
            let _ = sender.send(Change {
                salon_id,
                entity_id,
                kind,
            });
        }
    }
}
