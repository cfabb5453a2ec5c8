use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum NotificationKind {
    JukeboxUpdated,
    JukeboxError(String),
    ScriptTriggered(String),
    CacheStarted,
    CacheFinished,
    CacheError(String),
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub partition: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

/// Fan-out of jukebox events to whoever listens. Sending never blocks the
/// event loop; slow receivers lag and lose old events.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send(&self, partition: &str, kind: NotificationKind) {
        let notification = Notification {
            partition: partition.to_string(),
            kind,
        };
        if self.sender.send(notification).is_err() {
            debug!("no listeners for partition {} notification", partition);
        }
    }
}
