use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Tag;
use player::{Connector, PlayerClient, ProtocolError};
use tracing::{info, warn};

use crate::error::JukeboxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// The player rejected the command; the connection is intact.
    RecoverableServerError,
    /// Socket, timeout or parse failure; the connection is unusable.
    ConnectionError,
}

pub fn classify<T>(result: &Result<T, ProtocolError>) -> CallOutcome {
    match result {
        Ok(_) => CallOutcome::Success,
        Err(err) if err.is_connection_error() => CallOutcome::ConnectionError,
        Err(_) => CallOutcome::RecoverableServerError,
    }
}

/// One-shot timer. Arming again moves the deadline.
#[derive(Clone, Debug)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once when the deadline has passed, then disarms.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A partition's player connection with the error policy applied to every
/// call.
pub struct PartitionLink {
    partition: String,
    connector: Arc<dyn Connector>,
    client: Option<Box<dyn PlayerClient>>,
    timer: ReconnectTimer,
    tags: Vec<Tag>,
}

impl PartitionLink {
    pub fn new(partition: &str, connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        Self {
            partition: partition.to_string(),
            connector,
            client: None,
            timer: ReconnectTimer::new(reconnect_delay),
            tags: Vec::new(),
        }
    }

    /// Opens a private connection for a worker. Failure is reported, not
    /// retried.
    pub fn open(partition: &str, connector: Arc<dyn Connector>) -> Result<Self, JukeboxError> {
        let mut link = Self::new(partition, connector, Duration::ZERO);
        link.connect()?;
        Ok(link)
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn timer(&self) -> &ReconnectTimer {
        &self.timer
    }

    /// Tags enabled on the current connection.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Connects and enables every known tag the player supports.
    pub fn connect(&mut self) -> Result<(), JukeboxError> {
        let attempt = self
            .connector
            .connect(&self.partition)
            .and_then(|mut client| {
                let supported = client.tag_types()?;
                let tags: Vec<Tag> = Tag::all()
                    .iter()
                    .copied()
                    .filter(|tag| supported.contains(tag))
                    .collect();
                client.enable_tags(&tags)?;
                Ok((client, tags))
            });
        match attempt {
            Ok((client, tags)) => {
                if tags.len() < Tag::all().len() {
                    info!(
                        "partition {}: player supports {} of {} tags",
                        self.partition,
                        tags.len(),
                        Tag::all().len()
                    );
                }
                self.client = Some(client);
                self.tags = tags;
                self.timer.disarm();
                Ok(())
            }
            Err(err) => {
                self.timer.arm(Instant::now());
                warn!("partition {}: connecting to player failed: {}", self.partition, err);
                Err(JukeboxError::ProtocolFatal(err.to_string()))
            }
        }
    }

    /// Tries to reconnect once the timer fired. `None` when it was not due.
    pub fn poll_reconnect(&mut self, now: Instant) -> Option<Result<(), JukeboxError>> {
        if self.client.is_some() || !self.timer.fire(now) {
            return None;
        }
        let result = self.connect();
        if result.is_ok() {
            info!("partition {}: reconnected to player", self.partition);
        }
        Some(result)
    }

    /// Drops the connection and arms the reconnect timer.
    pub fn fail(&mut self, reason: &str) {
        if self.client.take().is_some() {
            warn!("partition {}: dropping player connection: {}", self.partition, reason);
        }
        self.timer.arm(Instant::now());
    }

    pub fn call<T>(
        &mut self,
        op: impl FnOnce(&mut dyn PlayerClient) -> Result<T, ProtocolError>,
    ) -> Result<T, JukeboxError> {
        let Some(client) = self.client.as_mut() else {
            return Err(JukeboxError::ProtocolFatal(format!(
                "partition {} is not connected",
                self.partition
            )));
        };
        let result = op(client.as_mut());
        match classify(&result) {
            CallOutcome::Success => result.map_err(JukeboxError::from),
            _ => Err(self.recover(result.err())),
        }
    }

    /// Applies the error policy to a failed call and returns the error the
    /// caller reports.
    pub fn recover(&mut self, err: Option<ProtocolError>) -> JukeboxError {
        let Some(err) = err else {
            return JukeboxError::ProtocolFatal("missing error".to_string());
        };
        if err.is_connection_error() {
            self.fail(&err.to_string());
            return JukeboxError::ProtocolFatal(err.to_string());
        }
        let message = err.to_string();
        warn!("partition {}: {}", self.partition, message);
        let restored = match self.client.as_mut() {
            Some(client) => client
                .clear_error()
                .and_then(|_| client.enable_tags(&self.tags)),
            None => Err(ProtocolError::NotConnected),
        };
        match restored {
            Ok(()) => JukeboxError::ProtocolRecoverable(message),
            Err(err) => {
                self.fail(&err.to_string());
                JukeboxError::ProtocolFatal(err.to_string())
            }
        }
    }

    pub fn client_mut(&mut self) -> Result<&mut dyn PlayerClient, JukeboxError> {
        match self.client.as_mut() {
            Some(client) => Ok(client.as_mut()),
            None => Err(JukeboxError::ProtocolFatal(format!(
                "partition {} is not connected",
                self.partition
            ))),
        }
    }
}
