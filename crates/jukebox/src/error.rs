use library::LibraryError;
use player::ProtocolError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JukeboxError {
    SelectionUnderfilled { requested: usize, selected: usize },
    CacheUnavailable,
    Cache(String),
    ProtocolRecoverable(String),
    ProtocolFatal(String),
    WorkerSpawnFailed(String),
    Disabled,
    UnknownPartition(String),
    AddFailed(String),
    InvalidRequest(String),
}

impl JukeboxError {
    /// True when the partition connection is gone and must be re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JukeboxError::ProtocolFatal(_))
    }
}

impl std::fmt::Display for JukeboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JukeboxError::SelectionUnderfilled {
                requested,
                selected,
            } => write!(
                f,
                "jukebox could only select {} of {} requested entries",
                selected, requested
            ),
            JukeboxError::CacheUnavailable => write!(f, "album cache is not available"),
            JukeboxError::Cache(message) => write!(f, "album cache error: {}", message),
            JukeboxError::ProtocolRecoverable(message) => {
                write!(f, "player rejected command: {}", message)
            }
            JukeboxError::ProtocolFatal(message) => {
                write!(f, "player connection lost: {}", message)
            }
            JukeboxError::WorkerSpawnFailed(message) => {
                write!(f, "could not start worker: {}", message)
            }
            JukeboxError::Disabled => write!(f, "jukebox is disabled"),
            JukeboxError::UnknownPartition(name) => write!(f, "unknown partition: {}", name),
            JukeboxError::AddFailed(message) => write!(f, "adding to queue failed: {}", message),
            JukeboxError::InvalidRequest(message) => write!(f, "invalid request: {}", message),
        }
    }
}

impl std::error::Error for JukeboxError {}

impl From<ProtocolError> for JukeboxError {
    fn from(err: ProtocolError) -> Self {
        if err.is_connection_error() {
            JukeboxError::ProtocolFatal(err.to_string())
        } else {
            JukeboxError::ProtocolRecoverable(err.to_string())
        }
    }
}

impl From<LibraryError> for JukeboxError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::CacheUnavailable => JukeboxError::CacheUnavailable,
            LibraryError::Protocol(err) => err.into(),
            other => JukeboxError::Cache(other.to_string()),
        }
    }
}
