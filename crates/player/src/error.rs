use std::io;

use crate::response::AckError;

#[derive(Debug)]
pub enum ProtocolError {
    /// The player rejected a command. The connection is still usable.
    Server(AckError),
    Io(io::Error),
    Timeout,
    Parse(String),
    Closed,
    NotConnected,
}

impl ProtocolError {
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, ProtocolError::Server(_))
    }

    pub fn ack(&self) -> Option<&AckError> {
        match self {
            ProtocolError::Server(ack) => Some(ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Server(ack) => write!(f, "server error: {}", ack),
            ProtocolError::Io(err) => write!(f, "io error: {}", err),
            ProtocolError::Timeout => write!(f, "timed out waiting for the player"),
            ProtocolError::Parse(line) => write!(f, "unparsable response line: {}", line),
            ProtocolError::Closed => write!(f, "connection closed by the player"),
            ProtocolError::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProtocolError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset => ProtocolError::Closed,
            _ => ProtocolError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::ProtocolError;
    use crate::response::AckError;

    #[test]
    fn only_server_errors_keep_the_connection() {
        let ack = AckError {
            code: 50,
            index: 0,
            command: "play".to_string(),
            message: "No such song".to_string(),
        };
        assert!(!ProtocolError::Server(ack).is_connection_error());
        assert!(ProtocolError::Timeout.is_connection_error());
        assert!(ProtocolError::Closed.is_connection_error());
        assert!(ProtocolError::Parse("garbage".to_string()).is_connection_error());
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err: ProtocolError = io::Error::new(io::ErrorKind::WouldBlock, "slow").into();
        assert!(matches!(err, ProtocolError::Timeout));
        let err: ProtocolError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, ProtocolError::Closed));
    }
}
