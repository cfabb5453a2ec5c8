use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::client::{MpdClient, PlayerClient};
use crate::error::ProtocolError;

pub const DEFAULT_PARTITION: &str = "default";

/// Opens private player connections. Workers connect through this so they
/// never share the event loop's connection.
pub trait Connector: Send + Sync {
    fn connect(&self, partition: &str) -> Result<Box<dyn PlayerClient>, ProtocolError>;
}

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6600,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct TcpConnector {
    settings: ConnectionSettings,
}

impl TcpConnector {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn open_stream(&self) -> Result<TcpStream, ProtocolError> {
        let addrs = (self.settings.host.as_str(), self.settings.port).to_socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.settings.timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.map(ProtocolError::from).unwrap_or(ProtocolError::NotConnected))
    }
}

impl Connector for TcpConnector {
    fn connect(&self, partition: &str) -> Result<Box<dyn PlayerClient>, ProtocolError> {
        let stream = self.open_stream()?;
        stream.set_read_timeout(Some(self.settings.timeout))?;
        stream.set_write_timeout(Some(self.settings.timeout))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let mut client = MpdClient::handshake(reader, stream)?;
        if let Some(password) = self
            .settings
            .password
            .as_deref()
            .filter(|value| !value.is_empty())
        {
            client.password(password)?;
        }
        if partition != DEFAULT_PARTITION {
            client.switch_partition(partition)?;
        }
        debug!(
            "connected to player {}:{} (partition {}, protocol {})",
            self.settings.host,
            self.settings.port,
            partition,
            client.version()
        );
        Ok(Box::new(client))
    }
}
