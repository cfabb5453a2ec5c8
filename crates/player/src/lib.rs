//! Client side of the player's line-oriented text protocol.

mod client;
mod connector;
mod error;
mod response;

pub use client::{
    escape_filter_value, parse_songs, quote_argument, AlbumGroup, DbStats, MpdClient, PlayState,
    PlayerClient, StickerEntry, Status,
};
pub use connector::{ConnectionSettings, Connector, TcpConnector, DEFAULT_PARTITION};
pub use error::ProtocolError;
pub use response::{parse_greeting, parse_line, AckError, ResponseLine};
