//! Album cache shared by the jukebox workers and the display paths.

mod album;
mod cache;
mod snapshot;

use player::ProtocolError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

pub use album::{
    album_key, compose_key, sort_album_songs, Album, AlbumGrouping, AlbumMode, ALBUM_TAGS,
    ALBUM_URI_PENDING,
};
pub use cache::{
    build_albums, AlbumCache, AlbumMap, AlbumsReadGuard, BuildTicket, RebuildStats, SEARCH_WINDOW,
};
pub use snapshot::{read_snapshot, save_cache, write_snapshot, Snapshot};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    CacheUnavailable,
    RebuildInProgress,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Protocol(err) => write!(f, "player error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::CacheUnavailable => write!(f, "album cache is not available"),
            LibraryError::RebuildInProgress => write!(f, "album cache rebuild already running"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<ProtocolError> for LibraryError {
    fn from(err: ProtocolError) -> Self {
        LibraryError::Protocol(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
