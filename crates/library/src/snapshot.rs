use std::fs;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::album::{Album, AlbumGrouping};
use crate::cache::{AlbumCache, AlbumMap};
use crate::LibraryError;

const SNAPSHOT_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");

const META_VERSION_KEY: &str = "version";
const META_BUILT_AT_KEY: &str = "built_at";
const META_GROUPING_KEY: &str = "grouping";

pub struct Snapshot {
    pub built_at: i64,
    pub albums: AlbumMap,
}

impl Snapshot {
    /// A snapshot is usable while it is newer than the player's last library
    /// update.
    pub fn is_fresh(&self, db_update: i64) -> bool {
        self.built_at > db_update
    }
}

/// Writes the current cache content. Does nothing if the cache was never
/// built.
pub fn save_cache(path: &Path, cache: &AlbumCache) -> Result<usize, LibraryError> {
    let Some(built_at) = cache.built_at() else {
        return Ok(0);
    };
    let albums = cache.read(std::time::Duration::from_secs(5))?;
    write_snapshot(path, &albums, &cache.grouping(), built_at)?;
    Ok(albums.len())
}

pub fn write_snapshot(
    path: &Path,
    albums: &AlbumMap,
    grouping: &AlbumGrouping,
    built_at: i64,
) -> Result<(), LibraryError> {
    let db = open_or_create_db(path)?;
    let write_txn = db.begin_write()?;
    match write_txn.delete_table(ALBUMS_TABLE) {
        Ok(_) | Err(TableError::TableDoesNotExist(_)) => {}
        Err(err) => return Err(err.into()),
    }
    {
        let mut meta = write_txn.open_table(META_TABLE)?;
        meta.insert(META_VERSION_KEY, encode_value(&SNAPSHOT_VERSION)?.as_slice())?;
        meta.insert(META_BUILT_AT_KEY, encode_value(&built_at)?.as_slice())?;
        meta.insert(META_GROUPING_KEY, encode_value(grouping)?.as_slice())?;
        let mut table = write_txn.open_table(ALBUMS_TABLE)?;
        for (key, album) in albums {
            table.insert(key.as_str(), encode_value(album)?.as_slice())?;
        }
    }
    write_txn.commit()?;
    info!("wrote {} albums to {}", albums.len(), path.display());
    Ok(())
}

/// Reads a snapshot. `None` means there is nothing usable: no file, another
/// format version or another album grouping.
pub fn read_snapshot(
    path: &Path,
    grouping: &AlbumGrouping,
) -> Result<Option<Snapshot>, LibraryError> {
    if !path.exists() {
        return Ok(None);
    }
    let db = Database::open(path)?;
    let read_txn = db.begin_read()?;
    let meta = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version: Option<u32> = match meta.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    if version != Some(SNAPSHOT_VERSION) {
        debug!("ignoring album snapshot with version {:?}", version);
        return Ok(None);
    }
    let stored: AlbumGrouping = match meta.get(META_GROUPING_KEY)? {
        Some(value) => decode_value(value.value())?,
        None => return Ok(None),
    };
    if stored != *grouping {
        debug!("ignoring album snapshot built with {:?}", stored);
        return Ok(None);
    }
    let built_at: i64 = match meta.get(META_BUILT_AT_KEY)? {
        Some(value) => decode_value(value.value())?,
        None => return Ok(None),
    };
    let table = read_txn.open_table(ALBUMS_TABLE)?;
    let mut albums = AlbumMap::new();
    for entry in table.iter()? {
        let (key, value) = entry?;
        let album: Album = decode_value(value.value())?;
        albums.insert(key.value().to_string(), album);
    }
    Ok(Some(Snapshot { built_at, albums }))
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
