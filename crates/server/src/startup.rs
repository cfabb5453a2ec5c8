use std::path::Path;

use library::{read_snapshot, AlbumCache};
use player::{Connector, DEFAULT_PARTITION};
use tracing::{info, warn};

/// Installs the on-disk album snapshot when it is newer than the player's
/// library. Returns false when a rebuild is needed instead.
pub fn load_album_snapshot(connector: &dyn Connector, cache: &AlbumCache, path: &Path) -> bool {
    let snapshot = match read_snapshot(path, &cache.grouping()) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            info!("no usable album snapshot at {}", path.display());
            return false;
        }
        Err(err) => {
            warn!("reading album snapshot {} failed: {}", path.display(), err);
            return false;
        }
    };
    let db_update = match connector
        .connect(DEFAULT_PARTITION)
        .and_then(|mut client| client.stats())
    {
        Ok(stats) => stats.db_update,
        Err(err) => {
            warn!("cannot check album snapshot age: {}", err);
            return false;
        }
    };
    if !snapshot.is_fresh(db_update) {
        info!("album snapshot is older than the library, rebuilding");
        return false;
    }
    let count = snapshot.albums.len();
    cache.install(snapshot.albums, snapshot.built_at);
    info!("loaded {} albums from {}", count, path.display());
    true
}
