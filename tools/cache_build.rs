use std::env;
use std::path::PathBuf;
use std::time::Duration;

use common::Tag;
use library::{save_cache, AlbumCache, AlbumGrouping, AlbumMode};
use player::{ConnectionSettings, Connector, TcpConnector, DEFAULT_PARTITION};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let snapshot_path = args
        .next()
        .or_else(|| env::var("ALBUM_CACHE_PATH").ok())
        .unwrap_or_else(|| "data/albums.redb".to_string());
    let host = args
        .next()
        .or_else(|| env::var("MPD_HOST").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = match env::var("MPD_PORT") {
        Ok(value) => value.parse::<u16>()?,
        Err(_) => 6600,
    };
    let mode = match env::var("ALBUM_MODE").as_deref() {
        Ok("simple") => AlbumMode::Simple,
        Ok("advanced") | Err(_) => AlbumMode::Advanced,
        Ok(other) => return Err(format!("unknown album mode: {}", other).into()),
    };
    let group_tag = match env::var("ALBUM_GROUP_TAG") {
        Ok(name) if !name.is_empty() => {
            Some(Tag::from_name(&name).ok_or_else(|| format!("unknown tag: {}", name))?)
        }
        _ => None,
    };

    let connector = TcpConnector::new(ConnectionSettings {
        host,
        port,
        password: env::var("MPD_PASSWORD").ok().filter(|value| !value.is_empty()),
        timeout: Duration::from_secs(30),
    });
    let mut client = connector.connect(DEFAULT_PARTITION)?;
    let cache = AlbumCache::new(AlbumGrouping { mode, group_tag });
    let stats = cache.rebuild(client.as_mut())?;
    info!("scanned {} songs, skipped {}", stats.songs, stats.skipped);

    let path = PathBuf::from(&snapshot_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let written = save_cache(&path, &cache)?;

    println!("Cached: {} albums written to {}", written, path.display());
    Ok(())
}
