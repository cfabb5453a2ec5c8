use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Tag, TagMap};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use player::PlayerClient;
use tracing::{debug, info, warn};

use crate::album::{album_key, compose_key, Album, AlbumGrouping, AlbumMode};
use crate::LibraryError;

/// Page size for full library reads.
pub const SEARCH_WINDOW: usize = 1000;

const ALL_ALBUMS_EXPRESSION: &str = "(Album != '')";

pub type AlbumMap = BTreeMap<String, Album>;
pub type AlbumsReadGuard<'a> = MappedRwLockReadGuard<'a, AlbumMap>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub albums: usize,
    pub songs: usize,
    pub skipped: usize,
}

/// Shared album store. A rebuild holds the write lock until the new map is
/// swapped in, so readers only ever see a complete map.
pub struct AlbumCache {
    albums: RwLock<Option<AlbumMap>>,
    building: AtomicBool,
    built_at: AtomicI64,
    grouping: AlbumGrouping,
}

/// Clears the building flag when the rebuild ends, however it ends.
pub struct BuildTicket<'a> {
    cache: &'a AlbumCache,
}

impl Drop for BuildTicket<'_> {
    fn drop(&mut self) {
        self.cache.building.store(false, Ordering::Release);
    }
}

impl AlbumCache {
    pub fn new(grouping: AlbumGrouping) -> Self {
        Self {
            albums: RwLock::new(None),
            building: AtomicBool::new(false),
            built_at: AtomicI64::new(0),
            grouping,
        }
    }

    pub fn grouping(&self) -> AlbumGrouping {
        self.grouping
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    /// Unix time of the last completed build, if any.
    pub fn built_at(&self) -> Option<i64> {
        match self.built_at.load(Ordering::Acquire) {
            0 => None,
            value => Some(value),
        }
    }

    /// Shared access to the album map. Fails when a rebuild holds the lock
    /// longer than `timeout` or when the cache was never built.
    pub fn read(&self, timeout: Duration) -> Result<AlbumsReadGuard<'_>, LibraryError> {
        let guard = self
            .albums
            .try_read_for(timeout)
            .ok_or(LibraryError::CacheUnavailable)?;
        RwLockReadGuard::try_map(guard, |albums| albums.as_ref())
            .map_err(|_| LibraryError::CacheUnavailable)
    }

    /// Copy of one album, so callers do not hold the lock.
    pub fn get(&self, key: &str, timeout: Duration) -> Result<Option<Album>, LibraryError> {
        Ok(self.read(timeout)?.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.albums.read().as_ref().map(|albums| albums.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the cache as building. Only one build may run at a time.
    pub fn begin_build(&self) -> Result<BuildTicket<'_>, LibraryError> {
        self.building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LibraryError::RebuildInProgress)?;
        Ok(BuildTicket { cache: self })
    }

    /// Rebuilds from the player and swaps the new map in.
    pub fn rebuild(&self, client: &mut dyn PlayerClient) -> Result<RebuildStats, LibraryError> {
        let _ticket = self.begin_build()?;
        info!("album cache rebuild started ({:?} mode)", self.grouping.mode);
        let mut albums = self.albums.write();
        let (fresh, stats) = build_albums(client, &self.grouping)?;
        let previous = albums.replace(fresh);
        self.built_at.store(unix_now(), Ordering::Release);
        drop(albums);
        drop(previous);
        info!(
            "album cache rebuilt: {} albums from {} songs, {} skipped",
            stats.albums, stats.songs, stats.skipped
        );
        Ok(stats)
    }

    /// Replaces the map with one loaded elsewhere, e.g. from a snapshot.
    pub fn install(&self, albums: AlbumMap, built_at: i64) {
        let count = albums.len();
        let previous = self.albums.write().replace(albums);
        self.built_at.store(built_at, Ordering::Release);
        drop(previous);
        debug!("installed {} cached albums", count);
    }

    /// Records the representative URI of an album built in simple mode.
    /// Returns false when the album is gone or already resolved.
    pub fn resolve_uri(&self, key: &str, uri: &str) -> bool {
        let mut albums = self.albums.write();
        let Some(album) = albums.as_mut().and_then(|albums| albums.get_mut(key)) else {
            return false;
        };
        if !album.is_uri_pending() {
            return false;
        }
        album.uri = uri.to_string();
        true
    }
}

/// Builds a new album map from the player without touching any cache.
pub fn build_albums(
    client: &mut dyn PlayerClient,
    grouping: &AlbumGrouping,
) -> Result<(AlbumMap, RebuildStats), LibraryError> {
    match grouping.mode {
        AlbumMode::Advanced => build_advanced(client, grouping),
        AlbumMode::Simple => build_simple(client, grouping),
    }
}

fn build_advanced(
    client: &mut dyn PlayerClient,
    grouping: &AlbumGrouping,
) -> Result<(AlbumMap, RebuildStats), LibraryError> {
    let mut albums = AlbumMap::new();
    let mut stats = RebuildStats::default();
    let mut start = 0;
    loop {
        let songs = client.search_songs(ALL_ALBUMS_EXPRESSION, start, start + SEARCH_WINDOW)?;
        let page_len = songs.len();
        for song in songs {
            stats.songs += 1;
            let Some(key) = album_key(&song, grouping) else {
                stats.skipped += 1;
                continue;
            };
            match albums.get_mut(&key) {
                Some(album) => album.merge_song(&song),
                None => {
                    albums.insert(key.clone(), Album::from_song(key, &song));
                }
            }
        }
        if page_len < SEARCH_WINDOW {
            break;
        }
        start += SEARCH_WINDOW;
    }
    if stats.skipped > 0 {
        warn!("{} songs without album artist or album were skipped", stats.skipped);
    }
    stats.albums = albums.len();
    Ok((albums, stats))
}

fn build_simple(
    client: &mut dyn PlayerClient,
    grouping: &AlbumGrouping,
) -> Result<(AlbumMap, RebuildStats), LibraryError> {
    let mut group_tags = vec![Tag::AlbumArtist];
    if let Some(tag) = grouping.group_tag.filter(|tag| *tag != Tag::AlbumArtist) {
        group_tags.push(tag);
    }
    let rows = client.list_albums(&group_tags)?;
    let mut albums = AlbumMap::new();
    let mut stats = RebuildStats::default();
    for row in rows {
        let artist = group_value(&row.groups, Tag::AlbumArtist);
        let group = grouping
            .group_tag
            .map(|tag| group_value(&row.groups, tag));
        let Some(key) = compose_key(artist, &row.album, group) else {
            stats.skipped += 1;
            continue;
        };
        if albums.contains_key(&key) {
            continue;
        }
        let mut tags = TagMap::new();
        tags.insert(Tag::Album, vec![row.album.clone()]);
        for (tag, value) in &row.groups {
            if !value.is_empty() {
                tags.insert(*tag, vec![value.clone()]);
            }
        }
        albums.insert(key.clone(), Album::pending(key, tags));
    }
    stats.albums = albums.len();
    Ok((albums, stats))
}

fn group_value(groups: &[(Tag, String)], tag: Tag) -> &str {
    groups
        .iter()
        .find(|(group, _)| *group == tag)
        .map(|(_, value)| value.as_str())
        .unwrap_or_default()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use common::{Song, Tag};
    use player::{
        AlbumGroup, DbStats, PlayState, PlayerClient, ProtocolError, StickerEntry, Status,
    };

    use super::{AlbumCache, SEARCH_WINDOW};
    use crate::album::{AlbumGrouping, AlbumMode};
    use crate::LibraryError;

    /// Library-only player double.
    #[derive(Default)]
    struct LibraryPlayer {
        songs: Vec<Song>,
        albums: Vec<AlbumGroup>,
        searches: Vec<(usize, usize)>,
        fail: bool,
    }

    impl PlayerClient for LibraryPlayer {
        fn status(&mut self) -> Result<Status, ProtocolError> {
            Ok(Status {
                queue_length: 0,
                state: PlayState::Stop,
                song_id: None,
                song_pos: None,
            })
        }

        fn current_song(&mut self) -> Result<Option<Song>, ProtocolError> {
            Ok(None)
        }

        fn queue_songs(&mut self) -> Result<Vec<Song>, ProtocolError> {
            Ok(Vec::new())
        }

        fn add(&mut self, _uri: &str) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn play(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn playlist_songs(&mut self, _name: &str) -> Result<Vec<Song>, ProtocolError> {
            Ok(Vec::new())
        }

        fn search_songs(
            &mut self,
            _expression: &str,
            start: usize,
            end: usize,
        ) -> Result<Vec<Song>, ProtocolError> {
            if self.fail {
                return Err(ProtocolError::Closed);
            }
            self.searches.push((start, end));
            let end = end.min(self.songs.len());
            Ok(self.songs.get(start..end).map(|page| page.to_vec()).unwrap_or_default())
        }

        fn find_songs(&mut self, _expression: &str) -> Result<Vec<Song>, ProtocolError> {
            Ok(Vec::new())
        }

        fn list_albums(&mut self, _group_tags: &[Tag]) -> Result<Vec<AlbumGroup>, ProtocolError> {
            Ok(self.albums.clone())
        }

        fn stats(&mut self) -> Result<DbStats, ProtocolError> {
            Ok(DbStats::default())
        }

        fn sticker_find(&mut self, _name: &str) -> Result<Vec<StickerEntry>, ProtocolError> {
            Ok(Vec::new())
        }

        fn tag_types(&mut self) -> Result<Vec<Tag>, ProtocolError> {
            Ok(Tag::all().to_vec())
        }

        fn enable_tags(&mut self, _tags: &[Tag]) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn clear_error(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    fn track(index: usize, album: &str) -> Song {
        Song::new(format!("{}/{}.flac", album, index))
            .with_tag(Tag::AlbumArtist, "Artist")
            .with_tag(Tag::Album, album)
            .with_duration_secs(60)
    }

    #[test]
    fn read_fails_before_first_build() {
        let cache = AlbumCache::new(AlbumGrouping::default());
        assert!(matches!(
            cache.read(Duration::from_millis(10)),
            Err(LibraryError::CacheUnavailable)
        ));
    }

    #[test]
    fn advanced_rebuild_pages_and_aggregates() {
        let mut player = LibraryPlayer::default();
        for index in 0..SEARCH_WINDOW {
            player.songs.push(track(index, "Big"));
        }
        player.songs.push(track(0, "Small"));
        player.songs.push(Song::new("loose.flac").with_tag(Tag::Album, "Nameless"));

        let cache = AlbumCache::new(AlbumGrouping::default());
        let stats = cache.rebuild(&mut player).unwrap();
        assert_eq!(stats.songs, SEARCH_WINDOW + 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.albums, 2);
        assert_eq!(player.searches, vec![(0, 1000), (1000, 2000)]);

        let albums = cache.read(Duration::from_millis(10)).unwrap();
        let big = albums.values().find(|album| album.title() == "Big").unwrap();
        assert_eq!(big.song_count as usize, SEARCH_WINDOW);
        assert_eq!(big.uri, "Big/0.flac");
        drop(albums);
        assert!(!cache.is_building());
        assert!(cache.built_at().is_some());
    }

    #[test]
    fn simple_rebuild_leaves_uris_pending() {
        let mut player = LibraryPlayer::default();
        player.albums = vec![
            AlbumGroup {
                album: "One".to_string(),
                groups: vec![(Tag::AlbumArtist, "A".to_string())],
            },
            AlbumGroup {
                album: "One".to_string(),
                groups: vec![(Tag::AlbumArtist, String::new())],
            },
        ];
        let cache = AlbumCache::new(AlbumGrouping {
            mode: AlbumMode::Simple,
            group_tag: None,
        });
        let stats = cache.rebuild(&mut player).unwrap();
        assert_eq!(stats.albums, 1);
        assert_eq!(stats.skipped, 1);

        let key = cache.read(Duration::from_millis(10)).unwrap().keys().next().cloned().unwrap();
        assert!(cache.get(&key, Duration::from_millis(10)).unwrap().unwrap().is_uri_pending());
        assert!(cache.resolve_uri(&key, "A/One/01.flac"));
        assert!(!cache.resolve_uri(&key, "other.flac"));
        assert_eq!(
            cache.get(&key, Duration::from_millis(10)).unwrap().unwrap().uri,
            "A/One/01.flac"
        );
    }

    #[test]
    fn failed_rebuild_keeps_previous_map_and_clears_flag() {
        let cache = AlbumCache::new(AlbumGrouping::default());
        let mut player = LibraryPlayer::default();
        player.songs.push(track(1, "Kept"));
        cache.rebuild(&mut player).unwrap();

        player.fail = true;
        assert!(matches!(cache.rebuild(&mut player), Err(LibraryError::Protocol(_))));
        assert!(!cache.is_building());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_rebuild_is_rejected() {
        let cache = AlbumCache::new(AlbumGrouping::default());
        let ticket = cache.begin_build().unwrap();
        let mut player = LibraryPlayer::default();
        assert!(matches!(
            cache.rebuild(&mut player),
            Err(LibraryError::RebuildInProgress)
        ));
        drop(ticket);
        assert!(cache.rebuild(&mut player).is_ok());
    }

    #[test]
    fn readers_time_out_while_writer_holds_the_lock() {
        let cache = Arc::new(AlbumCache::new(AlbumGrouping::default()));
        cache.install(BTreeMap::new(), 1);
        let guard = cache.albums.write();
        let reader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.read(Duration::from_millis(20)).map(|albums| albums.len()))
        };
        let result = reader.join().unwrap();
        drop(guard);
        assert!(matches!(result, Err(LibraryError::CacheUnavailable)));
        assert_eq!(cache.read(Duration::from_millis(20)).unwrap().len(), 0);
    }
}
