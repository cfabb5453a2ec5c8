use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Song, Tag};
use library::{
    save_cache, sort_album_songs, Album, AlbumCache, LibraryError, RebuildStats, SEARCH_WINDOW,
};
use player::Connector;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::constraints::{
    Constraints, StickerSnapshot, STICKER_DISLIKED, STICKER_LAST_PLAYED, STICKER_LIKE,
};
use crate::error::JukeboxError;
use crate::recovery::PartitionLink;
use crate::runtime::SchedulerRuntime;
use crate::selector::{select_albums, select_songs, BufferEntry, ExclusionSet};
use crate::state::{JukeboxMode, SongSource};

/// Matches every song that has a modification time, i.e. all of them.
const ALL_SONGS_EXPRESSION: &str = "(modified-since '0')";

/// How long a worker waits for its job to show up on the queue.
const PICKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable inputs of one refill. Built from controller state on the
/// event loop; the worker never sees the state itself.
#[derive(Clone, Debug)]
pub struct RefillRequest {
    pub generation: u64,
    pub mode: JukeboxMode,
    pub quantity: usize,
    pub exclusion: ExclusionSet,
    pub constraints: Constraints,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRequest {
    pub album: bool,
    pub source: SongSource,
    pub quantity: usize,
    pub play: bool,
}

#[derive(Clone, Debug)]
pub enum WorkerJob {
    Refill(RefillRequest),
    AddRandom(AddRequest),
    RebuildCache { force: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Refilled {
        generation: u64,
        requested: usize,
        entries: Vec<BufferEntry>,
    },
    Added {
        count: usize,
    },
    /// `None` when the cache was already newer than the library.
    CacheRebuilt {
        stats: Option<RebuildStats>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerResult {
    pub outcome: Result<JobOutcome, JukeboxError>,
}

/// Shared, read-only inputs of every worker.
pub struct WorkerContext {
    pub connector: Arc<dyn Connector>,
    pub cache: Arc<AlbumCache>,
    pub cache_timeout: Duration,
    pub snapshot_path: Option<PathBuf>,
}

/// Starts work for a job and returns the request id its result will carry.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, partition: &str, job: WorkerJob) -> Result<u64, JukeboxError>;
}

/// Runs every job on its own short-lived thread.
pub struct ThreadDispatcher {
    runtime: Arc<SchedulerRuntime>,
    context: Arc<WorkerContext>,
    next_id: AtomicU64,
}

impl ThreadDispatcher {
    pub fn new(runtime: Arc<SchedulerRuntime>, context: WorkerContext) -> Self {
        Self {
            runtime,
            context: Arc::new(context),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Dispatch for ThreadDispatcher {
    fn dispatch(&self, partition: &str, job: WorkerJob) -> Result<u64, JukeboxError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.runtime.jobs.push(job, id, partition);
        self.runtime.workers.register();

        let runtime = Arc::clone(&self.runtime);
        let context = Arc::clone(&self.context);
        let spawned = thread::Builder::new()
            .name(format!("jukebox-worker-{}", id))
            .spawn(move || {
                let _guard = runtime.workers.adopt();
                worker_main(&runtime, &context, id);
            });
        if let Err(err) = spawned {
            drop(self.runtime.workers.adopt());
            self.runtime.jobs.try_pop(id);
            error!("partition {}: spawning worker failed: {}", partition, err);
            return Err(JukeboxError::WorkerSpawnFailed(err.to_string()));
        }
        debug!("partition {}: dispatched job {}", partition, id);
        Ok(id)
    }
}

fn worker_main(runtime: &SchedulerRuntime, context: &WorkerContext, id: u64) {
    // An expired job was already answered by whoever expired it.
    let Some(item) = runtime.jobs.pop(PICKUP_TIMEOUT, id) else {
        warn!("worker {} found no job", id);
        return;
    };
    let outcome = run_job(&item.partition, item.payload, context, &mut rand::rng());
    if let Err(err) = &outcome {
        warn!("partition {}: job {} failed: {}", item.partition, id, err);
    }
    runtime
        .results
        .push(WorkerResult { outcome }, id, item.partition);
}

/// Executes one job against a private connection. Never panics on player
/// errors; they come back as the error outcome.
pub fn run_job<R: Rng + ?Sized>(
    partition: &str,
    job: WorkerJob,
    context: &WorkerContext,
    rng: &mut R,
) -> Result<JobOutcome, JukeboxError> {
    match job {
        WorkerJob::Refill(request) => refill(partition, request, context, rng),
        WorkerJob::AddRandom(request) => add_random(partition, request, context, rng),
        WorkerJob::RebuildCache { force } => rebuild_cache(partition, force, context),
    }
}

fn refill<R: Rng + ?Sized>(
    partition: &str,
    request: RefillRequest,
    context: &WorkerContext,
    rng: &mut R,
) -> Result<JobOutcome, JukeboxError> {
    let entries = match &request.mode {
        JukeboxMode::Album => {
            let albums = context.cache.read(context.cache_timeout)?;
            select_albums(
                &albums,
                request.quantity,
                &request.exclusion,
                &request.constraints,
                rng,
            )
        }
        JukeboxMode::Song(source) => {
            let mut link = PartitionLink::open(partition, Arc::clone(&context.connector))?;
            let pool = load_pool(&mut link, source)?;
            let stickers = load_stickers(&mut link, &request.constraints)?;
            select_songs(
                &pool,
                request.quantity,
                &request.exclusion,
                &request.constraints,
                &stickers,
                rng,
            )
        }
        other => {
            return Err(JukeboxError::InvalidRequest(format!(
                "{} mode has no refill",
                other.label()
            )))
        }
    };
    debug!(
        "partition {}: selected {} of {} requested",
        partition,
        entries.len(),
        request.quantity
    );
    Ok(JobOutcome::Refilled {
        generation: request.generation,
        requested: request.quantity,
        entries,
    })
}

fn add_random<R: Rng + ?Sized>(
    partition: &str,
    request: AddRequest,
    context: &WorkerContext,
    rng: &mut R,
) -> Result<JobOutcome, JukeboxError> {
    let mut link = PartitionLink::open(partition, Arc::clone(&context.connector))?;
    let constraints = Constraints::default();
    let mut count = 0;
    if request.album {
        let albums: Vec<Album> = {
            let albums = context.cache.read(context.cache_timeout)?;
            let picked = select_albums(
                &albums,
                request.quantity,
                &ExclusionSet::new(),
                &constraints,
                rng,
            );
            picked
                .iter()
                .filter_map(|entry| albums.get(&entry.key).cloned())
                .collect()
        };
        let group_tag = context.cache.grouping().group_tag;
        for album in &albums {
            count += add_album_songs(&mut link, album, group_tag)?;
        }
    } else {
        let pool = load_pool(&mut link, &request.source)?;
        let entries = select_songs(
            &pool,
            request.quantity,
            &ExclusionSet::new(),
            &constraints,
            &StickerSnapshot::default(),
            rng,
        );
        for entry in &entries {
            link.call(|client| client.add(&entry.key))?;
            count += 1;
        }
    }
    if request.play && count > 0 {
        link.call(|client| client.play())?;
    }
    info!("partition {}: added {} random entries", partition, count);
    Ok(JobOutcome::Added { count })
}

fn rebuild_cache(
    partition: &str,
    force: bool,
    context: &WorkerContext,
) -> Result<JobOutcome, JukeboxError> {
    let mut link = PartitionLink::open(partition, Arc::clone(&context.connector))?;
    if !force {
        if let Some(built_at) = context.cache.built_at() {
            let stats = link.call(|client| client.stats())?;
            if built_at > stats.db_update {
                info!("album cache is up to date");
                return Ok(JobOutcome::CacheRebuilt { stats: None });
            }
        }
    }
    let result = {
        let client = link.client_mut()?;
        context.cache.rebuild(client)
    };
    let stats = match result {
        Ok(stats) => stats,
        Err(LibraryError::Protocol(err)) => return Err(link.recover(Some(err))),
        Err(err) => return Err(err.into()),
    };
    if let Some(path) = &context.snapshot_path {
        if let Err(err) = save_cache(path, &context.cache) {
            warn!("writing album snapshot {} failed: {}", path.display(), err);
        }
    }
    Ok(JobOutcome::CacheRebuilt { stats: Some(stats) })
}

/// Adds every song of `album` in disc and track order.
pub(crate) fn add_album_songs(
    link: &mut PartitionLink,
    album: &Album,
    group_tag: Option<Tag>,
) -> Result<usize, JukeboxError> {
    let expression = album.filter_expression(group_tag);
    let mut songs = link.call(|client| client.find_songs(&expression))?;
    if songs.is_empty() {
        return Err(JukeboxError::AddFailed(format!(
            "album {} has no songs",
            album.title()
        )));
    }
    sort_album_songs(&mut songs);
    for song in &songs {
        link.call(|client| client.add(&song.uri))?;
    }
    Ok(songs.len())
}

fn load_pool(link: &mut PartitionLink, source: &SongSource) -> Result<Vec<Song>, JukeboxError> {
    match source {
        SongSource::Playlist(name) => link.call(|client| client.playlist_songs(name)),
        SongSource::Database => {
            let mut pool = Vec::new();
            let mut start = 0;
            loop {
                let page = link.call(|client| {
                    client.search_songs(ALL_SONGS_EXPRESSION, start, start + SEARCH_WINDOW)
                })?;
                let page_len = page.len();
                pool.extend(page);
                if page_len < SEARCH_WINDOW {
                    break;
                }
                start += SEARCH_WINDOW;
            }
            Ok(pool)
        }
    }
}

/// Reads the stickers the constraints need. A sticker query the player
/// rejects leaves that part of the snapshot empty.
fn load_stickers(
    link: &mut PartitionLink,
    constraints: &Constraints,
) -> Result<StickerSnapshot, JukeboxError> {
    if !constraints.needs_stickers() {
        return Ok(StickerSnapshot::default());
    }
    let mut stickers = StickerSnapshot {
        captured_at: unix_now(),
        ..StickerSnapshot::default()
    };
    if constraints.last_played_hours > 0 {
        let entries = sticker_entries(link, STICKER_LAST_PLAYED)?;
        stickers.last_played = entries
            .into_iter()
            .filter_map(|(uri, value)| value.parse().ok().map(|played| (uri, played)))
            .collect::<HashMap<String, i64>>();
    }
    if constraints.skip_disliked {
        let entries = sticker_entries(link, STICKER_LIKE)?;
        stickers.disliked = entries
            .into_iter()
            .filter(|(_, value)| value == STICKER_DISLIKED)
            .map(|(uri, _)| uri)
            .collect::<HashSet<String>>();
    }
    Ok(stickers)
}

fn sticker_entries(
    link: &mut PartitionLink,
    name: &str,
) -> Result<Vec<(String, String)>, JukeboxError> {
    match link.call(|client| client.sticker_find(name)) {
        Ok(entries) => Ok(entries
            .into_iter()
            .map(|entry| (entry.uri, entry.value))
            .collect()),
        Err(JukeboxError::ProtocolRecoverable(message)) => {
            debug!("sticker {} unavailable: {}", name, message);
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common::{Song, Tag};
    use library::{AlbumCache, AlbumGrouping, AlbumMap};
    use player::DEFAULT_PARTITION;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{run_job, AddRequest, JobOutcome, RefillRequest, WorkerContext, WorkerJob};
    use crate::constraints::Constraints;
    use crate::error::JukeboxError;
    use crate::selector::ExclusionSet;
    use crate::state::{JukeboxMode, SongSource};
    use crate::test_support::{FakeConnector, FakePlayer};

    fn library() -> Vec<Song> {
        (0..5)
            .map(|index| {
                Song::new(format!("song{}.flac", index))
                    .with_tag(Tag::AlbumArtist, format!("Artist {}", index))
                    .with_tag(Tag::Album, format!("Album {}", index))
                    .with_duration_secs(200)
            })
            .collect()
    }

    fn context(player: &FakePlayer) -> (WorkerContext, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new(player.clone()));
        let context = WorkerContext {
            connector: connector.clone(),
            cache: Arc::new(AlbumCache::new(AlbumGrouping::default())),
            cache_timeout: Duration::from_millis(50),
            snapshot_path: None,
        };
        (context, connector)
    }

    fn refill(mode: JukeboxMode, quantity: usize, exclusion: ExclusionSet, constraints: Constraints) -> WorkerJob {
        WorkerJob::Refill(RefillRequest {
            generation: 4,
            mode,
            quantity,
            exclusion,
            constraints,
        })
    }

    #[test]
    fn song_refill_skips_excluded_and_disliked_songs() {
        let player = FakePlayer::with_library(library());
        player.set_sticker("like", "song1.flac", "0");
        player.set_sticker("like", "song2.flac", "1");
        let (context, _) = context(&player);
        let mut exclusion = ExclusionSet::new();
        exclusion.insert("song0.flac", None);
        let constraints = Constraints {
            skip_disliked: true,
            ..Constraints::default()
        };

        let outcome = run_job(
            DEFAULT_PARTITION,
            refill(JukeboxMode::Song(SongSource::Database), 10, exclusion, constraints),
            &context,
            &mut StdRng::seed_from_u64(7),
        )
        .unwrap();
        let JobOutcome::Refilled {
            generation,
            requested,
            entries,
        } = outcome
        else {
            panic!("expected refill outcome");
        };
        assert_eq!(generation, 4);
        assert_eq!(requested, 10);
        let mut keys: Vec<String> = entries.into_iter().map(|entry| entry.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["song2.flac", "song3.flac", "song4.flac"]);
    }

    #[test]
    fn playlist_refill_draws_from_the_playlist() {
        let player = FakePlayer::with_library(library());
        player.set_playlist("evening", vec![Song::new("late.flac")]);
        let (context, _) = context(&player);
        let outcome = run_job(
            DEFAULT_PARTITION,
            refill(
                JukeboxMode::Song(SongSource::Playlist("evening".to_string())),
                3,
                ExclusionSet::new(),
                Constraints::default(),
            ),
            &context,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        let JobOutcome::Refilled { entries, .. } = outcome else {
            panic!("expected refill outcome");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "late.flac");
    }

    #[test]
    fn album_refill_needs_a_built_cache() {
        let player = FakePlayer::with_library(library());
        let (context, _) = context(&player);
        let err = run_job(
            DEFAULT_PARTITION,
            refill(JukeboxMode::Album, 2, ExclusionSet::new(), Constraints::default()),
            &context,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap_err();
        assert_eq!(err, JukeboxError::CacheUnavailable);
    }

    #[test]
    fn refused_connection_is_fatal() {
        let player = FakePlayer::with_library(library());
        let (context, connector) = context(&player);
        connector.refuse(true);
        let err = run_job(
            DEFAULT_PARTITION,
            refill(
                JukeboxMode::Song(SongSource::Database),
                2,
                ExclusionSet::new(),
                Constraints::default(),
            ),
            &context,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn random_add_queues_songs_and_plays() {
        let player = FakePlayer::with_library(library());
        let (context, _) = context(&player);
        let outcome = run_job(
            DEFAULT_PARTITION,
            WorkerJob::AddRandom(AddRequest {
                album: false,
                source: SongSource::Database,
                quantity: 2,
                play: true,
            }),
            &context,
            &mut StdRng::seed_from_u64(3),
        )
        .unwrap();
        assert_eq!(outcome, JobOutcome::Added { count: 2 });
        assert_eq!(player.queue_uris().len(), 2);
        assert_eq!(player.plays(), 1);
    }

    #[test]
    fn rebuild_is_skipped_while_cache_is_newer_than_library() {
        let player = FakePlayer::with_library(library());
        player.set_db_update(50);
        let (context, _) = context(&player);
        context.cache.install(AlbumMap::new(), 100);

        let outcome = run_job(
            DEFAULT_PARTITION,
            WorkerJob::RebuildCache { force: false },
            &context,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(outcome, JobOutcome::CacheRebuilt { stats: None });
        assert!(context.cache.is_empty());

        let outcome = run_job(
            DEFAULT_PARTITION,
            WorkerJob::RebuildCache { force: true },
            &context,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        let JobOutcome::CacheRebuilt { stats: Some(stats) } = outcome else {
            panic!("expected a rebuild");
        };
        assert_eq!(stats.albums, 5);
        assert_eq!(context.cache.len(), 5);
    }
}
