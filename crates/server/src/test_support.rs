//! Scripted player for the server tests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{Song, Tag};
use jukebox::{
    Constraints, ControllerConfig, JukeboxController, JukeboxMode, JukeboxSettings, Notifier,
    SchedulerRuntime, ThreadDispatcher, WorkerContext,
};
use library::{AlbumCache, AlbumGrouping};
use parking_lot::Mutex;
use player::{
    AlbumGroup, Connector, DbStats, PlayState, PlayerClient, ProtocolError, StickerEntry, Status,
    DEFAULT_PARTITION,
};

#[derive(Default)]
struct Library {
    songs: Vec<Song>,
    queue: Vec<Song>,
    playing: bool,
    db_update: i64,
}

#[derive(Clone, Default)]
pub struct TestPlayer {
    library: Arc<Mutex<Library>>,
}

impl TestPlayer {
    pub fn with_songs(count: usize) -> Self {
        let player = Self::default();
        player.library.lock().songs = (0..count)
            .map(|index| {
                Song::new(format!("track{}.flac", index))
                    .with_tag(Tag::AlbumArtist, "Artist")
                    .with_tag(Tag::Album, format!("Album {}", index % 2))
            })
            .collect();
        player
    }

    pub fn queue_len(&self) -> usize {
        self.library.lock().queue.len()
    }

    pub fn set_db_update(&self, db_update: i64) {
        self.library.lock().db_update = db_update;
    }
}

impl PlayerClient for TestPlayer {
    fn status(&mut self) -> Result<Status, ProtocolError> {
        let library = self.library.lock();
        Ok(Status {
            queue_length: library.queue.len() as u32,
            state: if library.playing {
                PlayState::Play
            } else {
                PlayState::Stop
            },
            song_id: None,
            song_pos: None,
        })
    }

    fn current_song(&mut self) -> Result<Option<Song>, ProtocolError> {
        Ok(None)
    }

    fn queue_songs(&mut self) -> Result<Vec<Song>, ProtocolError> {
        Ok(self.library.lock().queue.clone())
    }

    fn add(&mut self, uri: &str) -> Result<(), ProtocolError> {
        self.library.lock().queue.push(Song::new(uri));
        Ok(())
    }

    fn play(&mut self) -> Result<(), ProtocolError> {
        self.library.lock().playing = true;
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
        let library = self.library.lock();
        let end = end.min(library.songs.len());
        Ok(library
            .songs
            .get(start..end)
            .map(|page| page.to_vec())
            .unwrap_or_default())
    }

    fn find_songs(&mut self, _expression: &str) -> Result<Vec<Song>, ProtocolError> {
        Ok(Vec::new())
    }

    fn list_albums(&mut self, _group_tags: &[Tag]) -> Result<Vec<AlbumGroup>, ProtocolError> {
        Ok(Vec::new())
    }

    fn stats(&mut self) -> Result<DbStats, ProtocolError> {
        let library = self.library.lock();
        Ok(DbStats {
            db_update: library.db_update,
            songs: library.songs.len() as u64,
            albums: 0,
        })
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

pub struct TestConnector {
    player: TestPlayer,
}

impl TestConnector {
    pub fn new(player: &TestPlayer) -> Self {
        Self {
            player: player.clone(),
        }
    }
}

impl Connector for TestConnector {
    fn connect(&self, _partition: &str) -> Result<Box<dyn PlayerClient>, ProtocolError> {
        Ok(Box::new(self.player.clone()))
    }
}

/// Controller with one `default` partition backed by real worker threads.
pub fn controller_with(
    player: &TestPlayer,
    mode: JukeboxMode,
    queue_length: u32,
) -> (JukeboxController, Arc<SchedulerRuntime>) {
    let connector: Arc<dyn Connector> = Arc::new(TestConnector::new(player));
    let cache = Arc::new(AlbumCache::new(AlbumGrouping::default()));
    let runtime = Arc::new(SchedulerRuntime::new());
    let dispatcher = Arc::new(ThreadDispatcher::new(
        Arc::clone(&runtime),
        WorkerContext {
            connector: Arc::clone(&connector),
            cache: Arc::clone(&cache),
            cache_timeout: Duration::from_millis(100),
            snapshot_path: None,
        },
    ));
    let mut controller = JukeboxController::new(
        connector,
        dispatcher,
        cache,
        Notifier::new(16),
        ControllerConfig::default(),
    );
    let settings = JukeboxSettings {
        mode,
        queue_length,
        constraints: Constraints::default(),
    };
    if let Err(err) = controller.add_partition(DEFAULT_PARTITION, settings) {
        panic!("adding test partition failed: {}", err);
    }
    (controller, runtime)
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
