//! In-memory player, connector and dispatcher for the jukebox tests.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Song, Tag, Tagged};
use parking_lot::Mutex;
use player::{
    escape_filter_value, AckError, AlbumGroup, Connector, DbStats, PlayState, PlayerClient,
    ProtocolError, StickerEntry, Status,
};

use crate::error::JukeboxError;
use crate::worker::{Dispatch, WorkerJob};

#[derive(Default)]
struct PlayerState {
    library: Vec<Song>,
    playlists: HashMap<String, Vec<Song>>,
    queue: Vec<Song>,
    stickers: HashMap<String, Vec<StickerEntry>>,
    state: Option<PlayState>,
    current: Option<(u32, Song)>,
    db_update: i64,
    broken: bool,
    ack_next_add: bool,
    reject_adds: bool,
    cleared_errors: usize,
    tag_enables: usize,
    unknown_tags: Vec<Tag>,
    enabled_tags: Vec<Tag>,
    plays: usize,
    status_calls: usize,
}

/// Player double whose clones share one state.
#[derive(Clone, Default)]
pub struct FakePlayer {
    state: Arc<Mutex<PlayerState>>,
}

impl FakePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(songs: Vec<Song>) -> Self {
        let player = Self::new();
        player.state.lock().library = songs;
        player
    }

    pub fn set_playlist(&self, name: &str, songs: Vec<Song>) {
        self.state.lock().playlists.insert(name.to_string(), songs);
    }

    pub fn set_queue(&self, songs: Vec<Song>) {
        self.state.lock().queue = songs;
    }

    pub fn set_current(&self, id: u32, song: Song) {
        self.state.lock().current = Some((id, song));
    }

    pub fn set_sticker(&self, name: &str, uri: &str, value: &str) {
        self.state
            .lock()
            .stickers
            .entry(name.to_string())
            .or_default()
            .push(StickerEntry {
                uri: uri.to_string(),
                value: value.to_string(),
            });
    }

    pub fn set_db_update(&self, db_update: i64) {
        self.state.lock().db_update = db_update;
    }

    pub fn set_playing(&self) {
        self.state.lock().state = Some(PlayState::Play);
    }

    pub fn set_broken(&self, broken: bool) {
        self.state.lock().broken = broken;
    }

    pub fn reject_adds(&self, reject: bool) {
        self.state.lock().reject_adds = reject;
    }

    pub fn fail_next_add_with_ack(&self) {
        self.state.lock().ack_next_add = true;
    }

    /// The player neither lists nor accepts `tag`.
    pub fn forget_tag(&self, tag: Tag) {
        self.state.lock().unknown_tags.push(tag);
    }

    pub fn enabled_tags(&self) -> Vec<Tag> {
        self.state.lock().enabled_tags.clone()
    }

    pub fn queue_uris(&self) -> Vec<String> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|song| song.uri.clone())
            .collect()
    }

    pub fn cleared_errors(&self) -> usize {
        self.state.lock().cleared_errors
    }

    pub fn tag_enables(&self) -> usize {
        self.state.lock().tag_enables
    }

    pub fn plays(&self) -> usize {
        self.state.lock().plays
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    fn check(&self) -> Result<parking_lot::MutexGuard<'_, PlayerState>, ProtocolError> {
        let state = self.state.lock();
        if state.broken {
            return Err(ProtocolError::Closed);
        }
        Ok(state)
    }
}

impl PlayerClient for FakePlayer {
    fn status(&mut self) -> Result<Status, ProtocolError> {
        let mut state = self.check()?;
        state.status_calls += 1;
        Ok(Status {
            queue_length: state.queue.len() as u32,
            state: state.state.unwrap_or(PlayState::Stop),
            song_id: state.current.as_ref().map(|(id, _)| *id),
            song_pos: None,
        })
    }

    fn current_song(&mut self) -> Result<Option<Song>, ProtocolError> {
        let state = self.check()?;
        Ok(state.current.as_ref().map(|(_, song)| song.clone()))
    }

    fn queue_songs(&mut self) -> Result<Vec<Song>, ProtocolError> {
        Ok(self.check()?.queue.clone())
    }

    fn add(&mut self, uri: &str) -> Result<(), ProtocolError> {
        let mut state = self.check()?;
        if state.ack_next_add || state.reject_adds {
            state.ack_next_add = false;
            return Err(ProtocolError::Server(AckError {
                code: 50,
                index: 0,
                command: "add".to_string(),
                message: "No such directory".to_string(),
            }));
        }
        let song = state
            .library
            .iter()
            .find(|song| song.uri == uri)
            .cloned()
            .unwrap_or_else(|| Song::new(uri));
        state.queue.push(song);
        Ok(())
    }

    fn play(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.check()?;
        state.plays += 1;
        state.state = Some(PlayState::Play);
        Ok(())
    }

    fn playlist_songs(&mut self, name: &str) -> Result<Vec<Song>, ProtocolError> {
        let state = self.check()?;
        Ok(state.playlists.get(name).cloned().unwrap_or_default())
    }

    fn search_songs(
        &mut self,
        _expression: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Song>, ProtocolError> {
        let state = self.check()?;
        let end = end.min(state.library.len());
        Ok(state
            .library
            .get(start..end)
            .map(|page| page.to_vec())
            .unwrap_or_default())
    }

    // Understands the `(Album == '...')` clause of album expressions.
    fn find_songs(&mut self, expression: &str) -> Result<Vec<Song>, ProtocolError> {
        let state = self.check()?;
        Ok(state
            .library
            .iter()
            .filter(|song| {
                song.first_tag(Tag::Album).is_some_and(|album| {
                    expression.contains(&format!("(Album == '{}')", escape_filter_value(album)))
                })
            })
            .cloned()
            .collect())
    }

    fn list_albums(&mut self, _group_tags: &[Tag]) -> Result<Vec<AlbumGroup>, ProtocolError> {
        self.check()?;
        Ok(Vec::new())
    }

    fn stats(&mut self) -> Result<DbStats, ProtocolError> {
        let state = self.check()?;
        Ok(DbStats {
            db_update: state.db_update,
            songs: state.library.len() as u64,
            albums: 0,
        })
    }

    fn sticker_find(&mut self, name: &str) -> Result<Vec<StickerEntry>, ProtocolError> {
        let state = self.check()?;
        Ok(state.stickers.get(name).cloned().unwrap_or_default())
    }

    fn tag_types(&mut self) -> Result<Vec<Tag>, ProtocolError> {
        let state = self.check()?;
        Ok(Tag::all()
            .iter()
            .copied()
            .filter(|tag| !state.unknown_tags.contains(tag))
            .collect())
    }

    fn enable_tags(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        let mut state = self.check()?;
        if let Some(tag) = tags.iter().find(|tag| state.unknown_tags.contains(tag)) {
            return Err(ProtocolError::Server(AckError {
                code: 2,
                index: 0,
                command: "tagtypes".to_string(),
                message: format!("Unknown tag type: {}", tag.protocol_name()),
            }));
        }
        state.tag_enables += 1;
        state.enabled_tags = tags.to_vec();
        Ok(())
    }

    fn clear_error(&mut self) -> Result<(), ProtocolError> {
        self.check()?.cleared_errors += 1;
        Ok(())
    }
}

/// Hands out clones of one `FakePlayer`.
pub struct FakeConnector {
    player: FakePlayer,
    refuse: Mutex<bool>,
    connects: Mutex<usize>,
}

impl FakeConnector {
    pub fn new(player: FakePlayer) -> Self {
        Self {
            player,
            refuse: Mutex::new(false),
            connects: Mutex::new(0),
        }
    }

    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock() = refuse;
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _partition: &str) -> Result<Box<dyn PlayerClient>, ProtocolError> {
        if *self.refuse.lock() || self.player.state.lock().broken {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }
        *self.connects.lock() += 1;
        Ok(Box::new(self.player.clone()))
    }
}

/// Records dispatched jobs instead of running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<(u64, String, WorkerJob)>>,
    fail: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn jobs(&self) -> Vec<(u64, String, WorkerJob)> {
        self.jobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, partition: &str, job: WorkerJob) -> Result<u64, JukeboxError> {
        if *self.fail.lock() {
            return Err(JukeboxError::WorkerSpawnFailed("no threads".to_string()));
        }
        let mut jobs = self.jobs.lock();
        let id = jobs.len() as u64 + 1;
        jobs.push((id, partition.to_string(), job));
        Ok(id)
    }
}
