use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constraints::Constraints;
use crate::last_played::LastPlayedWindow;
use crate::selector::BufferEntry;

/// Where song mode draws its candidates from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SongSource {
    #[default]
    Database,
    Playlist(String),
}

impl SongSource {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("database") {
            SongSource::Database
        } else {
            SongSource::Playlist(value.to_string())
        }
    }
}

impl fmt::Display for SongSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SongSource::Database => f.write_str("Database"),
            SongSource::Playlist(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum JukeboxMode {
    #[default]
    Off,
    Song(SongSource),
    Album,
    /// Runs the named trigger, which adds songs itself.
    Script(String),
}

impl JukeboxMode {
    pub fn label(&self) -> &'static str {
        match self {
            JukeboxMode::Off => "off",
            JukeboxMode::Song(_) => "song",
            JukeboxMode::Album => "album",
            JukeboxMode::Script(_) => "script",
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, JukeboxMode::Off)
    }
}

#[derive(Clone, Debug, Default)]
pub struct JukeboxSettings {
    pub mode: JukeboxMode,
    /// Target length of the player's queue.
    pub queue_length: u32,
    pub constraints: Constraints,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    /// Buffer length below which a top-up refill starts.
    pub low: usize,
    /// Buffer length a refill aims for.
    pub high: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub song: Watermarks,
    pub album: Watermarks,
    /// Most entries added to the queue in one cycle.
    pub add_max: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            song: Watermarks { low: 20, high: 50 },
            album: Watermarks { low: 10, high: 25 },
            add_max: 99,
        }
    }
}

impl BufferLimits {
    pub fn for_mode(&self, mode: &JukeboxMode) -> Watermarks {
        match mode {
            JukeboxMode::Album => self.album,
            _ => self.song,
        }
    }
}

/// Per-partition jukebox state, owned by the event loop.
#[derive(Debug)]
pub struct JukeboxState {
    pub settings: JukeboxSettings,
    pub buffer: VecDeque<BufferEntry>,
    /// A refill or script trigger is outstanding.
    pub filling: bool,
    /// Request id of the outstanding refill.
    pub request_id: Option<u64>,
    /// Entries owed to the queue once the outstanding refill arrives.
    pub pending_add: usize,
    /// Bumped on every mode change or clear; stale refill results carry an
    /// older value.
    pub generation: u64,
    pub last_error: Option<String>,
    pub last_song_id: Option<u32>,
    pub last_played: LastPlayedWindow,
}

impl JukeboxState {
    pub fn new(settings: JukeboxSettings, last_played_size: usize) -> Self {
        Self {
            settings,
            buffer: VecDeque::new(),
            filling: false,
            request_id: None,
            pending_add: 0,
            generation: 0,
            last_error: None,
            last_song_id: None,
            last_played: LastPlayedWindow::new(last_played_size),
        }
    }

    /// Drops the buffer and detaches any outstanding refill.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.filling = false;
        self.request_id = None;
        self.pending_add = 0;
        self.generation += 1;
    }
}
