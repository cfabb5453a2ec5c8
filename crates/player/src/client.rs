use std::io::{BufRead, Write};

use common::{Song, Tag};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ProtocolError;
use crate::response::{parse_greeting, parse_line, AckError, ResponseLine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Play,
    Pause,
    Stop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub queue_length: u32,
    pub state: PlayState,
    pub song_id: Option<u32>,
    pub song_pos: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Unix timestamp of the last library update.
    pub db_update: i64,
    pub songs: u64,
    pub albums: u64,
}

/// One row of a grouped `list Album` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlbumGroup {
    pub album: String,
    pub groups: Vec<(Tag, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StickerEntry {
    pub uri: String,
    pub value: String,
}

/// Blocking access to one player connection.
pub trait PlayerClient: Send {
    fn status(&mut self) -> Result<Status, ProtocolError>;
    fn current_song(&mut self) -> Result<Option<Song>, ProtocolError>;
    fn queue_songs(&mut self) -> Result<Vec<Song>, ProtocolError>;
    fn add(&mut self, uri: &str) -> Result<(), ProtocolError>;
    fn play(&mut self) -> Result<(), ProtocolError>;
    fn playlist_songs(&mut self, name: &str) -> Result<Vec<Song>, ProtocolError>;
    /// Songs matching `expression`, restricted to the `[start, end)` window.
    fn search_songs(
        &mut self,
        expression: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Song>, ProtocolError>;
    fn find_songs(&mut self, expression: &str) -> Result<Vec<Song>, ProtocolError>;
    fn list_albums(&mut self, group_tags: &[Tag]) -> Result<Vec<AlbumGroup>, ProtocolError>;
    fn stats(&mut self) -> Result<DbStats, ProtocolError>;
    fn sticker_find(&mut self, name: &str) -> Result<Vec<StickerEntry>, ProtocolError>;
    /// Tags the player currently reports; unknown names are dropped.
    fn tag_types(&mut self) -> Result<Vec<Tag>, ProtocolError>;
    fn enable_tags(&mut self, tags: &[Tag]) -> Result<(), ProtocolError>;
    /// Resets the error state left behind by a rejected command.
    fn clear_error(&mut self) -> Result<(), ProtocolError>;
}

pub struct MpdClient<R, W> {
    reader: R,
    writer: W,
    version: String,
    pending_error: Option<AckError>,
    broken: bool,
}

impl<R: BufRead, W: Write> MpdClient<R, W> {
    /// Reads the greeting and returns a ready client.
    pub fn handshake(mut reader: R, writer: W) -> Result<Self, ProtocolError> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(ProtocolError::Closed);
        }
        let version = parse_greeting(&line)?;
        debug!("player greeting, protocol {}", version);
        Ok(Self {
            reader,
            writer,
            version,
            pending_error: None,
            broken: false,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn password(&mut self, password: &str) -> Result<(), ProtocolError> {
        self.command(&format!("password {}", quote_argument(password)))
            .map(|_| ())
    }

    pub fn switch_partition(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.command(&format!("partition {}", quote_argument(name)))
            .map(|_| ())
    }

    fn command(&mut self, line: &str) -> Result<Vec<(String, String)>, ProtocolError> {
        if self.broken {
            return Err(ProtocolError::NotConnected);
        }
        if let Some(ack) = &self.pending_error {
            return Err(ProtocolError::Server(ack.clone()));
        }
        match self.exchange(line) {
            Ok(pairs) => Ok(pairs),
            Err(ProtocolError::Server(ack)) => {
                self.pending_error = Some(ack.clone());
                Err(ProtocolError::Server(ack))
            }
            Err(err) => {
                self.broken = true;
                Err(err)
            }
        }
    }

    fn exchange(&mut self, line: &str) -> Result<Vec<(String, String)>, ProtocolError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        let mut pairs = Vec::new();
        let mut buffer = String::new();
        loop {
            buffer.clear();
            if self.reader.read_line(&mut buffer)? == 0 {
                return Err(ProtocolError::Closed);
            }
            match parse_line(&buffer)? {
                ResponseLine::Ok => return Ok(pairs),
                ResponseLine::ListOk => continue,
                ResponseLine::Ack(ack) => return Err(ProtocolError::Server(ack)),
                ResponseLine::Pair { name, value } => pairs.push((name, value)),
            }
        }
    }

    fn song_command(&mut self, line: &str) -> Result<Vec<Song>, ProtocolError> {
        let pairs = self.command(line)?;
        Ok(parse_songs(pairs))
    }
}

impl<R, W> PlayerClient for MpdClient<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn status(&mut self) -> Result<Status, ProtocolError> {
        let pairs = self.command("status")?;
        let mut status = Status {
            queue_length: 0,
            state: PlayState::Stop,
            song_id: None,
            song_pos: None,
        };
        for (name, value) in pairs {
            match name.as_str() {
                "playlistlength" => status.queue_length = parse_number(&name, &value)?,
                "state" => {
                    status.state = match value.as_str() {
                        "play" => PlayState::Play,
                        "pause" => PlayState::Pause,
                        _ => PlayState::Stop,
                    }
                }
                "songid" => status.song_id = Some(parse_number(&name, &value)?),
                "song" => status.song_pos = Some(parse_number(&name, &value)?),
                _ => {}
            }
        }
        Ok(status)
    }

    fn current_song(&mut self) -> Result<Option<Song>, ProtocolError> {
        Ok(self.song_command("currentsong")?.into_iter().next())
    }

    fn queue_songs(&mut self) -> Result<Vec<Song>, ProtocolError> {
        self.song_command("playlistinfo")
    }

    fn add(&mut self, uri: &str) -> Result<(), ProtocolError> {
        self.command(&format!("add {}", quote_argument(uri)))
            .map(|_| ())
    }

    fn play(&mut self) -> Result<(), ProtocolError> {
        self.command("play").map(|_| ())
    }

    fn playlist_songs(&mut self, name: &str) -> Result<Vec<Song>, ProtocolError> {
        self.song_command(&format!("listplaylistinfo {}", quote_argument(name)))
    }

    fn search_songs(
        &mut self,
        expression: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<Song>, ProtocolError> {
        self.song_command(&format!(
            "search {} window {}:{}",
            quote_argument(expression),
            start,
            end
        ))
    }

    fn find_songs(&mut self, expression: &str) -> Result<Vec<Song>, ProtocolError> {
        self.song_command(&format!("find {}", quote_argument(expression)))
    }

    fn list_albums(&mut self, group_tags: &[Tag]) -> Result<Vec<AlbumGroup>, ProtocolError> {
        let mut line = String::from("list Album");
        for tag in group_tags {
            line.push_str(" group ");
            line.push_str(tag.protocol_name());
        }
        let pairs = self.command(&line)?;
        let mut current: Vec<(Tag, String)> = group_tags
            .iter()
            .map(|tag| (*tag, String::new()))
            .collect();
        let mut albums = Vec::new();
        for (name, value) in pairs {
            if name.eq_ignore_ascii_case("Album") {
                albums.push(AlbumGroup {
                    album: value,
                    groups: current.clone(),
                });
                continue;
            }
            let Some(tag) = Tag::from_name(&name) else {
                continue;
            };
            if let Some(slot) = current.iter_mut().find(|(group, _)| *group == tag) {
                slot.1 = value;
            }
        }
        Ok(albums)
    }

    fn stats(&mut self) -> Result<DbStats, ProtocolError> {
        let pairs = self.command("stats")?;
        let mut stats = DbStats::default();
        for (name, value) in pairs {
            match name.as_str() {
                "db_update" => stats.db_update = parse_number(&name, &value)?,
                "songs" => stats.songs = parse_number(&name, &value)?,
                "albums" => stats.albums = parse_number(&name, &value)?,
                _ => {}
            }
        }
        Ok(stats)
    }

    fn sticker_find(&mut self, name: &str) -> Result<Vec<StickerEntry>, ProtocolError> {
        let pairs = self.command(&format!("sticker find song \"\" {}", quote_argument(name)))?;
        let prefix = format!("{}=", name);
        let mut entries = Vec::new();
        let mut uri: Option<String> = None;
        for (key, value) in pairs {
            match key.as_str() {
                "file" => uri = Some(value),
                "sticker" => {
                    if let (Some(uri), Some(value)) = (uri.take(), value.strip_prefix(&prefix)) {
                        entries.push(StickerEntry {
                            uri,
                            value: value.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(entries)
    }

    fn tag_types(&mut self) -> Result<Vec<Tag>, ProtocolError> {
        let pairs = self.command("tagtypes")?;
        let mut tags = Vec::new();
        for (name, value) in pairs {
            if !name.eq_ignore_ascii_case("tagtype") {
                continue;
            }
            if let Some(tag) = Tag::from_name(&value) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        Ok(tags)
    }

    fn enable_tags(&mut self, tags: &[Tag]) -> Result<(), ProtocolError> {
        self.command("tagtypes clear")?;
        if tags.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = tags.iter().map(|tag| tag.protocol_name()).collect();
        self.command(&format!("tagtypes enable {}", names.join(" ")))
            .map(|_| ())
    }

    fn clear_error(&mut self) -> Result<(), ProtocolError> {
        if self.broken {
            return Err(ProtocolError::NotConnected);
        }
        self.pending_error = None;
        Ok(())
    }
}

/// Double-quotes a command argument.
pub fn quote_argument(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Escapes a value embedded in a single- or double-quoted filter expression.
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\'' | '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Groups response pairs into songs. A `file` pair starts a new song;
/// directory and playlist entries are skipped.
pub fn parse_songs(pairs: Vec<(String, String)>) -> Vec<Song> {
    let mut songs = Vec::new();
    let mut current: Option<Song> = None;
    let mut seconds_only = true;
    for (name, value) in pairs {
        match name.as_str() {
            "file" => {
                songs.extend(current.take());
                current = Some(Song::new(value));
                seconds_only = true;
                continue;
            }
            "directory" | "playlist" => {
                songs.extend(current.take());
                continue;
            }
            _ => {}
        }
        let Some(song) = current.as_mut() else {
            continue;
        };
        match name.as_str() {
            "duration" => {
                if let Ok(secs) = value.parse::<f64>() {
                    song.duration_ms = (secs * 1000.0).round() as u32;
                    seconds_only = false;
                }
            }
            "Time" => {
                if seconds_only {
                    if let Ok(secs) = value.parse::<u32>() {
                        song.duration_ms = secs.saturating_mul(1000);
                    }
                }
            }
            "Last-Modified" => song.last_modified = parse_timestamp(&value).unwrap_or(0),
            "Added" => song.added = parse_timestamp(&value),
            "Pos" => song.pos = value.parse().ok(),
            "Id" => song.id = value.parse().ok(),
            _ => {
                if let Some(tag) = Tag::from_name(&name) {
                    song.push_tag(tag, value);
                }
            }
        }
    }
    songs.extend(current);
    songs
}

fn parse_timestamp(value: &str) -> Option<i64> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(|stamp| stamp.unix_timestamp())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ProtocolError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::Parse(format!("{}: {}", name, value)))
}
