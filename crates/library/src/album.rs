use std::collections::BTreeMap;

use common::{stable_id, Song, Tag, TagMap, Tagged};
use player::escape_filter_value;
use serde::{Deserialize, Serialize};

/// Placeholder URI for albums whose representative song has not been looked
/// up yet.
pub const ALBUM_URI_PENDING: &str = "albumid";

const MBID_LENGTH: usize = 36;

/// Tags copied from songs into the album record. Per-song tags such as
/// `Title` or `Track` are left out.
pub const ALBUM_TAGS: &[Tag] = &[
    Tag::Album,
    Tag::AlbumSort,
    Tag::AlbumArtist,
    Tag::AlbumArtistSort,
    Tag::Artist,
    Tag::Genre,
    Tag::Mood,
    Tag::Date,
    Tag::OriginalDate,
    Tag::Composer,
    Tag::Performer,
    Tag::Conductor,
    Tag::Ensemble,
    Tag::Grouping,
    Tag::Label,
    Tag::MusicBrainzArtistId,
    Tag::MusicBrainzAlbumId,
    Tag::MusicBrainzAlbumArtistId,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumMode {
    /// One grouped `list` query; album details are resolved lazily.
    Simple,
    /// Reads every song and aggregates album attributes.
    #[default]
    Advanced,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumGrouping {
    pub mode: AlbumMode,
    pub group_tag: Option<Tag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub key: String,
    pub uri: String,
    pub tags: TagMap,
    pub discs: u32,
    pub duration_ms: u64,
    pub song_count: u32,
    pub last_modified: i64,
    pub added: Option<i64>,
}

impl Album {
    pub fn from_song(key: String, song: &Song) -> Self {
        let mut tags = BTreeMap::new();
        for tag in ALBUM_TAGS {
            let values = dedup_values(song.tag_values(*tag));
            if !values.is_empty() {
                tags.insert(*tag, values);
            }
        }
        Self {
            key,
            uri: song.uri.clone(),
            tags,
            discs: song.tag_number(Tag::Disc).unwrap_or(1).max(1),
            duration_ms: u64::from(song.duration_ms),
            song_count: 1,
            last_modified: song.last_modified,
            added: song.added,
        }
    }

    /// Album known only by name, from a grouped listing.
    pub fn pending(key: String, tags: TagMap) -> Self {
        Self {
            key,
            uri: ALBUM_URI_PENDING.to_string(),
            tags,
            discs: 1,
            duration_ms: 0,
            song_count: 0,
            last_modified: 0,
            added: None,
        }
    }

    pub fn merge_song(&mut self, song: &Song) {
        for tag in ALBUM_TAGS {
            let incoming = song.tag_values(*tag);
            if incoming.is_empty() {
                continue;
            }
            let values = self.tags.entry(*tag).or_default();
            if values.is_empty() {
                values.extend(dedup_values(incoming));
                continue;
            }
            if !tag.is_multi_value() {
                continue;
            }
            for value in incoming {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        if let Some(disc) = song.tag_number(Tag::Disc) {
            self.discs = self.discs.max(disc);
        }
        self.last_modified = self.last_modified.max(song.last_modified);
        self.added = match (self.added, song.added) {
            (Some(current), Some(incoming)) => Some(current.min(incoming)),
            (current, incoming) => current.or(incoming),
        };
        self.duration_ms += u64::from(song.duration_ms);
        self.song_count += 1;
    }

    pub fn is_uri_pending(&self) -> bool {
        self.uri == ALBUM_URI_PENDING
    }

    pub fn title(&self) -> &str {
        self.first_tag(Tag::Album).unwrap_or_default()
    }

    pub fn artist(&self) -> &str {
        self.first_tag(Tag::AlbumArtist)
            .or_else(|| self.first_tag(Tag::Artist))
            .unwrap_or_default()
    }

    /// Filter expression that selects the songs of this album.
    pub fn filter_expression(&self, group_tag: Option<Tag>) -> String {
        if let Some(mbid) = self
            .first_tag(Tag::MusicBrainzAlbumId)
            .filter(|value| value.len() == MBID_LENGTH && *value == self.key)
        {
            return format!(
                "({} == '{}')",
                Tag::MusicBrainzAlbumId,
                escape_filter_value(mbid)
            );
        }
        let artist_tag = if self.tag_values(Tag::AlbumArtist).is_empty() {
            Tag::Artist
        } else {
            Tag::AlbumArtist
        };
        let mut expression = format!(
            "((Album == '{}') AND ({} == '{}')",
            escape_filter_value(self.title()),
            artist_tag,
            escape_filter_value(self.artist())
        );
        if let Some(tag) = group_tag {
            expression.push_str(&format!(
                " AND ({} == '{}')",
                tag,
                escape_filter_value(self.first_tag(tag).unwrap_or_default())
            ));
        }
        expression.push(')');
        expression
    }
}

impl Tagged for Album {
    fn tag_values(&self, tag: Tag) -> &[String] {
        self.tags.get(&tag).map(|values| values.as_slice()).unwrap_or(&[])
    }
}

/// Cache key for the album a song belongs to. `None` means the song lacks
/// the tags needed to place it and is counted as skipped.
pub fn album_key(song: &Song, grouping: &AlbumGrouping) -> Option<String> {
    if grouping.mode == AlbumMode::Advanced {
        if let Some(mbid) = song
            .first_tag(Tag::MusicBrainzAlbumId)
            .filter(|value| value.len() == MBID_LENGTH)
        {
            return Some(mbid.to_string());
        }
    }
    let artist = if song.tag_values(Tag::AlbumArtist).is_empty() {
        song.joined_tag(Tag::Artist)
    } else {
        song.joined_tag(Tag::AlbumArtist)
    };
    let album = song.first_tag(Tag::Album).unwrap_or_default();
    let group = grouping
        .group_tag
        .map(|tag| song.first_tag(tag).unwrap_or_default());
    compose_key(&artist, album, group)
}

pub fn compose_key(artist: &str, album: &str, group: Option<&str>) -> Option<String> {
    let artist = artist.trim();
    let album = album.trim();
    if artist.is_empty() || album.is_empty() {
        return None;
    }
    let mut input = format!("{}::{}", artist, album);
    if let Some(group) = group {
        input.push_str("::");
        input.push_str(group.trim());
    }
    Some(stable_id(&input))
}

/// Orders album songs by disc, then track, then URI.
pub fn sort_album_songs(songs: &mut [Song]) {
    songs.sort_by(|a, b| {
        let disc_a = a.tag_number(Tag::Disc).unwrap_or(1);
        let disc_b = b.tag_number(Tag::Disc).unwrap_or(1);
        disc_a
            .cmp(&disc_b)
            .then_with(|| {
                a.tag_number(Tag::Track)
                    .unwrap_or(0)
                    .cmp(&b.tag_number(Tag::Track).unwrap_or(0))
            })
            .then_with(|| a.uri.cmp(&b.uri))
    });
}

fn dedup_values(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}
