use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tag {
    Artist,
    ArtistSort,
    Album,
    AlbumSort,
    AlbumArtist,
    AlbumArtistSort,
    Title,
    Track,
    Name,
    Genre,
    Mood,
    Date,
    OriginalDate,
    Composer,
    ComposerSort,
    Performer,
    Conductor,
    Work,
    Ensemble,
    Grouping,
    Comment,
    Disc,
    Label,
    MusicBrainzArtistId,
    MusicBrainzAlbumId,
    MusicBrainzAlbumArtistId,
    MusicBrainzTrackId,
    MusicBrainzReleaseTrackId,
    MusicBrainzWorkId,
}

const ALL_TAGS: &[Tag] = &[
    Tag::Artist,
    Tag::ArtistSort,
    Tag::Album,
    Tag::AlbumSort,
    Tag::AlbumArtist,
    Tag::AlbumArtistSort,
    Tag::Title,
    Tag::Track,
    Tag::Name,
    Tag::Genre,
    Tag::Mood,
    Tag::Date,
    Tag::OriginalDate,
    Tag::Composer,
    Tag::ComposerSort,
    Tag::Performer,
    Tag::Conductor,
    Tag::Work,
    Tag::Ensemble,
    Tag::Grouping,
    Tag::Comment,
    Tag::Disc,
    Tag::Label,
    Tag::MusicBrainzArtistId,
    Tag::MusicBrainzAlbumId,
    Tag::MusicBrainzAlbumArtistId,
    Tag::MusicBrainzTrackId,
    Tag::MusicBrainzReleaseTrackId,
    Tag::MusicBrainzWorkId,
];

impl Tag {
    pub fn all() -> &'static [Tag] {
        ALL_TAGS
    }

    /// Name as used on the player connection.
    pub fn protocol_name(self) -> &'static str {
        match self {
            Tag::Artist => "Artist",
            Tag::ArtistSort => "ArtistSort",
            Tag::Album => "Album",
            Tag::AlbumSort => "AlbumSort",
            Tag::AlbumArtist => "AlbumArtist",
            Tag::AlbumArtistSort => "AlbumArtistSort",
            Tag::Title => "Title",
            Tag::Track => "Track",
            Tag::Name => "Name",
            Tag::Genre => "Genre",
            Tag::Mood => "Mood",
            Tag::Date => "Date",
            Tag::OriginalDate => "OriginalDate",
            Tag::Composer => "Composer",
            Tag::ComposerSort => "ComposerSort",
            Tag::Performer => "Performer",
            Tag::Conductor => "Conductor",
            Tag::Work => "Work",
            Tag::Ensemble => "Ensemble",
            Tag::Grouping => "Grouping",
            Tag::Comment => "Comment",
            Tag::Disc => "Disc",
            Tag::Label => "Label",
            Tag::MusicBrainzArtistId => "MUSICBRAINZ_ARTISTID",
            Tag::MusicBrainzAlbumId => "MUSICBRAINZ_ALBUMID",
            Tag::MusicBrainzAlbumArtistId => "MUSICBRAINZ_ALBUMARTISTID",
            Tag::MusicBrainzTrackId => "MUSICBRAINZ_TRACKID",
            Tag::MusicBrainzReleaseTrackId => "MUSICBRAINZ_RELEASETRACKID",
            Tag::MusicBrainzWorkId => "MUSICBRAINZ_WORKID",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        let value = value.trim();
        ALL_TAGS
            .iter()
            .copied()
            .find(|tag| tag.protocol_name().eq_ignore_ascii_case(value))
    }

    /// Tags that may carry several values per song. Album aggregation unions
    /// these instead of keeping the first value.
    pub fn is_multi_value(self) -> bool {
        matches!(
            self,
            Tag::Artist
                | Tag::ArtistSort
                | Tag::AlbumArtist
                | Tag::AlbumArtistSort
                | Tag::Genre
                | Tag::Composer
                | Tag::ComposerSort
                | Tag::Performer
                | Tag::Conductor
                | Tag::Ensemble
                | Tag::MusicBrainzArtistId
                | Tag::MusicBrainzAlbumArtistId
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol_name())
    }
}

pub type TagMap = BTreeMap<Tag, Vec<String>>;

/// Anything that exposes tag values: songs from the player and aggregated
/// albums from the cache.
pub trait Tagged {
    fn tag_values(&self, tag: Tag) -> &[String];

    fn first_tag(&self, tag: Tag) -> Option<&str> {
        self.tag_values(tag).first().map(|value| value.as_str())
    }

    /// All values of `tag` joined the way the uniqueness check compares them.
    fn joined_tag(&self, tag: Tag) -> String {
        self.tag_values(tag).join(", ")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub uri: String,
    pub duration_ms: u32,
    pub last_modified: i64,
    #[serde(default)]
    pub added: Option<i64>,
    #[serde(default)]
    pub pos: Option<u32>,
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub tags: TagMap,
}

impl Song {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn push_tag(&mut self, tag: Tag, value: impl Into<String>) {
        self.tags.entry(tag).or_default().push(value.into());
    }

    pub fn with_tag(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.push_tag(tag, value);
        self
    }

    pub fn with_duration_secs(mut self, secs: u32) -> Self {
        self.duration_ms = secs.saturating_mul(1000);
        self
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_ms / 1000
    }

    /// Leading number of a tag such as `Disc: 2/3` or `Track: 07`.
    pub fn tag_number(&self, tag: Tag) -> Option<u32> {
        let value = self.first_tag(tag)?;
        let digits: String = value
            .trim()
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

impl Tagged for Song {
    fn tag_values(&self, tag: Tag) -> &[String] {
        self.tags.get(&tag).map(|values| values.as_slice()).unwrap_or(&[])
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
