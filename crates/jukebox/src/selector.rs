use std::collections::HashSet;

use common::{Song, Tag, Tagged};
use library::{album_key, Album, AlbumGrouping, AlbumMap};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::constraints::{Constraints, StickerSnapshot};

/// A selected candidate waiting in the internal jukebox buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferEntry {
    /// Song URI in song mode, album key in album mode.
    pub key: String,
    /// Value of the uniqueness tag; empty when no tag is configured.
    pub uniq_value: String,
    pub song: Option<Song>,
}

impl BufferEntry {
    pub fn from_song(song: Song, uniq_tag: Option<Tag>) -> Self {
        Self {
            key: song.uri.clone(),
            uniq_value: uniq_value(&song, uniq_tag),
            song: Some(song),
        }
    }

    pub fn from_album(album: &Album, uniq_tag: Option<Tag>) -> Self {
        Self {
            key: album.key.clone(),
            uniq_value: uniq_value(album, uniq_tag),
            song: None,
        }
    }
}

pub fn uniq_value(item: &dyn Tagged, uniq_tag: Option<Tag>) -> String {
    uniq_tag.map(|tag| item.joined_tag(tag)).unwrap_or_default()
}

/// Keys and uniqueness values that a selection must not repeat: the real
/// queue, the last played songs and the internal buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExclusionSet {
    keys: HashSet<String>,
    values: HashSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, uniq_value: Option<String>) {
        self.keys.insert(key.into());
        if let Some(value) = uniq_value {
            self.values.insert(value);
        }
    }

    /// Adds a song under the key the given mode selects by.
    pub fn insert_song(
        &mut self,
        song: &Song,
        album_mode: Option<&AlbumGrouping>,
        uniq_tag: Option<Tag>,
    ) {
        let value = uniq_tag.map(|tag| song.joined_tag(tag));
        match album_mode {
            Some(grouping) => {
                if let Some(key) = album_key(song, grouping) {
                    self.insert(key, value);
                }
            }
            None => self.insert(song.uri.clone(), value),
        }
    }

    pub fn insert_entry(&mut self, entry: &BufferEntry, uniq_tag: Option<Tag>) {
        let value = uniq_tag.map(|_| entry.uniq_value.clone());
        self.insert(entry.key.clone(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn contains_value(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn collides(&self, key: &str, value: &str, uniq_tag: Option<Tag>) -> bool {
        self.contains_key(key) || (uniq_tag.is_some() && self.contains_value(value))
    }
}

/// Picks up to `quantity` songs uniformly at random from `pool`.
///
/// Songs are filtered by the include and exclude filters, then by duration,
/// the dislike sticker and the recency cutoff. The rest is shuffled and taken
/// in order while no two picks, and no pick and `exclusion`, share a key or
/// uniqueness value.
pub fn select_songs<R: Rng + ?Sized>(
    pool: &[Song],
    quantity: usize,
    exclusion: &ExclusionSet,
    constraints: &Constraints,
    stickers: &StickerSnapshot,
    rng: &mut R,
) -> Vec<BufferEntry> {
    let mut eligible: Vec<&Song> = pool
        .iter()
        .filter(|song| constraints.passes_filters(*song))
        .filter(|song| constraints.duration_allowed(song.duration_secs()))
        .filter(|song| !(constraints.skip_disliked && stickers.is_disliked(&song.uri)))
        .filter(|song| !stickers.played_within(&song.uri, constraints.last_played_hours))
        .collect();
    eligible.shuffle(rng);
    take_unique(
        eligible.into_iter().map(|song| {
            (
                song.uri.as_str(),
                uniq_value(song, constraints.uniq_tag),
                song,
            )
        }),
        quantity,
        exclusion,
        constraints.uniq_tag,
    )
    .into_iter()
    .map(|song| BufferEntry::from_song(song.clone(), constraints.uniq_tag))
    .collect()
}

/// Picks up to `quantity` albums from the cache. Duration and sticker
/// constraints do not apply to albums.
pub fn select_albums<R: Rng + ?Sized>(
    albums: &AlbumMap,
    quantity: usize,
    exclusion: &ExclusionSet,
    constraints: &Constraints,
    rng: &mut R,
) -> Vec<BufferEntry> {
    let mut eligible: Vec<&Album> = albums
        .values()
        .filter(|album| constraints.passes_filters(*album))
        .collect();
    eligible.shuffle(rng);
    take_unique(
        eligible.into_iter().map(|album| {
            (
                album.key.as_str(),
                uniq_value(album, constraints.uniq_tag),
                album,
            )
        }),
        quantity,
        exclusion,
        constraints.uniq_tag,
    )
    .into_iter()
    .map(|album| BufferEntry::from_album(album, constraints.uniq_tag))
    .collect()
}

fn take_unique<'a, T>(
    candidates: impl Iterator<Item = (&'a str, String, T)>,
    quantity: usize,
    exclusion: &ExclusionSet,
    uniq_tag: Option<Tag>,
) -> Vec<T> {
    let mut picked = Vec::new();
    let mut keys: HashSet<&str> = HashSet::new();
    let mut values: HashSet<String> = HashSet::new();
    for (key, value, item) in candidates {
        if picked.len() >= quantity {
            break;
        }
        if exclusion.collides(key, &value, uniq_tag) || keys.contains(key) {
            continue;
        }
        if uniq_tag.is_some() && values.contains(&value) {
            continue;
        }
        keys.insert(key);
        values.insert(value);
        picked.push(item);
    }
    picked
}
