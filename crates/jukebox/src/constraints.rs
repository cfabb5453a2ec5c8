use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use common::{Tag, Tagged};
use serde::{Deserialize, Serialize};

pub const STICKER_LAST_PLAYED: &str = "lastPlayed";
pub const STICKER_LIKE: &str = "like";
/// `like` sticker value meaning "disliked".
pub const STICKER_DISLIKED: &str = "0";

/// Predicate over songs or albums used by the include and exclude lists.
pub trait ItemFilter: Send + Sync + fmt::Debug {
    fn matches(&self, item: &dyn Tagged) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
}

/// Compares the values of one tag against a fixed string. `contains` and
/// `starts_with` ignore case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag: Tag,
    #[serde(default = "default_filter_op")]
    pub op: FilterOp,
    pub value: String,
}

fn default_filter_op() -> FilterOp {
    FilterOp::Equals
}

impl ItemFilter for TagFilter {
    fn matches(&self, item: &dyn Tagged) -> bool {
        let values = item.tag_values(self.tag);
        let needle = self.value.to_lowercase();
        match self.op {
            FilterOp::Equals => values.iter().any(|value| *value == self.value),
            FilterOp::NotEquals => values.iter().all(|value| *value != self.value),
            FilterOp::Contains => values
                .iter()
                .any(|value| value.to_lowercase().contains(&needle)),
            FilterOp::StartsWith => values
                .iter()
                .any(|value| value.to_lowercase().starts_with(&needle)),
        }
    }
}

/// Selection constraints. Shared read-only by one selection call.
#[derive(Clone, Debug, Default)]
pub struct Constraints {
    /// Items must match at least one include filter when any are set.
    pub include: Vec<Arc<dyn ItemFilter>>,
    pub exclude: Vec<Arc<dyn ItemFilter>>,
    pub uniq_tag: Option<Tag>,
    /// Songs played within this many hours are skipped; 0 disables.
    pub last_played_hours: u32,
    pub skip_disliked: bool,
    /// Inclusive bounds in seconds; 0 means unbounded.
    pub min_duration_secs: u32,
    pub max_duration_secs: u32,
}

impl Constraints {
    pub fn from_tag_filters(include: &[TagFilter], exclude: &[TagFilter]) -> Self {
        Self {
            include: include
                .iter()
                .cloned()
                .map(|filter| Arc::new(filter) as Arc<dyn ItemFilter>)
                .collect(),
            exclude: exclude
                .iter()
                .cloned()
                .map(|filter| Arc::new(filter) as Arc<dyn ItemFilter>)
                .collect(),
            ..Self::default()
        }
    }

    pub fn passes_filters(&self, item: &dyn Tagged) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|filter| filter.matches(item)) {
            return false;
        }
        !self.exclude.iter().any(|filter| filter.matches(item))
    }

    pub fn duration_allowed(&self, secs: u32) -> bool {
        if self.min_duration_secs > 0 && secs < self.min_duration_secs {
            return false;
        }
        if self.max_duration_secs > 0 && secs > self.max_duration_secs {
            return false;
        }
        true
    }

    pub fn needs_stickers(&self) -> bool {
        self.skip_disliked || self.last_played_hours > 0
    }
}

/// Sticker values captured before a selection run.
#[derive(Clone, Debug, Default)]
pub struct StickerSnapshot {
    pub last_played: HashMap<String, i64>,
    pub disliked: HashSet<String>,
    /// Unix time the snapshot was taken; recency is measured from here.
    pub captured_at: i64,
}

impl StickerSnapshot {
    pub fn is_disliked(&self, uri: &str) -> bool {
        self.disliked.contains(uri)
    }

    pub fn played_within(&self, uri: &str, hours: u32) -> bool {
        if hours == 0 {
            return false;
        }
        let cutoff = self.captured_at - i64::from(hours) * 3600;
        self.last_played
            .get(uri)
            .is_some_and(|played| *played > cutoff)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use common::{Song, Tag};

    use super::{Constraints, FilterOp, StickerSnapshot, TagFilter};

    fn song() -> Song {
        Song::new("a.flac")
            .with_tag(Tag::Genre, "Jazz")
            .with_tag(Tag::Genre, "Fusion")
            .with_tag(Tag::Artist, "Miles Davis")
    }

    #[test]
    fn include_needs_one_match_and_exclude_vetoes() {
        let jazz = TagFilter {
            tag: Tag::Genre,
            op: FilterOp::Equals,
            value: "Jazz".to_string(),
        };
        let rock = TagFilter {
            tag: Tag::Genre,
            op: FilterOp::Equals,
            value: "Rock".to_string(),
        };
        let miles = TagFilter {
            tag: Tag::Artist,
            op: FilterOp::StartsWith,
            value: "miles".to_string(),
        };
        let song = song();
        assert!(Constraints::from_tag_filters(&[rock.clone(), jazz.clone()], &[]).passes_filters(&song));
        assert!(!Constraints::from_tag_filters(&[rock.clone()], &[]).passes_filters(&song));
        assert!(!Constraints::from_tag_filters(&[jazz], &[miles]).passes_filters(&song));
        assert!(Constraints::default().passes_filters(&song));
    }

    #[test]
    fn not_equals_checks_every_value() {
        let filter = TagFilter {
            tag: Tag::Genre,
            op: FilterOp::NotEquals,
            value: "Fusion".to_string(),
        };
        let constraints = Constraints::from_tag_filters(&[filter], &[]);
        assert!(!constraints.passes_filters(&song()));
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        let constraints = Constraints {
            min_duration_secs: 60,
            max_duration_secs: 300,
            ..Constraints::default()
        };
        assert!(constraints.duration_allowed(60));
        assert!(constraints.duration_allowed(300));
        assert!(!constraints.duration_allowed(59));
        assert!(!constraints.duration_allowed(301));
        assert!(Constraints::default().duration_allowed(0));
    }

    #[test]
    fn stickers_are_needed_only_for_recency_or_dislikes() {
        assert!(!Constraints::default().needs_stickers());
        let recent = Constraints {
            last_played_hours: 24,
            ..Constraints::default()
        };
        assert!(recent.needs_stickers());
        let picky = Constraints {
            skip_disliked: true,
            ..Constraints::default()
        };
        assert!(picky.needs_stickers());
    }

    #[test]
    fn recency_uses_capture_time() {
        let stickers = StickerSnapshot {
            last_played: HashMap::from([
                ("recent.flac".to_string(), 10_000 - 1_800),
                ("old.flac".to_string(), 10_000 - 7_200),
            ]),
            captured_at: 10_000,
            ..StickerSnapshot::default()
        };
        assert!(stickers.played_within("recent.flac", 1));
        assert!(!stickers.played_within("old.flac", 1));
        assert!(!stickers.played_within("recent.flac", 0));
        assert!(!stickers.played_within("never.flac", 1));
    }
}
