use std::collections::VecDeque;

use common::Song;

/// Most recently played songs, newest first.
#[derive(Clone, Debug)]
pub struct LastPlayedWindow {
    capacity: usize,
    songs: VecDeque<Song>,
}

impl LastPlayedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            songs: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub fn record(&mut self, song: Song) {
        if self.capacity == 0 {
            return;
        }
        if self
            .songs
            .front()
            .is_some_and(|newest| newest.uri == song.uri)
        {
            return;
        }
        self.songs.push_front(song);
        self.songs.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use common::Song;

    use super::LastPlayedWindow;

    #[test]
    fn keeps_newest_entries_up_to_capacity() {
        let mut window = LastPlayedWindow::new(2);
        window.record(Song::new("a"));
        window.record(Song::new("b"));
        window.record(Song::new("c"));
        let uris: Vec<&str> = window.iter().map(|song| song.uri.as_str()).collect();
        assert_eq!(uris, vec!["c", "b"]);
    }

    #[test]
    fn repeated_current_song_is_recorded_once() {
        let mut window = LastPlayedWindow::new(5);
        window.record(Song::new("a"));
        window.record(Song::new("a"));
        assert_eq!(window.len(), 1);
    }
}
