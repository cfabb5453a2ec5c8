use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Song;
use library::{sort_album_songs, Album, AlbumCache, AlbumGrouping};
use player::{Connector, PlayState, DEFAULT_PARTITION};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::JukeboxError;
use crate::notify::{NotificationKind, Notifier};
use crate::queue::WorkItem;
use crate::recovery::PartitionLink;
use crate::selector::{BufferEntry, ExclusionSet};
use crate::state::{BufferLimits, JukeboxMode, JukeboxSettings, JukeboxState, SongSource};
use crate::worker::{add_album_songs, AddRequest, Dispatch, JobOutcome, RefillRequest, WorkerJob, WorkerResult};

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub limits: BufferLimits,
    pub last_played_size: usize,
    pub reconnect_delay: Duration,
    /// How long display paths wait for the album cache read lock.
    pub cache_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            limits: BufferLimits::default(),
            last_played_size: 50,
            reconnect_delay: Duration::from_secs(5),
            cache_timeout: Duration::from_millis(100),
        }
    }
}

/// Result of a job somebody outside the controller is waiting for.
#[derive(Debug)]
pub struct Completion {
    pub request_id: u64,
    pub partition: String,
    pub outcome: Result<JobOutcome, JukeboxError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PartitionSummary {
    pub name: String,
    pub mode: &'static str,
    pub source: Option<String>,
    pub queue_length: u32,
    pub buffered: usize,
    pub filling: bool,
    pub connected: bool,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ListEntry {
    pub position: usize,
    pub key: String,
    pub uniq_value: String,
    pub song: Option<Song>,
    pub album: Option<Album>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JukeboxList {
    pub total: usize,
    pub offset: usize,
    pub entries: Vec<ListEntry>,
}

struct Partition {
    state: JukeboxState,
    link: PartitionLink,
}

/// Owns every partition's jukebox state. Lives on the event loop thread;
/// workers only ever see the plain data in their job.
pub struct JukeboxController {
    partitions: BTreeMap<String, Partition>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<dyn Dispatch>,
    cache: Arc<AlbumCache>,
    notifier: Notifier,
    config: ControllerConfig,
    cache_request: Option<u64>,
}

impl JukeboxController {
    pub fn new(
        connector: Arc<dyn Connector>,
        dispatcher: Arc<dyn Dispatch>,
        cache: Arc<AlbumCache>,
        notifier: Notifier,
        config: ControllerConfig,
    ) -> Self {
        Self {
            partitions: BTreeMap::new(),
            connector,
            dispatcher,
            cache,
            notifier,
            config,
            cache_request: None,
        }
    }

    pub fn add_partition(
        &mut self,
        name: &str,
        settings: JukeboxSettings,
    ) -> Result<(), JukeboxError> {
        if self.partitions.contains_key(name) {
            return Err(JukeboxError::InvalidRequest(format!(
                "partition {} already exists",
                name
            )));
        }
        let mut link = PartitionLink::new(
            name,
            Arc::clone(&self.connector),
            self.config.reconnect_delay,
        );
        let mut state = JukeboxState::new(settings, self.config.last_played_size);
        match link.connect() {
            Ok(()) => self.notifier.send(name, NotificationKind::Connected),
            Err(err) => {
                state.last_error = Some(err.to_string());
                self.notifier.send(name, NotificationKind::Disconnected);
            }
        }
        info!(
            "partition {}: jukebox mode {}",
            name,
            state.settings.mode.label()
        );
        self.partitions
            .insert(name.to_string(), Partition { state, link });
        Ok(())
    }

    /// Drops the partition. Results still in flight for it are discarded
    /// when they arrive.
    pub fn remove_partition(&mut self, name: &str) -> Result<(), JukeboxError> {
        self.partitions
            .remove(name)
            .ok_or_else(|| JukeboxError::UnknownPartition(name.to_string()))?;
        self.notifier.send(name, NotificationKind::Disconnected);
        Ok(())
    }

    pub fn summaries(&self) -> Vec<PartitionSummary> {
        self.partitions
            .iter()
            .map(|(name, partition)| {
                let state = &partition.state;
                PartitionSummary {
                    name: name.clone(),
                    mode: state.settings.mode.label(),
                    source: match &state.settings.mode {
                        JukeboxMode::Song(source) => Some(source.to_string()),
                        JukeboxMode::Script(script) => Some(script.clone()),
                        _ => None,
                    },
                    queue_length: state.settings.queue_length,
                    buffered: state.buffer.len(),
                    filling: state.filling,
                    connected: partition.link.is_connected(),
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    pub fn settings(&self, name: &str) -> Result<&JukeboxSettings, JukeboxError> {
        Ok(&self.partition(name)?.state.settings)
    }

    /// Switches the jukebox mode. The buffer and any outstanding refill are
    /// discarded.
    pub fn set_mode(&mut self, name: &str, settings: JukeboxSettings) -> Result<(), JukeboxError> {
        let partition = self.partition_mut(name)?;
        partition.state.reset();
        partition.state.settings = settings;
        partition.state.last_error = None;
        info!(
            "partition {}: jukebox mode {}",
            name,
            partition.state.settings.mode.label()
        );
        self.notifier.send(name, NotificationKind::JukeboxUpdated);
        if let Err(err) = self.run(name) {
            self.record_error(name, &err);
        }
        Ok(())
    }

    /// One controller cycle: tops the player's queue up to its target
    /// length from the buffer or starts a refill.
    pub fn run(&mut self, name: &str) -> Result<(), JukeboxError> {
        let limits = self.config.limits;
        let grouping = self.cache.grouping();
        let cache_timeout = self.config.cache_timeout;
        let partition = self
            .partitions
            .get_mut(name)
            .ok_or_else(|| JukeboxError::UnknownPartition(name.to_string()))?;
        let mode = partition.state.settings.mode.clone();
        if mode.is_off() || partition.state.filling || !partition.link.is_connected() {
            return Ok(());
        }

        let status = partition.link.call(|client| client.status())?;
        track_current(partition, status.song_id)?;
        let target = partition.state.settings.queue_length as usize;
        let length = status.queue_length as usize;
        if length >= target {
            return Ok(());
        }
        let need = target.saturating_sub(length).max(1).min(limits.add_max.max(1));

        if let JukeboxMode::Script(script) = &mode {
            partition.state.filling = true;
            debug!("partition {}: triggering {}", name, script);
            self.notifier
                .send(name, NotificationKind::ScriptTriggered(script.clone()));
            return Ok(());
        }

        let queue = partition.link.call(|client| client.queue_songs())?;
        let mut base = history_exclusion(&partition.state, &queue, &grouping);
        prune_buffer(&mut partition.state, &base);

        if partition.state.buffer.len() >= need {
            let playing = status.state == PlayState::Play;
            let added = add_from_buffer(partition, need, !playing, &self.cache, cache_timeout)?;
            debug!("partition {}: added {} entries from buffer", name, added.len());
            let uniq_tag = partition.state.settings.constraints.uniq_tag;
            for entry in &added {
                base.insert_entry(entry, uniq_tag);
            }
            self.notifier.send(name, NotificationKind::JukeboxUpdated);
            let low = limits.for_mode(&mode).low;
            if partition.state.buffer.len() < low {
                let exclusion = full_exclusion(&partition.state, base);
                dispatch_refill(self.dispatcher.as_ref(), name, partition, &limits, exclusion, 0)?;
            }
            return Ok(());
        }

        partition.state.pending_add = need;
        let exclusion = full_exclusion(&partition.state, base);
        dispatch_refill(self.dispatcher.as_ref(), name, partition, &limits, exclusion, need)
    }

    /// Runs a cycle on every partition; failures are recorded per partition.
    pub fn run_all(&mut self) {
        let names: Vec<String> = self.partitions.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.run(&name) {
                self.record_error(&name, &err);
            }
        }
    }

    /// Adds random songs or albums right away, without constraints. Returns
    /// the request id the `Added` result will carry.
    pub fn add_now(
        &mut self,
        name: &str,
        quantity: usize,
        album: bool,
        source: SongSource,
        play: bool,
    ) -> Result<u64, JukeboxError> {
        self.partition(name)?;
        if quantity == 0 {
            return Err(JukeboxError::InvalidRequest(
                "quantity must be at least 1".to_string(),
            ));
        }
        self.dispatcher.dispatch(
            name,
            WorkerJob::AddRandom(AddRequest {
                album,
                source,
                quantity,
                play,
            }),
        )
    }

    /// Empties the buffer. A refill already in flight is ignored when it
    /// returns.
    pub fn clear(&mut self, name: &str) -> Result<(), JukeboxError> {
        self.partition_mut(name)?.state.reset();
        self.notifier.send(name, NotificationKind::JukeboxUpdated);
        Ok(())
    }

    /// Applies a worker result. Refill results are consumed here; anything
    /// else is handed back for whoever waits on its request id.
    pub fn handle_result(&mut self, item: WorkItem<WorkerResult>) -> Option<Completion> {
        let WorkItem {
            payload,
            id,
            partition: name,
            ..
        } = item;

        if self.cache_request == Some(id) {
            self.cache_request = None;
            match &payload.outcome {
                Ok(_) => self.notifier.send(&name, NotificationKind::CacheFinished),
                Err(err) => self
                    .notifier
                    .send(&name, NotificationKind::CacheError(err.to_string())),
            }
            return Some(Completion {
                request_id: id,
                partition: name,
                outcome: payload.outcome,
            });
        }

        let is_refill = self
            .partitions
            .get(&name)
            .is_some_and(|partition| partition.state.request_id == Some(id));
        if !is_refill {
            if let Err(err) = &payload.outcome {
                if err.is_fatal() {
                    if let Some(partition) = self.partitions.get_mut(&name) {
                        partition.link.fail(&err.to_string());
                    }
                }
            }
            return Some(Completion {
                request_id: id,
                partition: name,
                outcome: payload.outcome,
            });
        }

        if let Err(err) = self.apply_refill(&name, payload.outcome) {
            self.record_error(&name, &err);
        }
        None
    }

    fn apply_refill(
        &mut self,
        name: &str,
        outcome: Result<JobOutcome, JukeboxError>,
    ) -> Result<(), JukeboxError> {
        let cache_timeout = self.config.cache_timeout;
        let partition = self
            .partitions
            .get_mut(name)
            .ok_or_else(|| JukeboxError::UnknownPartition(name.to_string()))?;
        partition.state.filling = false;
        partition.state.request_id = None;
        let (generation, requested, entries) = match outcome {
            Ok(JobOutcome::Refilled {
                generation,
                requested,
                entries,
            }) => (generation, requested, entries),
            Ok(other) => {
                debug!("partition {}: unexpected refill outcome {:?}", name, other);
                return Ok(());
            }
            Err(err) => {
                partition.state.pending_add = 0;
                if err.is_fatal() {
                    partition.link.fail(&err.to_string());
                    self.notifier.send(name, NotificationKind::Disconnected);
                }
                return Err(err);
            }
        };
        if generation != partition.state.generation {
            debug!("partition {}: dropping stale refill", name);
            return Ok(());
        }

        let selected = entries.len();
        for entry in entries {
            if !partition.state.buffer.iter().any(|buffered| buffered.key == entry.key) {
                partition.state.buffer.push_back(entry);
            }
        }
        let mut underfilled = None;
        if selected < requested {
            underfilled = Some(JukeboxError::SelectionUnderfilled {
                requested,
                selected,
            });
        } else {
            partition.state.last_error = None;
        }

        let pending = std::mem::take(&mut partition.state.pending_add);
        let count = pending.min(partition.state.buffer.len());
        if count > 0 {
            let status = partition.link.call(|client| client.status())?;
            let playing = status.state == PlayState::Play;
            add_from_buffer(partition, count, !playing, &self.cache, cache_timeout)?;
        }
        self.notifier.send(name, NotificationKind::JukeboxUpdated);
        match underfilled {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn list(
        &mut self,
        name: &str,
        offset: usize,
        limit: usize,
    ) -> Result<JukeboxList, JukeboxError> {
        let cache = Arc::clone(&self.cache);
        let cache_timeout = self.config.cache_timeout;
        let group_tag = cache.grouping().group_tag;
        let partition = self.partition_mut(name)?;
        let album_mode = partition.state.settings.mode == JukeboxMode::Album;
        let total = partition.state.buffer.len();
        let window: Vec<(usize, BufferEntry)> = partition
            .state
            .buffer
            .iter()
            .cloned()
            .enumerate()
            .skip(offset)
            .take(limit)
            .collect();

        let mut entries = Vec::with_capacity(window.len());
        for (position, entry) in window {
            let album = if album_mode {
                match cache.get(&entry.key, cache_timeout) {
                    Ok(Some(album)) => Some(resolve_album(&mut partition.link, &cache, album, group_tag)),
                    Ok(None) => None,
                    Err(err) => {
                        debug!("partition {}: album lookup failed: {}", name, err);
                        None
                    }
                }
            } else {
                None
            };
            entries.push(ListEntry {
                position,
                key: entry.key,
                uniq_value: entry.uniq_value,
                song: entry.song,
                album,
            });
        }
        Ok(JukeboxList {
            total,
            offset,
            entries,
        })
    }

    /// Removes buffer entries by position. All positions must exist.
    pub fn remove_entries(&mut self, name: &str, positions: &[usize]) -> Result<usize, JukeboxError> {
        let partition = self.partition_mut(name)?;
        let length = partition.state.buffer.len();
        if let Some(bad) = positions.iter().find(|position| **position >= length) {
            return Err(JukeboxError::InvalidRequest(format!(
                "position {} out of range",
                bad
            )));
        }
        let mut positions = positions.to_vec();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        for position in &positions {
            partition.state.buffer.remove(*position);
        }
        self.notifier.send(name, NotificationKind::JukeboxUpdated);
        Ok(positions.len())
    }

    /// Completes a script trigger: adds the URIs it produced and allows the
    /// next trigger.
    pub fn script_result(&mut self, name: &str, uris: &[String]) -> Result<usize, JukeboxError> {
        let partition = self.partition_mut(name)?;
        if !matches!(partition.state.settings.mode, JukeboxMode::Script(_)) {
            return Err(JukeboxError::InvalidRequest(
                "jukebox is not in script mode".to_string(),
            ));
        }
        partition.state.filling = false;
        let mut added = 0;
        for uri in uris {
            match partition.link.call(|client| client.add(uri)) {
                Ok(()) => added += 1,
                Err(JukeboxError::ProtocolRecoverable(message)) => {
                    warn!("partition {}: skipping {}: {}", name, uri, message);
                }
                Err(err) => return Err(err),
            }
        }
        if added > 0 {
            let status = partition.link.call(|client| client.status())?;
            if status.state != PlayState::Play {
                partition.link.call(|client| client.play())?;
            }
        }
        self.notifier.send(name, NotificationKind::JukeboxUpdated);
        Ok(added)
    }

    /// Reconnects partitions whose timer fired and runs a cycle on each
    /// partition that came back.
    pub fn poll_reconnects(&mut self, now: Instant) -> usize {
        let mut reconnected = Vec::new();
        for (name, partition) in self.partitions.iter_mut() {
            match partition.link.poll_reconnect(now) {
                Some(Ok(())) => {
                    partition.state.last_error = None;
                    self.notifier.send(name, NotificationKind::Connected);
                    reconnected.push(name.clone());
                }
                Some(Err(err)) => partition.state.last_error = Some(err.to_string()),
                None => {}
            }
        }
        for name in &reconnected {
            if let Err(err) = self.run(name) {
                self.record_error(name, &err);
            }
        }
        reconnected.len()
    }

    pub fn next_reconnect_deadline(&self) -> Option<Instant> {
        self.partitions
            .values()
            .filter_map(|partition| partition.link.timer().deadline())
            .min()
    }

    /// Starts an album cache rebuild on a worker. Without `force` the worker
    /// skips the rebuild while the cache is newer than the library.
    pub fn request_cache_rebuild(&mut self, force: bool) -> Result<u64, JukeboxError> {
        if self.cache_request.is_some() || self.cache.is_building() {
            return Err(JukeboxError::InvalidRequest(
                "album cache rebuild already running".to_string(),
            ));
        }
        let partition = self
            .partitions
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string());
        let id = self
            .dispatcher
            .dispatch(&partition, WorkerJob::RebuildCache { force })?;
        self.cache_request = Some(id);
        self.notifier.send(&partition, NotificationKind::CacheStarted);
        Ok(id)
    }

    fn record_error(&mut self, name: &str, err: &JukeboxError) {
        warn!("partition {}: {}", name, err);
        if let Some(partition) = self.partitions.get_mut(name) {
            partition.state.last_error = Some(err.to_string());
        }
        self.notifier
            .send(name, NotificationKind::JukeboxError(err.to_string()));
    }

    fn partition(&self, name: &str) -> Result<&Partition, JukeboxError> {
        self.partitions
            .get(name)
            .ok_or_else(|| JukeboxError::UnknownPartition(name.to_string()))
    }

    fn partition_mut(&mut self, name: &str) -> Result<&mut Partition, JukeboxError> {
        self.partitions
            .get_mut(name)
            .ok_or_else(|| JukeboxError::UnknownPartition(name.to_string()))
    }
}

/// Records the current song in the last played window when it changed.
fn track_current(partition: &mut Partition, song_id: Option<u32>) -> Result<(), JukeboxError> {
    if song_id == partition.state.last_song_id {
        return Ok(());
    }
    partition.state.last_song_id = song_id;
    if song_id.is_some() {
        if let Some(song) = partition.link.call(|client| client.current_song())? {
            partition.state.last_played.record(song);
        }
    }
    Ok(())
}

/// Real queue plus last played songs.
fn history_exclusion(state: &JukeboxState, queue: &[Song], grouping: &AlbumGrouping) -> ExclusionSet {
    let uniq_tag = state.settings.constraints.uniq_tag;
    let album_mode = (state.settings.mode == JukeboxMode::Album).then_some(grouping);
    let mut exclusion = ExclusionSet::new();
    for song in queue.iter().chain(state.last_played.iter()) {
        exclusion.insert_song(song, album_mode, uniq_tag);
    }
    exclusion
}

fn full_exclusion(state: &JukeboxState, mut exclusion: ExclusionSet) -> ExclusionSet {
    let uniq_tag = state.settings.constraints.uniq_tag;
    for entry in &state.buffer {
        exclusion.insert_entry(entry, uniq_tag);
    }
    exclusion
}

/// Drops buffered entries that now collide with the queue or the history.
fn prune_buffer(state: &mut JukeboxState, exclusion: &ExclusionSet) {
    let uniq = state.settings.constraints.uniq_tag.is_some();
    state.buffer.retain(|entry| {
        !(exclusion.contains_key(&entry.key) || (uniq && exclusion.contains_value(&entry.uniq_value)))
    });
}

fn dispatch_refill(
    dispatcher: &dyn Dispatch,
    name: &str,
    partition: &mut Partition,
    limits: &BufferLimits,
    exclusion: ExclusionSet,
    need: usize,
) -> Result<(), JukeboxError> {
    let state = &mut partition.state;
    let high = limits.for_mode(&state.settings.mode).high;
    let quantity = (high + need).saturating_sub(state.buffer.len()).max(need.max(1));
    let request = RefillRequest {
        generation: state.generation,
        mode: state.settings.mode.clone(),
        quantity,
        exclusion,
        constraints: state.settings.constraints.clone(),
    };
    match dispatcher.dispatch(name, WorkerJob::Refill(request)) {
        Ok(id) => {
            state.filling = true;
            state.request_id = Some(id);
            debug!("partition {}: refill {} for {} entries", name, id, quantity);
            Ok(())
        }
        Err(err) => {
            state.filling = false;
            state.request_id = None;
            state.pending_add = 0;
            Err(err)
        }
    }
}

/// Moves up to `count` buffer entries into the player's queue and returns
/// the ones that made it. Entries the player rejects are skipped.
fn add_from_buffer(
    partition: &mut Partition,
    count: usize,
    start_playback: bool,
    cache: &AlbumCache,
    cache_timeout: Duration,
) -> Result<Vec<BufferEntry>, JukeboxError> {
    let album_mode = partition.state.settings.mode == JukeboxMode::Album;
    let group_tag = cache.grouping().group_tag;
    let mut added = Vec::with_capacity(count);
    let mut rejected = 0;
    while added.len() < count {
        let Some(entry) = partition.state.buffer.pop_front() else {
            break;
        };
        let result = if album_mode {
            let album = match cache.get(&entry.key, cache_timeout) {
                Ok(album) => album,
                Err(err) => {
                    partition.state.buffer.push_front(entry);
                    return Err(err.into());
                }
            };
            match album {
                Some(album) => add_album_songs(&mut partition.link, &album, group_tag).map(|_| ()),
                None => Err(JukeboxError::AddFailed(format!(
                    "album {} is no longer cached",
                    entry.key
                ))),
            }
        } else {
            partition.link.call(|client| client.add(&entry.key))
        };
        match result {
            Ok(()) => added.push(entry),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                rejected += 1;
                warn!(
                    "partition {}: skipping {}: {}",
                    partition.link.partition(),
                    entry.key,
                    err
                );
            }
        }
    }
    if added.is_empty() && rejected > 0 {
        return Err(JukeboxError::AddFailed(format!(
            "adding {} jukebox entries to the queue failed",
            rejected
        )));
    }
    if !added.is_empty() && start_playback {
        partition.link.call(|client| client.play())?;
    }
    Ok(added)
}

/// Fills in the representative URI of an album cached without one.
fn resolve_album(
    link: &mut PartitionLink,
    cache: &AlbumCache,
    mut album: Album,
    group_tag: Option<common::Tag>,
) -> Album {
    if !album.is_uri_pending() || !link.is_connected() {
        return album;
    }
    let expression = album.filter_expression(group_tag);
    match link.call(|client| client.find_songs(&expression)) {
        Ok(mut songs) => {
            sort_album_songs(&mut songs);
            if let Some(first) = songs.first() {
                cache.resolve_uri(&album.key, &first.uri);
                album.uri = first.uri.clone();
            }
        }
        Err(err) => debug!("resolving album {} failed: {}", album.key, err),
    }
    album
}
