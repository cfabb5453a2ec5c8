//! Jukebox replenishment: keeps each partition's play queue at its target
//! length with randomly selected songs or albums.

mod constraints;
mod controller;
mod error;
mod last_played;
mod notify;
mod queue;
mod recovery;
mod runtime;
mod selector;
mod state;
mod worker;

#[cfg(test)]
mod test_support;

pub use constraints::{
    Constraints, FilterOp, ItemFilter, StickerSnapshot, TagFilter, STICKER_DISLIKED,
    STICKER_LAST_PLAYED, STICKER_LIKE,
};
pub use controller::{
    Completion, ControllerConfig, JukeboxController, JukeboxList, ListEntry, PartitionSummary,
};
pub use error::JukeboxError;
pub use last_played::LastPlayedWindow;
pub use notify::{Notification, NotificationKind, Notifier};
pub use queue::{WorkItem, WorkQueue, ANY_ID};
pub use recovery::{classify, CallOutcome, PartitionLink, ReconnectTimer};
pub use runtime::{SchedulerRuntime, WorkerCounter, WorkerGuard};
pub use selector::{select_albums, select_songs, uniq_value, BufferEntry, ExclusionSet};
pub use state::{
    BufferLimits, JukeboxMode, JukeboxSettings, JukeboxState, SongSource, Watermarks,
};
pub use worker::{
    run_job, AddRequest, Dispatch, JobOutcome, RefillRequest, ThreadDispatcher, WorkerContext,
    WorkerJob, WorkerResult,
};
