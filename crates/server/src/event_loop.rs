use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use jukebox::{
    Constraints, JobOutcome, JukeboxController, JukeboxError, JukeboxList, JukeboxMode,
    JukeboxSettings, PartitionSummary, SchedulerRuntime, SongSource, WorkQueue, WorkerResult,
    ANY_ID,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub type Reply<T> = oneshot::Sender<T>;

/// Requests from the HTTP handlers. Every command carries the channel its
/// answer goes back on.
pub enum Command {
    Partitions {
        reply: Reply<Result<Vec<PartitionSummary>, JukeboxError>>,
    },
    List {
        partition: String,
        offset: usize,
        limit: usize,
        reply: Reply<Result<JukeboxList, JukeboxError>>,
    },
    SetMode {
        partition: String,
        mode: JukeboxMode,
        /// Keeps the current target length when absent.
        queue_length: Option<u32>,
        constraints: Constraints,
        reply: Reply<Result<(), JukeboxError>>,
    },
    Run {
        partition: String,
        reply: Reply<Result<(), JukeboxError>>,
    },
    Clear {
        partition: String,
        reply: Reply<Result<(), JukeboxError>>,
    },
    Remove {
        partition: String,
        positions: Vec<usize>,
        reply: Reply<Result<usize, JukeboxError>>,
    },
    ScriptResult {
        partition: String,
        uris: Vec<String>,
        reply: Reply<Result<usize, JukeboxError>>,
    },
    /// Answered once the worker's result comes back.
    AddRandom {
        partition: String,
        quantity: usize,
        album: bool,
        source: SongSource,
        play: bool,
        reply: Reply<Result<JobOutcome, JukeboxError>>,
    },
    RebuildCache {
        force: bool,
        reply: Reply<Result<u64, JukeboxError>>,
    },
    Stop,
}

/// Cheap handle the HTTP side uses to talk to the event loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    commands: Arc<WorkQueue<Command>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl EventLoopHandle {
    /// Commands sent after the loop stopped are dropped, which closes their
    /// reply channels.
    pub fn send(&self, command: Command) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.commands.push(command, id, "");
        if self.closed.load(Ordering::Acquire) {
            self.commands.expire_all(Duration::ZERO);
        }
    }

    /// Sends a command and waits for its answer. Fails with `Disabled` when
    /// the event loop is gone.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<Result<T, JukeboxError>>) -> Command,
    ) -> Result<T, JukeboxError> {
        let (reply, answer) = oneshot::channel();
        self.send(build(reply));
        answer.await.unwrap_or(Err(JukeboxError::Disabled))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EventLoopConfig {
    pub tick_interval: Duration,
    pub job_max_age: Duration,
    /// Upper bound on how long worker results wait to be applied.
    pub result_poll: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            job_max_age: Duration::from_secs(60),
            result_poll: Duration::from_millis(100),
        }
    }
}

/// Owns the controller. Only this thread touches jukebox state.
pub struct EventLoop {
    controller: JukeboxController,
    runtime: Arc<SchedulerRuntime>,
    commands: Arc<WorkQueue<Command>>,
    closed: Arc<AtomicBool>,
    config: EventLoopConfig,
    pending_adds: HashMap<u64, Reply<Result<JobOutcome, JukeboxError>>>,
    next_tick: Instant,
}

impl EventLoop {
    pub fn new(
        controller: JukeboxController,
        runtime: Arc<SchedulerRuntime>,
        config: EventLoopConfig,
    ) -> (Self, EventLoopHandle) {
        let commands = Arc::new(WorkQueue::new());
        let closed = Arc::new(AtomicBool::new(false));
        let handle = EventLoopHandle {
            commands: Arc::clone(&commands),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::clone(&closed),
        };
        let event_loop = Self {
            controller,
            runtime,
            commands,
            closed,
            config,
            pending_adds: HashMap::new(),
            next_tick: Instant::now(),
        };
        (event_loop, handle)
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("jukebox-events".to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!("event loop started");
        loop {
            let timeout = self.wait_timeout(Instant::now());
            if let Some(item) = self.commands.pop(timeout, ANY_ID) {
                if !self.handle_command(item.payload) {
                    break;
                }
            }
            self.step(Instant::now());
        }
        self.closed.store(true, Ordering::Release);
        let dropped = self.commands.expire_all(Duration::ZERO);
        if dropped > 0 {
            debug!("dropped {} commands at shutdown", dropped);
        }
        for (_, reply) in self.pending_adds.drain() {
            let _ = reply.send(Err(JukeboxError::Disabled));
        }
        info!("event loop stopped");
    }

    fn wait_timeout(&self, now: Instant) -> Duration {
        let mut timeout = self
            .config
            .result_poll
            .min(self.next_tick.saturating_duration_since(now));
        if let Some(deadline) = self.controller.next_reconnect_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        timeout
    }

    fn step(&mut self, now: Instant) {
        self.expire_jobs();
        self.drain_results();
        self.controller.poll_reconnects(now);
        if now >= self.next_tick {
            self.controller.run_all();
            self.next_tick = now + self.config.tick_interval;
        }
    }

    /// Answers jobs no worker picked up in time, so their partitions do not
    /// wait forever.
    fn expire_jobs(&mut self) {
        while let Some(item) = self.runtime.jobs.expire(self.config.job_max_age) {
            warn!("partition {}: job {} expired", item.partition, item.id);
            self.runtime.results.push(
                WorkerResult {
                    outcome: Err(JukeboxError::InvalidRequest("job expired".to_string())),
                },
                item.id,
                item.partition,
            );
        }
    }

    fn drain_results(&mut self) {
        while let Some(item) = self.runtime.results.try_pop(ANY_ID) {
            let Some(completion) = self.controller.handle_result(item) else {
                continue;
            };
            match self.pending_adds.remove(&completion.request_id) {
                Some(reply) => {
                    let _ = reply.send(completion.outcome);
                }
                None => debug!(
                    "partition {}: result {} has no waiter",
                    completion.partition, completion.request_id
                ),
            }
        }
    }

    /// Returns false when the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Partitions { reply } => {
                let _ = reply.send(Ok(self.controller.summaries()));
            }
            Command::List {
                partition,
                offset,
                limit,
                reply,
            } => {
                let _ = reply.send(self.controller.list(&partition, offset, limit));
            }
            Command::SetMode {
                partition,
                mode,
                queue_length,
                constraints,
                reply,
            } => {
                let result = self
                    .controller
                    .settings(&partition)
                    .map(|current| queue_length.unwrap_or(current.queue_length))
                    .and_then(|queue_length| {
                        self.controller.set_mode(
                            &partition,
                            JukeboxSettings {
                                mode,
                                queue_length,
                                constraints,
                            },
                        )
                    });
                let _ = reply.send(result);
            }
            Command::Run { partition, reply } => {
                let _ = reply.send(self.controller.run(&partition));
            }
            Command::Clear { partition, reply } => {
                let _ = reply.send(self.controller.clear(&partition));
            }
            Command::Remove {
                partition,
                positions,
                reply,
            } => {
                let _ = reply.send(self.controller.remove_entries(&partition, &positions));
            }
            Command::ScriptResult {
                partition,
                uris,
                reply,
            } => {
                let _ = reply.send(self.controller.script_result(&partition, &uris));
            }
            Command::AddRandom {
                partition,
                quantity,
                album,
                source,
                play,
                reply,
            } => match self
                .controller
                .add_now(&partition, quantity, album, source, play)
            {
                Ok(id) => {
                    self.pending_adds.insert(id, reply);
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::RebuildCache { force, reply } => {
                let _ = reply.send(self.controller.request_cache_rebuild(force));
            }
            Command::Stop => return false,
        }
        true
    }
}
