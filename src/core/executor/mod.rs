//! Per-key executors.
//!
//! Every command key is served by exactly one executor task draining a
//! mailbox. That task is the only writer to the key's breaker and the only
//! reporter to the key's stats, so neither needs a lock and breaker
//! transitions cannot race. Nothing inside the handler awaits: user work,
//! deadlines and the open-state timer all run elsewhere and come back as
//! mailbox messages.

mod dispatch;
mod timeout;

use crate::base::{CallEvent, CmdError, CmdResult, CommandKey};
use crate::breaker::{Breaker, State, StateListener};
use crate::command::{Command, ExecKind, Fallback, SyncBody};
use crate::config::{DispatcherKind, MsgConfig};
use crate::logging;
use crate::stat::CallStatsAggregator;
use crate::utils;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Submissions parked while the half-open probe is in flight. Bounded so
/// persistent half-open churn cannot grow the queue without limit; an
/// overflowing submission is rejected like an open breaker would.
pub const STASH_CAPACITY: usize = 1024;

pub type ReplyTo<T> = oneshot::Sender<CmdResult<T>>;

pub(crate) enum Msg<T> {
    Submit {
        cmd: Command<T>,
        reply: ReplyTo<T>,
    },
    /// A command-typed fallback re-entering admission.
    FallbackAction {
        cmd: Command<T>,
        reply: ReplyTo<T>,
    },
    /// The decided outcome of an admitted call.
    Completed {
        id: u64,
        result: CmdResult<T>,
    },
    SnapshotTick,
    TryCloseBreaker,
}

struct PendingCall<T> {
    start_ms: u64,
    reply: ReplyTo<T>,
    fallback: Fallback<T>,
    probe: bool,
}

/// The submit handle for one command key. Cheap to clone; all clones feed
/// the same executor task.
pub struct CmdExecutor<T> {
    key: CommandKey,
    tx: mpsc::UnboundedSender<Msg<T>>,
}

impl<T> Clone for CmdExecutor<T> {
    fn clone(&self) -> Self {
        CmdExecutor {
            key: self.key.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> CmdExecutor<T> {
    /// Spawn the executor task for `key`. The settings are immutable for
    /// the life of the executor.
    pub fn start(key: CommandKey, cfg: MsgConfig) -> Self {
        Self::start_with_listeners(key, cfg, Vec::new())
    }

    pub fn start_with_listeners(
        key: CommandKey,
        cfg: MsgConfig,
        listeners: Vec<Arc<dyn StateListener>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tick_period = Duration::from_millis(cfg.stat_interval_ms as u64);
        let inner = Inner::new(key.clone(), cfg, listeners, tx.clone());
        tokio::spawn(run(inner, rx));
        tokio::spawn(tick_loop(tx.clone(), tick_period));
        CmdExecutor { key, tx }
    }

    pub fn key(&self) -> &CommandKey {
        &self.key
    }

    /// Submit a command, returning a future of its outcome: the computed
    /// value, the fallback value, or one of the [`CmdError`] variants.
    /// The submission is on its way before this returns; the future only
    /// awaits the reply.
    pub fn submit(&self, cmd: Command<T>) -> impl Future<Output = CmdResult<T>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit_to_reply(cmd, reply_tx);
        async move {
            match reply_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(CmdError::user(crate::Error::msg(
                    "executor terminated before replying",
                ))),
            }
        }
    }

    /// Like [`submit`](Self::submit), delivering the outcome to a
    /// caller-supplied reply channel instead. Exactly one outcome is sent
    /// per submission.
    pub fn submit_to_reply(&self, cmd: Command<T>, reply: ReplyTo<T>) {
        if let Err(send_err) = self.tx.send(Msg::Submit { cmd, reply }) {
            if let Msg::Submit { reply, .. } = send_err.0 {
                let _ = reply.send(Err(CmdError::user(crate::Error::msg(
                    "executor terminated",
                ))));
            }
        }
    }
}

async fn run<T: Send + 'static>(mut inner: Inner<T>, mut rx: mpsc::UnboundedReceiver<Msg<T>>) {
    while let Some(msg) = rx.recv().await {
        inner.handle(msg);
    }
}

async fn tick_loop<T>(tx: mpsc::UnboundedSender<Msg<T>>, period: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    loop {
        interval.tick().await;
        if tx.send(Msg::SnapshotTick).is_err() {
            return;
        }
    }
}

struct Inner<T> {
    key: CommandKey,
    cfg: MsgConfig,
    breaker: Breaker,
    stats: CallStatsAggregator,
    pending: HashMap<u64, PendingCall<T>>,
    stash: VecDeque<(Command<T>, ReplyTo<T>)>,
    probe_id: Option<u64>,
    next_call_id: u64,
    self_tx: mpsc::UnboundedSender<Msg<T>>,
    pinned: Option<dispatch::PinnedWorker>,
    warned_shared_pool: bool,
}

impl<T: Send + 'static> Inner<T> {
    fn new(
        key: CommandKey,
        cfg: MsgConfig,
        listeners: Vec<Arc<dyn StateListener>>,
        self_tx: mpsc::UnboundedSender<Msg<T>>,
    ) -> Self {
        let stats = CallStatsAggregator::new(cfg.stat_sample_count, cfg.stat_interval_ms)
            .unwrap_or_else(|err| {
                logging::warn!(
                    "[{}] invalid stat window ({}), falling back to defaults",
                    key,
                    err
                );
                CallStatsAggregator::new(
                    crate::config::DEFAULT_STAT_SAMPLE_COUNT,
                    crate::config::DEFAULT_STAT_INTERVAL_MS,
                )
                .unwrap()
            });
        let breaker =
            Breaker::with_listeners(key.clone(), cfg.max_failures, cfg.reset_timeout, listeners);
        Inner {
            key,
            cfg,
            breaker,
            stats,
            pending: HashMap::new(),
            stash: VecDeque::new(),
            probe_id: None,
            next_call_id: 0,
            self_tx,
            pinned: None,
            warned_shared_pool: false,
        }
    }

    fn handle(&mut self, msg: Msg<T>) {
        match msg {
            Msg::Submit { cmd, reply } | Msg::FallbackAction { cmd, reply } => {
                self.handle_submission(cmd, reply)
            }
            Msg::Completed { id, result } => self.handle_completed(id, result),
            Msg::SnapshotTick => self.handle_tick(),
            Msg::TryCloseBreaker => {
                self.breaker.try_close();
            }
        }
    }

    fn handle_submission(&mut self, cmd: Command<T>, reply: ReplyTo<T>) {
        let now = utils::curr_time_millis();
        match self.breaker.state() {
            State::Open { .. } => {
                self.stats.report_rejection();
                let remaining = self.breaker.remaining(now);
                let Command { fallback, .. } = cmd;
                self.route_failure(CmdError::BreakerOpen { remaining }, fallback, reply);
            }
            State::HalfOpen if self.probe_id.is_some() => {
                if self.stash.len() >= STASH_CAPACITY {
                    logging::warn!(
                        "[{}] stash full at {}, rejecting submission",
                        self.key,
                        STASH_CAPACITY
                    );
                    self.stats.report_rejection();
                    let Command { fallback, .. } = cmd;
                    self.route_failure(
                        CmdError::BreakerOpen {
                            remaining: Duration::ZERO,
                        },
                        fallback,
                        reply,
                    );
                } else {
                    self.stash.push_back((cmd, reply));
                }
            }
            State::Closed | State::HalfOpen => self.admit(cmd, reply, now),
        }
    }

    fn admit(&mut self, cmd: Command<T>, reply: ReplyTo<T>, now: u64) {
        let id = self.next_call_id;
        self.next_call_id += 1;
        let probe = self.breaker.state().admit_probe_only();
        if probe {
            self.probe_id = Some(id);
            logging::debug!("[{}] admitting half-open probe, call {}", self.key, id);
        }
        let Command { exec, fallback } = cmd;
        let outcome = match exec {
            ExecKind::Async(body) => dispatch::run_async(body),
            ExecKind::Sync(body) => self.run_sync(body),
        };
        self.pending.insert(
            id,
            PendingCall {
                start_ms: now,
                reply,
                fallback,
                probe,
            },
        );
        timeout::watch(id, outcome, self.cfg.call_timeout, self.self_tx.clone());
    }

    fn run_sync(&mut self, body: SyncBody<T>) -> oneshot::Receiver<crate::Result<T>> {
        match &self.cfg.dispatcher {
            DispatcherKind::Default => {
                if !self.warned_shared_pool {
                    self.warned_shared_pool = true;
                    logging::warn!(
                        "[{}] sync command on the shared blocking pool; \
                         configure a pinned dispatcher to keep long sleeps out of it",
                        self.key
                    );
                }
                dispatch::run_blocking(body)
            }
            DispatcherKind::Pinned(name) => {
                if self.pinned.is_none() {
                    match dispatch::PinnedWorker::start(name) {
                        Ok(worker) => self.pinned = Some(worker),
                        Err(err) => logging::error!(
                            "[{}] cannot start pinned worker `{}`: {}, using the shared pool",
                            self.key,
                            name,
                            err
                        ),
                    }
                }
                match &self.pinned {
                    Some(worker) => worker.run(body),
                    None => dispatch::run_blocking(body),
                }
            }
        }
    }

    fn handle_completed(&mut self, id: u64, result: CmdResult<T>) {
        let call = match self.pending.remove(&id) {
            Some(call) => call,
            None => {
                logging::error!("[{}] outcome for unknown call {}, dropping", self.key, id);
                return;
            }
        };
        let now = utils::curr_time_millis();
        let latency_ms = now.saturating_sub(call.start_ms);
        match &result {
            Ok(_) => self.stats.report_outcome(CallEvent::Succ, latency_ms),
            Err(CmdError::Timeout { .. }) => {
                self.stats.report_outcome(CallEvent::Timeout, latency_ms)
            }
            Err(CmdError::User { .. }) => self.stats.report_outcome(CallEvent::Err, latency_ms),
            Err(CmdError::BreakerOpen { .. }) => {
                // rejected calls never enter the pending table
                logging::error!(
                    "[{}] call {} completed as a rejection, dropping",
                    self.key,
                    id
                );
            }
        }
        if call.probe && self.probe_id == Some(id) {
            self.probe_id = None;
            match &result {
                Ok(_) => {
                    if self.breaker.probe_succeeded() {
                        // a fresh window, so the timeouts that opened the
                        // breaker cannot re-trip it at the next tick
                        self.stats.reset();
                    }
                }
                Err(_) => {
                    if let Some(reset_at_ms) = self.breaker.probe_failed(now) {
                        self.schedule_try_close(reset_at_ms.saturating_sub(now));
                    }
                }
            }
        }
        match result {
            Ok(value) => self.complete(call.reply, Ok(value)),
            Err(err) => self.route_failure(err, call.fallback, call.reply),
        }
        if call.probe {
            // closed: replayed submissions are admitted afresh;
            // re-opened: each of them observes Open and is rejected
            self.replay_stash();
        }
    }

    fn handle_tick(&mut self) {
        let now = utils::curr_time_millis();
        let snapshot = Arc::new(self.stats.snapshot(now));
        if let Some(reset_at_ms) = self.breaker.on_snapshot(&snapshot, now) {
            self.schedule_try_close(reset_at_ms.saturating_sub(now));
        }
    }

    fn replay_stash(&mut self) {
        if self.stash.is_empty() {
            return;
        }
        logging::debug!(
            "[{}] replaying {} stashed submissions",
            self.key,
            self.stash.len()
        );
        let stashed: Vec<_> = self.stash.drain(..).collect();
        for (cmd, reply) in stashed {
            self.handle_submission(cmd, reply);
        }
    }

    /// Failed primary path: surface the failure, or route it through the
    /// declared fallback.
    fn route_failure(&mut self, err: CmdError, fallback: Fallback<T>, reply: ReplyTo<T>) {
        match fallback {
            Fallback::None => self.complete(reply, Err(err)),
            Fallback::Static(thunk) => match thunk() {
                Ok(value) => self.complete(reply, Ok(value)),
                Err(fb_err) => {
                    logging::error!("[{}] static fallback failed: {:?}", self.key, fb_err);
                    self.complete(reply, Err(CmdError::user(fb_err)));
                }
            },
            Fallback::Cmd(next) => {
                // a fresh submission under the usual admission rules
                if self
                    .self_tx
                    .send(Msg::FallbackAction { cmd: *next, reply })
                    .is_err()
                {
                    logging::error!("[{}] mailbox closed, fallback dropped", self.key);
                }
            }
        }
    }

    fn complete(&self, reply: ReplyTo<T>, outcome: CmdResult<T>) {
        if reply.send(outcome).is_err() {
            logging::debug!("[{}] caller went away before its reply", self.key);
        }
    }

    fn schedule_try_close(&self, delay_ms: u64) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = tx.send(Msg::TryCloseBreaker);
        });
    }
}
