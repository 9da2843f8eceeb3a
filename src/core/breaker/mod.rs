//!  Circuit Breaker State Machine:
//!
//! ```text
//!                             trips on a delivered snapshot
//!
//!		+-----------------------------------------------------------------------+
//!		|                                                                       |
//!		|                                                                       v
//!	+----------------+                   +----------------+    TryClose     +----------------+
//!	|                |                   |                |<----------------|                |
//!	|                |   probe succeeds  |                |     timer       |                |
//!	|     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!	|                |                   |                |   probe fails   |                |
//!	|                |                   |                +---------------->|                |
//!	+----------------+                   +----------------+                 +----------------+
//! ```
//!
//! The executor task is the single owner of a `Breaker`; every method takes
//! `&mut self` and nothing here locks.

use crate::base::{CmdKeyStatsSnapshot, CommandKey};
use crate::logging;
use std::sync::Arc;
use std::time::Duration;

/// States of the circuit breaker state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Closed,
    Open { opened_at_ms: u64, reset_at_ms: u64 },
    HalfOpen,
}

impl Default for State {
    fn default() -> State {
        State::Closed
    }
}

impl State {
    /// Only the single probe call may run while half-open.
    pub fn admit_probe_only(&self) -> bool {
        matches!(self, State::HalfOpen)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, State::Open { .. })
    }
}

/// `StateListener` observes the breaker state change events of one key.
pub trait StateListener: Send + Sync {
    /// Triggered when the breaker transformed to Closed.
    fn on_closed(&self, prev: State);

    /// Triggered when the breaker transformed to Open. The snapshot, when
    /// present, is the one whose counts caused the transformation.
    fn on_open(&self, prev: State, snapshot: Option<Arc<CmdKeyStatsSnapshot>>);

    /// Triggered when the breaker transformed to HalfOpen.
    fn on_half_open(&self, prev: State);
}

/// Per-key breaker. Consumes stats snapshots and probe verdicts, decides
/// call admission. Time is passed in by the caller so transitions stay
/// deterministic under test.
pub struct Breaker {
    key: CommandKey,
    max_failures: u32,
    reset_timeout: Duration,
    state: State,
    listeners: Vec<Arc<dyn StateListener>>,
}

impl Breaker {
    pub fn new(key: CommandKey, max_failures: u32, reset_timeout: Duration) -> Self {
        Self::with_listeners(key, max_failures, reset_timeout, Vec::new())
    }

    pub fn with_listeners(
        key: CommandKey,
        max_failures: u32,
        reset_timeout: Duration,
        listeners: Vec<Arc<dyn StateListener>>,
    ) -> Self {
        Breaker {
            key,
            max_failures,
            reset_timeout,
            state: State::default(),
            listeners,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Time left until the open period ends; zero in any other state.
    pub fn remaining(&self, now: u64) -> Duration {
        match self.state {
            State::Open { reset_at_ms, .. } => {
                Duration::from_millis(reset_at_ms.saturating_sub(now))
            }
            _ => Duration::ZERO,
        }
    }

    /// Ingest a delivered snapshot. Trips Closed → Open when the window's
    /// timeout count reaches `max_failures - 1`: the sample causing the
    /// crossing is already counted in the delivered snapshot, so the
    /// comparison sits one below the literal threshold. Returns the reset
    /// deadline when the breaker tripped.
    ///
    /// Only timeouts trip the breaker; plain user errors are recorded in
    /// the window but do not.
    pub fn on_snapshot(&mut self, snapshot: &Arc<CmdKeyStatsSnapshot>, now: u64) -> Option<u64> {
        match self.state {
            State::Closed
                if snapshot.call_stats.timeout >= self.max_failures.saturating_sub(1) as u64 =>
            {
                let reset_at_ms = now + self.reset_timeout.as_millis() as u64;
                self.transition(
                    State::Open {
                        opened_at_ms: now,
                        reset_at_ms,
                    },
                    Some(snapshot),
                );
                Some(reset_at_ms)
            }
            // a snapshot arriving while Open or HalfOpen is ingested by the
            // stats side but cannot cause a transition
            _ => None,
        }
    }

    /// The scheduled Open → HalfOpen transition. A timer firing in any
    /// other state is a no-op.
    pub fn try_close(&mut self) -> bool {
        match self.state {
            State::Open { .. } => {
                self.transition(State::HalfOpen, None);
                true
            }
            _ => false,
        }
    }

    /// The half-open probe came back successful: close.
    pub fn probe_succeeded(&mut self) -> bool {
        match self.state {
            State::HalfOpen => {
                self.transition(State::Closed, None);
                true
            }
            _ => false,
        }
    }

    /// The half-open probe failed (error or timeout): re-open for another
    /// full reset period. Returns the new reset deadline.
    pub fn probe_failed(&mut self, now: u64) -> Option<u64> {
        match self.state {
            State::HalfOpen => {
                let reset_at_ms = now + self.reset_timeout.as_millis() as u64;
                self.transition(
                    State::Open {
                        opened_at_ms: now,
                        reset_at_ms,
                    },
                    None,
                );
                Some(reset_at_ms)
            }
            _ => None,
        }
    }

    fn transition(&mut self, next: State, snapshot: Option<&Arc<CmdKeyStatsSnapshot>>) {
        let prev = self.state;
        self.state = next;
        logging::info!(
            "[Breaker] key {}: {:?} -> {:?}",
            self.key,
            prev,
            self.state
        );
        for listener in &self.listeners {
            match self.state {
                State::Closed => listener.on_closed(prev),
                State::Open { .. } => listener.on_open(prev, snapshot.map(Arc::clone)),
                State::HalfOpen => listener.on_half_open(prev),
            }
        }
    }
}
