#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # Defender
//!
//! Defender isolates callers from slow or failing downstream dependencies.
//! Every logical dependency is named by a **command key**; per key, Defender
//! enforces a call timeout, keeps success/error/timeout statistics over a
//! sliding time window, and drives a circuit breaker through the
//! Closed / Open / Half-Open states so that an unhealthy dependency fails
//! fast instead of dragging its callers down. Failed calls can be routed to
//! a static fallback value or to a secondary command.
//!
//! Generally, there are several steps when using Defender:
//! 1. Initialize the configuration (defaults, a YAML file or a hand-crafted
//!    [`ConfigEntity`](config::ConfigEntity)).
//! 2. Start a [`CmdExecutor`](executor::CmdExecutor) for each command key.
//! 3. Wrap downstream work in a [`Command`](command::Command) and submit it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use defender_core::command::Command;
//! use defender_core::executor::CmdExecutor;
//! use defender_core::config::MsgConfig;
//!
//! # async fn run() {
//! let executor = CmdExecutor::start("ticker-service".into(), MsgConfig::default());
//! let cmd = Command::new_async(|| {
//!     Box::pin(async { Ok::<_, anyhow::Error>("quote".to_string()) })
//! });
//! match executor.submit(cmd).await {
//!     Ok(v) => println!("got {v}"),
//!     Err(err) => println!("degraded: {err}"),
//! }
//! # }
//! ```
//!
//! ## Configuration
//!
//! Per-key settings live under `command.<key>` and fall back to built-in
//! defaults when absent, see the [`config`] module. The breaker reacts to
//! *timeouts* observed in the sliding window; plain user errors are recorded
//! but do not trip the breaker.

/// Core implementations: command descriptions, the sliding-window call
/// statistics, the breaker state machine and the per-key executor,
/// plus the configuration entities.
pub mod core;
/// Adapters for logging crates.
pub mod logging;
// Utility functions.
pub mod utils;

// re-export preludes
pub use crate::core::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
