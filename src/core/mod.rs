pub mod base;
// circuit breaker state machine, driven by stats snapshots
pub mod breaker;
// user-facing command descriptions
pub mod command;
pub mod config;
// per-key executors: admission, timeouts, fallbacks
pub mod executor;
// sliding-window call statistics
pub mod stat;
