//! Journalling daemon for the BeakerLib shell test harness: a single
//! in-memory XML document mirroring a test run, persisted after every
//! mutation and served over a named pipe (see `daemon` and `dispatcher`).
//!
//! Split into a library so `tests/` can drive the dispatcher end-to-end
//! without going through the pipe/process boundary.

pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod facts;
pub mod persist;
pub mod renderer;
pub mod timefmt;
pub mod types;
pub mod xml;
