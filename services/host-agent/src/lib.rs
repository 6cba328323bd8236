//! Per-host agent converging a container runtime to a desired process
//! set.
//!
//! ## Architecture
//!
//! - **Agent loop**: fetches this host's node config and reconciles on
//!   an interval
//! - **Reconciler**: converges each desired process independently with
//!   minimal churn
//! - **Diff**: decides whether a container still matches its spec
//! - **Runtime**: abstracts the container engine (in-memory in dev and
//!   tests)

pub mod agent;
pub mod client;
pub mod config;
pub mod diff;
pub mod files;
pub mod reconciler;
pub mod runtime;
