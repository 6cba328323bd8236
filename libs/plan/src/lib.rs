//! # helmsman-plan
//!
//! Compiles a declarative cluster specification into fully-resolved,
//! per-host container process plans.
//!
//! ## Design Principles
//!
//! - Compilation is pure: no I/O, no clock, no randomness
//! - Identical inputs produce byte-identical plans (all maps are ordered,
//!   command-line flags render in sorted key order)
//! - Missing optional configuration falls back to defaults, never errors
//!
//! ## Pipeline
//!
//! ```text
//! ClusterConfig + host inventory
//!         │
//!         ▼
//!    PlanCompiler ──► NodePlan per host ──► NodeConfig (transport)
//!         │                                      │
//!   process builders                     host agent reconciles
//!   (one per role)                       against the runtime
//! ```

mod builders;
mod compiler;
pub mod config;
pub mod host;
pub mod pki;
pub mod process;

pub use compiler::{ClusterPlan, PlanCompiler};
pub use config::ClusterConfig;
pub use host::Host;
pub use process::{
    DeliveredFile, HealthCheck, NodeConfig, NodePlan, PortCheck, ProcessSpec,
    CLOUD_CONFIG_CHECKSUM_ENV, LEGACY_PROCESS_NAME_LABEL, PROCESS_NAME_LABEL,
};
