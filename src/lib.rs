//! # costguard
//!
//! Dispatch and track automated cloud cost remediation.
//!
//! A list of flagged resources is checked against the policy rule table,
//! compiled into a deterministic execution plan that is returned to the
//! caller at once, and handed to a detached executor that runs each
//! resource through its precondition, mutation and verification steps.
//!
//! ## Usage
//!
//! ```bash
//! costguard serve [--config costguard.toml]
//! costguard plan --input recommendations.json
//! costguard check --input resources.json
//! ```
//!
//! ## Modules
//!
//! - `model` - Resource kinds, recommendation records and execution records
//! - `policy` - Compliance verdicts against a versioned rule table
//! - `plan` - Plan compiler: grouping, preview cap, savings aggregation
//! - `dispatch` - Dispatcher, handoff queue, execution worker and startup recovery
//! - `executor` - Per-resource remediation state machines
//! - `store` - Execution state store (memory and file backends, retention)
//! - `cloud` - Cloud-control collaborators (HTTP and simulated)
//! - `advisor` - Advisor collaborator and record normalisation
//! - `auth` - Bearer-token identity gate
//! - `server` - HTTP surface
//! - `config` - TOML configuration with environment overrides
//! - `retry` - Backoff policies shared by handoff, cloud calls and polling
//! - `app` - Service wiring and logging setup for the binary
pub mod advisor;
pub mod app;
pub mod auth;
pub mod cloud;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod model;
pub mod plan;
pub mod policy;
pub mod retry;
pub mod server;
pub mod store;

pub use error::{Error, ErrorKind, Result};
