//! jiralink - Multi-instance Jira bridge for chat platforms
//!
//! jiralink connects users of a chat host to any number of Jira instances
//! (self-hosted or cloud). It keeps a registry of installed instances, routes
//! each request to the instance the user means, and wraps the Jira REST API
//! in a client that turns upstream failures into messages users can act on.
//!
//! # Architecture
//!
//! - **types**: Identifiers, ordered ID-keyed sets, byte sizes
//! - **instance**: Instance records, the registry and its transactional updates
//! - **user**: Host users and their per-instance connections
//! - **store**: Persistence (SQLite, in-memory) with revision-checked registry writes
//! - **client**: Jira REST facade, error normalization and request metrics
//! - **host**: The chat host seen through traits (posts, files, notifications)
//! - **plugin**: Workflows tying it all together
//! - **config**: YAML configuration and validation

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod types;

// Domain
pub mod client;
pub mod host;
pub mod instance;
pub mod plugin;
pub mod store;
pub mod user;

// Re-exports
pub use error::{JiraLinkError, Result, ResultExt};
pub use plugin::Plugin;
