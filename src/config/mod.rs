//! Configuration types and loading.
//!
//! Provides all configuration structures for taskhive:
//! - `HiveConfig`: Top-level configuration with validation
//! - Domain configs: claiming, review recovery, queues, workspaces, store
//! - `HivePaths`: data-directory layout

mod settings;

pub use settings::{
    AgentConfig, ClaimConfig, GitConfig, HiveConfig, HivePaths, QueueConfig, ReviewConfig,
    StoreConfig, WorkspaceConfig,
};
