pub mod claim;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gates;
pub mod git;
pub mod persist;
pub mod plan;
pub mod queue;
pub mod review;
pub mod store;
pub mod workspace;

pub use claim::{ClaimCoordinator, ClaimOutcome};
pub use config::{HiveConfig, HivePaths};
pub use engine::{CycleReport, Engine};
pub use error::{HiveError, Result, StoreError};
pub use gates::{CommandExecutor, Gate, GatePipeline, GateReport, TaskExecutor};
pub use plan::{Plan, Task, TaskStatus};
pub use queue::{ActionQueue, CommitmentQueue};
pub use review::PrLifecycleManager;
pub use store::{GhStore, IssueStore, RepoRef};
pub use workspace::{LifecycleController, WorkspaceRecord, WorkspaceRegistry};
