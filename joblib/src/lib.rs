mod coordinator;
pub mod error;
mod events;
pub mod extract;
mod job;
pub mod runner;
pub mod types;
pub mod workspace;

pub use coordinator::{JobCoordinator, JobReport};
pub use events::JobStatus;
pub use extract::DumpStats;
pub use job::JobState;
pub use runner::{ExecutionResult, JobOptions, Limits, PlaceId, Runner, ToolCommand};
pub use workspace::Workspace;
