pub mod config;
pub mod context;
pub mod error;
pub mod failure;
pub mod job;
pub mod lease;
pub mod parser;
pub mod recurrence;
pub mod registry;
pub mod store;
pub mod types;

pub use context::JobContext;
pub use error::{JobError, Result};
pub use job::{Job, RepeatOptions, RunOutcome};
pub use registry::{JobHandler, Registry};
pub use store::{JobStore, MemoryStore};
