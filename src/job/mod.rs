//! Job model and the master/client state machines that operate on it.

pub mod client;
pub mod master;
pub mod range;
pub mod registry;
pub mod role;
pub mod state;

pub use client::ClientJob;
pub use master::{Assignment, FailureOutcome, MasterJob, MasterPolicy, Tick};
pub use range::{Range, RangeRef, RangeStatus};
pub use registry::{JobBehavior, JobRegistry, RecordingJob, WorkContext, WorkError};
pub use role::{demote, promote, JobRole};
pub use state::{Job, JobOptions};
