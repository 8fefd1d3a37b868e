//! Portal submission: entries in, one result per entry out.
//!
//! - [`entry`]: input entries and per-entry results
//! - [`progress`]: shared run progress for observers
//! - [`session`]: per-profile cookie persistence
//! - [`machine`]: the login/select/fill/save state machine

pub mod entry;
pub mod machine;
pub mod progress;
pub mod session;

pub use entry::{SubmissionEntry, SubmissionResult, SubmissionStatus, EMPTY_FIELD_TEXT};
pub use machine::{
    ordinal, Credentials, EntryState, GlobalState, MachineConfig, SubmissionStateMachine,
};
pub use progress::{ProgressSnapshot, ProgressTracker, RunStatus};
pub use session::CookieJar;
