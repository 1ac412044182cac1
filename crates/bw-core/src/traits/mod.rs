//! Backend traits

mod exec;
mod store;

pub use exec::{ExecRequest, ExecStream, ExitStatus, PodExecutor};
pub use store::{
    DeleteOutcome, EventType, ObjectList, Preconditions, ResourceStore, WatchEvent, WatchStream,
};
