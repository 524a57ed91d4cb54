mod job;
mod record;
mod state;

pub use job::{BuildTarget, Job, Platform};
#[cfg(test)]
pub use record::MemoryRecordStore;
pub use record::{ExecutionRecord, FileRecordStore, RecordStore};
pub use state::{Event, State, StateMachine, Transition};
