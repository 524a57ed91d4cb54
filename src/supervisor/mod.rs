mod process;
mod watchdog;

pub use process::{SupervisedExit, WatchdogSettings, run_supervised};
pub use watchdog::DEFAULT_BUSY_PATTERNS;
