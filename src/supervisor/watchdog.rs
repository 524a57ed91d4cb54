//! Stall detection driven by log growth.
//!
//! Progress is any change in the log's length. When nothing has changed for
//! longer than the idle threshold, the recent tail of the log is checked
//! against the busy patterns before the process is declared stalled.

use std::time::Duration;

use regex::{Regex, RegexBuilder};
use tokio::time::Instant;

use crate::error::UploadError;

/// Log markers for phases that are slow but healthy (shader compilation etc.).
pub const DEFAULT_BUSY_PATTERNS: &[&str] = &[
    "Compiling Shaders",
    "shader compile",
    "begin compiling",
    "warmup",
    "shaderworker",
    "Preparing shaders",
];

/// Outcome of judging an overdue watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A busy pattern matched; the idle clock was reset.
    BusyButHealthy { pattern: String, idle: Duration },
    /// No busy pattern matched; the process should be killed.
    Stalled { idle: Duration },
}

/// Watchdog state for one supervised process.
pub struct StallWatchdog {
    idle_threshold: Duration,
    busy_patterns: Vec<Regex>,
    last_progress: Instant,
    /// `None` until the first observation; `Some(None)` means the log was absent.
    last_len: Option<Option<u64>>,
}

impl StallWatchdog {
    /// Patterns are case-insensitive regular expressions.
    pub fn new(
        idle_threshold: Duration,
        busy_patterns: &[String],
        now: Instant,
    ) -> Result<Self, UploadError> {
        let busy_patterns = busy_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| UploadError::Config(format!("invalid busy pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            idle_threshold,
            busy_patterns,
            last_progress: now,
            last_len: None,
        })
    }

    /// Record the current log length. Returns true if it changed since the
    /// previous observation, which resets the idle clock.
    ///
    /// The first observation only sets the baseline.
    pub fn observe(&mut self, log_len: Option<u64>, now: Instant) -> bool {
        let Some(previous) = self.last_len.replace(log_len) else {
            return false;
        };
        if log_len != previous {
            self.last_progress = now;
            return true;
        }
        false
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    pub fn is_overdue(&self, now: Instant) -> bool {
        self.idle(now) > self.idle_threshold
    }

    /// Decide what an overdue idle period means given the recent log text.
    pub fn judge(&mut self, now: Instant, recent: &str) -> Verdict {
        let idle = self.idle(now);
        match self.busy_patterns.iter().find(|rx| rx.is_match(recent)) {
            Some(rx) => {
                self.last_progress = now;
                Verdict::BusyButHealthy {
                    pattern: rx.as_str().to_string(),
                    idle,
                }
            }
            None => Verdict::Stalled { idle },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        DEFAULT_BUSY_PATTERNS.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn growth_resets_idle_clock() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(60), &defaults(), t0).unwrap();

        assert!(!wd.observe(Some(10), t0));
        let t1 = t0 + Duration::from_secs(50);
        assert!(wd.observe(Some(25), t1));
        assert_eq!(wd.idle(t1), Duration::ZERO);

        let t2 = t1 + Duration::from_secs(61);
        assert!(!wd.observe(Some(25), t2));
        assert!(wd.is_overdue(t2));
    }

    #[test]
    fn shrinking_or_vanishing_log_counts_as_progress() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(1), &[], t0).unwrap();
        wd.observe(Some(100), t0);
        assert!(wd.observe(Some(5), t0 + Duration::from_secs(2)));
        assert!(wd.observe(None, t0 + Duration::from_secs(3)));
    }

    #[test]
    fn recreated_log_counts_as_progress() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(30), &[], t0).unwrap();
        wd.observe(Some(100), t0);
        assert!(wd.observe(None, t0));

        let later = t0 + Duration::from_secs(60);
        assert!(wd.observe(Some(50), later));
        assert_eq!(wd.idle(later), Duration::ZERO);
        assert!(!wd.is_overdue(later));
    }

    #[test]
    fn missing_log_from_the_start_is_a_baseline() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(30), &[], t0).unwrap();
        assert!(!wd.observe(None, t0));
        assert!(!wd.observe(None, t0 + Duration::from_secs(10)));
        assert!(wd.observe(Some(1), t0 + Duration::from_secs(20)));
    }

    #[test]
    fn busy_pattern_defers_the_kill() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(60), &defaults(), t0).unwrap();
        wd.observe(Some(1), t0);

        let later = t0 + Duration::from_secs(90);
        let verdict = wd.judge(later, "[info] compiling shaders for pass 3/40");
        assert_eq!(
            verdict,
            Verdict::BusyButHealthy {
                pattern: "Compiling Shaders".into(),
                idle: Duration::from_secs(90),
            }
        );
        assert!(!wd.is_overdue(later));
    }

    #[test]
    fn quiet_log_without_pattern_is_stalled() {
        let t0 = Instant::now();
        let mut wd = StallWatchdog::new(Duration::from_secs(60), &defaults(), t0).unwrap();
        let later = t0 + Duration::from_secs(90);
        assert_eq!(
            wd.judge(later, "Refreshing assets\nLoading scene"),
            Verdict::Stalled {
                idle: Duration::from_secs(90)
            }
        );
        // A stalled verdict leaves the clock alone.
        assert!(wd.is_overdue(later));
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let err = StallWatchdog::new(Duration::from_secs(1), &["(unclosed".into()], Instant::now());
        assert!(matches!(err, Err(UploadError::Config(_))));
    }
}
