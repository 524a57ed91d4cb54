use std::fs::OpenOptions;
use std::io::SeekFrom;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{error, info, warn};

use super::watchdog::{DEFAULT_BUSY_PATTERNS, StallWatchdog, Verdict};
use crate::error::UploadError;

/// How long to wait for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub idle_threshold: Duration,
    pub poll_interval: Duration,
    pub busy_patterns: Vec<String>,
    /// How much of the end of the log counts as "recent output".
    pub scan_bytes: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(15 * 60),
            poll_interval: Duration::from_secs(30),
            busy_patterns: DEFAULT_BUSY_PATTERNS.iter().map(|p| p.to_string()).collect(),
            scan_bytes: 64 * 1024,
        }
    }
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum SupervisedExit {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The watchdog killed it after `idle` without progress.
    StalledAndKilled { idle: Duration },
}

/// Launch `program` with its output appended to `log_path` and watch it for stalls.
///
/// The watchdog ticks every `poll_interval` for as long as the process runs
/// and is the only thing that may terminate it.
pub async fn run_supervised(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    log_path: &Path,
    settings: &WatchdogSettings,
) -> Result<SupervisedExit, UploadError> {
    let stdout_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let stderr_log = stdout_log.try_clone()?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    info!(
        program = %program.display(),
        pid = child.id(),
        log = %log_path.display(),
        "host process launched"
    );

    let started = Instant::now();
    let mut watchdog = StallWatchdog::new(settings.idle_threshold, &settings.busy_patterns, started)?;
    watchdog.observe(log_len(log_path).await, started);

    let period = settings.poll_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                info!(%status, elapsed_secs = started.elapsed().as_secs(), "host process exited");
                return Ok(SupervisedExit::Exited(status));
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                if watchdog.observe(log_len(log_path).await, now) || !watchdog.is_overdue(now) {
                    continue;
                }

                let recent = read_tail(log_path, settings.scan_bytes).await;
                match watchdog.judge(now, &recent) {
                    Verdict::BusyButHealthy { pattern, idle } => {
                        info!(
                            %pattern,
                            idle_ms = idle.as_millis() as u64,
                            "host is quiet but busy, extending watchdog"
                        );
                    }
                    Verdict::Stalled { idle } => {
                        warn!(idle_ms = idle.as_millis() as u64, "host stalled, killing process");
                        if let Err(e) = child.start_kill() {
                            error!(error = %e, "kill failed");
                        } else if timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                            warn!("killed host process was not reaped in time");
                        }
                        return Ok(SupervisedExit::StalledAndKilled { idle });
                    }
                }
            }
        }
    }
}

async fn log_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Last `max_bytes` of the log, lossily decoded. Unreadable logs read as empty.
async fn read_tail(path: &Path, max_bytes: u64) -> String {
    let read = async {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(max_bytes))).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };
    match read.await {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read host log");
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_settings(patterns: &[&str]) -> WatchdogSettings {
        WatchdogSettings {
            idle_threshold: Duration::from_millis(300),
            poll_interval: Duration::from_millis(50),
            busy_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            scan_bytes: 4096,
        }
    }

    async fn run_sh(script: &str, settings: &WatchdogSettings) -> (SupervisedExit, String) {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("host.log");
        let exit = run_supervised(
            Path::new("sh"),
            &["-c".to_string(), script.to_string()],
            Some(tmp.path()),
            &log,
            settings,
        )
        .await
        .unwrap();
        let contents = std::fs::read_to_string(&log).unwrap_or_default();
        (exit, contents)
    }

    #[tokio::test]
    async fn natural_exit_reports_real_status() {
        let (exit, log) = run_sh("echo hello; exit 3", &fast_settings(&[])).await;
        match exit {
            SupervisedExit::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected Exited, got {other:?}"),
        }
        assert_eq!(log.trim(), "hello");
    }

    #[tokio::test]
    async fn quiet_process_without_busy_marker_is_killed() {
        let started = std::time::Instant::now();
        let (exit, _) = run_sh("echo loading; exec sleep 30", &fast_settings(&["Compiling Shaders"])).await;
        match exit {
            SupervisedExit::StalledAndKilled { idle } => {
                assert!(idle > Duration::from_millis(300));
            }
            other => panic!("expected StalledAndKilled, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn quiet_process_with_busy_marker_is_left_alone() {
        let (exit, log) = run_sh(
            "echo 'Compiling shaders: 12/400'; sleep 1.5; echo finished",
            &fast_settings(&["Compiling Shaders"]),
        )
        .await;
        match exit {
            SupervisedExit::Exited(status) => assert!(status.success()),
            other => panic!("expected Exited, got {other:?}"),
        }
        assert!(log.contains("finished"));
    }

    #[tokio::test]
    async fn steady_output_keeps_process_alive() {
        let script = "for i in 1 2 3 4 5 6 7 8 9 10 11 12; do echo tick $i; sleep 0.1; done";
        let (exit, log) = run_sh(script, &fast_settings(&[])).await;
        assert!(matches!(exit, SupervisedExit::Exited(s) if s.success()));
        assert!(log.contains("tick 12"));
    }

    #[tokio::test]
    async fn output_is_appended_to_existing_log() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("host.log");
        std::fs::write(&log, "previous run\n").unwrap();
        run_supervised(
            Path::new("sh"),
            &["-c".to_string(), "echo second run >&2".to_string()],
            None,
            &log,
            &fast_settings(&[]),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "previous run\nsecond run\n");
    }

    #[tokio::test]
    async fn missing_executable_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = run_supervised(
            Path::new("/definitely/not/a/host"),
            &[],
            None,
            &tmp.path().join("host.log"),
            &fast_settings(&[]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
