use std::path::PathBuf;
use std::time::Duration;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::consent::{ConsentApi, ConsentPreflight};
use crate::error::UploadError;
use crate::host::{BuilderProvider, HostControl, Publisher};
use crate::readiness::poll_until_ready;
use crate::retry::{RetryError, RetryPolicy, log_heartbeat, run_with_retry};
use crate::state_machine::{
    BuildTarget, Event, ExecutionRecord, Job, RecordStore, State, StateMachine, Transition,
};

/// Whether a terminal state should produce a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Started by a person; terminal states only log.
    Interactive,
    /// Started by the driver; terminal states report 0 or 1.
    Unattended,
}

/// Polling intervals, timeouts and publish retry policy.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub host_poll_interval: Duration,
    /// `None` waits for the host forever.
    pub host_ready_timeout: Option<Duration>,
    pub builder_poll_interval: Duration,
    pub builder_timeout: Duration,
    pub login_poll_interval: Duration,
    pub publish: RetryPolicy,
    /// Scene and thumbnail paths are resolved against this directory.
    pub project_root: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            host_poll_interval: Duration::from_secs(1),
            host_ready_timeout: None,
            builder_poll_interval: Duration::from_millis(500),
            builder_timeout: Duration::from_secs(30),
            login_poll_interval: Duration::from_millis(500),
            publish: RetryPolicy::default(),
            project_root: PathBuf::from("."),
        }
    }
}

/// What one orchestrator run ended with.
#[derive(Debug)]
pub struct RunReport {
    pub final_state: State,
    /// States left behind, in order.
    pub history: Vec<State>,
    pub job: Option<Job>,
    pub resumed: bool,
    pub error: Option<UploadError>,
    /// Set only in [`RunMode::Unattended`].
    pub exit_code: Option<i32>,
}

/// Current position in the state machine for one run.
#[derive(Debug)]
struct Run {
    state: State,
    history: Vec<State>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: State::Idle,
            history: Vec::new(),
        }
    }

    fn advance(&mut self, event: Event) {
        match StateMachine::next(self.state, event) {
            Transition::Next(next) | Transition::Complete(next) => {
                info!(from = %self.state, to = %next, ?event, "state transition");
                self.history.push(self.state);
                self.state = next;
            }
            Transition::Invalid { state, event } => {
                error!(%state, ?event, "ignoring invalid transition");
            }
        }
    }
}

/// Drives one job from host readiness to a published artifact.
///
/// The pending record is written before the first side effect and erased
/// only when a terminal state is reached, so an interrupted run is picked up
/// again by the next [`JobOrchestrator::run`].
pub struct JobOrchestrator<H, B, C, R> {
    host: H,
    builder: B,
    consent: ConsentPreflight<C>,
    records: R,
    settings: OrchestratorSettings,
    mode: RunMode,
}

impl<H, B, C, R> JobOrchestrator<H, B, C, R>
where
    H: HostControl,
    B: BuilderProvider,
    C: ConsentApi,
    R: RecordStore,
{
    pub fn new(
        host: H,
        builder: B,
        consent: ConsentPreflight<C>,
        records: R,
        settings: OrchestratorSettings,
        mode: RunMode,
    ) -> Self {
        Self {
            host,
            builder,
            consent,
            records,
            settings,
            mode,
        }
    }

    /// Resume a pending job if one is recorded, otherwise start `fresh`.
    ///
    /// Errors are only returned when the record slot itself cannot be read
    /// or written; job failures end up in [`RunReport::error`].
    pub async fn run(&mut self, fresh: Option<Job>) -> Result<RunReport, UploadError> {
        let mut run = Run::new();

        let (job, resumed) = match self.records.load()? {
            Some(record) => {
                let job = record.job()?;
                if fresh.as_ref().is_some_and(|f| f.content_id != job.content_id) {
                    warn!(
                        pending = %job.content_id,
                        "pending upload found, ignoring new job arguments"
                    );
                }
                info!(
                    content_id = %job.content_id,
                    written_at = %record.written_at,
                    "resuming interrupted upload"
                );
                run.advance(Event::Resumed);
                (job, true)
            }
            None => {
                let Some(job) = fresh else {
                    info!("no pending upload and no job given, staying idle");
                    return Ok(RunReport {
                        final_state: run.state,
                        history: run.history,
                        job: None,
                        resumed: false,
                        error: None,
                        exit_code: None,
                    });
                };
                self.records.save(&ExecutionRecord::pending(&job))?;
                run.advance(Event::Started);
                (job, false)
            }
        };

        let span = info_span!(
            "upload",
            run_id = %Uuid::new_v4(),
            content_id = %job.content_id,
            platform = %job.platform,
        );
        let result = self.drive(&mut run, &job).instrument(span.clone()).await;
        Ok(span.in_scope(|| self.finish(run, job, resumed, result)))
    }

    async fn drive(&mut self, run: &mut Run, job: &Job) -> Result<(), UploadError> {
        info!(
            scene = %job.scene,
            thumbnail = %job.thumbnail,
            name = %job.name,
            "waiting for host control surface"
        );
        self.wait_for_host().await?;
        run.advance(Event::HostActivated);

        let builder = &self.builder;
        let handle = poll_until_ready(
            "builder API",
            move || builder.try_get_handle(),
            self.settings.builder_poll_interval,
            Some(self.settings.builder_timeout),
        )
        .await
        .map_err(|e| match e {
            UploadError::ReadinessTimeout { waited, .. } => {
                UploadError::BuilderUnavailable { waited }
            }
            other => other,
        })?;
        run.advance(Event::BuilderReady);

        self.consent.ensure_consent(&job.content_id).await?;
        debug!(cached = self.consent.cache().len(), "consent confirmed");
        run.advance(Event::ConsentConfirmed);

        self.check_assets(job)?;
        self.ensure_build_target(job.platform.build_target()).await?;

        let host = &self.host;
        let user = poll_until_ready(
            "login",
            move || host.current_user(),
            self.settings.login_poll_interval,
            None,
        )
        .await?;
        info!(user = %user, "session authenticated");

        info!("starting build and upload");
        run_with_retry(
            &self.settings.publish,
            "build and upload",
            |_| handle.build_and_upload(job, &job.thumbnail),
            log_heartbeat,
        )
        .await
        .map_err(|e| {
            let RetryError::AttemptsExhausted { attempts, last, .. } = e;
            UploadError::AttemptsExhausted { attempts, last }
        })?;
        run.advance(Event::Published);
        Ok(())
    }

    /// Fail before any login wait or publish attempt if an input file is gone.
    fn check_assets(&self, job: &Job) -> Result<(), UploadError> {
        for (what, relative) in [("scene", &job.scene), ("thumbnail", &job.thumbnail)] {
            let path = self.settings.project_root.join(relative);
            if !path.exists() {
                error!(what, path = %path.display(), "publish input not found");
                return Err(UploadError::MissingAsset { what, path });
            }
        }
        Ok(())
    }

    async fn wait_for_host(&self) -> Result<(), UploadError> {
        let host = &self.host;
        poll_until_ready(
            "host control surface",
            move || async move { host.activate().await.then_some(()) },
            self.settings.host_poll_interval,
            self.settings.host_ready_timeout,
        )
        .await
        .map_err(|e| match e {
            UploadError::ReadinessTimeout { waited, .. } => UploadError::HostUnavailable { waited },
            other => other,
        })
    }

    async fn ensure_build_target(&self, wanted: BuildTarget) -> Result<(), UploadError> {
        let switch_failed = |reason: String| UploadError::TargetSwitchFailed {
            target: wanted.to_string(),
            reason,
        };

        match self.host.active_target().await.map_err(|e| switch_failed(e.0))? {
            Some(current) if current == wanted => {
                debug!(target = %wanted, "build target already active");
            }
            None => {
                debug!(target = %wanted, "host does not report its build target, assuming it is active");
            }
            Some(current) => {
                info!(from = %current, to = %wanted, "switching build target");
                self.host
                    .switch_target(wanted)
                    .await
                    .map_err(|e| switch_failed(e.0))?;
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        mut run: Run,
        job: Job,
        resumed: bool,
        result: Result<(), UploadError>,
    ) -> RunReport {
        if result.is_err() {
            run.advance(Event::Failed);
        }
        debug_assert!(run.state.is_terminal());

        // A record left behind would replay a finished job on the next start.
        if let Err(e) = self.records.clear() {
            error!(error = %e, "failed to clear pending upload record");
        }

        match &result {
            Ok(()) => info!("build and upload succeeded"),
            Err(e) => error!(kind = e.kind(), error = %e, "upload failed"),
        }

        let exit_code = match self.mode {
            RunMode::Unattended => Some(if result.is_ok() { 0 } else { 1 }),
            RunMode::Interactive => None,
        };

        RunReport {
            final_state: run.state,
            history: run.history,
            job: Some(job),
            resumed,
            error: result.err(),
            exit_code,
        }
    }
}
