//! Host collaborators the orchestrator drives, and a hook-command adapter.
//!
//! The orchestrator only sees the traits. [`CommandHost`] implements them by
//! running the argv lists configured under `[hooks]`, which is how the binary
//! talks to a real editor or build host.

use std::collections::HashMap;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::HooksConfig;
use crate::state_machine::{BuildTarget, Job};

/// Failure reported by the publish operation. Treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PublishError {
    pub message: String,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a host-side control operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// The host's control surface, build target and login state.
pub trait HostControl {
    /// Try to bring up the host's control surface. Idempotent and cheap.
    async fn activate(&self) -> bool;

    /// The active build target, or `None` if the host cannot report it.
    async fn active_target(&self) -> Result<Option<BuildTarget>, HostError>;

    async fn switch_target(&self, target: BuildTarget) -> Result<(), HostError>;

    /// The logged-in user, if any.
    async fn current_user(&self) -> Option<String>;
}

/// Source of the builder handle, which becomes available asynchronously.
pub trait BuilderProvider {
    type Handle: Publisher;

    async fn try_get_handle(&self) -> Option<Self::Handle>;
}

/// Performs the actual build and upload. May take many minutes.
pub trait Publisher {
    async fn build_and_upload(&self, job: &Job, thumbnail: &str) -> Result<(), PublishError>;
}

/// Host adapter backed by configured hook commands.
#[derive(Debug, Clone)]
pub struct CommandHost {
    hooks: HooksConfig,
}

impl CommandHost {
    pub fn new(hooks: HooksConfig) -> Self {
        Self { hooks }
    }
}

/// Publisher handle produced once the builder probe succeeds.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    argv: Vec<String>,
}

struct HookOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Replace `{key}` placeholders in every argument.
fn expand(argv: &[String], vars: &HashMap<&str, String>) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

async fn run_hook(name: &str, argv: &[String]) -> std::io::Result<HookOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("hook {name} has an empty command"),
        ));
    };
    debug!(hook = name, program = %program, "running hook");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(HookOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run a probe hook; a spawn failure counts as "not yet".
async fn probe_hook(name: &str, argv: &[String]) -> Option<HookOutput> {
    match run_hook(name, argv).await {
        Ok(out) if out.success => Some(out),
        Ok(_) => None,
        Err(e) => {
            warn!(hook = name, error = %e, "probe hook failed to run");
            None
        }
    }
}

impl HostControl for CommandHost {
    async fn activate(&self) -> bool {
        match &self.hooks.activate {
            Some(argv) => probe_hook("activate", argv).await.is_some(),
            None => true,
        }
    }

    async fn active_target(&self) -> Result<Option<BuildTarget>, HostError> {
        let Some(argv) = &self.hooks.active_target else {
            return Ok(None);
        };
        let out = run_hook("active_target", argv)
            .await
            .map_err(|e| HostError(e.to_string()))?;
        if !out.success {
            return Err(HostError(format!("active_target hook failed: {}", out.stderr)));
        }
        BuildTarget::from_identifier(&out.stdout)
            .map(Some)
            .ok_or_else(|| HostError(format!("unknown build target {:?}", out.stdout)))
    }

    async fn switch_target(&self, target: BuildTarget) -> Result<(), HostError> {
        let Some(argv) = &self.hooks.switch_target else {
            return Err(HostError("no switch_target hook configured".into()));
        };
        let vars = HashMap::from([("target", target.identifier().to_string())]);
        let out = run_hook("switch_target", &expand(argv, &vars))
            .await
            .map_err(|e| HostError(e.to_string()))?;
        if out.success {
            Ok(())
        } else {
            Err(HostError(format!("switch_target hook failed: {}", out.stderr)))
        }
    }

    async fn current_user(&self) -> Option<String> {
        match &self.hooks.login_probe {
            Some(argv) => probe_hook("login_probe", argv).await.map(|out| out.stdout),
            None => Some(String::new()),
        }
    }
}

impl BuilderProvider for CommandHost {
    type Handle = CommandPublisher;

    async fn try_get_handle(&self) -> Option<CommandPublisher> {
        if let Some(argv) = &self.hooks.builder_probe {
            probe_hook("builder_probe", argv).await?;
        }
        Some(CommandPublisher {
            argv: self.hooks.publish.clone().unwrap_or_default(),
        })
    }
}

impl Publisher for CommandPublisher {
    async fn build_and_upload(&self, job: &Job, thumbnail: &str) -> Result<(), PublishError> {
        if self.argv.is_empty() {
            return Err(PublishError::new("no publish hook configured"));
        }
        let vars = HashMap::from([
            ("scene", job.scene.clone()),
            ("thumbnail", thumbnail.to_string()),
            ("name", job.name.clone()),
            ("id", job.content_id.clone()),
            ("platform", job.platform.to_string()),
            ("target", job.platform.build_target().to_string()),
        ]);
        let out = run_hook("publish", &expand(&self.argv, &vars))
            .await
            .map_err(|e| PublishError::new(format!("publish hook could not start: {e}")))?;
        if out.success {
            Ok(())
        } else {
            Err(PublishError::new(format!("publish hook failed: {}", out.stderr)))
        }
    }
}
