use std::time::Duration;

use thiserror::Error;

use crate::consent::ConsentError;
use crate::host::PublishError;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("source sync failed after {attempts} attempts: {source}")]
    SyncFailed {
        attempts: u32,
        #[source]
        source: git2::Error,
    },

    #[error("{what} not ready after {waited:?}")]
    ReadinessTimeout { what: String, waited: Duration },

    #[error("builder API not available after {waited:?}")]
    BuilderUnavailable { waited: Duration },

    #[error("host control surface did not activate within {waited:?}")]
    HostUnavailable { waited: Duration },

    #[error("consent service unavailable: {0}")]
    ConsentServiceUnavailable(#[source] ConsentError),

    #[error(
        "server rejected consent for {content_id}: echoed ({echoed_content_id}, v{echoed_version}, {echoed_code})"
    )]
    ConsentRejected {
        content_id: String,
        echoed_content_id: String,
        echoed_version: u32,
        echoed_code: String,
    },

    #[error("content id is empty, cannot record consent")]
    InvalidContentId,

    #[error("failed to switch build target to {target}: {reason}")]
    TargetSwitchFailed { target: String, reason: String },

    #[error("host process produced no output for {idle:?} and was killed")]
    StalledAndKilled { idle: Duration },

    #[error("publish failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: PublishError,
    },

    #[error("{what} not found: {}", .path.display())]
    MissingAsset {
        what: &'static str,
        path: std::path::PathBuf,
    },

    #[error("host process exited with {0}")]
    HostProcess(String),

    #[error("pending record is corrupt: {0}")]
    CorruptRecord(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Short machine-friendly name used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::SyncFailed { .. } => "SyncFailed",
            UploadError::ReadinessTimeout { .. } => "ReadinessTimeout",
            UploadError::BuilderUnavailable { .. } => "BuilderUnavailable",
            UploadError::HostUnavailable { .. } => "HostUnavailable",
            UploadError::ConsentServiceUnavailable(_) => "ConsentServiceUnavailable",
            UploadError::ConsentRejected { .. } => "ConsentRejected",
            UploadError::InvalidContentId => "InvalidContentId",
            UploadError::TargetSwitchFailed { .. } => "TargetSwitchFailed",
            UploadError::StalledAndKilled { .. } => "StalledAndKilled",
            UploadError::AttemptsExhausted { .. } => "AttemptsExhausted",
            UploadError::MissingAsset { .. } => "MissingAsset",
            UploadError::HostProcess(_) => "HostProcessError",
            UploadError::CorruptRecord(_) => "CorruptRecord",
            UploadError::Config(_) => "Config",
            UploadError::Io(_) => "Io",
            UploadError::Json(_) => "Json",
        }
    }
}
