use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::UploadError;

/// Separator between fields of a persisted job. Never appears in paths or names.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Build platforms a job can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Pc,
    Android,
}

impl Platform {
    /// Parse a platform name. Unknown values fall back to [`Platform::Pc`].
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pc" => Platform::Pc,
            "android" => Platform::Android,
            other => {
                warn!(platform = other, "unrecognized platform, defaulting to pc");
                Platform::Pc
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Pc => "pc",
            Platform::Android => "android",
        }
    }

    /// The host build target that produces artifacts for this platform.
    pub fn build_target(&self) -> BuildTarget {
        match self {
            Platform::Pc => BuildTarget::StandaloneWindows64,
            Platform::Android => BuildTarget::Android,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-side build target identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTarget {
    StandaloneWindows64,
    Android,
}

impl BuildTarget {
    pub fn identifier(&self) -> &'static str {
        match self {
            BuildTarget::StandaloneWindows64 => "StandaloneWindows64",
            BuildTarget::Android => "Android",
        }
    }

    pub fn from_identifier(id: &str) -> Option<Self> {
        match id.trim() {
            "StandaloneWindows64" => Some(BuildTarget::StandaloneWindows64),
            "Android" => Some(BuildTarget::Android),
            _ => None,
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// One build-and-publish request. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub scene: String,
    pub thumbnail: String,
    pub name: String,
    pub content_id: String,
    pub platform: Platform,
    /// Exact source reference to sync to instead of the branch tip.
    #[serde(default)]
    pub commit: Option<String>,
}

impl Job {
    /// Encode the resumable fields as a single delimiter-joined line.
    ///
    /// The commit pin is not part of the encoding: by the time a record
    /// exists the tree has already been synced.
    pub fn encode(&self) -> String {
        [
            self.scene.as_str(),
            self.thumbnail.as_str(),
            self.name.as_str(),
            self.content_id.as_str(),
            self.platform.as_str(),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, UploadError> {
        let fields: Vec<&str> = encoded.split(FIELD_SEPARATOR).collect();
        let [scene, thumbnail, name, content_id, platform] = fields.as_slice() else {
            return Err(UploadError::CorruptRecord(format!(
                "expected 5 job fields, found {}",
                fields.len()
            )));
        };
        Ok(Self {
            scene: scene.to_string(),
            thumbnail: thumbnail.to_string(),
            name: name.to_string(),
            content_id: content_id.to_string(),
            platform: Platform::parse_lenient(platform),
            commit: None,
        })
    }

    /// The `--key=value` tokens handed to the host process.
    pub fn host_args(&self) -> Vec<String> {
        vec![
            format!("--scene={}", self.scene),
            format!("--thumbnail={}", self.thumbnail),
            format!("--name={}", self.name),
            format!("--id={}", self.content_id),
            format!("--platform={}", self.platform),
        ]
    }
}
