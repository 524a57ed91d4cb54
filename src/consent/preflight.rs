//! Ensures the upload agreement is on record before a publish call.
//!
//! Confirmed content ids are cached for the rest of the session so repeated
//! preflights cost no remote round trip.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::client::ConsentApi;
use super::types::{
    Agreement, DEFAULT_AGREEMENT_CODE, DEFAULT_AGREEMENT_TEXT, DEFAULT_AGREEMENT_VERSION,
};
use crate::error::UploadError;

/// Which agreement is being consented to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementTerms {
    pub code: String,
    pub version: u32,
    pub text: String,
}

impl Default for AgreementTerms {
    fn default() -> Self {
        Self {
            code: DEFAULT_AGREEMENT_CODE.to_string(),
            version: DEFAULT_AGREEMENT_VERSION,
            text: DEFAULT_AGREEMENT_TEXT.to_string(),
        }
    }
}

/// Session-scoped set of content ids with confirmed consent. Append-only.
#[derive(Debug, Default)]
pub struct ConsentCache {
    entries: HashSet<String>,
    session_file: Option<PathBuf>,
}

impl ConsentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache mirrored to a `;`-separated session file, seeded from its contents.
    pub fn with_session_file(path: PathBuf) -> Result<Self, UploadError> {
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .trim()
                .split(';')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            entries,
            session_file: Some(path),
        })
    }

    /// Forget a previous session's file so the next host session re-verifies.
    pub fn discard_session_file(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "previous consent session discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to discard consent session"),
        }
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.entries.contains(content_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, content_id: &str) {
        if !self.entries.insert(content_id.to_string()) {
            return;
        }
        let Some(path) = &self.session_file else {
            return;
        };
        let mut ids: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        ids.sort_unstable();
        // The in-memory entry still holds for this session if the mirror fails.
        if let Err(e) = fs::write(path, ids.join(";")) {
            warn!(path = %path.display(), error = %e, "failed to persist consent cache");
        }
    }
}

pub struct ConsentPreflight<C> {
    api: C,
    terms: AgreementTerms,
    cache: ConsentCache,
}

impl<C: ConsentApi> ConsentPreflight<C> {
    pub fn new(api: C, terms: AgreementTerms, cache: ConsentCache) -> Self {
        Self { api, terms, cache }
    }

    pub fn cache(&self) -> &ConsentCache {
        &self.cache
    }

    /// Make sure the agreement is recorded for `content_id`.
    ///
    /// Transport failures surface as `ConsentServiceUnavailable` and are not
    /// retried here. A record response that does not echo the request is
    /// `ConsentRejected`.
    pub async fn ensure_consent(&mut self, content_id: &str) -> Result<(), UploadError> {
        if content_id.is_empty() {
            error!("content id is empty, cannot pre-agree");
            return Err(UploadError::InvalidContentId);
        }

        if self.cache.contains(content_id) {
            debug!(content_id, "consent already confirmed this session");
            return Ok(());
        }

        let agreed = self
            .api
            .check_consent(&self.terms.code, content_id, self.terms.version)
            .await
            .map_err(|e| {
                error!(content_id, error = %e, "failed to check server consent");
                UploadError::ConsentServiceUnavailable(e)
            })?;

        if !agreed {
            let agreement = Agreement {
                agreement_code: self.terms.code.clone(),
                agreement_fulltext: self.terms.text.clone(),
                content_id: content_id.to_string(),
                version: self.terms.version,
            };
            let receipt = self.api.record_consent(&agreement).await.map_err(|e| {
                error!(content_id, error = %e, "failed to record consent on server");
                UploadError::ConsentServiceUnavailable(e)
            })?;

            if receipt.content_id != content_id
                || receipt.version != self.terms.version
                || receipt.agreement_code != self.terms.code
            {
                error!(
                    content_id,
                    echoed_content_id = %receipt.content_id,
                    echoed_version = receipt.version,
                    echoed_code = %receipt.agreement_code,
                    "server rejected consent"
                );
                return Err(UploadError::ConsentRejected {
                    content_id: content_id.to_string(),
                    echoed_content_id: receipt.content_id,
                    echoed_version: receipt.version,
                    echoed_code: receipt.agreement_code,
                });
            }
        }

        self.cache.insert(content_id);
        info!(content_id, recorded = !agreed, "consent confirmed");
        Ok(())
    }
}
