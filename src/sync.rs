//! Sincronização da árvore de código via libgit2 antes de lançar o hospedeiro.
//!
//! O [`SourceSync`] guarda alterações locais, busca o remoto e então faz
//! checkout de uma referência exata ou reset hard para a ponta do remoto,
//! repetindo a sequência inteira em caso de falha.

use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, ObjectType, Repository, ResetType, Signature};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::UploadError;

/// Tentativas e intervalo fixo entre elas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Sincronizador de um repositório local.
pub struct SourceSync {
    repo_path: PathBuf,
    policy: SyncPolicy,
}

impl SourceSync {
    pub fn new(repo_path: &Path, policy: SyncPolicy) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            policy,
        }
    }

    /// Leva a árvore local até `reference` (ou à ponta do remoto) e retorna o
    /// hash do HEAD resultante.
    pub async fn sync(&self, remote: &str, reference: Option<&str>) -> Result<String, UploadError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(remote, reference, attempt, "git: syncing source tree");

            let path = self.repo_path.clone();
            let remote_name = remote.to_string();
            let pinned = reference.map(str::to_string);
            let result = tokio::task::spawn_blocking(move || {
                sync_once(&path, &remote_name, pinned.as_deref())
            })
            .await
            .unwrap_or_else(|e| Err(git2::Error::from_str(&format!("sync task failed: {e}"))));

            match result {
                Ok(head) => {
                    info!(head = %head, "git: synced");
                    return Ok(head);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "git: sync attempt failed");
                    if attempt >= attempts {
                        return Err(UploadError::SyncFailed {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    sleep(self.policy.retry_delay).await;
                }
            }
        }
    }
}

fn sync_once(path: &Path, remote_name: &str, reference: Option<&str>) -> Result<String, git2::Error> {
    let mut repo = Repository::open(path)?;
    stash_local_changes(&mut repo)?;

    {
        let mut remote = repo.find_remote(remote_name)?;
        remote.fetch(&[] as &[&str], None, None)?;
    }

    match reference {
        Some(reference) => {
            let commit = repo.revparse_single(reference)?.peel_to_commit()?;
            repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
            repo.set_head_detached(commit.id())?;
        }
        None => {
            let tip = remote_tip(&repo, remote_name)?;
            repo.reset(&tip, ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        }
    }

    let head = repo.head()?.peel_to_commit()?.id();
    Ok(head.to_string())
}

/// Guarda alterações locais; "nada para guardar" não é erro.
fn stash_local_changes(repo: &mut Repository) -> Result<(), git2::Error> {
    let sig = repo
        .signature()
        .or_else(|_| Signature::now("autoupload", "autoupload@localhost"))?;
    match repo.stash_save(&sig, "autoupload: local changes before sync", None) {
        Ok(oid) => {
            info!(stash = %oid, "git: stashed local changes");
            Ok(())
        }
        Err(e) if e.code() == ErrorCode::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Ponta remota da branch atual, ou `<remote>/HEAD` com HEAD destacado.
fn remote_tip<'r>(repo: &'r Repository, remote: &str) -> Result<git2::Object<'r>, git2::Error> {
    let branch = repo
        .head()
        .ok()
        .filter(|head| head.is_branch())
        .and_then(|head| head.shorthand().map(str::to_string));

    if let Some(branch) = branch
        && let Ok(reference) = repo.find_reference(&format!("refs/remotes/{remote}/{branch}"))
    {
        return reference.peel(ObjectType::Commit);
    }
    repo.revparse_single(&format!("{remote}/HEAD"))?
        .peel(ObjectType::Commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Oid;
    use std::fs;
    use tempfile::TempDir;

    fn fast_policy() -> SyncPolicy {
        SyncPolicy {
            attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }

    /// Auxiliar: grava um arquivo e cria um commit sobre o HEAD atual (se houver).
    fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        let parents: Vec<git2::Commit<'_>> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    /// Auxiliar: repositório "remoto" com um commit e um clone dele.
    fn setup() -> (TempDir, Repository, PathBuf, Oid) {
        let tmp = TempDir::new().unwrap();
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        let first = commit_file(&origin, "scene.txt", "v1", "initial");

        let work_path = tmp.path().join("work");
        Repository::clone(origin_path.to_str().unwrap(), &work_path).unwrap();
        (tmp, origin, work_path, first)
    }

    #[tokio::test]
    async fn sync_resets_to_remote_tip_and_stashes_local_edits() {
        let (_tmp, origin, work_path, _first) = setup();
        let second = commit_file(&origin, "scene.txt", "v2", "update scene");
        fs::write(work_path.join("scene.txt"), "local edit").unwrap();

        let head = SourceSync::new(&work_path, fast_policy())
            .sync("origin", None)
            .await
            .unwrap();

        assert_eq!(head, second.to_string());
        assert_eq!(fs::read_to_string(work_path.join("scene.txt")).unwrap(), "v2");

        let mut repo = Repository::open(&work_path).unwrap();
        let mut stashes = 0;
        repo.stash_foreach(|_, _, _| {
            stashes += 1;
            true
        })
        .unwrap();
        assert_eq!(stashes, 1);
    }

    #[tokio::test]
    async fn sync_checks_out_pinned_reference() {
        let (_tmp, origin, work_path, first) = setup();
        commit_file(&origin, "scene.txt", "v2", "update scene");

        let head = SourceSync::new(&work_path, fast_policy())
            .sync("origin", Some(&first.to_string()))
            .await
            .unwrap();

        assert_eq!(head, first.to_string());
        let repo = Repository::open(&work_path).unwrap();
        assert!(repo.head_detached().unwrap());
        assert_eq!(fs::read_to_string(work_path.join("scene.txt")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn clean_tree_syncs_without_stash() {
        let (_tmp, _origin, work_path, first) = setup();
        let head = SourceSync::new(&work_path, fast_policy())
            .sync("origin", None)
            .await
            .unwrap();
        assert_eq!(head, first.to_string());
    }

    #[tokio::test]
    async fn unknown_remote_fails_after_all_attempts() {
        let (_tmp, _origin, work_path, _first) = setup();
        let err = SourceSync::new(&work_path, fast_policy())
            .sync("nope", None)
            .await
            .unwrap_err();
        match err {
            UploadError::SyncFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected SyncFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_repo_path_fails() {
        let tmp = TempDir::new().unwrap();
        let policy = SyncPolicy {
            attempts: 1,
            retry_delay: Duration::ZERO,
        };
        let err = SourceSync::new(tmp.path(), policy).sync("origin", None).await;
        assert!(matches!(err, Err(UploadError::SyncFailed { attempts: 1, .. })));
    }
}
