//! Processo condutor: sincroniza a árvore, instala o código de cola e lança
//! o hospedeiro sob supervisão do watchdog.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{AutoUploadConfig, HostConfig, SourceConfig};
use crate::consent::ConsentCache;
use crate::error::UploadError;
use crate::state_machine::Job;
use crate::supervisor::{SupervisedExit, WatchdogSettings, run_supervised};
use crate::sync::SourceSync;

/// Conduz um job do checkout até o término do processo hospedeiro.
pub struct Driver {
    source: SourceConfig,
    host: HostConfig,
    watchdog: WatchdogSettings,
    /// Espelho do cache de consentimento; vale por uma sessão do hospedeiro.
    consent_session: Option<PathBuf>,
}

impl Driver {
    pub fn from_config(config: &AutoUploadConfig) -> Self {
        Self {
            source: config.source.clone(),
            host: config.host.clone(),
            watchdog: config.watchdog.settings(),
            consent_session: config.consent.session_file.clone(),
        }
    }

    /// Executa o job. Sucesso só quando o hospedeiro sai com código 0.
    pub async fn run(&self, job: &Job) -> Result<(), UploadError> {
        let head = SourceSync::new(&self.source.repo_path, self.source.policy())
            .sync(&self.source.remote, job.commit.as_deref())
            .await?;
        info!(head = %head, content_id = %job.content_id, "source tree ready");

        self.install_glue();
        if let Some(path) = &self.consent_session {
            ConsentCache::discard_session_file(path);
        }

        let args = self.host_args(job);
        info!(
            executable = %self.host.executable.display(),
            args = ?args,
            "launching host"
        );
        let exit = run_supervised(
            &self.host.executable,
            &args,
            Some(&self.host.project_path),
            &self.host.log_file,
            &self.watchdog,
        )
        .await?;

        match exit {
            SupervisedExit::Exited(status) if status.success() => {
                info!("host finished successfully");
                Ok(())
            }
            SupervisedExit::Exited(status) => Err(UploadError::HostProcess(format!(
                "host exited with {status}"
            ))),
            SupervisedExit::StalledAndKilled { idle } => {
                Err(UploadError::StalledAndKilled { idle })
            }
        }
    }

    /// Argumentos do hospedeiro: o modelo configurado, `--` e os tokens do job.
    fn host_args(&self, job: &Job) -> Vec<String> {
        let project = self.host.project_path.display().to_string();
        let log = absolute(&self.host.log_file).display().to_string();

        let mut args: Vec<String> = self
            .host
            .args
            .iter()
            .map(|arg| arg.replace("{project}", &project).replace("{log}", &log))
            .collect();
        args.push("--".to_string());
        args.extend(job.host_args());
        args
    }

    /// Copia o código de cola para o projeto. Falhas são apenas avisos.
    fn install_glue(&self) {
        let (Some(source), Some(dest)) = (&self.host.glue_source, &self.host.glue_dest) else {
            return;
        };
        let target = self.host.project_path.join(dest);
        let copied = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(source, &target));
        match copied {
            Ok(bytes) => info!(dest = %target.display(), bytes, "glue code installed"),
            Err(e) => warn!(
                source = %source.display(),
                dest = %target.display(),
                error = %e,
                "failed to install glue code"
            ),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Platform;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn job() -> Job {
        Job {
            scene: "a.scene".into(),
            thumbnail: "a.png".into(),
            name: "N".into(),
            content_id: "wrld_1".into(),
            platform: Platform::Android,
            commit: None,
        }
    }

    /// Auxiliar: repositório com um commit, clonado em `work`.
    fn cloned_repo(tmp: &TempDir) -> PathBuf {
        let origin_path = tmp.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        fs::write(origin_path.join("scene.txt"), "v1").unwrap();
        let mut index = origin.index().unwrap();
        index.add_path(Path::new("scene.txt")).unwrap();
        index.write().unwrap();
        let tree = origin.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        origin
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        let work = tmp.path().join("work");
        Repository::clone(origin_path.to_str().unwrap(), &work).unwrap();
        work
    }

    fn driver(tmp: &TempDir, work: &Path, script: &str) -> Driver {
        let mut config = AutoUploadConfig::default();
        config.source.repo_path = work.to_path_buf();
        config.source.retry_delay_secs = 0;
        config.host.executable = PathBuf::from("sh");
        config.host.project_path = work.to_path_buf();
        config.host.args = vec!["-c".into(), script.into()];
        config.host.log_file = tmp.path().join("host.log");
        Driver::from_config(&config)
    }

    #[test]
    fn host_args_expand_template_and_append_job() {
        let mut config = AutoUploadConfig::default();
        config.host.project_path = PathBuf::from("/proj");
        config.host.log_file = PathBuf::from("/logs/host.log");
        config.host.args = vec![
            "-projectPath".into(),
            "{project}".into(),
            "-logFile".into(),
            "{log}".into(),
        ];
        let args = Driver::from_config(&config).host_args(&job());
        assert_eq!(
            args,
            vec![
                "-projectPath",
                "/proj",
                "-logFile",
                "/logs/host.log",
                "--",
                "--scene=a.scene",
                "--thumbnail=a.png",
                "--name=N",
                "--id=wrld_1",
                "--platform=android",
            ]
        );
    }

    #[test]
    fn glue_is_copied_into_project() {
        let tmp = TempDir::new().unwrap();
        let glue = tmp.path().join("Uploader.cs");
        fs::write(&glue, "// glue").unwrap();

        let mut config = AutoUploadConfig::default();
        config.host.project_path = tmp.path().join("proj");
        config.host.glue_source = Some(glue);
        config.host.glue_dest = Some(PathBuf::from("Assets/Editor/Uploader.cs"));
        Driver::from_config(&config).install_glue();

        let installed = tmp.path().join("proj/Assets/Editor/Uploader.cs");
        assert_eq!(fs::read_to_string(installed).unwrap(), "// glue");
    }

    #[test]
    fn missing_glue_is_only_a_warning() {
        let tmp = TempDir::new().unwrap();
        let mut config = AutoUploadConfig::default();
        config.host.project_path = tmp.path().to_path_buf();
        config.host.glue_source = Some(tmp.path().join("absent.cs"));
        config.host.glue_dest = Some(PathBuf::from("Uploader.cs"));
        Driver::from_config(&config).install_glue();
        assert!(!tmp.path().join("Uploader.cs").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_host_run() {
        let tmp = TempDir::new().unwrap();
        let work = cloned_repo(&tmp);
        let driver = driver(&tmp, &work, "echo \"publishing $4\"");

        driver.run(&job()).await.unwrap();

        let log = fs::read_to_string(tmp.path().join("host.log")).unwrap();
        assert!(log.contains("publishing --id=wrld_1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn each_launch_starts_a_fresh_consent_session() {
        let tmp = TempDir::new().unwrap();
        let work = cloned_repo(&tmp);
        let session = tmp.path().join("consent.session");
        fs::write(&session, "wrld_1").unwrap();

        let mut config = AutoUploadConfig::default();
        config.source.repo_path = work.clone();
        config.host.executable = PathBuf::from("sh");
        config.host.project_path = work;
        config.host.args = vec!["-c".into(), "exit 0".into()];
        config.host.log_file = tmp.path().join("host.log");
        config.consent.session_file = Some(session.clone());

        Driver::from_config(&config).run(&job()).await.unwrap();

        assert!(!session.exists());
        let cache = ConsentCache::with_session_file(session).unwrap();
        assert!(!cache.contains("wrld_1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_host_process_error() {
        let tmp = TempDir::new().unwrap();
        let work = cloned_repo(&tmp);
        let err = driver(&tmp, &work, "exit 1").run(&job()).await.unwrap_err();
        assert!(matches!(err, UploadError::HostProcess(_)));
    }

    #[tokio::test]
    async fn sync_failure_stops_before_launch() {
        let tmp = TempDir::new().unwrap();
        let mut config = AutoUploadConfig::default();
        config.source.repo_path = tmp.path().join("not-a-repo");
        config.source.attempts = 1;
        config.host.log_file = tmp.path().join("host.log");

        let err = Driver::from_config(&config).run(&job()).await.unwrap_err();
        assert!(matches!(err, UploadError::SyncFailed { .. }));
        assert!(!tmp.path().join("host.log").exists());
    }
}
