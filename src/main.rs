mod cli;
mod config;
mod consent;
mod driver;
mod error;
mod host;
mod orchestrator;
mod readiness;
mod retry;
mod state_machine;
mod supervisor;
mod sync;
mod ui;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::AutoUploadConfig;
use consent::{ConsentCache, ConsentPreflight, HttpConsentClient};
use driver::Driver;
use error::UploadError;
use host::CommandHost;
use orchestrator::{JobOrchestrator, RunMode};
use state_machine::{FileRecordStore, RecordStore};
use sync::SourceSync;
use ui::Progress;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "autoupload failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AutoUploadConfig::load(cli.config.as_deref())?;
    let records = FileRecordStore::in_dir(&config.orchestrator.state_dir);

    match cli.command {
        Command::Run(args) => {
            let job = args.to_job(&config.job);
            let progress = Progress::start(&format!("building {}", job.content_id));
            match Driver::from_config(&config).run(&job).await {
                Ok(()) => {
                    progress.succeed(&format!("published {}", job.content_id));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(kind = e.kind(), error = %e, "driver failed");
                    progress.fail(&e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Upload { interactive, tokens } => {
            let fresh = cli::parse_unattended_args(&config.job, &tokens);
            let mode = if interactive {
                RunMode::Interactive
            } else {
                RunMode::Unattended
            };

            let token = Some(config.consent.auth_token.clone()).filter(|t| !t.is_empty());
            let client = HttpConsentClient::new(&config.consent.base_url, token)
                .context("failed to build consent client")?;
            let cache = match &config.consent.session_file {
                Some(path) => ConsentCache::with_session_file(path.clone())?,
                None => ConsentCache::new(),
            };
            let consent = ConsentPreflight::new(client, config.consent.terms(), cache);
            let host = CommandHost::new(config.hooks.clone());

            let mut orchestrator = JobOrchestrator::new(
                host.clone(),
                host,
                consent,
                records,
                config.orchestrator_settings(),
                mode,
            );

            let progress = Progress::start("uploading");
            let report = orchestrator.run(Some(fresh)).await?;
            progress.finish(&report);

            Ok(match report.exit_code {
                Some(0) | None => ExitCode::SUCCESS,
                Some(_) => ExitCode::FAILURE,
            })
        }
        Command::Sync { commit } => {
            let progress = Progress::start("syncing source tree");
            let result = SourceSync::new(&config.source.repo_path, config.source.policy())
                .sync(&config.source.remote, commit.as_deref())
                .await;
            match result {
                Ok(head) => {
                    progress.succeed(&format!("synced to {head}"));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    progress.fail(&e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Status => match records.load() {
            Ok(record) => {
                ui::print_record(records.path(), record.as_ref());
                Ok(ExitCode::SUCCESS)
            }
            Err(e @ UploadError::CorruptRecord(_)) => {
                ui::print_corrupt_record(records.path(), &e);
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e.into()),
        },
        Command::Clear => {
            records.clear()?;
            info!(path = %records.path().display(), "pending upload record cleared");
            Ok(ExitCode::SUCCESS)
        }
    }
}
