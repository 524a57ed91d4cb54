//! Interface de linha de comando do autoupload baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, upload, sync,
//! status, clear) e flags globais (--config, --verbose), além do parser do
//! conjunto de argumentos `--chave=valor` do modo não assistido.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::debug;

use crate::config::JobDefaults;
use crate::state_machine::{Job, Platform};

/// autoupload: sincroniza, constrói e publica conteúdo sem intervenção.
#[derive(Debug, Parser)]
#[command(name = "autoupload", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./autoupload.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sincroniza o código e lança o hospedeiro supervisionado.
    Run(JobArgs),

    /// Conduz o job dentro do hospedeiro, retomando um registro pendente.
    Upload {
        /// Execução assistida: estados terminais não geram código de saída.
        #[arg(long, default_value_t = false)]
        interactive: bool,

        /// Tokens `--chave=valor` do modo não assistido (passe após `--`).
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },

    /// Apenas sincroniza a árvore de código.
    Sync {
        /// Referência exata para checkout em vez da ponta do remoto.
        #[arg(long)]
        commit: Option<String>,
    },

    /// Mostra o registro de execução pendente, se houver.
    Status,

    /// Apaga o registro de execução pendente.
    Clear,
}

/// Campos do job; ausentes caem nos valores de `[job]`.
#[derive(Debug, Clone, Default, Args)]
pub struct JobArgs {
    #[arg(long)]
    pub scene: Option<String>,
    #[arg(long)]
    pub thumbnail: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub id: Option<String>,
    /// `pc` ou `android`; outros valores viram `pc`.
    #[arg(long)]
    pub platform: Option<String>,
    #[arg(long)]
    pub commit: Option<String>,
}

impl JobArgs {
    pub fn to_job(&self, defaults: &JobDefaults) -> Job {
        let pick = |arg: &Option<String>, default: &str| {
            arg.clone().unwrap_or_else(|| default.to_string())
        };
        Job {
            scene: pick(&self.scene, &defaults.scene),
            thumbnail: pick(&self.thumbnail, &defaults.thumbnail),
            name: pick(&self.name, &defaults.name),
            content_id: pick(&self.id, &defaults.id),
            platform: Platform::parse_lenient(&pick(&self.platform, &defaults.platform)),
            commit: self.commit.clone(),
        }
    }
}

/// Monta o job a partir de tokens `--chave=valor`. Chaves desconhecidas e
/// tokens fora do formato são ignorados.
pub fn parse_unattended_args<S: AsRef<str>>(defaults: &JobDefaults, tokens: &[S]) -> Job {
    let mut args = JobArgs::default();
    for token in tokens {
        let token = token.as_ref();
        let Some((key, value)) = token.strip_prefix("--").and_then(|kv| kv.split_once('=')) else {
            debug!(token, "ignoring argument");
            continue;
        };
        let slot = match key {
            "scene" => &mut args.scene,
            "thumbnail" => &mut args.thumbnail,
            "name" => &mut args.name,
            "id" => &mut args.id,
            "platform" => &mut args.platform,
            "commitHash" => &mut args.commit,
            _ => {
                debug!(key, "ignoring unknown argument");
                continue;
            }
        };
        *slot = Some(value.to_string());
    }
    args.to_job(defaults)
}
