//! Configuração do autoupload carregada a partir de `autoupload.toml`.
//!
//! A struct [`AutoUploadConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `AUTOUPLOAD_CONSENT_TOKEN` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::consent::AgreementTerms;
use crate::consent::types::{
    DEFAULT_AGREEMENT_CODE, DEFAULT_AGREEMENT_TEXT, DEFAULT_AGREEMENT_VERSION,
};
use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryPolicy;
use crate::supervisor::{DEFAULT_BUSY_PATTERNS, WatchdogSettings};
use crate::sync::SyncPolicy;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE_NAME: &str = "autoupload.toml";

/// Variável de ambiente que sobrepõe `consent.auth_token`.
pub const CONSENT_TOKEN_ENV: &str = "AUTOUPLOAD_CONSENT_TOKEN";

/// Configuração de nível superior carregada de `autoupload.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutoUploadConfig {
    pub job: JobDefaults,
    pub source: SourceConfig,
    pub host: HostConfig,
    pub watchdog: WatchdogConfig,
    pub orchestrator: OrchestratorConfig,
    pub publish: PublishConfig,
    pub consent: ConsentConfig,
    pub hooks: HooksConfig,
}

/// Valores padrão do job, sobrepostos pelos argumentos recebidos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub scene: String,
    pub thumbnail: String,
    pub name: String,
    pub id: String,
    pub platform: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            scene: "Assets/Scenes/main.unity".to_string(),
            thumbnail: "Assets/Editor/thumbnail.png".to_string(),
            name: "A whole new world".to_string(),
            id: String::new(),
            platform: "pc".to_string(),
        }
    }
}

/// Repositório de origem e política de sincronização.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub repo_path: PathBuf,
    pub remote: String,
    pub attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            remote: "origin".to_string(),
            attempts: 3,
            retry_delay_secs: 5,
        }
    }
}

impl SourceConfig {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            attempts: self.attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

/// Processo hospedeiro (editor) lançado sob supervisão.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub executable: PathBuf,
    /// Diretório do projeto; substitui `{project}` nos argumentos.
    pub project_path: PathBuf,
    /// Modelo de argumentos; os tokens do job são anexados após `--`.
    pub args: Vec<String>,
    /// Arquivo de log do hospedeiro; substitui `{log}` nos argumentos.
    pub log_file: PathBuf,
    /// Código de cola copiado para dentro do projeto antes do lançamento.
    pub glue_source: Option<PathBuf>,
    /// Destino relativo ao projeto.
    pub glue_dest: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("Unity"),
            project_path: PathBuf::from("."),
            args: vec![
                "-projectPath".to_string(),
                "{project}".to_string(),
                "-executeMethod".to_string(),
                "AutoUploader.UploadCli".to_string(),
                "-logFile".to_string(),
                "-".to_string(),
            ],
            log_file: PathBuf::from("host_upload.log"),
            glue_source: None,
            glue_dest: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub idle_threshold_secs: u64,
    pub poll_interval_secs: u64,
    pub busy_patterns: Vec<String>,
    pub scan_bytes: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 15 * 60,
            poll_interval_secs: 30,
            busy_patterns: DEFAULT_BUSY_PATTERNS.iter().map(|p| p.to_string()).collect(),
            scan_bytes: 64 * 1024,
        }
    }
}

impl WatchdogConfig {
    pub fn settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            busy_patterns: self.busy_patterns.clone(),
            scan_bytes: self.scan_bytes,
        }
    }
}

/// Intervalos de espera do orquestrador.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Onde o registro de execução pendente é gravado.
    pub state_dir: PathBuf,
    pub host_poll_ms: u64,
    /// Sem valor, a espera pelo hospedeiro é ilimitada.
    pub host_ready_timeout_secs: Option<u64>,
    pub builder_poll_ms: u64,
    pub builder_timeout_secs: u64,
    pub login_poll_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".autoupload"),
            host_poll_ms: 1000,
            host_ready_timeout_secs: None,
            builder_poll_ms: 500,
            builder_timeout_secs: 30,
            login_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    pub base_url: String,
    pub auth_token: String,
    pub agreement_code: String,
    pub agreement_version: u32,
    pub agreement_text: String,
    /// Arquivo opcional que espelha o cache de consentimento da sessão.
    pub session_file: Option<PathBuf>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787/api".to_string(),
            auth_token: String::new(),
            agreement_code: DEFAULT_AGREEMENT_CODE.to_string(),
            agreement_version: DEFAULT_AGREEMENT_VERSION,
            agreement_text: DEFAULT_AGREEMENT_TEXT.to_string(),
            session_file: None,
        }
    }
}

impl ConsentConfig {
    pub fn terms(&self) -> AgreementTerms {
        AgreementTerms {
            code: self.agreement_code.clone(),
            version: self.agreement_version,
            text: self.agreement_text.clone(),
        }
    }
}

/// Comandos (argv) que implementam os colaboradores do hospedeiro.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub activate: Option<Vec<String>>,
    pub builder_probe: Option<Vec<String>>,
    pub login_probe: Option<Vec<String>>,
    pub active_target: Option<Vec<String>>,
    pub switch_target: Option<Vec<String>>,
    pub publish: Option<Vec<String>>,
}

impl AutoUploadConfig {
    /// Carrega a configuração de `path`, ou de `autoupload.toml` no diretório atual.
    /// Usa valores padrão se o arquivo implícito não existir; um caminho
    /// explícito inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo para o token.
        if let Ok(token) = std::env::var(CONSENT_TOKEN_ENV)
            && !token.is_empty()
        {
            config.consent.auth_token = token;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<AutoUploadConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish.max_attempts,
            inter_attempt_delay: Duration::from_secs(self.publish.retry_delay_secs),
            heartbeat_interval: Duration::from_secs(self.publish.heartbeat_secs),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let o = &self.orchestrator;
        OrchestratorSettings {
            host_poll_interval: Duration::from_millis(o.host_poll_ms),
            host_ready_timeout: o.host_ready_timeout_secs.map(Duration::from_secs),
            builder_poll_interval: Duration::from_millis(o.builder_poll_ms),
            builder_timeout: Duration::from_secs(o.builder_timeout_secs),
            login_poll_interval: Duration::from_millis(o.login_poll_ms),
            publish: self.publish_policy(),
            project_root: self.host.project_path.clone(),
        }
    }
}
