//! Erros de transporte do cliente de consentimento.
//!
//! Qualquer [`ConsentError`] vira `ConsentServiceUnavailable` na verificação
//! prévia; não há retentativa interna.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsentError {
    /// O serviço respondeu com um status HTTP de erro.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// O corpo da resposta não tinha o formato esperado.
    #[error("malformed response: {0}")]
    Malformed(String),
}
