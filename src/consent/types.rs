//! Corpos de requisição e resposta do serviço remoto de consentimento.
//!
//! Os campos são serializados em camelCase, no formato que o serviço espera.

use serde::{Deserialize, Serialize};

/// Código do acordo de direitos autorais exigido antes de publicar.
pub const DEFAULT_AGREEMENT_CODE: &str = "content.copyright.owned";

/// Versão atual do texto do acordo.
pub const DEFAULT_AGREEMENT_VERSION: u32 = 1;

/// Texto integral enviado junto com o registro de consentimento.
pub const DEFAULT_AGREEMENT_TEXT: &str = "By clicking OK, I certify that I have the necessary \
    rights to upload this content and that it will not infringe on any third-party legal or \
    intellectual property rights.";

/// Resposta da verificação de consentimento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentCheck {
    pub agreed: bool,
}

/// Corpo enviado para registrar o consentimento de um conteúdo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub agreement_code: String,
    pub agreement_fulltext: String,
    pub content_id: String,
    pub version: u32,
}

/// Eco devolvido pelo servidor após registrar o consentimento.
///
/// Os três campos precisam bater com o que foi enviado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementReceipt {
    pub agreement_code: String,
    pub content_id: String,
    pub version: u32,
}
