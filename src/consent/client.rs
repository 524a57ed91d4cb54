use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use super::error::ConsentError;
use super::types::{Agreement, AgreementReceipt, ConsentCheck};

/// Remote consent operations the preflight depends on.
pub trait ConsentApi {
    /// Whether `content_id` already has the agreement recorded.
    async fn check_consent(
        &self,
        code: &str,
        content_id: &str,
        version: u32,
    ) -> Result<bool, ConsentError>;

    /// Record the agreement and return the server's echo of it.
    async fn record_consent(&self, agreement: &Agreement)
    -> Result<AgreementReceipt, ConsentError>;
}

pub struct HttpConsentClient {
    auth_token: Option<String>,
    client: Client,
    base_url: String,
}

impl HttpConsentClient {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, ConsentError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            auth_token: auth_token.filter(|t| !t.is_empty()),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ConsentError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConsentError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ConsentError::Malformed(e.to_string()))
    }
}

impl ConsentApi for HttpConsentClient {
    async fn check_consent(
        &self,
        code: &str,
        content_id: &str,
        version: u32,
    ) -> Result<bool, ConsentError> {
        let version = version.to_string();
        let request = self
            .client
            .get(format!("{}/agreement/check", self.base_url))
            .query(&[
                ("agreementCode", code),
                ("contentId", content_id),
                ("version", version.as_str()),
            ]);
        let response = self.authorize(request).send().await?;
        let check: ConsentCheck = Self::read_json(response).await?;
        Ok(check.agreed)
    }

    async fn record_consent(
        &self,
        agreement: &Agreement,
    ) -> Result<AgreementReceipt, ConsentError> {
        let request = self
            .client
            .post(format!("{}/agreement", self.base_url))
            .json(agreement);
        let response = self.authorize(request).send().await?;
        Self::read_json(response).await
    }
}
