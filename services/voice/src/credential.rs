//! Ephemeral credential acquisition.

use crate::error::CallError;
use async_trait::async_trait;
use mentorcall_core::Variant;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// A short-lived credential authorizing one signaling exchange.
#[derive(Debug, Clone)]
pub struct EphemeralCredential {
    pub secret: SecretString,
    pub session_id: Option<String>,
}

/// Issues ephemeral credentials scoped to a variant.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self, variant: Variant) -> Result<EphemeralCredential, CallError>;
}

#[derive(Serialize)]
struct CredentialRequest {
    variant: Variant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialResponse {
    #[serde(default)]
    ephemeral_credential: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Fetches credentials from the marketplace backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCredentialProvider {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            access_token,
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    #[instrument(name = "credential_fetch", skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch(&self, variant: Variant) -> Result<EphemeralCredential, CallError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&CredentialRequest { variant });
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Credential(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Credential(format!(
                "backend responded with {}: {}",
                status, body
            )));
        }

        let payload: CredentialResponse = response
            .json()
            .await
            .map_err(|e| CallError::Credential(format!("invalid response body: {}", e)))?;
        let secret = payload
            .ephemeral_credential
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CallError::Credential("response carried no credential".to_string()))?;

        debug!(session_id = ?payload.session_id, "Issued ephemeral credential");
        Ok(EphemeralCredential {
            secret: SecretString::from(secret),
            session_id: payload.session_id,
        })
    }
}
