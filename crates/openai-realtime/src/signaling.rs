//! Offer/answer exchange with the realtime endpoint.

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("realtime endpoint rejected the offer with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("realtime endpoint returned an empty answer")]
    EmptyAnswer,
}

/// Posts a local session description and returns the remote answer.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl SignalingClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, model)
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `offer_sdp` authorized by the ephemeral `credential`.
    ///
    /// No timeout is applied; an abandoned exchange is cancelled by dropping
    /// the returned future.
    #[instrument(name = "signaling", skip_all, fields(model = %self.model))]
    pub async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &SecretString,
    ) -> Result<String, SignalingError> {
        debug!(offer_len = offer_sdp.len(), "Posting local offer");
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("model", self.model.as_str())])
            .bearer_auth(credential.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SignalingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(SignalingError::EmptyAnswer);
        }
        debug!(answer_len = body.len(), "Received remote answer");
        Ok(body)
    }
}
