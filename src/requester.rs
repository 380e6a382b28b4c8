// Envoi de la demande de calcul au workflow externe (un seul POST, sans nouvelle tentative).
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::SubmissionError;
use crate::models::InteractionRequest;

#[async_trait]
pub trait InteractionRequester: Send + Sync {
    // `Ok` signifie seulement "accepté" : le résultat arrivera plus tard dans le cache.
    async fn submit(&self, request: &InteractionRequest) -> Result<(), SubmissionError>;
}

pub struct WebhookRequester {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookRequester {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl InteractionRequester for WebhookRequester {
    async fn submit(&self, request: &InteractionRequest) -> Result<(), SubmissionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubmissionError::Rejected(status.as_u16()));
        }

        info!(
            "Interaction request accepted for {} + {}",
            request.drug1.name, request.drug2.name
        );
        Ok(())
    }
}
