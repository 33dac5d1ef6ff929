use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::future::Future;

use crate::error::Error;

/// Delivers an already serialized JSON payload to a webhook.
pub trait Transport: Send + Sync + 'static {
    /// Performs a single POST of `body` to `url` and reports the response
    /// status. Non-2xx statuses are not errors at this level.
    fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<StatusCode, Error>> + Send;
}

/// [`Transport`] backed by a shared `reqwest` client, one attempt per call.
#[derive(Debug, Clone, Default)]
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for WebhookSender {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<StatusCode, Error> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }
}
