//! HTTP dispatcher for the storefront `/ai/query` endpoint

use async_trait::async_trait;
use tracing::debug;

use super::{AssistantReply, DispatchError, QueryDispatcher, QueryRequest};

/// Posts queries to `{base_url}/ai/query`
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpDispatcher {
    /// Create a dispatcher for the given API base URL
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/ai/query", base_url.trim_end_matches('/')),
            auth_token,
        }
    }

    /// Full URL queries are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryDispatcher for HttpDispatcher {
    async fn query(&self, request: QueryRequest) -> Result<AssistantReply, DispatchError> {
        debug!(endpoint = %self.endpoint, limit = request.limit, "dispatching query");

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<AssistantReply>()
            .await
            .map_err(|e| DispatchError::Decode(e.to_string()))
    }
}
