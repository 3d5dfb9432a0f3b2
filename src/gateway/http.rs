//! HTTP implementation of the gateway (JSON over HTTP)

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{
    CredentialRequest, InstallRequest, ModelPageRequest, ModelStatus, NewChatRequest,
    QueryReply, QueryRequest, RemoteMessage,
};
use super::{Gateway, GatewayError, GatewayResult};
use crate::config::GatewayConfig;
use crate::core::{ChatSession, GenerationSettings, ModelEntry, SessionId};

/// Header carrying the credential for gated catalogs
const CATALOG_TOKEN_HEADER: &str = "X-Catalog-Token";

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGateway {
    /// Create a gateway rooted at `base_url` (e.g. `http://127.0.0.1:9015/api`)
    ///
    /// Only the connect phase is bounded; a request that is accepted may take
    /// as long as the backend needs.
    pub fn new(base_url: &str, connect_timeout: Duration) -> GatewayResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::BadRequest(format!("invalid gateway URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::BadRequest(format!(
                "gateway URL cannot carry a path: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::BadRequest(format!("invalid gateway URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> GatewayResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(GatewayError::from_network_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Gateway answered {}: {}", status, body);
        Err(GatewayError::from_http_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_sessions(&self) -> GatewayResult<Vec<ChatSession>> {
        let url = self.endpoint(&["chats"])?;
        self.send_json(self.client.get(url)).await
    }

    async fn create_session(&self, title: Option<&str>) -> GatewayResult<ChatSession> {
        let url = self.endpoint(&["chats"])?;
        let body = NewChatRequest {
            title: title.map(str::to_string),
        };
        self.send_json(self.client.post(url).json(&body)).await
    }

    async fn delete_session(&self, id: &SessionId) -> GatewayResult<()> {
        let url = self.endpoint(&["chats", id.as_str()])?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn list_messages(&self, id: &SessionId) -> GatewayResult<Vec<RemoteMessage>> {
        let url = self.endpoint(&["chats", id.as_str(), "messages"])?;
        self.send_json(self.client.get(url)).await
    }

    async fn submit_query(&self, request: &QueryRequest) -> GatewayResult<QueryReply> {
        let url = self.endpoint(&["query"])?;
        self.send_json(self.client.post(url).json(request)).await
    }

    async fn list_models(&self, request: &ModelPageRequest) -> GatewayResult<Vec<ModelEntry>> {
        let url = self.endpoint(&["models"])?;
        let mut builder = self.client.get(url).query(&[
            ("offset", request.offset.to_string()),
            ("limit", request.limit.to_string()),
        ]);
        if let Some(token) = request.credential.as_deref() {
            builder = builder.header(CATALOG_TOKEN_HEADER, token);
        }
        self.send_json(builder).await
    }

    async fn install_model(&self, name: &str) -> GatewayResult<()> {
        let url = self.endpoint(&["models", "install"])?;
        let body = InstallRequest {
            name: name.to_string(),
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn load_model(&self, name: &str) -> GatewayResult<()> {
        let url = self.endpoint(&["load_model"])?;
        self.send(self.client.post(url).query(&[("model_name", name)]))
            .await?;
        Ok(())
    }

    async fn clear_history(&self) -> GatewayResult<()> {
        let url = self.endpoint(&["clear_history"])?;
        self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn get_settings(&self) -> GatewayResult<GenerationSettings> {
        let url = self.endpoint(&["settings"])?;
        self.send_json(self.client.get(url)).await
    }

    async fn commit_settings(
        &self,
        settings: &GenerationSettings,
    ) -> GatewayResult<GenerationSettings> {
        let url = self.endpoint(&["settings"])?;
        self.send_json(self.client.put(url).json(settings)).await
    }

    async fn persist_credential(&self, value: &str) -> GatewayResult<()> {
        let url = self.endpoint(&["credential"])?;
        let body = CredentialRequest {
            value: value.to_string(),
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn model_status(&self) -> GatewayResult<ModelStatus> {
        let url = self.endpoint(&["model_status"])?;
        self.send_json(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let gw = gateway("http://127.0.0.1:9015/api");
        let url = gw.endpoint(&["chats", "abc", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9015/api/chats/abc/messages");

        let gw = gateway("http://127.0.0.1:9015/api/");
        let url = gw.endpoint(&["models", "install"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9015/api/models/install");
    }

    #[test]
    fn test_endpoint_encodes_session_ids() {
        let gw = gateway("http://localhost:9015/api");
        let url = gw.endpoint(&["chats", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9015/api/chats/a%20b%2Fc");
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpGateway::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpGateway::new("mailto:me@example.com", Duration::from_secs(1)).is_err());
    }
}
