use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::model::EntityKind;
use crate::upstream::traits::{ListQuery, UpstreamApi, UpstreamEntity, UpstreamError, VersionInfo};

/// How requests authenticate against the upstream service
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// `X-AUTH-USER` / `X-AUTH-TOKEN` header pair
    ApiToken { user: String, token: String },
    /// HTTP basic credentials
    Basic { username: String, password: String },
}

/// REST client for the upstream time-tracking service
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpUpstream {
    pub fn new(base_url: &str, credentials: Credentials, timeout: Option<Duration>) -> Result<Self, UpstreamError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build a client from validated configuration
    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let credentials = config.credentials()?;
        let timeout = config.timeout_secs.map(Duration::from_secs);
        Ok(Self::new(&config.host()?, credentials, timeout)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::ApiToken { user, token } => request
                .header("X-AUTH-USER", user)
                .header("X-AUTH-TOKEN", token),
            Credentials::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Payload(e.to_string()))
    }
}

#[async_trait::async_trait]
impl UpstreamApi for HttpUpstream {
    async fn probe(&self) -> Result<VersionInfo, UpstreamError> {
        self.send(self.client.get(self.url("version"))).await
    }

    async fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Vec<UpstreamEntity>, UpstreamError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("size", query.size.to_string()),
        ];
        if let Some(term) = &query.term {
            params.push(("term", term.clone()));
        }

        log::debug!("GET {} {:?}", kind.collection(), params);
        self.send(self.client.get(self.url(kind.collection())).query(&params))
            .await
    }

    async fn create(&self, kind: EntityKind, payload: &Map<String, Value>) -> Result<UpstreamEntity, UpstreamError> {
        log::debug!("POST {}", kind.collection());
        self.send(self.client.post(self.url(kind.collection())).json(payload))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_under_api() {
        let upstream = HttpUpstream::new(
            "https://tracker.example.com/",
            Credentials::Basic {
                username: "sync".into(),
                password: "pw".into(),
            },
            None,
        )
        .unwrap();

        assert_eq!(upstream.url("version"), "https://tracker.example.com/api/version");
        assert_eq!(
            upstream.url(EntityKind::Activity.collection()),
            "https://tracker.example.com/api/activities"
        );
    }
}
