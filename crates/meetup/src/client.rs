use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::ErrorBody;
use crate::token::TokenStore;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// An authenticated JSON request against the API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PATCH,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

/// Raw response: status plus undecoded body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Value of the `Authorization` response header, if any.
    pub authorization: Option<String>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            authorization: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_str(&self.body).map_err(|err| ClientError::Protocol {
            message: format!("invalid json response (HTTP {}): {err}", self.status),
        })
    }

    /// Decode a success body, or turn a failure into `ClientError::Http`
    /// carrying the backend's error text.
    pub fn into_result<T: DeserializeOwned>(self) -> ClientResult<T> {
        self.ensure_success()?;
        self.json()
    }

    pub fn ensure_success(&self) -> ClientResult<()> {
        if self.is_success() {
            return Ok(());
        }
        let message = serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.message())
            .unwrap_or_else(|| format!("request failed with HTTP {}", self.status));
        Err(ClientError::Http {
            status: self.status,
            message,
        })
    }
}

/// Request/response half of the transport.
pub trait Transport: Clone + Send + Sync + 'static {
    fn request(&self, req: ApiRequest) -> impl Future<Output = ClientResult<ApiResponse>> + Send;
}

/// HTTP client for the meetup JSON API. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("meetup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::transport)?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.api_url)
        } else {
            format!("{}/{path}", self.api_url)
        }
    }
}

impl Transport for ApiClient {
    async fn request(&self, req: ApiRequest) -> ClientResult<ApiResponse> {
        let url = self.url_for(&req.path);
        tracing::debug!(method = %req.method, %url, "api request");

        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = self.tokens.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|err| ClientError::Transport {
            message: format!("{} {url} failed: {err}", req.method),
        })?;
        let status = resp.status().as_u16();
        let authorization = resp
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|err| ClientError::Transport {
            message: format!("failed to read response body from {url}: {err}"),
        })?;

        tracing::debug!(%url, status, "api response");
        Ok(ApiResponse {
            status,
            body,
            authorization,
        })
    }
}
