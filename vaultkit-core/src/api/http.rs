//! HTTP implementation of the [`Backend`] trait.
//!
//! A thin wrapper over `reqwest` that sets sensible defaults (timeout,
//! user-agent, bearer auth, HTTPS) and retries transient failures with
//! exponential backoff. Application-level error bodies are decoded into
//! [`ApiError::Status`].

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Environment;
use crate::lock::LockToken;
use crate::types::{EventId, ShareId};

use super::{
    Address, ApiError, Backend, CreateItemCall, EventBatch, FeatureFlags, ItemRef, Plan,
    RemoteItem, RemoteUser,
};
use super::AliasOptions;

/// Backend client over HTTPS.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    timeout: Duration,
    max_retries: usize,
}

impl HttpBackend {
    /// Creates a client for `environment`, authenticated as the session
    /// holding `access_token`.
    #[must_use]
    pub fn new(environment: Environment, access_token: SecretString) -> Self {
        Self::with_base_url(environment.api_base_url(), access_token)
    }

    /// Creates a client against an explicit base URL (no trailing slash).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token,
            timeout: Duration::from_secs(5),
            max_retries: 3, // total attempts = 4
        }
    }

    /// Overrides the transient-failure retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn req(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        #[cfg(not(test))]
        assert!(url.starts_with("https"));

        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("vaultkit-core/{}", env!("CARGO_PKG_VERSION")),
            )
            .bearer_auth(self.access_token.expose_secret())
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.req(Method::GET, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.req(Method::POST, path)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.req(Method::DELETE, path)
    }

    /// Sends a request with retries for transient failures and maps
    /// non-success statuses to [`ApiError::Status`].
    async fn dispatch(&self, request_builder: RequestBuilder) -> Result<Response, ApiError> {
        let Some(template) = request_builder.try_clone() else {
            // Streaming bodies cannot be retried; send once.
            let response = execute(request_builder).await?;
            return into_status_checked(response).await;
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries);

        let response = (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                TransientError::permanent(
                    "<unknown>".to_owned(),
                    None,
                    "request cannot be retried because it is not cloneable".to_owned(),
                )
            })?;
            execute_raw(request_builder).await
        })
        .retry(backoff)
        .when(TransientError::is_retryable)
        .await?;

        into_status_checked(response).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.dispatch(request_builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn send_no_content(&self, request_builder: RequestBuilder) -> Result<(), ApiError> {
        self.dispatch(request_builder).await.map(|_| ())
    }
}

/// Error body shape the backend uses for non-success responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Body carrying a session-lock token.
#[derive(Debug, Deserialize)]
struct LockTokenBody {
    lock_token: String,
}

#[derive(Debug)]
struct TransientError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl TransientError {
    const fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    const fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<TransientError> for ApiError {
    fn from(value: TransientError) -> Self {
        Self::Network {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute(request_builder: RequestBuilder) -> Result<Response, ApiError> {
    execute_raw(request_builder).await.map_err(Into::into)
}

async fn execute_raw(request_builder: RequestBuilder) -> Result<Response, TransientError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        TransientError::permanent(
            err.url()
                .map_or_else(|| "<unknown>".to_owned(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(response) => {
            let status = response.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(TransientError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(response)
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                return Err(TransientError::retryable(
                    url,
                    None,
                    format!("request timeout/connect error: {err}"),
                ));
            }
            Err(TransientError::permanent(
                url,
                None,
                format!("request failed: {err}"),
            ))
        }
    }
}

/// Maps a received non-success response to [`ApiError::Status`], decoding
/// the backend's error body when present.
async fn into_status_checked(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
        code: None,
        error: None,
    });
    Err(ApiError::Status {
        status: status.as_u16(),
        code: body.code,
        message: body.error,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_user(&self) -> Result<RemoteUser, ApiError> {
        self.send(self.get("/core/v1/user")).await
    }

    async fn fetch_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.send(self.get("/core/v1/addresses")).await
    }

    async fn fetch_latest_event_id(&self) -> Result<EventId, ApiError> {
        #[derive(Deserialize)]
        struct Cursor {
            event_id: String,
        }
        let cursor: Cursor = self.send(self.get("/core/v1/events/latest")).await?;
        Ok(EventId::new(cursor.event_id))
    }

    async fn fetch_plan(&self) -> Result<Plan, ApiError> {
        self.send(self.get("/core/v1/plan")).await
    }

    async fn fetch_features(&self) -> Result<FeatureFlags, ApiError> {
        self.send(self.get("/core/v1/features")).await
    }

    async fn fetch_alias_options(&self) -> Result<AliasOptions, ApiError> {
        self.send(self.get("/vault/v1/alias/options")).await
    }

    async fn sync_events(&self, cursor: &EventId) -> Result<EventBatch, ApiError> {
        self.send(self.get(&format!("/core/v1/events/{}", cursor.as_str())))
            .await
    }

    async fn create_item(&self, call: &CreateItemCall) -> Result<RemoteItem, ApiError> {
        self.send(self.post("/vault/v1/items").json(call)).await
    }

    async fn create_item_pair(
        &self,
        primary: &CreateItemCall,
        companion: &CreateItemCall,
    ) -> Result<(RemoteItem, RemoteItem), ApiError> {
        #[derive(Deserialize)]
        struct Pair {
            primary: RemoteItem,
            companion: RemoteItem,
        }
        let pair: Pair = self
            .send(self.post("/vault/v1/items/pair").json(&serde_json::json!({
                "primary": primary,
                "companion": companion,
            })))
            .await?;
        Ok((pair.primary, pair.companion))
    }

    async fn trash_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.send_no_content(self.post(&format!(
            "/vault/v1/share/{}/item/{item_id}/trash",
            share_id.as_str()
        )))
        .await
    }

    async fn restore_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.send_no_content(self.post(&format!(
            "/vault/v1/share/{}/item/{item_id}/restore",
            share_id.as_str()
        )))
        .await
    }

    async fn delete_item(&self, share_id: &ShareId, item_id: &str) -> Result<(), ApiError> {
        self.send_no_content(self.delete(&format!(
            "/vault/v1/share/{}/item/{item_id}",
            share_id.as_str()
        )))
        .await
    }

    async fn delete_items(&self, items: &[ItemRef]) -> Result<(), ApiError> {
        self.send_no_content(
            self.post("/vault/v1/items/delete")
                .json(&serde_json::json!({ "items": items })),
        )
        .await
    }

    async fn restore_items(&self, items: &[ItemRef]) -> Result<(), ApiError> {
        self.send_no_content(
            self.post("/vault/v1/items/restore")
                .json(&serde_json::json!({ "items": items })),
        )
        .await
    }

    async fn create_lock(&self, pin: &SecretString, ttl_secs: u64) -> Result<LockToken, ApiError> {
        let body: LockTokenBody = self
            .send(self.post("/auth/v1/lock").json(&serde_json::json!({
                "pin": pin.expose_secret(),
                "ttl_secs": ttl_secs,
            })))
            .await?;
        Ok(LockToken::new(body.lock_token))
    }

    async fn delete_lock(&self, pin: &SecretString) -> Result<(), ApiError> {
        self.send_no_content(self.delete("/auth/v1/lock").json(&serde_json::json!({
            "pin": pin.expose_secret(),
        })))
        .await
    }

    async fn unlock(&self, pin: &SecretString) -> Result<LockToken, ApiError> {
        let body: LockTokenBody = self
            .send(self.post("/auth/v1/lock/unlock").json(&serde_json::json!({
                "pin": pin.expose_secret(),
            })))
            .await?;
        Ok(LockToken::new(body.lock_token))
    }

    async fn extend_lock(&self, token: &LockToken) -> Result<(), ApiError> {
        self.send_no_content(self.post("/auth/v1/lock/extend").json(&serde_json::json!({
            "lock_token": token.as_str(),
        })))
        .await
    }

    async fn revoke_session(&self) -> Result<(), ApiError> {
        self.send_no_content(self.delete("/auth/v1/session")).await
    }
}
