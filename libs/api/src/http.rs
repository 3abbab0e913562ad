//! reqwest-backed implementation of [`CloudApi`].
//!
//! Authenticates with the OAuth2 client-credentials grant and caches the
//! access token until shortly before it expires.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::CloudApi;
use crate::error::ApiError;
use crate::types::{
    CreateInstanceRequest, Instance, InstanceFilter, InstanceType, NewStartupScript,
    StartupScript,
};

/// Public DataCrunch API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.datacrunch.io/v1";

/// Tokens are renewed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,

    /// OAuth2 client id.
    pub client_id: String,

    /// OAuth2 client secret.
    pub client_secret: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Configuration against the public endpoint with a 30 second timeout.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// DataCrunch API client.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default = "unknown_code")]
    code: String,
    #[serde(default)]
    message: String,
}

fn unknown_code() -> String {
    "unknown".to_string()
}

#[derive(Serialize)]
struct InstanceAction<'a> {
    action: &'static str,
    id: &'a str,
}

#[derive(Serialize)]
struct DeleteScripts<'a> {
    scripts: [&'a str; 1],
}

impl HttpClient {
    /// Create a new client. No request is made until the first call.
    pub fn new(config: HttpClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id,
            client_secret: config.client_secret,
            token: Mutex::new(None),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Obtain an access token, reusing the cached one while it is valid.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let mut token = self.token.lock().await;

        if let Some(existing) = token.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < existing.expires_at {
                return Ok(existing.value.clone());
            }
        }

        debug!("Requesting access token");
        let response = self
            .client
            .post(self.url("/oauth2/token"))
            .json(&TokenRequest {
                grant_type: "client_credentials",
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await?;

        let body: TokenResponse = decode(response).await?;
        let value = body.access_token.clone();
        *token = Some(AccessToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });

        Ok(value)
    }

    /// Send an authenticated request and turn error statuses into [`ApiError`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let err = error_from(response).await;
        if matches!(err, ApiError::Unauthorized(_)) {
            warn!("Access token rejected, discarding cached token");
            *self.token.lock().await = None;
        }
        Err(err)
    }
}

async fn error_from(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => ApiError::from_response(status, &parsed.code, parsed.message),
        Err(_) => ApiError::from_response(status, "unknown", body),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

/// Create endpoints answer with the bare id, sometimes JSON-quoted.
async fn decode_id(response: Response) -> Result<String, ApiError> {
    let text = response.text().await?;
    let id = text.trim().trim_matches('"');

    if id.is_empty() {
        return Err(ApiError::InvalidResponse("empty id in response".to_string()));
    }
    Ok(id.to_string())
}

#[async_trait]
impl CloudApi for HttpClient {
    async fn list_instance_types(&self) -> Result<Vec<InstanceType>, ApiError> {
        let response = self
            .send(self.client.get(self.url("/instance-types")))
            .await?;
        decode(response).await
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ApiError> {
        let response = self.send(self.client.get(self.url("/instances"))).await?;
        let instances: Vec<Instance> = decode(response).await?;

        Ok(instances
            .into_iter()
            .filter(|instance| filter.matches(instance))
            .collect())
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<String, ApiError> {
        debug!(
            hostname = %request.hostname,
            instance_type = %request.instance_type,
            location = %request.location_code,
            is_spot = request.is_spot,
            "Creating instance"
        );
        let response = self
            .send(self.client.post(self.url("/instances")).json(request))
            .await?;
        decode_id(response).await
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ApiError> {
        debug!(instance_id = %instance_id, "Deleting instance");
        self.send(self.client.put(self.url("/instances")).json(&InstanceAction {
            action: "delete",
            id: instance_id,
        }))
        .await?;
        Ok(())
    }

    async fn upload_script(&self, script: &NewStartupScript) -> Result<String, ApiError> {
        debug!(name = %script.name, bytes = script.script.len(), "Uploading startup script");
        let response = self
            .send(self.client.post(self.url("/scripts")).json(script))
            .await?;
        decode_id(response).await
    }

    async fn delete_script(&self, script_id: &str) -> Result<(), ApiError> {
        self.send(
            self.client
                .delete(self.url("/scripts"))
                .json(&DeleteScripts {
                    scripts: [script_id],
                }),
        )
        .await?;
        Ok(())
    }

    async fn list_scripts(&self, name: Option<&str>) -> Result<Vec<StartupScript>, ApiError> {
        let response = self.send(self.client.get(self.url("/scripts"))).await?;
        let scripts: Vec<StartupScript> = decode(response).await?;

        Ok(scripts
            .into_iter()
            .filter(|script| name.map(|name| script.name == name).unwrap_or(true))
            .collect())
    }
}
