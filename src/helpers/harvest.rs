use base64::Engine;
use reqwest::{header, Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::harvest::Credentials;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body Harvest answers with (and a 200 status, on older accounts) when
/// basic auth is rejected.
const AUTH_FAILED_MESSAGE: &str = "Authentication failed for API request.";

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Invalid Harvest URL \"{0}\"")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Invalid credentials header: {0}")]
    Header(#[from] header::InvalidHeaderValue),

    #[error("Request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Harvest returned status {status} for {path}: {body}")]
    Status {
        path: String,
        status: StatusCode,
        body: String,
    },

    #[error("Harvest rejected the credentials for {path}")]
    Authentication { path: String },

    #[error("Malformed JSON from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HarvestError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, HarvestError::Authentication { .. })
    }
}

/// `https://{app}.harvestapp.com`
pub fn account_url(app: &str) -> String {
    format!("https://{}.harvestapp.com", app.trim())
}

/// True when a decoded body is Harvest's authentication failure message.
pub fn is_auth_failure(body: &Value) -> bool {
    body.get("message").and_then(Value::as_str) == Some(AUTH_FAILED_MESSAGE)
}

fn validate_base_url(raw: &str) -> Result<String, HarvestError> {
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Ok(trimmed.to_string())
        }
        _ => Err(HarvestError::InvalidUrl(raw.to_string())),
    }
}

/// Authenticated handle on one Harvest account.
#[derive(Clone, Debug)]
pub struct HarvestClient {
    http: Client,
    base_url: String,
}

impl HarvestClient {
    /// Builds a client for `credentials`. `base_url` overrides the account
    /// URL derived from `credentials.app`.
    pub fn new(
        credentials: &Credentials,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let base_url = match base_url {
            Some(url) => validate_base_url(url)?,
            None => validate_base_url(&account_url(&credentials.app))?,
        };
        info!("Initializing Harvest client for {}", base_url);

        let token = base64::prelude::BASE64_STANDARD
            .encode(format!("{}:{}", credentials.email.trim(), credentials.password));
        let mut authorization = header::HeaderValue::from_str(&format!("Basic {token}"))?;
        authorization.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = match Client::builder()
            .default_headers(headers)
            .user_agent(concat!("harvest-export/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build Harvest client: {}", e);
                return Err(HarvestError::Client(e));
            }
        };

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks the credentials against `/account/who_am_i`.
    pub async fn who_am_i(&self) -> Result<Value, HarvestError> {
        self.get("/account/who_am_i").await
    }

    /// GETs `path` and decodes the body. An empty body decodes to `Null`.
    pub async fn get(&self, path: &str) -> Result<Value, HarvestError> {
        let url = format!("{}{}", self.base_url, path);
        info!("Fetching {}", path);

        let response = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("Failed to send request to Harvest for {}: {}", path, e);
                return Err(HarvestError::Transport {
                    path: path.to_string(),
                    source: e,
                });
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("Harvest rejected credentials for {} ({})", path, status);
            return Err(HarvestError::Authentication {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Harvest returned error status {} for {}: {}", status, path, body);
            return Err(HarvestError::Status {
                path: path.to_string(),
                status,
                body,
            });
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to read response body for {}: {}", path, e);
                return Err(HarvestError::Transport {
                    path: path.to_string(),
                    source: e,
                });
            }
        };

        if text.trim().is_empty() {
            warn!("Harvest returned an empty body for {}", path);
            return Ok(Value::Null);
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to parse Harvest response for {}: {}", path, e);
                return Err(HarvestError::Decode {
                    path: path.to_string(),
                    source: e,
                });
            }
        };

        if is_auth_failure(&body) {
            error!("Harvest reported an authentication failure for {}", path);
            return Err(HarvestError::Authentication {
                path: path.to_string(),
            });
        }

        info!("Received {} bytes from {}", text.len(), path);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials() -> Credentials {
        Credentials {
            app: "acme".to_string(),
            email: "a@b.com".to_string(),
            password: "p".to_string(),
        }
    }

    #[test]
    fn test_account_url() {
        assert_eq!(account_url("acme"), "https://acme.harvestapp.com");
    }

    #[test]
    fn test_default_base_url_from_app() {
        let client = HarvestClient::new(&credentials(), None, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "https://acme.harvestapp.com");
    }

    #[test]
    fn test_base_url_override_is_trimmed() {
        let client =
            HarvestClient::new(&credentials(), Some("http://127.0.0.1:8080/"), DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_invalid_base_url() {
        for url in ["not a url", "ftp://example.com", "acme.harvestapp.com"] {
            let err = HarvestClient::new(&credentials(), Some(url), DEFAULT_TIMEOUT).unwrap_err();
            assert!(matches!(err, HarvestError::InvalidUrl(_)), "{url}");
        }
    }

    #[test]
    fn test_is_auth_failure() {
        assert!(is_auth_failure(
            &json!({"message": "Authentication failed for API request."})
        ));
        assert!(!is_auth_failure(&json!({"message": "Not found"})));
        assert!(!is_auth_failure(&json!([{"client": {"id": 1}}])));
    }
}
