use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

use super::{ObjectEntry, ObjectListing, ObjectStore, ObjectStoreError};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1/b";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";
const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Network policy for the GCS client. Only transient failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    bucket: String,
    client: Client,
    access_token: tokio::sync::RwLock<String>,
    credentials_file: Option<String>,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    prefixes: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ListItem {
    name: String,
    /// GCS reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl GcsStore {
    pub async fn new(
        bucket: &str,
        credentials_file: Option<&str>,
        policy: RetryPolicy,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .connect_timeout(policy.connect_timeout)
            .timeout(policy.read_timeout)
            .build()?;

        let store = Self {
            bucket: bucket.to_string(),
            client,
            access_token: tokio::sync::RwLock::new(String::new()),
            credentials_file: credentials_file.map(|s| s.to_string()),
            max_retries: policy.max_retries,
        };

        store.refresh_token().await?;
        Ok(store)
    }

    async fn refresh_token(&self) -> Result<(), anyhow::Error> {
        let token = if let Some(ref creds_path) = self.credentials_file {
            self.token_from_service_account(creds_path).await?
        } else {
            self.token_from_metadata_server().await?
        };

        let mut lock = self.access_token.write().await;
        *lock = token;
        Ok(())
    }

    async fn token_from_service_account(&self, path: &str) -> Result<String, anyhow::Error> {
        let key_json = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&key_json)?;

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    async fn token_from_metadata_server(&self) -> Result<String, anyhow::Error> {
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    /// `https://.../b/<bucket>/o[/<key>]` with the key encoded as one path
    /// segment, so `/` inside object names becomes `%2F`.
    fn object_url(&self, base: &str, key: Option<&str>) -> Result<Url, ObjectStoreError> {
        let mut url = Url::parse(base).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ObjectStoreError::Backend("invalid GCS base url".to_string()))?;
            segments.push(&self.bucket).push("o");
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    /// Send a request, retrying connection failures, timeouts, 429 and 5xx
    /// with exponential backoff. A 401 refreshes the access token once.
    async fn send<F>(&self, build: F) -> Result<Response, ObjectStoreError>
    where
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            let token = self.access_token.read().await.clone();
            let result = build(&self.client, &token).send().await;

            let retry_reason = match result {
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED && !refreshed => {
                    refreshed = true;
                    if let Err(e) = self.refresh_token().await {
                        tracing::warn!(error = %e, "Failed to refresh GCS access token");
                        return Ok(resp);
                    }
                    continue;
                }
                Ok(resp)
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error() =>
                {
                    format!("GCS responded {}", resp.status())
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
                Err(e) => return Err(ObjectStoreError::Backend(e.to_string())),
            };

            if attempt >= self.max_retries {
                return Err(ObjectStoreError::Unavailable(retry_reason));
            }
            attempt += 1;
            let backoff = retry_backoff(attempt);
            tracing::debug!(attempt, reason = %retry_reason, "Retrying GCS request");
            tokio::time::sleep(backoff).await;
        }
    }
}

/// 200ms doubling per attempt, capped at `MAX_BACKOFF`.
fn retry_backoff(attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor)).min(MAX_BACKOFF)
}

async fn failure(action: &str, resp: Response) -> ObjectStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ObjectStoreError::Backend(format!("GCS {action} failed ({status}): {body}"))
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(UPLOAD_BASE, None)?;

        let resp = self
            .send(|client, token| {
                client
                    .post(url.clone())
                    .query(&[("uploadType", "media"), ("name", key)])
                    .bearer_auth(token)
                    .header("Content-Type", content_type)
                    .body(data.clone())
            })
            .await?;

        if !resp.status().is_success() {
            return Err(failure("upload", resp).await);
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(API_BASE, Some(key))?;

        let resp = self
            .send(|client, token| {
                client
                    .get(url.clone())
                    .query(&[("alt", "media")])
                    .bearer_auth(token)
            })
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(failure("download", resp).await);
        }

        resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ObjectStoreError::Unavailable(e.to_string())
            } else {
                ObjectStoreError::Backend(e.to_string())
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(API_BASE, Some(key))?;

        let resp = self
            .send(|client, token| client.delete(url.clone()).bearer_auth(token))
            .await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(failure("delete", resp).await);
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let url = self.object_url(API_BASE, Some(key))?;

        let resp = self
            .send(|client, token| client.get(url.clone()).bearer_auth(token))
            .await?;

        Ok(resp.status().is_success())
    }

    async fn list(&self, prefix: &str, delimiter: &str) -> Result<ObjectListing, ObjectStoreError> {
        let url = self.object_url(API_BASE, None)?;
        let mut listing = ObjectListing::default();
        let mut page_token: Option<String> = None;

        loop {
            let token_param = page_token.clone();
            let resp = self
                .send(|client, token| {
                    let mut req = client
                        .get(url.clone())
                        .query(&[("prefix", prefix)])
                        .bearer_auth(token);
                    if !delimiter.is_empty() {
                        req = req.query(&[("delimiter", delimiter)]);
                    }
                    if let Some(ref page) = token_param {
                        req = req.query(&[("pageToken", page.as_str())]);
                    }
                    req
                })
                .await?;

            if !resp.status().is_success() {
                return Err(failure("list", resp).await);
            }

            let page: ListResponse = resp
                .json()
                .await
                .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

            listing
                .files
                .extend(page.items.into_iter().map(|item| ObjectEntry {
                    size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
                    modified_at: item.updated,
                    key: item.name,
                }));
            listing.common_prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(listing)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM armour and decode the DER body
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
