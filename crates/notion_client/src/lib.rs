use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod properties;

pub use properties::{Page, PropertyValue};

pub type Result<T> = std::result::Result<T, NotionError>;

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1/";
pub const NOTION_VERSION: &str = "2022-06-28";

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("Invalid Notion base URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("Notion API key contains characters not allowed in a header")]
    InvalidApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{method} {endpoint} failed: {source}")]
    Transport {
        method: Method,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {endpoint} returned {status}: {body}")]
    Status {
        method: Method,
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to parse JSON response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Property '{name}' holds {value}, expected a whole number")]
    NonIntegralNumber { name: String, value: f64 },

    #[error("Property '{name}' is {found}, expected {expected}")]
    UnexpectedPropertyType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Configuration for talking to the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Extra attempts after the first one for 429/5xx/transport failures.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl NotionClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Minimal async Notion client: database queries, page creation, archiving.
#[derive(Debug, Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    max_retries: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Page>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self> {
        let base_url = validate_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Notion-Version", HeaderValue::from_static(NOTION_VERSION));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| NotionError::InvalidApiKey)?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(NotionError::Client)?;

        Ok(Self {
            http,
            base_url,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|_| NotionError::InvalidBaseUrl(format!("{}{}", self.base_url, path)))
    }

    /// Returns every page of a database query, following `next_cursor`.
    pub async fn query_database(&self, database_id: &str, filter: Option<Value>) -> Result<Vec<Page>> {
        let endpoint = self.endpoint(&format!("databases/{database_id}/query"))?;
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = Map::new();
            if let Some(filter) = &filter {
                body.insert("filter".to_string(), filter.clone());
            }
            if let Some(cursor) = &cursor {
                body.insert("start_cursor".to_string(), Value::String(cursor.clone()));
            }

            let response: QueryResponse = self
                .send_json(Method::POST, &endpoint, &Value::Object(body), RetryPolicy::Idempotent)
                .await?;
            pages.extend(response.results);

            match response.next_cursor {
                Some(next) if response.has_more => cursor = Some(next),
                _ => break,
            }
        }

        debug!(database_id, count = pages.len(), "Queried Notion database");
        Ok(pages)
    }

    /// Creates a row in `database_id` and returns the new page.
    pub async fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> Result<Page> {
        let endpoint = self.endpoint("pages")?;
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.send_json(Method::POST, &endpoint, &body, RetryPolicy::NotIdempotent)
            .await
    }

    /// Archives (soft-deletes) a page.
    pub async fn archive_page(&self, page_id: &str) -> Result<()> {
        let endpoint = self.endpoint(&format!("pages/{page_id}"))?;
        let _: Page = self
            .send_json(
                Method::PATCH,
                &endpoint,
                &json!({ "archived": true }),
                RetryPolicy::Idempotent,
            )
            .await?;
        Ok(())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &Url,
        body: &Value,
        policy: RetryPolicy,
    ) -> Result<T> {
        let mut attempt: u32 = 0;

        loop {
            let outcome = self
                .http
                .request(method.clone(), endpoint.clone())
                .json(body)
                .send()
                .await;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let bytes = response.bytes().await.map_err(|source| NotionError::Transport {
                        method: method.clone(),
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                    return serde_json::from_slice(&bytes).map_err(|source| NotionError::Decode {
                        endpoint: endpoint.to_string(),
                        source,
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if !is_retryable_status(policy, status) || attempt >= self.max_retries {
                        return Err(NotionError::Status {
                            method,
                            endpoint: endpoint.to_string(),
                            status,
                            body,
                        });
                    }
                    warn!(%method, %endpoint, %status, attempt, "Notion request failed, retrying");
                }
                Err(source) => {
                    if !is_retryable_transport(policy, &source) || attempt >= self.max_retries {
                        return Err(NotionError::Transport {
                            method,
                            endpoint: endpoint.to_string(),
                            source,
                        });
                    }
                    warn!(%method, %endpoint, error = %source, attempt, "Notion request failed, retrying");
                }
            }

            tokio::time::sleep(backoff_delay(self.retry_base_delay, attempt)).await;
            attempt += 1;
        }
    }
}

/// Whether repeating a request can change the stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    /// Queries and archiving: safe to repeat after any transient failure.
    Idempotent,
    /// Page creation: only repeated when the first attempt cannot have
    /// been applied (rate limited, or never connected).
    NotIdempotent,
}

fn is_retryable_status(policy: RetryPolicy, status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (policy == RetryPolicy::Idempotent && status.is_server_error())
}

fn is_retryable_transport(policy: RetryPolicy, error: &reqwest::Error) -> bool {
    error.is_connect() || (policy == RetryPolicy::Idempotent && error.is_timeout())
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

fn validate_base_url(base_url: &str) -> Result<Url> {
    // A trailing slash keeps `join` from replacing the last path segment
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    let url = Url::parse(&normalized).map_err(|_| NotionError::InvalidBaseUrl(base_url.to_string()))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(NotionError::InvalidBaseUrl(base_url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_endpoints_join_under_version_prefix() {
        let client = NotionClient::new(NotionClientConfig::new("secret")).unwrap();
        assert_eq!(
            client.endpoint("databases/db-1/query").unwrap().as_str(),
            "https://api.notion.com/v1/databases/db-1/query"
        );

        let mut config = NotionClientConfig::new("secret");
        config.base_url = "http://localhost:8080/v1".to_string();
        let client = NotionClient::new(config).unwrap();
        assert_eq!(client.endpoint("pages/p-1").unwrap().as_str(), "http://localhost:8080/v1/pages/p-1");
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let mut config = NotionClientConfig::new("secret");
        config.base_url = "ftp://example.com".to_string();
        assert!(matches!(NotionClient::new(config), Err(NotionError::InvalidBaseUrl(_))));

        let mut config = NotionClientConfig::new("secret");
        config.base_url = "not a url".to_string();
        assert!(matches!(NotionClient::new(config), Err(NotionError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_rejects_api_key_with_newline() {
        let config = NotionClientConfig::new("bad\nkey");
        assert!(matches!(NotionClient::new(config), Err(NotionError::InvalidApiKey)));
    }

    #[test]
    fn test_retry_policy() {
        use RetryPolicy::{Idempotent, NotIdempotent};

        assert!(is_retryable_status(Idempotent, StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(Idempotent, StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(Idempotent, StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(Idempotent, StatusCode::NOT_FOUND));

        // A create may already have been applied when the server fails
        assert!(is_retryable_status(NotIdempotent, StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(NotIdempotent, StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(NotIdempotent, StatusCode::INTERNAL_SERVER_ERROR));

        let base = Duration::from_millis(200);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_unreachable_host_surfaces_transport_error() {
        let mut config = NotionClientConfig::new("secret").with_timeout(Duration::from_millis(500));
        config.base_url = "http://127.0.0.1:9/v1".to_string();
        config.max_retries = 0;
        let client = NotionClient::new(config).unwrap();

        let result = client.archive_page("p-1").await;
        assert!(matches!(result, Err(NotionError::Transport { .. })));
    }

    /// Serves `status_line` to every request on a local port and counts
    /// the requests received.
    async fn serve_status(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    read_request(&mut socket).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    let response = format!(
                        "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{addr}/v1"), hits)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    fn local_client(base_url: String) -> NotionClient {
        let mut config = NotionClientConfig::new("secret").with_timeout(Duration::from_secs(5));
        config.base_url = base_url;
        config.max_retries = 2;
        config.retry_base_delay = Duration::from_millis(1);
        NotionClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_create_is_not_repeated_after_server_error() {
        let (base_url, hits) = serve_status("502 Bad Gateway").await;
        let client = local_client(base_url);

        let result = client.create_page("db-1", Map::new()).await;
        assert!(matches!(
            result,
            Err(NotionError::Status { status, .. }) if status == StatusCode::BAD_GATEWAY
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idempotent_calls_are_retried_after_server_error() {
        let (base_url, hits) = serve_status("503 Service Unavailable").await;
        let client = local_client(base_url);

        assert!(client.archive_page("p-1").await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_create_is_retried() {
        let (base_url, hits) = serve_status("429 Too Many Requests").await;
        let client = local_client(base_url);

        assert!(client.create_page("db-1", Map::new()).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
