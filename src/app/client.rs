//! HTTP client for the contributions REST API
//!
//! Wraps `reqwest` with API-key auth, connection pooling, client-side rate
//! limiting, and exponential backoff on 429/503. All endpoint knowledge
//! lives here: orchestrators talk in terms of [`Resource`] values and JSON
//! payloads, never URL strings.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::app::models::{Column, Page, Project, Resource};
use crate::app::query::{param_repr, Query};
use crate::constants::{api, http, limits};
use crate::errors::{ApiError, ApiResult};

/// Configuration for the HTTP layer
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL
    pub host: String,
    /// API key sent in the `x-api-key` header
    pub api_key: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of connections per host
    pub pool_max_per_host: usize,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: api::DEFAULT_HOST.to_string(),
            api_key: String::new(),
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            max_retries: limits::MAX_RETRIES,
        }
    }
}

/// HTTP client for the contributions API
///
/// Cheap to share behind an `Arc`; orchestrators clone the handle into the
/// request futures they hand to the scheduler.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    rate_limiter: RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>,
    max_retries: u32,
}

impl ApiClient {
    /// Create a client for the given host and API key with default settings
    pub fn new(host: &str, api_key: &str) -> ApiResult<Self> {
        Self::with_config(ClientConfig {
            host: host.to_string(),
            api_key: api_key.to_string(),
            ..Default::default()
        })
    }

    /// Create a client with custom configuration
    pub fn with_config(config: ClientConfig) -> ApiResult<Self> {
        let base_url = Url::parse(&config.host).map_err(|e| ApiError::InvalidUrl {
            url: config.host.clone(),
            error: e.to_string(),
        })?;

        let http = Self::build_http_client(&config)?;
        let rate_limiter = Self::build_rate_limiter(config.rate_limit_rps);

        tracing::debug!(host = %base_url, "created API client");

        Ok(Self {
            http,
            base_url,
            rate_limiter,
            max_retries: config.max_retries,
        })
    }

    fn build_http_client(config: &ClientConfig) -> ApiResult<Client> {
        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            let mut value = HeaderValue::from_str(&config.api_key)
                .map_err(|_| ApiError::InvalidUrl {
                    url: config.host.clone(),
                    error: "API key contains invalid header characters".to_string(),
                })?;
            value.set_sensitive(true);
            headers.insert(api::API_KEY_HEADER, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(http::USER_AGENT)
            .pool_max_idle_per_host(config.pool_max_per_host);

        if let Some(idle_timeout) = config.pool_idle_timeout {
            builder = builder.pool_idle_timeout(idle_timeout);
        }

        builder.build().map_err(ApiError::Http)
    }

    fn build_rate_limiter(
        rate_limit_rps: u32,
    ) -> RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock> {
        let rps = NonZeroU32::new(rate_limit_rps.max(1)).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_second(rps))
    }

    /// Base URL of the API
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the URL for a resource, optionally with a trailing segment
    fn url_for(&self, resource: Resource, segment: Option<&str>) -> ApiResult<Url> {
        let mut path = format!("{}/", resource.path());
        if let Some(segment) = segment {
            path.push_str(segment);
            path.push('/');
        }
        self.base_url.join(&path).map_err(|e| ApiError::InvalidUrl {
            url: format!("{}{}", self.base_url, path),
            error: e.to_string(),
        })
    }

    /// Issue a request with rate limiting and retry on 429/503
    ///
    /// Transient transport errors and throttling responses are retried with
    /// exponential backoff; anything else is returned to the caller.
    async fn send(
        &self,
        method: Method,
        url: Url,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> ApiResult<Response> {
        let mut retries = 0;
        loop {
            self.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;

            let mut request = self.http.request(method.clone(), url.clone());
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                    {
                        if retries < self.max_retries {
                            retries += 1;
                            let delay = Duration::from_millis(
                                limits::RETRY_BASE_DELAY_MS * 2_u64.pow(retries),
                            );
                            tracing::warn!(
                                status = status.as_u16(),
                                delay_ms = delay.as_millis() as u64,
                                "throttled by server, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                            ApiError::RateLimited
                        } else {
                            ApiError::Overloaded
                        });
                    }
                    return Ok(response);
                }
                Err(e) if retries < self.max_retries => {
                    retries += 1;
                    let delay =
                        Duration::from_millis(limits::RETRY_BASE_DELAY_MS * 2_u64.pow(retries));
                    tracing::warn!(
                        attempt = retries,
                        max = self.max_retries,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, retries = self.max_retries, "request failed");
                    return Err(ApiError::MaxRetriesExceeded {
                        max_retries: self.max_retries,
                    });
                }
            }
        }
    }

    /// Issue a request and decode the JSON body, surfacing non-2xx as errors
    async fn send_json(
        &self,
        method: Method,
        url: Url,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> ApiResult<Value> {
        let response = self.send(method, url.clone(), params, body).await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: text.chars().take(500).collect(),
            });
        }

        serde_json::from_str(&text).map_err(ApiError::Json)
    }

    /// Serialize a filter query plus pagination controls into URL parameters
    fn build_params(
        query: &Query,
        fields: &[&str],
        sort: Option<&str>,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> ApiResult<Vec<(String, String)>> {
        let mut params = Vec::with_capacity(query.len() + 4);
        for (field, value) in query {
            params.push((field.clone(), param_repr(field, value)?));
        }
        if !fields.is_empty() {
            params.push(("_fields".to_string(), fields.join(",")));
        }
        if let Some(sort) = sort {
            params.push(("_sort".to_string(), sort.to_string()));
        }
        if let Some(page) = page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = per_page {
            params.push(("per_page".to_string(), per_page.to_string()));
        }
        Ok(params)
    }

    /// Fetch one page of a resource query
    pub async fn get_page(
        &self,
        resource: Resource,
        query: &Query,
        fields: &[&str],
        sort: Option<&str>,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> ApiResult<Page> {
        let url = self.url_for(resource, None)?;
        let params = Self::build_params(query, fields, sort, page, per_page)?;
        let value = self.send_json(Method::GET, url, &params, None).await?;
        serde_json::from_value(value).map_err(ApiError::Json)
    }

    /// Number of records matching a query
    pub async fn count(&self, resource: Resource, query: &Query) -> ApiResult<usize> {
        let page = self
            .get_page(resource, query, &["id"], None, Some(1), Some(1))
            .await?;
        Ok(page.total_count)
    }

    /// Bulk-create contributions, returning the server-reported count
    pub async fn create_contributions(&self, batch: &[Value]) -> ApiResult<usize> {
        let url = self.url_for(Resource::Contributions, None)?;
        let body = Value::Array(batch.to_vec());
        let value = self.send_json(Method::POST, url, &[], Some(&body)).await?;
        Ok(extract_count(&value).unwrap_or(batch.len()))
    }

    /// Update a single contribution by id
    pub async fn update_contribution(&self, id: &str, payload: &Value) -> ApiResult<usize> {
        let url = self.url_for(Resource::Contributions, Some(id))?;
        let value = self.send_json(Method::PUT, url, &[], Some(payload)).await?;
        Ok(extract_count(&value).unwrap_or(1))
    }

    /// Delete all contributions matching a filter query
    pub async fn delete_contributions(&self, query: &Query) -> ApiResult<usize> {
        let url = self.url_for(Resource::Contributions, None)?;
        let params = Self::build_params(query, &[], None, None, None)?;
        let value = self.send_json(Method::DELETE, url, &params, None).await?;
        Ok(extract_count(&value).unwrap_or(0))
    }

    /// Fetch a project's metadata
    pub async fn get_project(&self, name: &str) -> ApiResult<Project> {
        let url = self.url_for(Resource::Projects, Some(name))?;
        let params = Self::build_params(
            &Query::new(),
            &["name", "unique_identifiers", "columns"],
            None,
            None,
            None,
        )?;
        let value = self.send_json(Method::GET, url, &params, None).await?;
        serde_json::from_value(value).map_err(ApiError::Json)
    }

    /// Replace a project's ordered column schema
    pub async fn update_project_columns(&self, name: &str, columns: &[Column]) -> ApiResult<()> {
        let url = self.url_for(Resource::Projects, Some(name))?;
        let body = json!({ "columns": columns });
        self.send_json(Method::PUT, url, &[], Some(&body)).await?;
        Ok(())
    }

    /// Download a gzip-compressed batch for a resource query
    pub async fn download_gz(&self, resource: Resource, query: &Query) -> ApiResult<Vec<u8>> {
        let mut url = self.url_for(resource, None)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl {
                url: self.base_url.to_string(),
                error: "base URL cannot carry path segments".to_string(),
            })?
            .pop_if_empty()
            .extend(["download", "gz"]);

        let params = Self::build_params(query, &[], None, None, None)?;
        let response = self.send(Method::GET, url, &params, None).await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: detail.chars().take(500).collect(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Pull a processed-record count out of a mutation response
///
/// The API reports `{"count": n}` on bulk endpoints; some deployments nest
/// it or return the created records directly.
pub(crate) fn extract_count(value: &Value) -> Option<usize> {
    match value {
        Value::Object(map) => map
            .get("count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .or_else(|| map.get("data").and_then(Value::as_array).map(Vec::len)),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.host, api::DEFAULT_HOST);
        assert_eq!(config.rate_limit_rps, limits::DEFAULT_RATE_LIMIT_RPS);
        assert_eq!(config.max_retries, limits::MAX_RETRIES);
    }

    #[test]
    fn test_invalid_host_rejected() {
        let result = ApiClient::new("not a url", "key");
        assert!(matches!(result, Err(ApiError::InvalidUrl { .. })));
    }

    #[test]
    fn test_url_for_resources() {
        let client = ApiClient::new("https://api.example.org", "key").unwrap();
        let url = client.url_for(Resource::Contributions, None).unwrap();
        assert_eq!(url.as_str(), "https://api.example.org/contributions/");

        let url = client.url_for(Resource::Projects, Some("sandbox")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.org/projects/sandbox/");
    }

    #[test]
    fn test_build_params_serializes_lists_and_controls() {
        let mut query = Query::new();
        query.insert("project".into(), json!("p"));
        query.insert("identifier__in".into(), json!(["mp-1", "mp-2"]));

        let params =
            ApiClient::build_params(&query, &["id", "identifier"], Some("-name"), Some(2), Some(50))
                .unwrap();

        assert!(params.contains(&("identifier__in".to_string(), "mp-1,mp-2".to_string())));
        assert!(params.contains(&("_fields".to_string(), "id,identifier".to_string())));
        assert!(params.contains(&("_sort".to_string(), "-name".to_string())));
        assert!(params.contains(&("page".to_string(), "2".to_string())));
        assert!(params.contains(&("per_page".to_string(), "50".to_string())));
    }

    #[test]
    fn test_extract_count_shapes() {
        assert_eq!(extract_count(&json!({"count": 7})), Some(7));
        assert_eq!(extract_count(&json!({"data": [1, 2, 3]})), Some(3));
        assert_eq!(extract_count(&json!([1, 2])), Some(2));
        assert_eq!(extract_count(&json!("nope")), None);
    }
}
