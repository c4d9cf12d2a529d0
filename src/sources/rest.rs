//! REST catalog source
//!
//! Pages through `GET {base_url}{items_path}?offset=&limit=`. The body is
//! either a bare array of items or an object with the items under
//! `items_field` and optional `has_more` / `total` fields.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use super::trait_::{
    MalformedRow, RestSettings, SourceAdapter, SourceDescriptor, SourceError,
    SourcePage, SourceSettings,
};

/// Adapter for paginated JSON catalogs
pub struct RestCatalogAdapter {
    client: reqwest::Client,
}

impl RestCatalogAdapter {
    /// Build an adapter whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn settings(descriptor: &SourceDescriptor) -> Result<&RestSettings, SourceError> {
        match &descriptor.settings {
            SourceSettings::Rest(settings) => Ok(settings),
            _ => Err(SourceError::Configuration(
                "rest adapter received non-rest settings".to_string(),
            )),
        }
    }

    fn endpoint(settings: &RestSettings, path: &str) -> Result<Url, SourceError> {
        let raw = format!(
            "{}/{}",
            settings.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| SourceError::Configuration(format!("invalid url '{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::Configuration(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if !settings.query.is_empty() {
            url.query_pairs_mut().extend_pairs(settings.query.iter());
        }
        Ok(url)
    }

    async fn get_json(&self, settings: &RestSettings, url: Url) -> Result<JsonValue, SourceError> {
        let mut request = self.client.get(url.clone());

        if let Some(env_name) = &settings.credential_env {
            let token = std::env::var(env_name).map_err(|_| {
                SourceError::Configuration(format!("credential variable {} is not set", env_name))
            })?;
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Connection(format!("request to {} timed out", url.path()))
            } else {
                SourceError::Connection(format!("request to {} failed: {}", url.path(), e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(status = status.as_u16(), path = url.path(), "Source returned error status");
            return Err(classify_status(status, snippet));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Connection(format!("body read failed: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::MalformedResponse(format!("invalid JSON body: {}", e)))
    }

    async fn fetch_body(
        &self,
        settings: &RestSettings,
        offset: u64,
        limit: u64,
    ) -> Result<JsonValue, SourceError> {
        let mut url = Self::endpoint(settings, &settings.items_path)?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        debug!(url = %url, "Fetching catalog page");
        self.get_json(settings, url).await
    }
}

/// 401/403 are fatal, 429 and 5xx transient, any other non-success a
/// descriptor problem.
pub fn classify_status(status: StatusCode, body: String) -> SourceError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            SourceError::Connection(message)
        }
        s if s.is_server_error() => SourceError::Connection(message),
        _ => SourceError::Configuration(message),
    }
}

fn extract_items<'a>(body: &'a JsonValue, items_field: &str) -> Result<&'a Vec<JsonValue>, SourceError> {
    match body {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(map) => map
            .get(items_field)
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                SourceError::MalformedResponse(format!("body has no '{}' array", items_field))
            }),
        _ => Err(SourceError::MalformedResponse(
            "body is neither an array nor an object".to_string(),
        )),
    }
}

fn read_total(body: &JsonValue) -> Option<u64> {
    ["total", "count", "total_count"]
        .iter()
        .find_map(|key| body.get(key).and_then(JsonValue::as_u64))
}

/// Build a page from a response body.
///
/// `has_more` prefers the explicit flag, then `total`, then falls back to
/// "the page came back full".
pub fn page_from_body(
    body: &JsonValue,
    items_field: &str,
    offset: u64,
    limit: u64,
) -> Result<SourcePage, SourceError> {
    let items = extract_items(body, items_field)?;

    let mut page = SourcePage::default();
    for (index, item) in items.iter().take(limit as usize).enumerate() {
        match item {
            JsonValue::Object(map) => page.rows.push(map.clone()),
            other => page.malformed.push(MalformedRow {
                position: offset + index as u64,
                message: format!("item is not an object: {}", truncate(&other.to_string())),
            }),
        }
    }

    let consumed = page.consumed();
    page.has_more = body
        .get("has_more")
        .and_then(JsonValue::as_bool)
        .or_else(|| read_total(body).map(|total| offset + consumed < total))
        .unwrap_or(consumed == limit);

    Ok(page)
}

fn truncate(value: &str) -> String {
    value.chars().take(80).collect()
}

#[async_trait]
impl SourceAdapter for RestCatalogAdapter {
    fn platform(&self) -> &'static str {
        "rest"
    }

    async fn count(&self, descriptor: &SourceDescriptor) -> Result<u64, SourceError> {
        let settings = Self::settings(descriptor)?;

        if let Some(count_path) = &settings.count_path {
            let url = Self::endpoint(settings, count_path)?;
            let body = self.get_json(settings, url).await?;
            return body
                .as_u64()
                .or_else(|| read_total(&body))
                .ok_or_else(|| {
                    SourceError::MalformedResponse("count endpoint returned no total".to_string())
                });
        }

        let body = self.fetch_body(settings, 0, 1).await?;
        if let Some(total) = read_total(&body) {
            return Ok(total);
        }

        // No total advertised: estimate from the first page; the job raises its
        // total as rows arrive.
        Ok(extract_items(&body, &settings.items_field)?.len() as u64)
    }

    async fn fetch_page(
        &self,
        descriptor: &SourceDescriptor,
        offset: u64,
        limit: u64,
    ) -> Result<SourcePage, SourceError> {
        let settings = Self::settings(descriptor)?;
        let body = self.fetch_body(settings, offset, limit).await?;
        page_from_body(&body, &settings.items_field, offset, limit)
    }
}
