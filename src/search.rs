//! HTTP client for the search index.

use crate::config::{SearchConfig, ES_REQUEST_TIMEOUT_SECS};
use crate::models::IndexedDocument;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Index-level settings touched around bulk loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSettings {
    pub refresh_interval: String,
    pub number_of_replicas: u32,
}

impl IndexSettings {
    /// Body for `PUT /<index>/_settings`.
    pub fn to_body(&self) -> Value {
        json!({
            "index": {
                "refresh_interval": self.refresh_interval,
                "number_of_replicas": self.number_of_replicas,
            }
        })
    }
}

/// Index administration calls used by the lifecycle guard.
#[async_trait]
pub trait IndexAdmin: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool>;
    async fn create_index(&self, index: &str) -> Result<()>;
    async fn put_settings(&self, index: &str, settings: &IndexSettings) -> Result<()>;
}

/// Scroll cursor calls used by paragraph dedup.
#[async_trait]
pub trait ScrollSource: Send + Sync {
    /// Opens a sliced scroll over `index`, returning only `fields` from each document.
    async fn open_scroll(
        &self,
        index: &str,
        slice: u32,
        slices: u32,
        page_size: usize,
        keep_alive: &str,
        fields: &[&str],
    ) -> Result<ScrollPage>;
    async fn continue_scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage>;
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub failed: usize,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: ScrollHits,
}

#[derive(Deserialize)]
struct ScrollHits {
    hits: Vec<ScrollHit>,
}

#[derive(Deserialize)]
struct ScrollHit {
    #[serde(rename = "_source", default)]
    source: Value,
}

/// One page of a scroll: the next cursor and the `_source` of each hit.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub sources: Vec<Value>,
}

#[derive(Clone)]
pub struct SearchClient {
    http: Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(ES_REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends one `_bulk` request indexing `docs` into `index`.
    pub async fn bulk_index(&self, index: &str, docs: &[IndexedDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let body = bulk_body(index, docs)?;
        let response = self
            .http
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Bulk request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Bulk request rejected (status {status}): {text}");
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .context("Failed to parse bulk response")?;
        Ok(count_bulk_items(&parsed, docs.len()))
    }
}

async fn scroll_page(response: reqwest::Response) -> Result<ScrollPage> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Scroll request rejected (status {status}): {text}");
    }
    let parsed: ScrollResponse = response
        .json()
        .await
        .context("Failed to parse scroll response")?;
    Ok(ScrollPage {
        scroll_id: parsed.scroll_id,
        sources: parsed.hits.hits.into_iter().map(|h| h.source).collect(),
    })
}

#[async_trait]
impl ScrollSource for SearchClient {
    async fn open_scroll(
        &self,
        index: &str,
        slice: u32,
        slices: u32,
        page_size: usize,
        keep_alive: &str,
        fields: &[&str],
    ) -> Result<ScrollPage> {
        let mut body = json!({
            "size": page_size,
            "_source": fields,
            "sort": ["_doc"],
        });
        if slices > 1 {
            body["slice"] = json!({ "id": slice, "max": slices });
        }

        let response = self
            .http
            .post(self.url(&format!("{index}/_search?scroll={keep_alive}")))
            .json(&body)
            .send()
            .await
            .context("Scroll search failed")?;
        scroll_page(response).await
    }

    async fn continue_scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage> {
        let response = self
            .http
            .post(self.url("_search/scroll"))
            .json(&json!({ "scroll": keep_alive, "scroll_id": scroll_id }))
            .send()
            .await
            .context("Scroll continuation failed")?;
        scroll_page(response).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.http
            .delete(self.url("_search/scroll"))
            .json(&json!({ "scroll_id": scroll_id }))
            .send()
            .await
            .context("Failed to clear scroll")?;
        Ok(())
    }
}

#[async_trait]
impl IndexAdmin for SearchClient {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .http
            .head(self.url(index))
            .send()
            .await
            .with_context(|| format!("Failed to check index {index}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => bail!("Unexpected status {s} checking index {index}"),
        }
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url(index))
            .send()
            .await
            .with_context(|| format!("Failed to create index {index}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Creating index {index} failed (status {status}): {text}");
        }
        debug!(index, "Index created");
        Ok(())
    }

    async fn put_settings(&self, index: &str, settings: &IndexSettings) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("{index}/_settings")))
            .json(&settings.to_body())
            .send()
            .await
            .with_context(|| format!("Failed to update settings of index {index}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Updating settings of {index} failed (status {status}): {text}");
        }
        Ok(())
    }
}

/// Newline-delimited `_bulk` body: an action line then a source line per document.
pub fn bulk_body(index: &str, docs: &[IndexedDocument]) -> Result<String> {
    let mut body = String::with_capacity(docs.len() * 512);
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.doc_id() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(doc).context("Failed to serialize document")?);
        body.push('\n');
    }
    Ok(body)
}

fn count_bulk_items(response: &BulkResponse, sent: usize) -> BulkOutcome {
    if !response.errors {
        return BulkOutcome {
            indexed: sent,
            failed: 0,
        };
    }
    let failed = response
        .items
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|ops| ops.values().next())
                .and_then(|op| op.get("error"))
                .is_some()
        })
        .count();
    BulkOutcome {
        indexed: sent.saturating_sub(failed),
        failed,
    }
}
