//! Elasticsearch 8 over HTTP.
//!
//! [`ElasticEngine`] implements the core [`SearchEngine`] trait with
//! `reqwest`. Every request retries with exponential backoff on
//! transient failures:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Method, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use trovesearch_core::engine::{
    AliasAction, BulkAction, BulkItemResult, IndexDefinition, IndexInfo, SearchEngine,
};
use trovesearch_core::error::StrategyError;
use trovesearch_core::query::{Query, SearchRequest, SearchResponse};

use crate::config::ElasticConfig;

enum Body {
    Json(Value),
    Ndjson(String),
}

pub struct ElasticEngine {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    max_retries: u32,
    track_total_hits: u64,
}

impl ElasticEngine {
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password(),
            max_retries: config.max_retries,
            track_total_hits: config.track_total_hits,
        })
    }

    /// Send with retries; returns the first non-retryable response.
    async fn send(&self, method: Method, path: &str, body: Option<&Body>) -> Result<Response> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_deref());
            }
            request = match body {
                Some(Body::Json(value)) => request.json(value),
                Some(Body::Ndjson(text)) => request
                    .header("Content-Type", "application/x-ndjson")
                    .body(text.clone()),
                None => request,
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%method, path, %status, attempt, "elasticsearch retryable error");
                        last_err = Some(anyhow!(
                            "elasticsearch {} {} returned {}: {}",
                            method,
                            path,
                            status,
                            body_text
                        ));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(%method, path, attempt, error = %e, "elasticsearch request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("elasticsearch request failed after retries")))
    }

    /// Send and require a 2xx, parsing the JSON body.
    async fn send_ok(&self, method: Method, path: &str, body: Option<&Body>) -> Result<Value> {
        let response = self.send(method.clone(), path, body).await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("elasticsearch {} {} returned {}: {}", method, path, status, body_text);
        }
        response
            .json()
            .await
            .with_context(|| format!("parsing elasticsearch response to {method} {path}"))
    }
}

/// Newline-delimited `_bulk` body: one action line, plus a source line for index ops.
pub fn bulk_body(actions: &[BulkAction]) -> Result<String> {
    let mut body = String::new();
    for action in actions {
        let meta = json!({ action.op(): {"_index": action.index_name(), "_id": action.doc_id()} });
        body.push_str(&serde_json::to_string(&meta)?);
        body.push('\n');
        if let BulkAction::Index { doc, .. } = action {
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }
    }
    Ok(body)
}

pub fn parse_bulk_response(response: &Value) -> Result<Vec<BulkItemResult>> {
    let items = response["items"]
        .as_array()
        .context("bulk response has no items")?;
    items
        .iter()
        .map(|item| {
            let (op, result) = item
                .as_object()
                .and_then(|o| o.iter().next())
                .context("empty bulk response item")?;
            let status = result["status"].as_u64().unwrap_or(500) as u16;
            let error = match &result["error"] {
                Value::Null => None,
                Value::String(reason) => Some(reason.clone()),
                other => Some(
                    other["reason"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                ),
            };
            Ok(BulkItemResult {
                index: result["_index"].as_str().unwrap_or_default().to_string(),
                id: result["_id"].as_str().unwrap_or_default().to_string(),
                op: op.clone(),
                status,
                ok: (200..300).contains(&status),
                error,
            })
        })
        .collect()
}

fn alias_actions_json(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|action| match action {
            AliasAction::Add { index, alias } => json!({"add": {"index": index, "alias": alias}}),
            AliasAction::Remove { index, alias } => {
                json!({"remove": {"index": index, "alias": alias}})
            }
        })
        .collect();
    json!({ "actions": actions })
}

/// `GET /<index>` body → aliases and creation date for `name`.
fn parse_index_body(name: &str, body: &Value, doc_count: u64) -> IndexInfo {
    let index = &body[name];
    let aliases: BTreeSet<String> = index["aliases"]
        .as_object()
        .map(|aliases| aliases.keys().cloned().collect())
        .unwrap_or_default();
    let created = index["settings"]["index"]["creation_date"]
        .as_str()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);
    IndexInfo {
        name: name.to_string(),
        aliases,
        created,
        doc_count,
    }
}

#[async_trait]
impl SearchEngine for ElasticEngine {
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()> {
        let body = Body::Json(json!({
            "settings": definition.settings,
            "mappings": definition.mappings,
        }));
        let response = self.send(Method::PUT, name, Some(&body)).await?;
        let status = response.status();
        if status.is_success() {
            debug!(index = name, "created index");
            return Ok(());
        }
        let body_text = response.text().await.unwrap_or_default();
        if body_text.contains("resource_already_exists_exception") {
            return Err(StrategyError::IndexAlreadyExists(name.to_string()).into());
        }
        bail!("elasticsearch PUT {} returned {}: {}", name, status, body_text)
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let response = self.send(Method::DELETE, name, None).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body_text = response.text().await.unwrap_or_default();
        bail!("elasticsearch DELETE {} returned {}: {}", name, status, body_text)
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, name, None).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => bail!("elasticsearch HEAD {} returned {}", name, other),
        }
    }

    async fn refresh(&self, name: &str) -> Result<()> {
        self.send_ok(Method::POST, &format!("{name}/_refresh"), None)
            .await?;
        Ok(())
    }

    async fn indexes_matching(&self, prefix: &str) -> Result<Vec<String>> {
        let path = format!("_cat/indices/{prefix}*?format=json&h=index");
        let listed = self.send_ok(Method::GET, &path, None).await?;
        let mut names: Vec<String> = listed
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row["index"].as_str())
                    .filter(|name| name.starts_with(prefix))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>> {
        let response = self
            .send(Method::GET, &format!("_alias/{alias}"), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let status = response.status();
        if !status.is_success() {
            bail!("elasticsearch GET _alias/{} returned {}", alias, status);
        }
        let body: Value = response.json().await?;
        let mut names: Vec<String> = body
            .as_object()
            .map(|indexes| indexes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let body = Body::Json(alias_actions_json(actions));
        self.send_ok(Method::POST, "_aliases", Some(&body)).await?;
        Ok(())
    }

    async fn index_info(&self, name: &str) -> Result<Option<IndexInfo>> {
        let response = self.send(Method::GET, name, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            bail!("elasticsearch GET {} returned {}", name, status);
        }
        let body: Value = response.json().await?;
        let count = self
            .send_ok(Method::GET, &format!("{name}/_count"), None)
            .await?;
        let doc_count = count["count"].as_u64().unwrap_or(0);
        Ok(Some(parse_index_body(name, &body, doc_count)))
    }

    async fn bulk(&self, actions: &[BulkAction]) -> Result<Vec<BulkItemResult>> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        let body = Body::Ndjson(bulk_body(actions)?);
        let response = self.send_ok(Method::POST, "_bulk", Some(&body)).await?;
        let results = parse_bulk_response(&response)?;
        if results.len() != actions.len() {
            bail!(
                "bulk response has {} items for {} actions",
                results.len(),
                actions.len()
            );
        }
        Ok(results)
    }

    async fn delete_by_query(&self, indexes: &[String], query: &Query) -> Result<u64> {
        if indexes.is_empty() {
            return Ok(0);
        }
        let path = format!("{}/_delete_by_query?conflicts=proceed", indexes.join(","));
        let body = Body::Json(json!({ "query": query.to_json() }));
        let response = self.send_ok(Method::POST, &path, Some(&body)).await?;
        Ok(response["deleted"].as_u64().unwrap_or(0))
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let body = Body::Json(request.to_json(self.track_total_hits));
        let response = self
            .send_ok(Method::POST, &format!("{index}/_search"), Some(&body))
            .await?;
        serde_json::from_value(response).context("parsing elasticsearch search response")
    }
}
