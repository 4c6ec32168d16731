// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Elasticsearch `_bulk` shipping.
//!
//! Every buffered line becomes an `index` action pair in an NDJSON body:
//!
//! ```text
//! {"index":{"_index":"<index>_<date>","_type":"<type>"}}
//! <line>
//! ```
//!
//! Delivery is best effort. Failures are logged with the session's context and
//! the batch is dropped: no retry, no backpressure towards the writer.

use std::fmt::{Display, Write as _};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::BulkWriterConfig;
use crate::errors::{ConfigError, SendError};

const BULK_ENDPOINT: &str = "/_bulk";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Destination of detached batches.
///
/// Implementations own the outcome of the send: callers never learn whether it
/// succeeded.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send(&self, batch: Vec<String>);
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkIndex<'a>,
}

#[derive(Serialize)]
struct BulkIndex<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    doc_type: &'a str,
}

/// Index name for a send happening at `now`: `<index>_<formatted now>`, or
/// `<index>` alone when no date suffix is configured.
pub fn index_name<Tz>(index: &str, date_suffix: Option<&str>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(format) = date_suffix else {
        return index.to_string();
    };
    let mut name = format!("{index}_");
    if write!(name, "{}", now.format(format)).is_err() {
        error!("Invalid date suffix format {format:?}, using index {index:?} without suffix");
        return index.to_string();
    }
    name
}

/// Builds the NDJSON bulk body for `batch`, keeping line order.
pub fn build_payload(
    batch: &[String],
    index_name: &str,
    doc_type: &str,
) -> Result<String, serde_json::Error> {
    let header = serde_json::to_string(&BulkAction {
        index: BulkIndex {
            index: index_name,
            doc_type,
        },
    })?;

    let capacity = batch
        .iter()
        .map(|line| header.len() + line.len() + 2)
        .sum();
    let mut payload = String::with_capacity(capacity);
    for line in batch {
        payload.push_str(&header);
        payload.push('\n');
        payload.push_str(line);
        payload.push('\n');
    }
    Ok(payload)
}

/// HTTP sender for one session.
#[derive(Debug, Clone)]
pub struct BulkSender {
    client: reqwest::Client,
    config: Arc<BulkWriterConfig>,
    url: String,
}

impl BulkSender {
    /// Fails when the HTTP client cannot be built, e.g. no TLS backend is usable.
    pub fn new(config: Arc<BulkWriterConfig>) -> Result<Self, ConfigError> {
        let client = build_client(&config)?;
        let url = format!("{}{}", config.host.trim_end_matches('/'), BULK_ENDPOINT);
        Ok(BulkSender {
            client,
            config,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POSTs `batch` and reports the outcome. Only a 200 counts as success.
    pub async fn send_batch(&self, batch: &[String]) -> Result<(), SendError> {
        let index_name = index_name(
            &self.config.index,
            self.config.date_suffix.as_deref(),
            &Local::now(),
        );
        let payload = build_payload(batch, &index_name, &self.config.doc_type)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(payload);
        if let Some((user, password)) = self.config.basic_auth() {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Backend { status, body });
        }

        debug!(
            id = %self.config.container_id,
            index = %index_name,
            "Sent bulk of {} lines to elastic",
            batch.len()
        );
        Ok(())
    }
}

#[async_trait]
impl BatchSink for BulkSender {
    async fn send(&self, batch: Vec<String>) {
        match self.send_batch(&batch).await {
            Ok(()) => {}
            Err(SendError::Backend { status, body }) => {
                error!(
                    id = %self.config.container_id,
                    container = %self.config.container_name,
                    elastic_host = %self.config.host,
                    status_code = status.as_u16(),
                    "Bulk request of {} lines rejected: {}",
                    batch.len(),
                    body
                );
            }
            Err(e) => {
                error!(
                    id = %self.config.container_id,
                    container = %self.config.container_name,
                    elastic_host = %self.config.host,
                    "Failed to send bulk of {} lines: {}",
                    batch.len(),
                    e
                );
            }
        }
    }
}

fn build_client(config: &BulkWriterConfig) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(ConfigError::HttpClient)
}
