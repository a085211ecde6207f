//! ==============================================================================
//! sink.rs - time-series sink contract and the opentsdb implementation
//! ==============================================================================
//!
//! purpose:
//!     the engine stores readings one at a time through `Sink::store`.
//!     OpenTsdbSink turns each reading into a single datapoint:
//!
//!         POST http://{host}:{port}/api/put?summary
//!         {"metric": "{prefix}.{metric}", "timestamp": <unix s>, "value": v,
//!          "tags": {"uuid": "...", "name": "Back_Porch"}}
//!
//! ==============================================================================

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{Device, Reading};
use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait Sink: Send + Sync {
    async fn store(&self, device: &Device, metric: &str, reading: &Reading) -> SyncResult<()>;
}

#[derive(Debug, Serialize, PartialEq)]
struct DataPoint {
    metric: String,
    timestamp: i64,
    value: f64,
    tags: BTreeMap<&'static str, String>,
}

pub struct OpenTsdbSink {
    http: reqwest::Client,
    put_url: String,
    prefix: String,
}

impl OpenTsdbSink {
    pub fn new(host: &str, port: u16, metrics_prefix: &str) -> Self {
        Self::with_base_url(&format!("http://{host}:{port}"), metrics_prefix)
    }

    pub fn with_base_url(base_url: &str, metrics_prefix: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            put_url: format!("{}/api/put?summary", base_url.trim_end_matches('/')),
            prefix: metrics_prefix.to_string(),
        }
    }

    fn datapoint(&self, device: &Device, metric: &str, reading: &Reading) -> DataPoint {
        let mut tags = BTreeMap::new();
        tags.insert("uuid", device.uuid.clone());
        // opentsdb tag values may not contain spaces
        tags.insert("name", device.name.replace(' ', "_"));

        DataPoint {
            metric: format!("{}.{}", self.prefix, metric),
            timestamp: reading.timestamp.timestamp(),
            value: reading.value,
            tags,
        }
    }
}

#[async_trait]
impl Sink for OpenTsdbSink {
    async fn store(&self, device: &Device, metric: &str, reading: &Reading) -> SyncResult<()> {
        let point = self.datapoint(device, metric, reading);

        let resp = self
            .http
            .post(&self.put_url)
            .json(&[point])
            .send()
            .await
            .map_err(|e| SyncError::Store(format!("opentsdb unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Store(format!("opentsdb status {status}: {body}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, serve};
    use axum::{extract::RawQuery, http::StatusCode, routing::post, Json, Router};
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    fn reading() -> Reading {
        Reading { timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), value: 21.5 }
    }

    #[test]
    fn test_datapoint_shape() {
        let sink = OpenTsdbSink::new("localhost", 4242, "wirelesstag");
        let point = sink.datapoint(&device("u-1", 3, "Back Porch"), "temperature", &reading());

        assert_eq!(point.metric, "wirelesstag.temperature");
        assert_eq!(point.timestamp, 1_714_564_800);
        assert_eq!(point.value, 21.5);
        assert_eq!(point.tags["uuid"], "u-1");
        assert_eq!(point.tags["name"], "Back_Porch");
    }

    #[tokio::test]
    async fn test_store_posts_summary_put() {
        let seen = Arc::new(Mutex::new(Vec::<(Option<String>, serde_json::Value)>::new()));
        let captured = seen.clone();
        let app = Router::new().route(
            "/api/put",
            post(move |RawQuery(query): RawQuery, Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push((query, body));
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let sink = OpenTsdbSink::with_base_url(&serve(app).await, "tags");

        sink.store(&device("u-1", 3, "Attic"), "cap", &reading()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("summary"));
        assert_eq!(seen[0].1[0]["metric"], "tags.cap");
        assert_eq!(seen[0].1[0]["tags"]["name"], "Attic");
    }

    #[tokio::test]
    async fn test_rejected_write_is_store_error() {
        let app = Router::new().route(
            "/api/put",
            post(|| async { (StatusCode::BAD_REQUEST, "unknown metric") }),
        );
        let sink = OpenTsdbSink::with_base_url(&serve(app).await, "tags");

        let res = sink.store(&device("u-1", 3, "Attic"), "cap", &reading()).await;
        assert!(matches!(res, Err(SyncError::Store(_))));
    }
}
