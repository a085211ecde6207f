//! test doubles shared by the engine, poller, backfill and directory tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{Device, RawDayBlock, Reading, TagGroup};
use crate::error::{SyncError, SyncResult};
use crate::sink::Sink;
use crate::tags::TagSource;
use crate::watermark::StateBackend;

pub fn device(uuid: &str, slave_id: i64, name: &str) -> Device {
    Device { uuid: uuid.into(), slave_id, name: name.into() }
}

pub fn day_block(date: &str, ids: Vec<i64>, values: Vec<Vec<f64>>, tods: Vec<Vec<i64>>) -> RawDayBlock {
    RawDayBlock { date: date.into(), slave_ids: ids, values, time_of_day_seconds: tods }
}

/// serve a router on an ephemeral local port, returning its base url
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ==============================================================================
// tag source
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct StatsRequest {
    pub metric: String,
    pub slave_ids: Vec<i64>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Default)]
pub struct FakeSource {
    groups: Option<Vec<TagGroup>>,
    stats: HashMap<String, Vec<RawDayBlock>>,
    failing: HashSet<String>,
    pub requests: Mutex<Vec<StatsRequest>>,
}

impl FakeSource {
    pub fn new(groups: Vec<TagGroup>) -> Self {
        Self { groups: Some(groups), ..Default::default() }
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self::new(vec![TagGroup { mac: "00:00".into(), tags: devices }])
    }

    pub fn failing_directory() -> Self {
        Self::default()
    }

    pub fn with_stats(mut self, metric: &str, blocks: Vec<RawDayBlock>) -> Self {
        self.stats.insert(metric.into(), blocks);
        self
    }

    pub fn failing_metric(mut self, metric: &str) -> Self {
        self.failing.insert(metric.into());
        self
    }

    pub fn requests(&self) -> Vec<StatsRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagSource for FakeSource {
    async fn list_tag_groups(&self) -> SyncResult<Vec<TagGroup>> {
        self.groups
            .clone()
            .ok_or_else(|| SyncError::Fetch("directory unavailable".into()))
    }

    async fn fetch_raw_stats(
        &self,
        metric: &str,
        slave_ids: &[i64],
        from: NaiveDate,
        to: NaiveDate,
    ) -> SyncResult<Vec<RawDayBlock>> {
        self.requests.lock().unwrap().push(StatsRequest {
            metric: metric.into(),
            slave_ids: slave_ids.to_vec(),
            from,
            to,
        });
        if self.failing.contains(metric) {
            return Err(SyncError::Fetch(format!("{metric} unavailable")));
        }
        Ok(self.stats.get(metric).cloned().unwrap_or_default())
    }
}

// ==============================================================================
// sink
// ==============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct StoreCall {
    pub uuid: String,
    pub metric: String,
    pub reading: Reading,
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<StoreCall>>,
    /// reject every write once this many have succeeded
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(successes: usize) -> Self {
        Self { fail_after: Some(successes), ..Default::default() }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn store(&self, device: &Device, metric: &str, reading: &Reading) -> SyncResult<()> {
        let mut calls = self.calls.lock().unwrap();
        if self.fail_after.is_some_and(|n| calls.len() >= n) {
            return Err(SyncError::Store("sink refused".into()));
        }
        calls.push(StoreCall { uuid: device.uuid.clone(), metric: metric.into(), reading: *reading });
        Ok(())
    }
}

// ==============================================================================
// state backend
// ==============================================================================

#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub payload: Arc<Mutex<Option<Vec<u8>>>>,
    pub saves: Arc<Mutex<usize>>,
    pub fail_saves: bool,
}

impl MemoryBackend {
    pub fn with_payload(payload: &str) -> Self {
        let backend = Self::default();
        *backend.payload.lock().unwrap() = Some(payload.as_bytes().to_vec());
        backend
    }

    pub fn saved_json(&self) -> Option<serde_json::Value> {
        self.payload
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| serde_json::from_slice(p).unwrap())
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.payload.lock().unwrap().clone())
    }

    async fn save(&self, payload: &[u8]) -> SyncResult<()> {
        if self.fail_saves {
            return Err(SyncError::Storage("disk full".into()));
        }
        *self.payload.lock().unwrap() = Some(payload.to_vec());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
