//! ==============================================================================
//! watermark - per-tag, per-metric "last ingested" ledger
//! ==============================================================================
//!
//! purpose:
//!     polling only admits readings strictly newer than the last one stored for
//!     the same (tag uuid, metric). the ledger tracks that timestamp.
//!
//!     uuid -> metric -> last stored reading timestamp
//!
//! lifecycle:
//!     - loaded once at startup (missing = empty, undecodable = fatal)
//!     - advanced in memory by engine.rs after each successful store
//!     - persisted whole, together with the access token, after every pass
//!
//!     a crash between a store and the next persist re-sends those readings
//!     on restart. delivery is at-least-once.
//!
//! ==============================================================================

pub mod backend;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

pub use backend::{FileBackend, RedisBackend, StateBackend};

/// the timestamp a never-ingested (uuid, metric) reports
pub fn never_ingested() -> DateTime<Utc> {
    // the default DateTime<Utc> is 1970-01-01T00:00:00Z
    DateTime::<Utc>::default()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger(BTreeMap<String, BTreeMap<String, DateTime<Utc>>>);

impl Ledger {
    pub fn get(&self, uuid: &str, metric: &str) -> DateTime<Utc> {
        self.0
            .get(uuid)
            .and_then(|metrics| metrics.get(metric))
            .copied()
            .unwrap_or_else(never_ingested)
    }

    /// unconditional overwrite, callers keep it monotonic
    pub fn set(&mut self, uuid: &str, metric: &str, timestamp: DateTime<Utc>) {
        self.0
            .entry(uuid.to_string())
            .or_default()
            .insert(metric.to_string(), timestamp);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// what the backend actually stores
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    // PascalCase names come from state files written by earlier releases
    #[serde(default, alias = "AccessToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, alias = "LastUpdated")]
    last_updated: Ledger,
}

pub struct WatermarkStore {
    ledger: Ledger,
    access_token: Option<String>,
    backend: Box<dyn StateBackend>,
}

impl WatermarkStore {
    /// restore from the backend, starting empty when nothing was saved yet
    pub async fn load_or_create(backend: Box<dyn StateBackend>) -> SyncResult<Self> {
        let snapshot = match backend.load().await? {
            Some(bytes) => serde_json::from_slice::<Snapshot>(&bytes)
                .map_err(|e| SyncError::Corrupt(format!("{}: {e}", backend.describe())))?,
            None => {
                info!(backend = %backend.describe(), "no saved state, starting fresh");
                Snapshot::default()
            }
        };

        Ok(Self {
            ledger: snapshot.last_updated,
            access_token: snapshot.access_token,
            backend,
        })
    }

    // the engine goes through ledger_mut(); these are the per-entry view
    #[allow(dead_code)]
    pub fn get(&self, uuid: &str, metric: &str) -> DateTime<Utc> {
        self.ledger.get(uuid, metric)
    }

    #[allow(dead_code)]
    pub fn set(&mut self, uuid: &str, metric: &str, timestamp: DateTime<Utc>) {
        self.ledger.set(uuid, metric, timestamp)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    pub fn describe_backend(&self) -> String {
        self.backend.describe()
    }

    /// write the ledger and access token to the backend
    pub async fn persist(&self) -> SyncResult<()> {
        let snapshot = Snapshot {
            access_token: self.access_token.clone(),
            last_updated: self.ledger.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| SyncError::Storage(format!("encoding state: {e}")))?;
        self.backend.save(&bytes).await?;
        debug!(backend = %self.backend.describe(), bytes = bytes.len(), "state persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_absent_is_epoch() {
        let ledger = Ledger::default();
        assert_eq!(ledger.get("u-1", "temperature"), never_ingested());
        assert_eq!(never_ingested().timestamp(), 0);
    }

    #[test]
    fn test_set_is_last_write_wins() {
        let mut ledger = Ledger::default();
        ledger.set("u-1", "temperature", at(5));
        ledger.set("u-1", "temperature", at(3));
        ledger.set("u-1", "cap", at(9));

        assert_eq!(ledger.get("u-1", "temperature"), at(3));
        assert_eq!(ledger.get("u-1", "cap"), at(9));
        assert_eq!(ledger.get("u-2", "cap"), never_ingested());
    }

    #[tokio::test]
    async fn test_missing_state_creates_empty() {
        let store = WatermarkStore::load_or_create(Box::new(MemoryBackend::default())).await.unwrap();
        assert!(store.ledger().is_empty());
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_fatal() {
        let backend = MemoryBackend::with_payload("{not json");
        let res = WatermarkStore::load_or_create(Box::new(backend)).await;
        assert!(matches!(res, Err(SyncError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_corrupt() {
        let backend = MemoryBackend::with_payload(r#"{"last_updated": {"u-1": {"cap": "yesterday"}}}"#);
        let res = WatermarkStore::load_or_create(Box::new(backend)).await;
        assert!(matches!(res, Err(SyncError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_pascal_case_state_file_loads() {
        let backend = MemoryBackend::with_payload(
            r#"{"AccessToken": "tok-old", "LastUpdated": {"u-1": {"temperature": "2024-02-01T04:00:00-05:00"}}}"#,
        );
        let store = WatermarkStore::load_or_create(Box::new(backend.clone())).await.unwrap();
        assert_eq!(store.access_token(), Some("tok-old"));
        assert_eq!(store.get("u-1", "temperature"), at(9));

        // written back in the current layout
        store.persist().await.unwrap();
        let saved = backend.saved_json().unwrap();
        assert_eq!(saved["access_token"], "tok-old");
        assert!(saved["last_updated"]["u-1"]["temperature"].is_string());
    }

    #[tokio::test]
    async fn test_persist_then_reload() {
        let backend = MemoryBackend::default();
        let mut store = WatermarkStore::load_or_create(Box::new(backend.clone())).await.unwrap();
        store.set_access_token("tok-123");
        store.set("u-1", "temperature", at(7));
        store.persist().await.unwrap();

        let saved = backend.saved_json().unwrap();
        assert_eq!(saved["access_token"], "tok-123");
        assert!(saved["last_updated"]["u-1"]["temperature"].is_string());

        let reloaded = WatermarkStore::load_or_create(Box::new(backend)).await.unwrap();
        assert_eq!(reloaded.access_token(), Some("tok-123"));
        assert_eq!(reloaded.get("u-1", "temperature"), at(7));
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces() {
        let backend = MemoryBackend { fail_saves: true, ..Default::default() };
        let store = WatermarkStore::load_or_create(Box::new(backend)).await.unwrap();
        assert!(matches!(store.persist().await, Err(SyncError::Storage(_))));
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = WatermarkStore::load_or_create(Box::new(FileBackend::new(&path))).await.unwrap();
        store.set("u-9", "batteryVolt", at(1));
        store.persist().await.unwrap();

        let reloaded = WatermarkStore::load_or_create(Box::new(FileBackend::new(&path))).await.unwrap();
        assert_eq!(reloaded.get("u-9", "batteryVolt"), at(1));
    }
}
