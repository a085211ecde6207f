//! ==============================================================================
//! engine.rs - one metric, one window: fetch, normalize, filter, store
//! ==============================================================================
//!
//! purpose:
//!     SyncEngine::sync_metric is the single code path shared by polling and
//!     backfill. the SyncMode decides whether watermarks take part:
//!
//!         Incremental(&mut Ledger)  drop readings <= watermark, advance after store
//!         Backfill                  store everything, never touch the ledger
//!
//! ordering:
//!     readings are stored oldest first and the watermark moves right after each
//!     successful store. a failed store leaves earlier advances in place, so a
//!     retry resumes where the last pass stopped.
//!
//! relationships:
//!     - uses: tags (TagSource, directory), normalize.rs, sink.rs, watermark
//!     - used by: poller.rs, backfill.rs
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::{c_to_f, Device, FetchWindow, Reading, TEMPERATURE};
use crate::error::SyncResult;
use crate::normalize::normalize;
use crate::sink::Sink;
use crate::tags::directory::{resolve_by_transient_id, slave_ids};
use crate::tags::TagSource;
use crate::watermark::Ledger;

pub enum SyncMode<'a> {
    /// polling: filter against and advance the ledger
    Incremental(&'a mut Ledger),
    /// one-shot resync: no watermark reads or writes
    Backfill,
}

pub struct SyncEngine<'a> {
    source: &'a dyn TagSource,
    sink: &'a dyn Sink,
    convert_to_f: bool,
}

impl<'a> SyncEngine<'a> {
    pub fn new(source: &'a dyn TagSource, sink: &'a dyn Sink, convert_to_f: bool) -> Self {
        Self { source, sink, convert_to_f }
    }

    /// sync one metric for every device over `window`, returning readings stored
    pub async fn sync_metric(
        &self,
        metric: &str,
        devices: &[Device],
        window: FetchWindow,
        mut mode: SyncMode<'_>,
    ) -> SyncResult<usize> {
        if devices.is_empty() {
            debug!(metric, "no tags to query");
            return Ok(0);
        }

        let blocks = self
            .source
            .fetch_raw_stats(metric, &slave_ids(devices), window.from, window.to)
            .await?;
        let batches = normalize(&blocks)?;
        info!(metric, tags = batches.len(), from = %window.from, to = %window.to, "fetched stats");

        let mut stored = 0;
        for batch in batches {
            let Some(device) = resolve_by_transient_id(devices, batch.slave_id) else {
                warn!(metric, slave_id = batch.slave_id, "stats for a tag missing from the directory, skipping");
                continue;
            };

            let mut readings = batch.readings;
            readings.sort_by_key(|r| r.timestamp);

            if let SyncMode::Incremental(ledger) = &mode {
                readings = filter_new(readings, ledger.get(&device.uuid, metric));
            }
            info!(
                metric,
                uuid = %device.uuid,
                slave_id = device.slave_id,
                readings = readings.len(),
                "storing readings"
            );

            for mut reading in readings {
                if self.convert_to_f && metric == TEMPERATURE {
                    reading.value = c_to_f(reading.value);
                }

                self.sink.store(device, metric, &reading).await?;
                stored += 1;

                if let SyncMode::Incremental(ledger) = &mut mode {
                    ledger.set(&device.uuid, metric, reading.timestamp);
                }
            }
        }

        Ok(stored)
    }
}

/// keep only readings strictly after the watermark
pub fn filter_new(readings: Vec<Reading>, watermark: DateTime<Utc>) -> Vec<Reading> {
    readings.into_iter().filter(|r| r.timestamp > watermark).collect()
}
