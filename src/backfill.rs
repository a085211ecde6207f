//! ==============================================================================
//! backfill.rs - one-shot resync of a single calendar day
//! ==============================================================================
//!
//! purpose:
//!     fetch and store every reading for one date, for every configured metric.
//!     watermarks are neither consulted nor advanced, so running it twice sends
//!     the same writes twice. the first error ends the run.
//!
//! ==============================================================================

use chrono::NaiveDate;
use tracing::info;

use crate::domain::FetchWindow;
use crate::engine::{SyncEngine, SyncMode};
use crate::error::SyncResult;
use crate::sink::Sink;
use crate::tags::{directory, TagSource};

/// stored reading count per metric, in configured order
pub type BackfillReport = Vec<(String, usize)>;

pub async fn backfill(
    source: &dyn TagSource,
    sink: &dyn Sink,
    metrics: &[String],
    convert_to_f: bool,
    date: NaiveDate,
) -> SyncResult<BackfillReport> {
    info!(%date, "fetching list of tags");
    let devices = directory::list_devices(source).await?;
    info!(tags = devices.len(), "fetched tag list");

    let engine = SyncEngine::new(source, sink, convert_to_f);
    let window = FetchWindow::single_day(date);

    let mut report = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let stored = engine
            .sync_metric(metric, &devices, window, SyncMode::Backfill)
            .await?;
        info!(%metric, stored, %date, "backfilled metric");
        report.push((metric.clone(), stored));
    }
    Ok(report)
}
