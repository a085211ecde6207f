//! ==============================================================================
//! normalize.rs - columnar day-blocks to per-tag reading lists
//! ==============================================================================
//!
//! purpose:
//!     the tag api answers GetMultiTagStatsRaw with one block per calendar day.
//!     each block holds parallel arrays indexed by tag position:
//!
//!         ids:    [ 7,        9        ]
//!         values: [ [v0, v1], [v0]     ]
//!         tods:   [ [s0, s1], [s0]     ]   <- seconds since local midnight
//!
//!     this module is the only place that knows about that alignment.
//!     everything downstream sees DeviceReadingBatch.
//!
//! ordering:
//!     - tags appear in the order they are first seen across all blocks
//!     - within a tag: blocks in input order, then sample order
//!
//! ==============================================================================

use std::collections::HashMap;

use chrono::{Local, NaiveDate, TimeDelta, TimeZone, Utc};

use crate::domain::{DeviceReadingBatch, RawDayBlock, Reading, API_DATE_FORMAT};
use crate::error::{SyncError, SyncResult};

/// flatten raw day-blocks into one batch per tag
///
/// fails fast: a bad date or misaligned block rejects the whole call.
pub fn normalize(blocks: &[RawDayBlock]) -> SyncResult<Vec<DeviceReadingBatch>> {
    let mut batches: Vec<DeviceReadingBatch> = Vec::new();
    // slave id -> position in `batches`
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for block in blocks {
        let midnight = local_midnight(&block.date)?;
        check_alignment(block)?;

        for (row, &slave_id) in block.slave_ids.iter().enumerate() {
            let position = *positions.entry(slave_id).or_insert_with(|| {
                batches.push(DeviceReadingBatch { slave_id, readings: Vec::new() });
                batches.len() - 1
            });

            // ids may outnumber value rows; those tags had nothing that day
            let (Some(values), Some(offsets)) =
                (block.values.get(row), block.time_of_day_seconds.get(row))
            else {
                continue;
            };

            let readings = &mut batches[position].readings;
            readings.reserve(values.len());
            for (value, &offset) in values.iter().zip(offsets) {
                let timestamp = TimeDelta::try_seconds(offset)
                    .and_then(|delta| midnight.checked_add_signed(delta))
                    .ok_or_else(|| {
                        SyncError::Format(format!("block {}: offset {offset} out of range", block.date))
                    })?;
                readings.push(Reading { timestamp, value: *value });
            }
        }
    }

    Ok(batches)
}

/// parse an api date ("1/2/2006") as midnight in the local time zone
fn local_midnight(date: &str) -> SyncResult<chrono::DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), API_DATE_FORMAT)
        .map_err(|e| SyncError::Format(format!("unparsable date {date:?}: {e}")))?;
    let naive = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| SyncError::Format(format!("no midnight for {date:?}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| SyncError::Format(format!("local midnight does not exist on {date:?}")))
}

fn check_alignment(block: &RawDayBlock) -> SyncResult<()> {
    if block.values.len() != block.time_of_day_seconds.len()
        || block.values.len() > block.slave_ids.len()
    {
        return Err(SyncError::Format(format!(
            "block {}: {} ids, {} value rows, {} offset rows",
            block.date,
            block.slave_ids.len(),
            block.values.len(),
            block.time_of_day_seconds.len()
        )));
    }
    for (row, (values, offsets)) in block.values.iter().zip(&block.time_of_day_seconds).enumerate() {
        if values.len() != offsets.len() {
            return Err(SyncError::Format(format!(
                "block {}: row {} has {} values but {} offsets",
                block.date,
                row,
                values.len(),
                offsets.len()
            )));
        }
    }
    Ok(())
}
