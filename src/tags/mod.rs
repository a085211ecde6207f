//! ==============================================================================
//! tags - the wireless tag cloud api and the tag directory built on it
//! ==============================================================================
//!
//! relationships:
//!     - client.rs: reqwest implementation of TagSource (the real cloud api)
//!     - directory.rs: flattens tag managers into one device list, resolves ids
//!     - used by: engine.rs (fetch_raw_stats), poller.rs / backfill.rs (directory)
//!
//! ==============================================================================

pub mod client;
pub mod directory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::{RawDayBlock, TagGroup};
use crate::error::SyncResult;

pub use client::WirelessTagClient;

/// where tags and their raw stats come from
#[async_trait]
pub trait TagSource: Send + Sync {
    /// every tag manager visible to the credential, with its tags
    async fn list_tag_groups(&self) -> SyncResult<Vec<TagGroup>>;

    /// one metric for many tags, one block per calendar day in [from, to]
    async fn fetch_raw_stats(
        &self,
        metric: &str,
        slave_ids: &[i64],
        from: NaiveDate,
        to: NaiveDate,
    ) -> SyncResult<Vec<RawDayBlock>>;
}
