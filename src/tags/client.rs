//! ==============================================================================
//! client.rs - http client for the wireless tag cloud api
//! ==============================================================================
//!
//! purpose:
//!     every api method is a json POST to `{base}/{module}.asmx/{method}` with a
//!     bearer token. answers are wrapped in a `{"d": ...}` envelope.
//!
//!     modules used:
//!     - ethAccount.asmx/GetTagManagers        (init reports visible managers)
//!     - ethClient.asmx/GetTagManagerTagList   (tag directory)
//!     - ethLogs.asmx/GetMultiTagStatsRaw      (one metric, many tags)
//!
//! errors:
//!     transport failure or non-200 -> SyncError::Fetch
//!     body that does not decode    -> SyncError::Decode
//!
//! ==============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::TagSource;
use crate::domain::{RawDayBlock, TagGroup, API_DATE_FORMAT};
use crate::error::{SyncError, SyncResult};

const ETH_ACCOUNT: &str = "ethAccount.asmx";
const ETH_CLIENT: &str = "ethClient.asmx";
const ETH_LOGS: &str = "ethLogs.asmx";

/// the `{"d": ...}` wrapper around every answer
#[derive(Deserialize)]
struct Envelope<T> {
    d: T,
}

#[derive(Deserialize)]
struct MultiTagStats {
    #[serde(alias = "Stats", default)]
    stats: Vec<RawDayBlock>,
}

/// a tag manager (base station) on the account
#[derive(Clone, Debug, Deserialize)]
pub struct TagManager {
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(alias = "Mac", default)]
    pub mac: String,
    #[serde(alias = "Online", default)]
    pub online: bool,
}

#[derive(Clone)]
pub struct WirelessTagClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl WirelessTagClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// POST a json body and return the raw response body
    async fn post(&self, module: &str, method: &str, body: &serde_json::Value) -> SyncResult<Vec<u8>> {
        let url = format!("{}/{}/{}", self.base_url, module, method);
        debug!(%url, "tag api request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(format!("{method}: {e}")))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Fetch(format!("{method}: reading body: {e}")))?;

        if !status.is_success() {
            return Err(SyncError::Fetch(format!(
                "{method}: status {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        Ok(bytes.to_vec())
    }

    /// POST `{}` to a method that takes no input
    async fn post_empty(&self, module: &str, method: &str) -> SyncResult<Vec<u8>> {
        self.post(module, method, &json!({})).await
    }

    fn decode<T: DeserializeOwned>(method: &str, body: &[u8]) -> SyncResult<T> {
        serde_json::from_slice::<Envelope<T>>(body)
            .map(|e| e.d)
            .map_err(|e| SyncError::Decode(format!("{method}: {e}")))
    }

    pub async fn get_tag_managers(&self) -> SyncResult<Vec<TagManager>> {
        let body = self.post_empty(ETH_ACCOUNT, "GetTagManagers").await?;
        Self::decode("GetTagManagers", &body)
    }
}

#[async_trait]
impl TagSource for WirelessTagClient {
    async fn list_tag_groups(&self) -> SyncResult<Vec<TagGroup>> {
        let body = self.post_empty(ETH_CLIENT, "GetTagManagerTagList").await?;
        Self::decode("GetTagManagerTagList", &body)
    }

    async fn fetch_raw_stats(
        &self,
        metric: &str,
        slave_ids: &[i64],
        from: NaiveDate,
        to: NaiveDate,
    ) -> SyncResult<Vec<RawDayBlock>> {
        let request = json!({
            "ids": slave_ids,
            "type": metric,
            "fromDate": from.format(API_DATE_FORMAT).to_string(),
            "toDate": to.format(API_DATE_FORMAT).to_string(),
        });
        let body = self.post(ETH_LOGS, "GetMultiTagStatsRaw", &request).await?;
        let stats: MultiTagStats = Self::decode("GetMultiTagStatsRaw", &body)?;
        Ok(stats.stats)
    }
}
