use tracing::debug;

use super::TagSource;
use crate::domain::Device;
use crate::error::SyncResult;

/// every tag across every tag manager, in the order the api reports them
///
/// a tag listed under two managers shows up twice; nothing here de-duplicates.
pub async fn list_devices(source: &dyn TagSource) -> SyncResult<Vec<Device>> {
    let groups = source.list_tag_groups().await?;

    let devices: Vec<Device> = groups
        .into_iter()
        .inspect(|g| debug!(manager = %g.mac, tags = g.tags.len(), "tag manager"))
        .flat_map(|g| g.tags)
        .collect();

    Ok(devices)
}

/// map a stat batch's slave id back to a device
pub fn resolve_by_transient_id(devices: &[Device], slave_id: i64) -> Option<&Device> {
    devices.iter().find(|d| d.slave_id == slave_id)
}

/// transient ids to request stats for
pub fn slave_ids(devices: &[Device]) -> Vec<i64> {
    devices.iter().map(|d| d.slave_id).collect()
}
