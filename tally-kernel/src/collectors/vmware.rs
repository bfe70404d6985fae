//! VMware vCenter adapter.
//!
//! A full implementation enumerates ESXi hosts (`esxi_host`), virtual
//! machines (`vm`), clusters (`cluster`) and datastores (`datastore`), with
//! `RUNS_ON` edges VM -> host and `MEMBER_OF` edges host -> cluster.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::CollectorConfig;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct VmwareCollector;

#[async_trait]
impl Collector for VmwareCollector {
    fn name(&self) -> &'static str {
        "vmware"
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        let _url = cfg.setting("url").ok_or(CollectError::MissingSetting("url"))?;
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        // TODO: wire up the vSphere REST session and inventory enumeration.
        Ok(CollectResult::default())
    }
}
