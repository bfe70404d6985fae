//! Citrix NetScaler (NITRO) adapter.
//!
//! A full implementation fetches virtual servers (`vserver`), service
//! groups (`service_group`), backends (`backend`) and SSL certificates
//! (`ssl_cert`), with `LOAD_BALANCES` edges vserver -> backend and
//! `MEMBER_OF` edges backend -> service group.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::CollectorConfig;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct NetscalerCollector;

#[async_trait]
impl Collector for NetscalerCollector {
    fn name(&self) -> &'static str {
        "netscaler"
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

        // TODO: implement the NITRO REST client (lbvserver, servicegroup).
        Ok(CollectResult::default())
    }
}
