//! Zabbix adapter.
//!
//! A full implementation authenticates against the JSON-RPC API, fetches
//! monitored hosts (`host`) and host groups (`host_group`), and builds
//! `MEMBER_OF` edges host -> group plus `MONITORS` edges onto assets
//! matched by IP.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::CollectorConfig;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct ZabbixCollector;

#[async_trait]
impl Collector for ZabbixCollector {
    fn name(&self) -> &'static str {
        "zabbix"
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

        // TODO: implement the JSON-RPC client (host.get, hostgroup.get).
        Ok(CollectResult::default())
    }
}
