//! Kubernetes adapter.
//!
//! A full implementation lists nodes (`k8s_node`), namespaces
//! (`k8s_namespace`), pods (`k8s_pod`), services (`k8s_service`) and
//! deployments (`k8s_deployment`), with `RUNS_ON` edges pod -> node,
//! `MEMBER_OF` edges pod -> namespace, and `LOAD_BALANCES` edges
//! service -> pod.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::CollectorConfig;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct K8sCollector;

#[async_trait]
impl Collector for K8sCollector {
    fn name(&self) -> &'static str {
        "k8s"
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        let _kubeconfig =
            cfg.setting("kubeconfig").ok_or(CollectError::MissingSetting("kubeconfig"))?;
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        // TODO: build the cluster client from the kubeconfig and enumerate.
        Ok(CollectResult::default())
    }
}
