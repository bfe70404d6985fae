//! Ansible inventory adapter: reads `ansible-inventory --list` JSON from
//! `settings["inventory_path"]`.
//!
//! Hosts become `host` assets, groups become `group` assets, and each
//! host is linked to its groups with `MEMBER_OF` edges. Edge endpoints use
//! the run-local asset IDs; the reconciler remaps them to canonical IDs.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::{Asset, CollectorConfig, Relationship, RelationshipType};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct AnsibleCollector;

#[async_trait]
impl Collector for AnsibleCollector {
    fn name(&self) -> &'static str {
        "ansible"
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        let path = cfg
            .setting("inventory_path")
            .ok_or(CollectError::MissingSetting("inventory_path"))?;

        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(CollectError::Cancelled),
            read = tokio::fs::read_to_string(path) => read?,
        };

        parse_inventory(&data)
    }
}

/// Parse one inventory document into hosts, groups, and membership edges.
fn parse_inventory(data: &str) -> Result<CollectResult, CollectError> {
    let inventory: Map<String, Value> =
        serde_json::from_str(data).map_err(|e| CollectError::Parse(e.to_string()))?;

    let hostvars = inventory
        .get("_meta")
        .and_then(|m| m.get("hostvars"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut result = CollectResult::default();
    let mut host_ids: HashMap<String, Uuid> = HashMap::new();

    // Group sections: every top-level key except the meta block. "all" is
    // the implicit root group and carries no useful identity of its own.
    for (group_name, section) in &inventory {
        if group_name == "_meta" || group_name == "all" {
            continue;
        }
        let Some(section) = section.as_object() else {
            continue;
        };

        let mut group = Asset::new(&format!("group:{group_name}"), "ansible", "group", group_name);
        group.attributes = json!({
            "vars": section.get("vars").cloned().unwrap_or_else(|| json!({})),
        });
        let group_id = group.id;
        result.assets.push(group);

        let hosts = section
            .get("hosts")
            .and_then(Value::as_array)
            .map(|hosts| hosts.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();

        for hostname in hosts {
            let host_id = *host_ids.entry(hostname.to_string()).or_insert_with(|| {
                let asset = host_asset(hostname, hostvars.get(hostname));
                let id = asset.id;
                result.assets.push(asset);
                id
            });

            result.relationships.push(Relationship::new(
                host_id,
                group_id,
                RelationshipType::MemberOf,
                "ansible",
            ));
        }
    }

    Ok(result)
}

fn host_asset(hostname: &str, vars: Option<&Value>) -> Asset {
    let mut asset = Asset::new(hostname, "ansible", "host", hostname);

    if hostname.contains('.') {
        asset.fqdn = Some(hostname.to_string());
    }

    if let Some(vars) = vars.and_then(Value::as_object) {
        if let Some(address) = vars.get("ansible_host").and_then(Value::as_str) {
            if address.parse::<std::net::IpAddr>().is_ok() {
                asset.ip_addresses.push(address.to_string());
            } else if asset.fqdn.is_none() && address.contains('.') {
                asset.fqdn = Some(address.to_string());
            }
        }
        asset.attributes = json!({
            "os_family": vars.get("ansible_os_family").cloned(),
            "distribution": vars.get("ansible_distribution").cloned(),
        });
    }

    asset
}
