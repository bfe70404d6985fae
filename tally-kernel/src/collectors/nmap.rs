//! Network-scan adapter: converts nmap `-oX` XML output into host assets.
//!
//! The scan itself runs out-of-band (cron, CI, a scanner appliance); this
//! adapter only reads the XML file named by `settings["xml_path"]`. Hosts
//! that are not up are skipped. Open ports and the best OS match land in
//! the asset attributes.

use crate::collector::{CollectError, CollectResult, Collector};
use crate::models::{Asset, CollectorConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub struct NmapCollector;

#[async_trait]
impl Collector for NmapCollector {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        cfg: &CollectorConfig,
    ) -> Result<CollectResult, CollectError> {
        let xml_path = cfg.setting("xml_path").ok_or(CollectError::MissingSetting("xml_path"))?;

        let data = tokio::select! {
            _ = cancel.cancelled() => return Err(CollectError::Cancelled),
            read = tokio::fs::read_to_string(xml_path) => read?,
        };

        parse_scan(&data)
    }
}

/// Parse one nmap XML document into a snapshot.
fn parse_scan(xml: &str) -> Result<CollectResult, CollectError> {
    let run: NmapRun =
        quick_xml::de::from_str(xml).map_err(|e| CollectError::Parse(e.to_string()))?;

    let mut result = CollectResult::default();

    for host in &run.hosts {
        if host.status.state != "up" {
            continue;
        }

        let ips: Vec<String> = host
            .addresses
            .iter()
            .filter(|a| a.addrtype == "ipv4" || a.addrtype == "ipv6")
            .map(|a| a.addr.clone())
            .collect();

        let hostname = host
            .hostnames
            .as_ref()
            .and_then(|h| h.entries.first())
            .map(|h| h.name.clone())
            .unwrap_or_default();

        // The scanner has no durable handle for a host, so the first IP
        // doubles as the external id.
        let Some(external_id) = ips.first().cloned() else {
            continue;
        };

        let mut asset = Asset::new(&external_id, "nmap", "host", &hostname);
        asset.ip_addresses = ips;
        if !hostname.is_empty() {
            asset.fqdn = Some(hostname);
        }
        asset.attributes = json!({
            "ports": open_ports(host),
            "os_match": best_os_match(host),
        });

        result.assets.push(asset);
    }

    Ok(result)
}

fn open_ports(host: &HostXml) -> Vec<serde_json::Value> {
    host.ports
        .as_ref()
        .map(|ports| {
            ports
                .entries
                .iter()
                .filter(|p| p.state.state == "open")
                .map(|p| {
                    json!({
                        "port": p.portid,
                        "protocol": p.protocol,
                        "service": p.service.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                        "product": p.service.as_ref().and_then(|s| s.product.clone()),
                        "version": p.service.as_ref().and_then(|s| s.version.clone()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn best_os_match(host: &HostXml) -> String {
    host.os
        .as_ref()
        .and_then(|os| os.matches.first())
        .map(|m| m.name.clone())
        .unwrap_or_default()
}

// --- nmap XML shapes ---

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(default, rename = "host")]
    hosts: Vec<HostXml>,
}

#[derive(Debug, Deserialize)]
struct HostXml {
    status: StatusXml,
    #[serde(default, rename = "address")]
    addresses: Vec<AddressXml>,
    #[serde(default)]
    hostnames: Option<HostnamesXml>,
    #[serde(default)]
    ports: Option<PortsXml>,
    #[serde(default)]
    os: Option<OsXml>,
}

#[derive(Debug, Deserialize)]
struct StatusXml {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct AddressXml {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct HostnamesXml {
    #[serde(default, rename = "hostname")]
    entries: Vec<HostnameXml>,
}

#[derive(Debug, Deserialize)]
struct HostnameXml {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PortsXml {
    #[serde(default, rename = "port")]
    entries: Vec<PortXml>,
}

#[derive(Debug, Deserialize)]
struct PortXml {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: String,
    state: StatusXml,
    #[serde(default)]
    service: Option<ServiceXml>,
}

#[derive(Debug, Deserialize)]
struct ServiceXml {
    #[serde(default, rename = "@name")]
    name: String,
    #[serde(default, rename = "@product")]
    product: Option<String>,
    #[serde(default, rename = "@version")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsXml {
    #[serde(default, rename = "osmatch")]
    matches: Vec<OsMatchXml>,
}

#[derive(Debug, Deserialize)]
struct OsMatchXml {
    #[serde(rename = "@name")]
    name: String,
}
