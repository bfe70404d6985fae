//! Source adapters. Each module implements [`crate::collector::Collector`]
//! for one upstream; new sources ship as self-contained modules registered
//! at startup through [`build`].

pub mod ansible;
pub mod k8s;
pub mod netscaler;
pub mod nmap;
pub mod vmware;
pub mod zabbix;

use crate::collector::Collector;
use std::sync::Arc;

/// Resolve a config `type` string to its adapter.
pub fn build(collector_type: &str) -> Option<Arc<dyn Collector>> {
    match collector_type {
        "nmap" => Some(Arc::new(nmap::NmapCollector)),
        "ansible" => Some(Arc::new(ansible::AnsibleCollector)),
        "vmware" => Some(Arc::new(vmware::VmwareCollector)),
        "k8s" => Some(Arc::new(k8s::K8sCollector)),
        "zabbix" => Some(Arc::new(zabbix::ZabbixCollector)),
        "netscaler" => Some(Arc::new(netscaler::NetscalerCollector)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_resolve() {
        for t in ["nmap", "ansible", "vmware", "k8s", "zabbix", "netscaler"] {
            assert!(build(t).is_some(), "missing adapter for {t}");
        }
        assert!(build("spreadsheet").is_none());
    }
}
