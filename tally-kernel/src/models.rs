//! Core domain types shared by every subsystem: assets, relationships,
//! change events, and per-collector configuration/status.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle state of an asset.
///
/// `active -> stale -> removed` only; a later sighting may resurrect
/// `stale -> active`, `removed` is terminal for the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Active,
    Stale,
    Removed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "active",
            AssetStatus::Stale => "stale",
            AssetStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AssetStatus::Active),
            "stale" => Some(AssetStatus::Stale),
            "removed" => Some(AssetStatus::Removed),
            _ => None,
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record of one discovered IT entity. `(source, external_id)`
/// is unique across the store; `id` is the stable internal handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub external_id: String,
    pub source: String,
    pub asset_type: String, // "vm", "host", "k8s_pod", "vserver", ...
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    pub ip_addresses: Vec<String>,
    pub attributes: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub status: AssetStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Asset {
    /// Fresh asset with generated id and all timestamps set to now.
    pub fn new(external_id: &str, source: &str, asset_type: &str, name: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            source: source.to_string(),
            asset_type: asset_type.to_string(),
            name: name.to_string(),
            fqdn: None,
            ip_addresses: Vec::new(),
            attributes: serde_json::json!({}),
            first_seen: now,
            last_seen: now,
            status: AssetStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Directed, typed edge between two assets. The closed type set is part of
/// the graph schema; adding a kind is a migration, not a data write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "RUNS_ON")]
    RunsOn,
    #[serde(rename = "DEPENDS_ON")]
    DependsOn,
    #[serde(rename = "MEMBER_OF")]
    MemberOf,
    #[serde(rename = "LOAD_BALANCES")]
    LoadBalances,
    #[serde(rename = "MONITORS")]
    Monitors,
    #[serde(rename = "CONNECTS_TO")]
    ConnectsTo,
    #[serde(rename = "CONTAINS")]
    Contains,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RunsOn => "RUNS_ON",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::MemberOf => "MEMBER_OF",
            RelationshipType::LoadBalances => "LOAD_BALANCES",
            RelationshipType::Monitors => "MONITORS",
            RelationshipType::ConnectsTo => "CONNECTS_TO",
            RelationshipType::Contains => "CONTAINS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNS_ON" => Some(RelationshipType::RunsOn),
            "DEPENDS_ON" => Some(RelationshipType::DependsOn),
            "MEMBER_OF" => Some(RelationshipType::MemberOf),
            "LOAD_BALANCES" => Some(RelationshipType::LoadBalances),
            "MONITORS" => Some(RelationshipType::Monitors),
            "CONNECTS_TO" => Some(RelationshipType::ConnectsTo),
            "CONTAINS" => Some(RelationshipType::Contains),
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub from_id: Uuid,
    pub to_id: Uuid,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub source: String,
    pub properties: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Relationship {
    pub fn new(from_id: Uuid, to_id: Uuid, rel_type: RelationshipType, source: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            from_id,
            to_id,
            rel_type,
            source: source.to_string(),
            properties: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

/// What kind of change the reconciler decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    #[serde(rename = "asset.created")]
    AssetCreated,
    #[serde(rename = "asset.updated")]
    AssetUpdated,
    #[serde(rename = "asset.removed")]
    AssetRemoved,
    #[serde(rename = "relationship.changed")]
    RelationshipChanged,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::AssetCreated => "asset.created",
            ChangeAction::AssetUpdated => "asset.updated",
            ChangeAction::AssetRemoved => "asset.removed",
            ChangeAction::RelationshipChanged => "relationship.changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asset.created" => Some(ChangeAction::AssetCreated),
            "asset.updated" => Some(ChangeAction::AssetUpdated),
            "asset.removed" => Some(ChangeAction::AssetRemoved),
            "relationship.changed" => Some(ChangeAction::RelationshipChanged),
            _ => None,
        }
    }

    /// Event-bus subject for this action, e.g. `assets.asset.created`.
    pub fn subject(&self) -> String {
        format!("assets.{}", self.as_str())
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a reconciler decision.
///
/// `asset.created` carries `diff = None`; `asset.updated` always carries a
/// non-empty diff of the form `{field: {"old": .., "new": ..}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub action: ChangeAction,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeEvent {
    pub fn new(
        asset_id: Uuid,
        action: ChangeAction,
        source: &str,
        diff: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            action,
            source: source.to_string(),
            diff,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Static configuration for one collector source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub collector_type: String,
    pub enabled: bool,
    /// Zero means "use the scheduler default" (5 minutes).
    #[serde(skip)]
    pub interval: Duration,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl CollectorConfig {
    pub fn new(name: &str, collector_type: &str) -> Self {
        Self {
            name: name.to_string(),
            collector_type: collector_type.to_string(),
            enabled: true,
            interval: Duration::ZERO,
            settings: HashMap::new(),
        }
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

/// Runtime state of a collector, maintained by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub running: bool,
    pub asset_count: usize,
}

impl CollectorStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_run: None,
            last_success: None,
            last_error: None,
            running: false,
            asset_count: 0,
        }
    }
}

/// Delivery channel for a matched alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    Webhook,
    Email,
    Telegram,
}

impl NotifyChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyChannel::Webhook => "webhook",
            NotifyChannel::Email => "email",
            NotifyChannel::Telegram => "telegram",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(NotifyChannel::Webhook),
            "email" => Some(NotifyChannel::Email),
            "telegram" => Some(NotifyChannel::Telegram),
            _ => None,
        }
    }
}

/// Condition that routes matching change events to delivery channels.
/// An empty `sources` list means "any source".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub actions: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub channels: Vec<NotifyChannel>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_true() -> bool {
    true
}

impl AlertRule {
    pub fn new(name: &str, actions: Vec<String>, channels: Vec<NotifyChannel>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            actions,
            sources: Vec::new(),
            channels,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}
