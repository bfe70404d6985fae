//! Application configuration loaded from a YAML file and overridden by
//! `TALLY_*` environment variables.
//!
//! The file path comes from `TALLY_CONFIG` (default `tally.yaml`). A missing
//! file is not an error: defaults plus environment overrides apply.
//!
//! Example tally.yaml:
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 8080
//! database:
//!   host: "localhost"
//!   port: 5432
//!   user: "tally"
//!   password: "tally"
//!   dbname: "tally"
//! mqtt:
//!   host: "localhost"
//!   port: 1883
//! collectors:
//!   - name: lan-scan
//!     type: nmap
//!     enabled: true
//!     interval: "10m"
//!     settings:
//!       xml_path: "/var/lib/tally/nmap.xml"
//! ```

use crate::models::CollectorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Interval applied when a collector entry has no parsable interval.
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(300);

/// Grace period before a stale asset is transitioned to removed.
pub const DEFAULT_REMOVAL_GRACE: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub graph: GraphConfig,
    pub mqtt: MqttConfig,
    pub collectors: Vec<CollectorEntry>,
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
    pub notifier: NotifierConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8080 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
}

impl DatabaseConfig {
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.dbname, self.sslmode
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "tally".into(),
            password: "tally".into(),
            dbname: "tally".into(),
            sslmode: "disable".into(),
        }
    }
}

/// Graph projection settings. The graph tables live in their own pool; by
/// default they share the canonical database DSN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    pub database: Option<DatabaseConfig>,
}

impl GraphConfig {
    pub fn dsn_or(&self, fallback: &DatabaseConfig) -> String {
        self.database.as_ref().unwrap_or(fallback).dsn()
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { enabled: true, database: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883, client_id: "tally-kernel".into() }
    }
}

/// One collector entry as written in the config file; `interval` is a
/// duration string ("30s", "5m", "1h30m"). Unparsable intervals fall back
/// to the 5 minute default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub collector_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl CollectorEntry {
    /// Resolve this entry into the runtime [`CollectorConfig`].
    pub fn resolve(&self) -> CollectorConfig {
        let interval = match parse_duration(&self.interval) {
            Some(d) => d,
            None => {
                if !self.interval.is_empty() {
                    warn!(name = %self.name, interval = %self.interval,
                        "unparsable collector interval, using default");
                }
                DEFAULT_COLLECT_INTERVAL
            }
        };
        CollectorConfig {
            name: self.name.clone(),
            collector_type: self.collector_type.clone(),
            enabled: self.enabled,
            interval,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Duration string; how long a stale asset survives before removal.
    pub removal_grace: String,
}

impl ReconcilerConfig {
    pub fn grace(&self) -> Duration {
        parse_duration(&self.removal_grace).unwrap_or(DEFAULT_REMOVAL_GRACE)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { removal_grace: "24h".into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            graph: GraphConfig::default(),
            mqtt: MqttConfig::default(),
            collectors: Vec::new(),
            scheduler: SchedulerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            notifier: NotifierConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Load the configuration: YAML file, then `TALLY_*` environment overrides.
pub async fn load_config() -> AppConfig {
    let path = std::env::var("TALLY_CONFIG").unwrap_or_else(|_| "tally.yaml".into());

    let mut cfg = if Path::new(&path).exists() {
        let txt = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&txt).unwrap_or_else(|e| {
                warn!(path = %path, error = %e, "invalid YAML config, using defaults");
                AppConfig::default()
            })
        }
    } else {
        warn!(path = %path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg
}

/// Apply `TALLY_*` overrides onto a loaded config. The lookup function is
/// injected so tests do not mutate the process environment.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn set_str<F: Fn(&str) -> Option<String>>(var: &F, key: &str, target: &mut String) {
        if let Some(v) = var(key) {
            *target = v;
        }
    }
    fn set_port<F: Fn(&str) -> Option<String>>(var: &F, key: &str, target: &mut u16) {
        if let Some(v) = var(key) {
            match v.parse() {
                Ok(p) => *target = p,
                Err(_) => warn!(key, value = %v, "ignoring non-numeric port override"),
            }
        }
    }

    set_str(&var, "TALLY_SERVER_HOST", &mut cfg.server.host);
    set_port(&var, "TALLY_SERVER_PORT", &mut cfg.server.port);
    set_str(&var, "TALLY_DATABASE_HOST", &mut cfg.database.host);
    set_port(&var, "TALLY_DATABASE_PORT", &mut cfg.database.port);
    set_str(&var, "TALLY_DATABASE_USER", &mut cfg.database.user);
    set_str(&var, "TALLY_DATABASE_PASSWORD", &mut cfg.database.password);
    set_str(&var, "TALLY_DATABASE_DBNAME", &mut cfg.database.dbname);
    set_str(&var, "TALLY_DATABASE_SSLMODE", &mut cfg.database.sslmode);
    set_str(&var, "TALLY_MQTT_HOST", &mut cfg.mqtt.host);
    set_port(&var, "TALLY_MQTT_PORT", &mut cfg.mqtt.port);
    set_str(&var, "TALLY_LOG_LEVEL", &mut cfg.log.level);
    if let Some(v) = var("TALLY_NOTIFIER_WEBHOOK_URL") {
        cfg.notifier.webhook_url = Some(v);
    }
    if let Some(v) = var("TALLY_GRAPH_ENABLED") {
        cfg.graph.enabled = matches!(v.as_str(), "1" | "true" | "yes");
    }
    if let Some(v) = var("TALLY_REMOVAL_GRACE") {
        cfg.reconciler.removal_grace = v;
    }
}

/// Parse a compound duration string: `90s`, `5m`, `1h30m`, `250ms`.
/// Returns `None` for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();

        let unit = match c {
            'h' => Duration::from_secs(3600),
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    Duration::from_millis(1)
                } else {
                    Duration::from_secs(60)
                }
            }
            's' => Duration::from_secs(1),
            _ => return None,
        };
        total += unit * value as u32;
    }

    if !digits.is_empty() {
        // Trailing bare number has no unit.
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2m30s"), Some(Duration::from_secs(150)));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("m5"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn entry_resolution_falls_back_to_default_interval() {
        let entry = CollectorEntry {
            name: "scan".into(),
            collector_type: "nmap".into(),
            enabled: true,
            interval: "whenever".into(),
            settings: HashMap::new(),
        };
        assert_eq!(entry.resolve().interval, DEFAULT_COLLECT_INTERVAL);

        let entry = CollectorEntry { interval: "90s".into(), ..entry };
        assert_eq!(entry.resolve().interval, Duration::from_secs(90));
    }

    #[test]
    fn yaml_round_trip_with_collectors() {
        let yaml = r#"
server:
  port: 9090
database:
  host: "db.internal"
collectors:
  - name: lan-scan
    type: nmap
    enabled: true
    interval: "10m"
    settings:
      xml_path: "/tmp/scan.xml"
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "0.0.0.0"); // default preserved
        assert_eq!(cfg.database.host, "db.internal");
        assert_eq!(cfg.collectors.len(), 1);
        let resolved = cfg.collectors[0].resolve();
        assert_eq!(resolved.interval, Duration::from_secs(600));
        assert_eq!(resolved.setting("xml_path"), Some("/tmp/scan.xml"));
    }

    #[test]
    fn env_overrides_apply_with_prefix() {
        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |key| match key {
            "TALLY_DATABASE_HOST" => Some("pg.lan".to_string()),
            "TALLY_SERVER_PORT" => Some("8888".to_string()),
            "TALLY_GRAPH_ENABLED" => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(cfg.database.host, "pg.lan");
        assert_eq!(cfg.server.port, 8888);
        assert!(!cfg.graph.enabled);
        assert!(cfg.database.dsn().contains("pg.lan:5432"));
    }
}
