//! Canonical store on PostgreSQL.
//!
//! Connection pooling via sqlx; every call is its own transaction. The
//! schema is applied as idempotent DDL at connect time.

use super::{
    AlertRuleStore, AssetFilter, AssetStore, ChangeEventStore, StoreError,
};
use crate::models::{
    AlertRule, Asset, AssetStatus, ChangeAction, ChangeEvent, NotifyChannel,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id            UUID PRIMARY KEY,
    external_id   TEXT NOT NULL,
    source        TEXT NOT NULL,
    asset_type    TEXT NOT NULL,
    name          TEXT NOT NULL,
    fqdn          TEXT,
    ip_addresses  TEXT[] NOT NULL DEFAULT '{}',
    attributes    JSONB NOT NULL DEFAULT '{}',
    first_seen    TIMESTAMPTZ NOT NULL,
    last_seen     TIMESTAMPTZ NOT NULL,
    status        TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL,
    UNIQUE (source, external_id)
);
CREATE INDEX IF NOT EXISTS idx_assets_source ON assets (source);
CREATE INDEX IF NOT EXISTS idx_assets_type ON assets (asset_type);
CREATE INDEX IF NOT EXISTS idx_assets_status ON assets (status);
CREATE INDEX IF NOT EXISTS idx_assets_fqdn ON assets (fqdn);
CREATE INDEX IF NOT EXISTS idx_assets_updated ON assets (updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_assets_name_lower ON assets (lower(name));
CREATE INDEX IF NOT EXISTS idx_assets_ips ON assets USING GIN (ip_addresses);

CREATE TABLE IF NOT EXISTS change_events (
    id        UUID PRIMARY KEY,
    asset_id  UUID NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    action    TEXT NOT NULL,
    source    TEXT NOT NULL,
    diff      JSONB,
    timestamp TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_changes_asset ON change_events (asset_id);
CREATE INDEX IF NOT EXISTS idx_changes_time ON change_events (timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_changes_action ON change_events (action);

CREATE TABLE IF NOT EXISTS alert_rules (
    id         UUID PRIMARY KEY,
    name       TEXT NOT NULL,
    actions    TEXT[] NOT NULL,
    sources    TEXT[] NOT NULL DEFAULT '{}',
    channels   TEXT[] NOT NULL,
    enabled    BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
"#;

const ASSET_COLUMNS: &str = "id, external_id, source, asset_type, name, fqdn, ip_addresses, \
     attributes, first_seen, last_seen, status, created_at, updated_at";

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind the optional filter predicates in the same order the WHERE clause
/// was assembled in.
fn bind_filter<'q>(mut q: PgQuery<'q>, filter: &AssetFilter) -> PgQuery<'q> {
    if let Some(source) = &filter.source {
        q = q.bind(source.clone());
    }
    if let Some(asset_type) = &filter.asset_type {
        q = q.bind(asset_type.clone());
    }
    if let Some(status) = filter.status {
        q = q.bind(status.as_str());
    }
    if let Some(search) = &filter.search {
        q = q.bind(format!("%{search}%"));
    }
    q
}

/// PostgreSQL-backed canonical store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect, verify the connection, and apply the schema.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        // Statements are idempotent; re-running on every boot is safe.
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn map_sqlx(err: sqlx::Error) -> StoreError {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::UniqueViolation(db.message().to_string())
            }
            _ => StoreError::Backend(err),
        }
    }

    fn row_to_asset(row: &PgRow) -> Result<Asset, StoreError> {
        let status: String = row.try_get("status")?;
        Ok(Asset {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            source: row.try_get("source")?,
            asset_type: row.try_get("asset_type")?,
            name: row.try_get("name")?,
            fqdn: row.try_get("fqdn")?,
            ip_addresses: row.try_get("ip_addresses")?,
            attributes: row.try_get("attributes")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
            status: AssetStatus::parse(&status).unwrap_or(AssetStatus::Active),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_change_event(row: &PgRow) -> Result<ChangeEvent, StoreError> {
        let action: String = row.try_get("action")?;
        Ok(ChangeEvent {
            id: row.try_get("id")?,
            asset_id: row.try_get("asset_id")?,
            action: ChangeAction::parse(&action).unwrap_or(ChangeAction::AssetUpdated),
            source: row.try_get("source")?,
            diff: row.try_get("diff")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn row_to_alert_rule(row: &PgRow) -> Result<AlertRule, StoreError> {
        let channels: Vec<String> = row.try_get("channels")?;
        Ok(AlertRule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            actions: row.try_get("actions")?,
            sources: row.try_get("sources")?,
            channels: channels.iter().filter_map(|c| NotifyChannel::parse(c)).collect(),
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AssetStore for PgStore {
    async fn create(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO assets (id, external_id, source, asset_type, name, fqdn, \
             ip_addresses, attributes, first_seen, last_seen, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(asset.id)
        .bind(&asset.external_id)
        .bind(&asset.source)
        .bind(&asset.asset_type)
        .bind(&asset.name)
        .bind(&asset.fqdn)
        .bind(&asset.ip_addresses)
        .bind(&asset.attributes)
        .bind(asset.first_seen)
        .bind(asset.last_seen)
        .bind(asset.status.as_str())
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Asset, StoreError> {
        let row = sqlx::query(&format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_sqlx)?;
        Self::row_to_asset(&row)
    }

    async fn get_by_external(&self, source: &str, external_id: &str) -> Result<Asset, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE source = $1 AND external_id = $2"
        ))
        .bind(source)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        Self::row_to_asset(&row)
    }

    async fn list(&self, filter: &AssetFilter) -> Result<(Vec<Asset>, i64), StoreError> {
        let mut conditions = Vec::new();
        if filter.source.is_some() {
            conditions.push(format!("source = ${}", conditions.len() + 1));
        }
        if filter.asset_type.is_some() {
            conditions.push(format!("asset_type = ${}", conditions.len() + 1));
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${}", conditions.len() + 1));
        }
        if filter.search.is_some() {
            let n = conditions.len() + 1;
            conditions.push(format!("(name ILIKE ${n} OR fqdn ILIKE ${n})"));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) AS total FROM assets {where_clause}");
        let total: i64 = bind_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_sqlx)?
            .try_get("total")?;

        let bound = conditions.len();
        let list_sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets {where_clause} \
             ORDER BY updated_at DESC, id LIMIT ${} OFFSET ${}",
            bound + 1,
            bound + 2
        );
        let rows = bind_filter(sqlx::query(&list_sql), filter)
            .bind(filter.normalized_limit())
            .bind(filter.normalized_offset())
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_sqlx)?;

        let assets = rows.iter().map(Self::row_to_asset).collect::<Result<Vec<_>, _>>()?;
        Ok((assets, total))
    }

    async fn update(&self, asset: &Asset) -> Result<(), StoreError> {
        let updated_at = OffsetDateTime::now_utc();
        let result = sqlx::query(
            "UPDATE assets SET external_id = $2, source = $3, asset_type = $4, name = $5, \
             fqdn = $6, ip_addresses = $7, attributes = $8, last_seen = $9, status = $10, \
             updated_at = $11 WHERE id = $1",
        )
        .bind(asset.id)
        .bind(&asset.external_id)
        .bind(&asset.source)
        .bind(&asset.asset_type)
        .bind(&asset.name)
        .bind(&asset.fqdn)
        .bind(&asset.ip_addresses)
        .bind(&asset.attributes)
        .bind(asset.last_seen)
        .bind(asset.status.as_str())
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_seen(
        &self,
        id: Uuid,
        last_seen: OffsetDateTime,
        status: AssetStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE assets SET last_seen = $2, status = $3 WHERE id = $1")
            .bind(id)
            .bind(last_seen)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(Self::map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM assets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_by_ip(&self, ip: &str) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE $1 = ANY(ip_addresses) AND status <> 'removed'"
        ))
        .bind(ip)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        rows.iter().map(Self::row_to_asset).collect()
    }

    async fn find_by_fqdn(&self, fqdn: &str) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE fqdn = $1 AND status <> 'removed'"
        ))
        .bind(fqdn)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        rows.iter().map(Self::row_to_asset).collect()
    }

    async fn find_unseen(
        &self,
        source: &str,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets \
             WHERE source = $1 AND last_seen < $2 AND status <> 'removed'"
        ))
        .bind(source)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        rows.iter().map(Self::row_to_asset).collect()
    }
}

#[async_trait]
impl ChangeEventStore for PgStore {
    async fn create_change_event(&self, event: &ChangeEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO change_events (id, asset_id, action, source, diff, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.asset_id)
        .bind(event.action.as_str())
        .bind(&event.source)
        .bind(&event.diff)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        Ok(())
    }

    async fn list_changes_by_asset(
        &self,
        asset_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM change_events WHERE asset_id = $1")
                .bind(asset_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Self::map_sqlx)?
                .try_get("total")?;

        let rows = sqlx::query(
            "SELECT id, asset_id, action, source, diff, timestamp FROM change_events \
             WHERE asset_id = $1 ORDER BY timestamp DESC, id LIMIT $2 OFFSET $3",
        )
        .bind(asset_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;

        let events = rows.iter().map(Self::row_to_change_event).collect::<Result<Vec<_>, _>>()?;
        Ok((events, total))
    }

    async fn list_recent_changes(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ChangeEvent>, i64), StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM change_events")
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_sqlx)?
            .try_get("total")?;

        let rows = sqlx::query(
            "SELECT id, asset_id, action, source, diff, timestamp FROM change_events \
             ORDER BY timestamp DESC, id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;

        let events = rows.iter().map(Self::row_to_change_event).collect::<Result<Vec<_>, _>>()?;
        Ok((events, total))
    }
}

#[async_trait]
impl AlertRuleStore for PgStore {
    async fn create_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let channels: Vec<String> =
            rule.channels.iter().map(|c| c.as_str().to_string()).collect();
        sqlx::query(
            "INSERT INTO alert_rules (id, name, actions, sources, channels, enabled, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.actions)
        .bind(&rule.sources)
        .bind(&channels)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        Ok(())
    }

    async fn list_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, actions, sources, channels, enabled, created_at, updated_at \
             FROM alert_rules ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_sqlx)?;
        rows.iter().map(Self::row_to_alert_rule).collect()
    }

    async fn delete_alert_rule(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
