//! Relationship graph projection on PostgreSQL.
//!
//! Nodes carry a denormalized `{name, asset_type, source, status}` label so
//! traversals never touch the canonical store. Edges are unique per
//! `(from_id, to_id, rel_type, source)`: collectors mint fresh edge IDs on
//! every run, so the shape is the stable identity across runs.
//!
//! Traversals are frontier-at-a-time breadth-first walks bounded by depth,
//! with a visited set so cycles are returned once.

use super::{normalize_depth, GraphError, GraphNode, GraphSlice, GraphStore};
use crate::models::{Asset, AssetStatus, Relationship, RelationshipType};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    id         UUID PRIMARY KEY,
    name       TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    source     TEXT NOT NULL,
    status     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS graph_edges (
    id         UUID PRIMARY KEY,
    from_id    UUID NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    to_id      UUID NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
    rel_type   TEXT NOT NULL,
    source     TEXT NOT NULL,
    properties JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (from_id, to_id, rel_type, source)
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON graph_edges (from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON graph_edges (to_id);
"#;

const EDGE_COLUMNS: &str = "id, from_id, to_id, rel_type, source, properties, created_at, updated_at";

enum Direction {
    Outgoing,
    Incoming,
}

/// PostgreSQL-backed graph store; own pool, own tables.
#[derive(Clone)]
pub struct PgGraph {
    pool: PgPool,
}

impl PgGraph {
    pub async fn connect(dsn: &str) -> Result<Self, GraphError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn map_sqlx(err: sqlx::Error, endpoint_hint: Option<Uuid>) -> GraphError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23503") {
                // FK violation: an edge endpoint has no node.
                return GraphError::MissingEndpoint(endpoint_hint.unwrap_or(Uuid::nil()));
            }
        }
        GraphError::Backend(err)
    }

    fn row_to_edge(row: &PgRow) -> Result<Relationship, GraphError> {
        let rel_type: String = row.try_get("rel_type")?;
        Ok(Relationship {
            id: row.try_get("id")?,
            from_id: row.try_get("from_id")?,
            to_id: row.try_get("to_id")?,
            rel_type: RelationshipType::parse(&rel_type)
                .unwrap_or(RelationshipType::DependsOn),
            source: row.try_get("source")?,
            properties: row.try_get("properties")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_node(row: &PgRow) -> Result<GraphNode, GraphError> {
        let status: String = row.try_get("status")?;
        Ok(GraphNode {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            asset_type: row.try_get("asset_type")?,
            source: row.try_get("source")?,
            status: AssetStatus::parse(&status).unwrap_or(AssetStatus::Active),
        })
    }

    /// One BFS hop: all edges leaving (or entering) the frontier.
    async fn edges_for_frontier(
        &self,
        frontier: &[Uuid],
        direction: &Direction,
    ) -> Result<Vec<Relationship>, GraphError> {
        let column = match direction {
            Direction::Outgoing => "from_id",
            Direction::Incoming => "to_id",
        };
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges WHERE {column} = ANY($1)"
        ))
        .bind(frontier.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_edge).collect()
    }

    async fn traverse(
        &self,
        start: Uuid,
        depth: i64,
        direction: Direction,
    ) -> Result<GraphSlice, GraphError> {
        let depth = normalize_depth(depth)?;

        let mut visited: HashSet<Uuid> = HashSet::from([start]);
        let mut edge_ids: HashSet<Uuid> = HashSet::new();
        let mut edges: Vec<Relationship> = Vec::new();
        let mut frontier = vec![start];

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let hop = self.edges_for_frontier(&frontier, &direction).await?;
            let mut next = Vec::new();
            for edge in hop {
                let neighbor = match direction {
                    Direction::Outgoing => edge.to_id,
                    Direction::Incoming => edge.from_id,
                };
                if edge_ids.insert(edge.id) {
                    edges.push(edge);
                }
                if visited.insert(neighbor) {
                    next.push(neighbor);
                }
            }
            frontier = next;
        }

        let ids: Vec<Uuid> = visited.into_iter().collect();
        let rows = sqlx::query(
            "SELECT id, name, asset_type, source, status FROM graph_nodes WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let nodes = rows.iter().map(Self::row_to_node).collect::<Result<Vec<_>, _>>()?;

        Ok(GraphSlice { nodes, edges })
    }
}

#[async_trait]
impl GraphStore for PgGraph {
    async fn upsert_node(&self, asset: &Asset) -> Result<(), GraphError> {
        sqlx::query(
            "INSERT INTO graph_nodes (id, name, asset_type, source, status) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, asset_type = EXCLUDED.asset_type, \
               source = EXCLUDED.source, status = EXCLUDED.status",
        )
        .bind(asset.id)
        .bind(&asset.name)
        .bind(&asset.asset_type)
        .bind(&asset.source)
        .bind(asset.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_node(&self, id: Uuid) -> Result<(), GraphError> {
        // Incident edges go with the node via ON DELETE CASCADE.
        sqlx::query("DELETE FROM graph_nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_relationship(&self, rel: &Relationship) -> Result<(), GraphError> {
        sqlx::query(
            "INSERT INTO graph_edges \
             (id, from_id, to_id, rel_type, source, properties, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (from_id, to_id, rel_type, source) DO UPDATE SET \
               properties = EXCLUDED.properties, updated_at = EXCLUDED.updated_at",
        )
        .bind(rel.id)
        .bind(rel.from_id)
        .bind(rel.to_id)
        .bind(rel.rel_type.as_str())
        .bind(&rel.source)
        .bind(&rel.properties)
        .bind(rel.created_at)
        .bind(rel.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_sqlx(e, Some(rel.from_id)))?;
        Ok(())
    }

    async fn delete_relationship(&self, id: Uuid) -> Result<(), GraphError> {
        sqlx::query("DELETE FROM graph_edges WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_relationships(&self, asset_id: Uuid) -> Result<Vec<Relationship>, GraphError> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges WHERE from_id = $1 OR to_id = $1"
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_edge).collect()
    }

    async fn get_dependency_graph(
        &self,
        asset_id: Uuid,
        depth: i64,
    ) -> Result<GraphSlice, GraphError> {
        self.traverse(asset_id, depth, Direction::Outgoing).await
    }

    async fn get_impact_graph(&self, asset_id: Uuid, depth: i64) -> Result<GraphSlice, GraphError> {
        self.traverse(asset_id, depth, Direction::Incoming).await
    }
}
