//! Embedded SQLite Health Backend
//!
//! Single-host store for deployments where every process shares one
//! machine. All statements run on one connection behind a mutex, so each
//! conditional write is atomic with respect to the others.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::backend::{HealthBackend, ANCHOR};
use super::node::{from_unix, ActiveNodeRecord, NodeHealth, NodeIdentity};
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS node_health (
    hostname TEXT NOT NULL,
    token TEXT NOT NULL,
    ip TEXT NOT NULL DEFAULT '',
    consensus_port INTEGER NOT NULL DEFAULT 0,
    last_seen_active INTEGER NOT NULL,
    extra_info TEXT NOT NULL DEFAULT '',
    command TEXT NOT NULL DEFAULT '',
    app_version TEXT NOT NULL DEFAULT '',
    first_seen_active INTEGER NOT NULL DEFAULT 0,
    db_backend TEXT NOT NULL DEFAULT '',
    incrementing_indicator INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hostname, token)
);

CREATE INDEX IF NOT EXISTS idx_node_health_last_seen
    ON node_health(last_seen_active);

CREATE TABLE IF NOT EXISTS node_health_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL,
    token TEXT NOT NULL,
    first_seen_active INTEGER NOT NULL,
    extra_info TEXT NOT NULL DEFAULT '',
    command TEXT NOT NULL DEFAULT '',
    app_version TEXT NOT NULL DEFAULT '',
    UNIQUE (hostname, token)
);

CREATE INDEX IF NOT EXISTS idx_node_health_history_first_seen
    ON node_health_history(first_seen_active);

CREATE TABLE IF NOT EXISTS active_node (
    anchor INTEGER PRIMARY KEY,
    hostname TEXT NOT NULL,
    token TEXT NOT NULL,
    last_seen_active INTEGER NOT NULL,
    first_seen_active INTEGER NOT NULL DEFAULT 0
);
"#;

/// Health backend on an embedded SQLite database
pub struct SqliteHealthBackend {
    conn: Mutex<Connection>,
}

impl SqliteHealthBackend {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeHealth> {
    Ok(NodeHealth {
        hostname: row.get("hostname")?,
        token: row.get("token")?,
        app_version: row.get("app_version")?,
        first_seen_active: from_unix(row.get("first_seen_active")?),
        last_seen_active: from_unix(row.get("last_seen_active")?),
        extra_info: row.get("extra_info")?,
        command: row.get("command")?,
        db_backend: row.get("db_backend")?,
        ip: row.get("ip")?,
        consensus_port: row.get("consensus_port")?,
        last_reported: chrono::Utc::now(),
    })
}

#[async_trait]
impl HealthBackend for SqliteHealthBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_history(&self, node: &NodeHealth) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO node_health_history
                (hostname, token, first_seen_active, extra_info, command, app_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                node.hostname,
                node.token,
                now(),
                node.extra_info,
                node.command,
                node.app_version
            ],
        )?;
        Ok(rows as u64)
    }

    async fn update_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            UPDATE node_health SET
                last_seen_active = ?1,
                extra_info = CASE WHEN ?2 != '' THEN ?2 ELSE extra_info END,
                app_version = ?3,
                incrementing_indicator = incrementing_indicator + 1
            WHERE hostname = ?4 AND token = ?5
            "#,
            params![
                now() - reported_secs_ago,
                node.extra_info,
                node.app_version,
                node.hostname,
                node.token
            ],
        )?;
        Ok(rows as u64)
    }

    async fn insert_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64> {
        let seen = now() - reported_secs_ago;
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO node_health
                (hostname, token, ip, consensus_port, first_seen_active, last_seen_active,
                 extra_info, command, app_version, db_backend)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                node.hostname,
                node.token,
                node.ip,
                node.consensus_port,
                seen,
                node.extra_info,
                node.command,
                node.app_version,
                node.db_backend
            ],
        )?;
        Ok(rows as u64)
    }

    async fn expire_health(&self, older_than_secs: u64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM node_health WHERE last_seen_active < ?1",
            params![now() - older_than_secs as i64],
        )?;
        Ok(rows as u64)
    }

    async fn expire_history(&self, hours: u64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM node_health_history WHERE first_seen_active < ?1",
            params![now() - (hours as i64) * 3600],
        )?;
        Ok(rows as u64)
    }

    async fn read_available_nodes(&self, within_secs: u64, extra_info: &str) -> Result<Vec<NodeHealth>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT hostname, token, app_version, ip, consensus_port, extra_info, command,
                   db_backend, first_seen_active, last_seen_active
            FROM node_health
            WHERE last_seen_active > ?1
              AND ?2 IN (extra_info, '')
            ORDER BY hostname
            "#,
        )?;

        let nodes = stmt
            .query_map(params![now() - within_secs as i64, extra_info], node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    async fn claim_anchor(&self, identity: &NodeIdentity) -> Result<u64> {
        let ts = now();
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO active_node
                (anchor, hostname, token, first_seen_active, last_seen_active)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![ANCHOR, identity.hostname, identity.token, ts],
        )?;
        Ok(rows as u64)
    }

    async fn takeover_anchor(&self, identity: &NodeIdentity, expire_secs: u64) -> Result<u64> {
        let ts = now();
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            UPDATE active_node SET
                hostname = ?1,
                token = ?2,
                first_seen_active = ?3,
                last_seen_active = ?3
            WHERE anchor = ?4
              AND last_seen_active < ?5
            "#,
            params![identity.hostname, identity.token, ts, ANCHOR, ts - expire_secs as i64],
        )?;
        Ok(rows as u64)
    }

    async fn reaffirm_anchor(&self, identity: &NodeIdentity) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            r#"
            UPDATE active_node SET last_seen_active = ?1
            WHERE anchor = ?2 AND hostname = ?3 AND token = ?4
            "#,
            params![now(), ANCHOR, identity.hostname, identity.token],
        )?;
        Ok(rows as u64)
    }

    async fn read_active_node(&self) -> Result<Option<ActiveNodeRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                r#"
                SELECT hostname, token, first_seen_active, last_seen_active
                FROM active_node WHERE anchor = ?1
                "#,
                params![ANCHOR],
                |row| {
                    Ok(ActiveNodeRecord {
                        anchor: ANCHOR,
                        hostname: row.get(0)?,
                        token: row.get(1)?,
                        first_seen_active: from_unix(row.get(2)?),
                        last_seen_active: from_unix(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
impl SqliteHealthBackend {
    /// Move the anchor row's `last_seen_active` back in time
    pub(crate) async fn backdate_anchor(&self, secs: i64) {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE active_node SET last_seen_active = last_seen_active - ?1",
            params![secs],
        )
        .unwrap();
    }

    pub(crate) async fn set_anchor_last_seen(&self, ts: i64) {
        let conn = self.conn.lock().await;
        conn.execute("UPDATE active_node SET last_seen_active = ?1", params![ts])
            .unwrap();
    }

    /// Move every health row's `last_seen_active` back in time
    pub(crate) async fn backdate_health(&self, secs: i64) {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE node_health SET last_seen_active = last_seen_active - ?1",
            params![secs],
        )
        .unwrap();
    }

    pub(crate) async fn history_count(&self, identity: &NodeIdentity) -> i64 {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM node_health_history WHERE hostname = ?1 AND token = ?2",
            params![identity.hostname, identity.token],
            |row| row.get(0),
        )
        .unwrap()
    }

    pub(crate) async fn health_row_count(&self) -> i64 {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT COUNT(*) FROM node_health", [], |row| row.get(0))
            .unwrap()
    }

    pub(crate) async fn liveness_indicator(&self, identity: &NodeIdentity) -> Option<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT incrementing_indicator FROM node_health WHERE hostname = ?1 AND token = ?2",
            params![identity.hostname, identity.token],
            |row| row.get(0),
        )
        .optional()
        .unwrap()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(identity: &NodeIdentity, extra_info: &str) -> NodeHealth {
        let mut node = NodeHealth::new(identity, "sqlite", 10008);
        node.extra_info = extra_info.to_string();
        node
    }

    #[tokio::test]
    async fn test_anchor_ladder() {
        let backend = SqliteHealthBackend::open_in_memory().unwrap();
        let a = NodeIdentity::generate("a");
        let b = NodeIdentity::generate("b");

        assert_eq!(backend.claim_anchor(&a).await.unwrap(), 1);
        assert_eq!(backend.claim_anchor(&b).await.unwrap(), 0);
        assert_eq!(backend.takeover_anchor(&b, 5).await.unwrap(), 0);
        assert_eq!(backend.reaffirm_anchor(&b).await.unwrap(), 0);
        assert_eq!(backend.reaffirm_anchor(&a).await.unwrap(), 1);

        backend.backdate_anchor(10).await;
        assert_eq!(backend.takeover_anchor(&b, 5).await.unwrap(), 1);

        let active = backend.read_active_node().await.unwrap().unwrap();
        assert!(b.matches(&active.hostname, &active.token));
        assert_eq!(active.anchor, ANCHOR);
    }

    #[tokio::test]
    async fn test_update_preserves_extra_info() {
        let backend = SqliteHealthBackend::open_in_memory().unwrap();
        let id = NodeIdentity::generate("a");

        assert_eq!(backend.update_health(&node(&id, "HttpMode"), 0).await.unwrap(), 0);
        assert_eq!(backend.insert_health(&node(&id, "HttpMode"), 0).await.unwrap(), 1);
        assert_eq!(backend.update_health(&node(&id, ""), 0).await.unwrap(), 1);

        let nodes = backend.read_available_nodes(10, "HttpMode").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].extra_info, "HttpMode");
        assert_eq!(nodes[0].consensus_port, 10008);
        assert_eq!(backend.liveness_indicator(&id).await, Some(1));
    }

    #[tokio::test]
    async fn test_available_nodes_filter() {
        let backend = SqliteHealthBackend::open_in_memory().unwrap();
        let http = NodeIdentity::generate("b-http");
        let untagged = NodeIdentity::generate("a-untagged");
        let cli = NodeIdentity::generate("c-cli");

        backend.insert_health(&node(&http, "HttpMode"), 0).await.unwrap();
        backend.insert_health(&node(&untagged, ""), 0).await.unwrap();
        backend.insert_health(&node(&cli, "CliMode"), 0).await.unwrap();

        let hosts: Vec<String> = backend
            .read_available_nodes(10, "HttpMode")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(hosts, vec!["b-http".to_string()]);

        let unfiltered: Vec<String> = backend
            .read_available_nodes(10, "")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(unfiltered, vec!["a-untagged", "b-http", "c-cli"]);
    }

    #[tokio::test]
    async fn test_takeover_at_expiry_boundary() {
        let backend = SqliteHealthBackend::open_in_memory().unwrap();
        let holder = NodeIdentity::generate("holder");
        let rival = NodeIdentity::generate("rival");
        assert_eq!(backend.claim_anchor(&holder).await.unwrap(), 1);

        // Seen exactly `expire` seconds ago is still held. Retry when the
        // clock ticks over between the write and the takeover.
        let mut checked = false;
        for _ in 0..5 {
            let ts = now();
            backend.set_anchor_last_seen(ts - 5).await;
            let taken = backend.takeover_anchor(&rival, 5).await.unwrap();
            if now() == ts {
                assert_eq!(taken, 0);
                checked = true;
                break;
            }
        }
        assert!(checked);
        assert_eq!(backend.read_active_node().await.unwrap().unwrap().hostname, "holder");

        backend.set_anchor_last_seen(now() - 6).await;
        assert_eq!(backend.takeover_anchor(&rival, 5).await.unwrap(), 1);
        assert_eq!(backend.read_active_node().await.unwrap().unwrap().hostname, "rival");
    }

    #[tokio::test]
    async fn test_expiry() {
        let backend = SqliteHealthBackend::open_in_memory().unwrap();
        let fresh = NodeIdentity::generate("fresh");
        let stale = NodeIdentity::generate("stale");

        backend.insert_health(&node(&stale, ""), 60).await.unwrap();
        backend.insert_health(&node(&fresh, ""), 0).await.unwrap();
        assert_eq!(backend.expire_health(5).await.unwrap(), 1);
        assert_eq!(backend.health_row_count().await, 1);

        backend.insert_history(&node(&fresh, "")).await.unwrap();
        assert_eq!(backend.expire_history(1).await.unwrap(), 0);
        assert_eq!(backend.history_count(&fresh).await, 1);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keeper.db");
        SqliteHealthBackend::open(&path).unwrap();
        assert!(path.exists());

        // Reopening keeps the schema
        SqliteHealthBackend::open(&path).unwrap();
    }
}
