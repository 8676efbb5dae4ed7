//! MySQL Health Backend
//!
//! Production store shared by every node. Timestamps are compared on the
//! server (`NOW()`), so node clocks only matter for the staleness check.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};

use super::backend::{HealthBackend, ANCHOR};
use super::node::{from_unix, ActiveNodeRecord, NodeHealth, NodeIdentity};
use crate::config::DatabaseConfig;
use crate::error::Result;

/// DDL for the tables this crate reads and writes
pub const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS node_health (
  hostname varchar(128) CHARACTER SET ascii NOT NULL,
  token varchar(128) NOT NULL,
  ip char(50) NOT NULL,
  consensus_port int(11) NOT NULL,
  last_seen_active timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP,
  extra_info varchar(128) CHARACTER SET utf8 NOT NULL,
  command varchar(128) CHARACTER SET utf8 NOT NULL,
  app_version varchar(64) NOT NULL DEFAULT '',
  first_seen_active timestamp NOT NULL DEFAULT '1971-01-01 00:00:00',
  db_backend varchar(255) NOT NULL DEFAULT '',
  incrementing_indicator bigint(20) NOT NULL DEFAULT '0',
  PRIMARY KEY (hostname, token),
  KEY last_seen_active_idx (last_seen_active)
) ENGINE=InnoDB DEFAULT CHARSET=ascii"#,
    r#"CREATE TABLE IF NOT EXISTS node_health_history (
  history_id bigint unsigned NOT NULL AUTO_INCREMENT,
  hostname varchar(128) CHARACTER SET ascii NOT NULL,
  token varchar(128) NOT NULL,
  first_seen_active timestamp NOT NULL,
  extra_info varchar(128) CHARACTER SET utf8 NOT NULL,
  command varchar(128) CHARACTER SET utf8 NOT NULL,
  app_version varchar(64) NOT NULL DEFAULT '',
  PRIMARY KEY (history_id),
  UNIQUE KEY hostname_token_idx_node_health_history (hostname, token),
  KEY first_seen_active_idx_node_health_history (first_seen_active)
) ENGINE=InnoDB DEFAULT CHARSET=ascii"#,
    r#"CREATE TABLE IF NOT EXISTS active_node (
  anchor tinyint(3) unsigned NOT NULL,
  hostname varchar(128) NOT NULL,
  token varchar(128) NOT NULL,
  last_seen_active timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP,
  first_seen_active timestamp NOT NULL DEFAULT '1971-01-01 00:00:00',
  PRIMARY KEY (anchor)
) ENGINE=InnoDB DEFAULT CHARSET=ascii"#,
];

/// Health backend on a MySQL / MariaDB connection pool
pub struct MySqlHealthBackend {
    pool: MySqlPool,
}

impl MySqlHealthBackend {
    /// Connect a pool using the database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url())
            .await?;

        tracing::info!("Connected to health store {}:{}/{}", config.host, config.port, config.database);
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist
    pub async fn create_schema(&self) -> Result<()> {
        for stmt in MYSQL_SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn node_from_row(row: &MySqlRow) -> Result<NodeHealth> {
    Ok(NodeHealth {
        hostname: row.try_get("hostname")?,
        token: row.try_get("token")?,
        app_version: row.try_get("app_version")?,
        first_seen_active: from_unix(row.try_get("first_seen_active")?),
        last_seen_active: from_unix(row.try_get("last_seen_active")?),
        extra_info: row.try_get("extra_info")?,
        command: row.try_get("command")?,
        db_backend: row.try_get("db_backend")?,
        ip: row.try_get("ip")?,
        consensus_port: row.try_get::<i32, _>("consensus_port")?.clamp(0, u16::MAX as i32) as u16,
        last_reported: chrono::Utc::now(),
    })
}

#[async_trait]
impl HealthBackend for MySqlHealthBackend {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn insert_history(&self, node: &NodeHealth) -> Result<u64> {
        let result = sqlx::query(
            r#"insert ignore into node_health_history
                (hostname, token, first_seen_active, extra_info, command, app_version)
            values
                (?, ?, NOW(), ?, ?, ?)"#,
        )
        .bind(&node.hostname)
        .bind(&node.token)
        .bind(&node.extra_info)
        .bind(&node.command)
        .bind(&node.app_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"update node_health set
                last_seen_active = NOW() - interval ? second,
                extra_info = case when ? != '' then ? else extra_info end,
                app_version = ?,
                incrementing_indicator = incrementing_indicator + 1
            where
                hostname = ?
                and token = ?"#,
        )
        .bind(reported_secs_ago)
        .bind(&node.extra_info)
        .bind(&node.extra_info)
        .bind(&node.app_version)
        .bind(&node.hostname)
        .bind(&node.token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_health(&self, node: &NodeHealth, reported_secs_ago: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"insert ignore into node_health
                (hostname, token, ip, consensus_port, first_seen_active, last_seen_active,
                 extra_info, command, app_version, db_backend)
            values (
                ?, ?, ?, ?,
                NOW() - interval ? second, NOW() - interval ? second,
                ?, ?, ?, ?)"#,
        )
        .bind(&node.hostname)
        .bind(&node.token)
        .bind(&node.ip)
        .bind(node.consensus_port as i32)
        .bind(reported_secs_ago)
        .bind(reported_secs_ago)
        .bind(&node.extra_info)
        .bind(&node.command)
        .bind(&node.app_version)
        .bind(&node.db_backend)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_health(&self, older_than_secs: u64) -> Result<u64> {
        let result = sqlx::query(
            "delete from node_health where last_seen_active < NOW() - interval ? second",
        )
        .bind(older_than_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_history(&self, hours: u64) -> Result<u64> {
        let result = sqlx::query(
            "delete from node_health_history where first_seen_active < NOW() - interval ? hour",
        )
        .bind(hours)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn read_available_nodes(&self, within_secs: u64, extra_info: &str) -> Result<Vec<NodeHealth>> {
        let rows = sqlx::query(
            r#"select
                hostname, token, app_version, ip, consensus_port, extra_info, command, db_backend,
                CAST(UNIX_TIMESTAMP(first_seen_active) AS SIGNED) AS first_seen_active,
                CAST(UNIX_TIMESTAMP(last_seen_active) AS SIGNED) AS last_seen_active
            from
                node_health
            where
                last_seen_active > NOW() - interval ? second
                and ? in (extra_info, '')
            order by
                hostname"#,
        )
        .bind(within_secs)
        .bind(extra_info)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    async fn claim_anchor(&self, identity: &NodeIdentity) -> Result<u64> {
        let result = sqlx::query(
            r#"insert ignore into active_node
                (anchor, hostname, token, first_seen_active, last_seen_active)
            values
                (?, ?, ?, NOW(), NOW())"#,
        )
        .bind(ANCHOR)
        .bind(&identity.hostname)
        .bind(&identity.token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn takeover_anchor(&self, identity: &NodeIdentity, expire_secs: u64) -> Result<u64> {
        let result = sqlx::query(
            r#"update active_node set
                hostname = ?,
                token = ?,
                first_seen_active = NOW(),
                last_seen_active = NOW()
            where
                anchor = ?
                and last_seen_active < (NOW() - interval ? second)"#,
        )
        .bind(&identity.hostname)
        .bind(&identity.token)
        .bind(ANCHOR)
        .bind(expire_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reaffirm_anchor(&self, identity: &NodeIdentity) -> Result<u64> {
        let result = sqlx::query(
            r#"update active_node set
                last_seen_active = NOW()
            where
                anchor = ?
                and hostname = ?
                and token = ?"#,
        )
        .bind(ANCHOR)
        .bind(&identity.hostname)
        .bind(&identity.token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn read_active_node(&self) -> Result<Option<ActiveNodeRecord>> {
        let row = sqlx::query(
            r#"select
                hostname, token,
                CAST(UNIX_TIMESTAMP(first_seen_active) AS SIGNED) AS first_seen_active,
                CAST(UNIX_TIMESTAMP(last_seen_active) AS SIGNED) AS last_seen_active
            from
                active_node
            where
                anchor = ?"#,
        )
        .bind(ANCHOR)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ActiveNodeRecord {
                anchor: ANCHOR,
                hostname: row.try_get("hostname")?,
                token: row.try_get("token")?,
                first_seen_active: from_unix(row.try_get("first_seen_active")?),
                last_seen_active: from_unix(row.try_get("last_seen_active")?),
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_tables() {
        let joined = MYSQL_SCHEMA.join("\n");
        for table in ["node_health", "node_health_history", "active_node"] {
            assert!(joined.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)));
        }
        assert!(joined.contains("UNIQUE KEY hostname_token_idx_node_health_history (hostname, token)"));
        assert!(joined.contains("PRIMARY KEY (anchor)"));
    }

    /// Runs against a live server: `HAKEEPER_TEST_MYSQL_URL=mysql://... cargo test --features integration`
    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_lease_ladder_on_mysql() {
        let Ok(url) = std::env::var("HAKEEPER_TEST_MYSQL_URL") else {
            return;
        };
        let pool = MySqlPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        let backend = MySqlHealthBackend::from_pool(pool);
        backend.create_schema().await.unwrap();
        sqlx::query("delete from active_node").execute(&backend.pool).await.unwrap();

        let first = NodeIdentity::generate("it-1");
        let second = NodeIdentity::generate("it-2");

        assert_eq!(backend.claim_anchor(&first).await.unwrap(), 1);
        assert_eq!(backend.claim_anchor(&second).await.unwrap(), 0);
        assert_eq!(backend.takeover_anchor(&second, 60).await.unwrap(), 0);
        assert_eq!(backend.reaffirm_anchor(&second).await.unwrap(), 0);
        assert_eq!(backend.reaffirm_anchor(&first).await.unwrap(), 1);

        let active = backend.read_active_node().await.unwrap().unwrap();
        assert!(first.matches(&active.hostname, &active.token));
    }
}
