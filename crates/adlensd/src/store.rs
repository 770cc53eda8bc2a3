//! SQLite-backed metrics store.
//!
//! Holds everything the pipeline reads: campaign rows, daily metric rows,
//! precomputed summaries, the answer cache, embedding records, and persisted
//! chat messages. Location: /var/lib/adlens/adlens.db (system) or
//! ~/.local/share/adlens/adlens.db (user).
//!
//! The pipeline itself only ever issues reads against the campaign tables;
//! mutation of those tables belongs to the platform CRUD layer and the test
//! helpers below.

use adlens_common::models::ChatMessage;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_VERSION: u32 = 3;

/// Metrics store backed by SQLite
#[derive(Clone)]
pub struct MetricsStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetricsStore {
    /// Open or create the store at the default location
    pub fn open_default() -> Result<Self> {
        let db_path = Self::default_path();
        Self::open(&db_path)
    }

    /// Open or create the store at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the default database path
    pub fn default_path() -> PathBuf {
        let system_path = PathBuf::from("/var/lib/adlens/adlens.db");
        if system_path.parent().map(|p| p.exists()).unwrap_or(false) {
            return system_path;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("adlens")
            .join("adlens.db")
    }

    /// Lock the underlying connection. Callers hold the guard for one
    /// statement or one transaction, never across an await point.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS campaign_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                date TEXT NOT NULL,
                impressions INTEGER NOT NULL DEFAULT 0,
                clicks INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                conversions INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (campaign_id) REFERENCES campaigns(id)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS performance_summaries (
                tenant_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                campaign_name TEXT NOT NULL,
                platform TEXT NOT NULL,
                time_window TEXT NOT NULL,
                total_impressions INTEGER NOT NULL,
                total_clicks INTEGER NOT NULL,
                total_cost REAL NOT NULL,
                total_conversions INTEGER NOT NULL,
                avg_ctr REAL NOT NULL,
                refreshed_at TEXT NOT NULL,
                UNIQUE(tenant_id, campaign_id, time_window)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS answer_cache (
                question_hash TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                normalized_question TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                source_id TEXT NOT NULL,
                vector TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(tenant_id, entity_type, source_id)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                complete INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_campaigns_tenant ON campaigns(tenant_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_tenant_date ON campaign_metrics(tenant_id, date)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_summaries_tenant ON performance_summaries(tenant_id, time_window)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_tenant ON embeddings(tenant_id, entity_type)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_tenant ON chat_messages(tenant_id, created_at)",
            [],
        )?;

        Ok(())
    }

    /// Insert a campaign row
    pub fn insert_campaign(
        &self,
        tenant_id: &str,
        id: &str,
        name: &str,
        platform: &str,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO campaigns (id, tenant_id, name, platform, status, created_at)
             VALUES (?, ?, ?, ?, 'active', ?)",
            params![id, tenant_id, name, platform, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Insert one daily metric row for a campaign
    #[allow(clippy::too_many_arguments)]
    pub fn insert_metric_row(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        platform: &str,
        date: &str,
        impressions: i64,
        clicks: i64,
        cost: f64,
        conversions: i64,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO campaign_metrics
             (tenant_id, campaign_id, platform, date, impressions, clicks, cost, conversions)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tenant_id,
                campaign_id,
                platform,
                date,
                impressions,
                clicks,
                cost,
                conversions
            ],
        )?;
        Ok(())
    }

    /// Persist a chat message
    pub fn insert_message(&self, msg: &ChatMessage) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chat_messages (id, tenant_id, role, content, complete, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                msg.id,
                msg.tenant_id,
                msg.role,
                msg.content,
                msg.complete as i64,
                msg.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Most recent messages for a tenant, oldest first
    pub fn recent_messages(&self, tenant_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, role, content, complete, created_at
             FROM chat_messages WHERE tenant_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )?;

        let mut messages: Vec<ChatMessage> = stmt
            .query_map(params![tenant_id, limit as i64], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    complete: row.get::<_, i64>(4)? != 0,
                    created_at: row
                        .get::<_, String>(5)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        messages.reverse();
        Ok(messages)
    }
}
