//! Precomputed performance summaries.
//!
//! Aggregates per tenant/campaign/time-window, refreshed out-of-band by a
//! maintenance job. The pipeline only reads; a hit here short-circuits both
//! embedding retrieval and query generation. Refresh is an idempotent full
//! recompute published atomically in one transaction, so readers never see
//! partial rows.

use adlens_common::models::{SummaryRow, TimeWindow};
use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::params;
use tracing::info;

use crate::store::MetricsStore;

/// Days of metric history each window aggregates
fn window_days(window: TimeWindow) -> i64 {
    match window {
        TimeWindow::Daily => 1,
        TimeWindow::Weekly => 7,
        TimeWindow::Monthly => 30,
        TimeWindow::Quarterly => 90,
    }
}

pub struct SummaryStore {
    store: MetricsStore,
}

impl SummaryStore {
    pub fn new(store: MetricsStore) -> Self {
        Self { store }
    }

    /// Fetch summaries for a tenant across the requested windows
    pub fn lookup(&self, tenant_id: &str, windows: &[TimeWindow]) -> Result<Vec<SummaryRow>> {
        let conn = self.store.lock();
        let mut rows = Vec::new();

        for window in windows {
            let mut stmt = conn.prepare(
                "SELECT tenant_id, campaign_id, campaign_name, platform, time_window,
                        total_impressions, total_clicks, total_cost, total_conversions,
                        avg_ctr, refreshed_at
                 FROM performance_summaries
                 WHERE tenant_id = ? AND time_window = ?
                 ORDER BY total_clicks DESC",
            )?;

            let window_rows = stmt.query_map(params![tenant_id, window.to_string()], |row| {
                Ok(SummaryRow {
                    tenant_id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    campaign_name: row.get(2)?,
                    platform: row.get(3)?,
                    window: TimeWindow::parse(&row.get::<_, String>(4)?)
                        .unwrap_or(TimeWindow::Monthly),
                    total_impressions: row.get(5)?,
                    total_clicks: row.get(6)?,
                    total_cost: row.get(7)?,
                    total_conversions: row.get(8)?,
                    avg_ctr: row.get(9)?,
                    refreshed_at: row
                        .get::<_, String>(10)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?;

            for row in window_rows {
                rows.push(row?);
            }
        }

        Ok(rows)
    }

    /// Full recompute for one tenant. Supersedes (not merges) previous rows;
    /// delete and insert run in one transaction so the swap is atomic.
    pub fn refresh_tenant(&self, tenant_id: &str) -> Result<usize> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "DELETE FROM performance_summaries WHERE tenant_id = ?",
            params![tenant_id],
        )?;

        let mut inserted = 0;
        for window in [
            TimeWindow::Daily,
            TimeWindow::Weekly,
            TimeWindow::Monthly,
            TimeWindow::Quarterly,
        ] {
            let cutoff = (now - Duration::days(window_days(window)))
                .format("%Y-%m-%d")
                .to_string();

            inserted += tx.execute(
                "INSERT INTO performance_summaries
                 (tenant_id, campaign_id, campaign_name, platform, time_window,
                  total_impressions, total_clicks, total_cost, total_conversions,
                  avg_ctr, refreshed_at)
                 SELECT m.tenant_id, m.campaign_id, c.name, m.platform, ?,
                        SUM(m.impressions), SUM(m.clicks), SUM(m.cost), SUM(m.conversions),
                        CASE WHEN SUM(m.impressions) > 0
                             THEN CAST(SUM(m.clicks) AS REAL) / SUM(m.impressions)
                             ELSE 0 END,
                        ?
                 FROM campaign_metrics m
                 JOIN campaigns c ON c.id = m.campaign_id
                 WHERE m.tenant_id = ? AND m.date >= ?
                 GROUP BY m.campaign_id, m.platform",
                params![window.to_string(), now.to_rfc3339(), tenant_id, cutoff],
            )?;
        }

        tx.commit()?;
        info!("Refreshed {} summary rows for tenant {}", inserted, tenant_id);
        Ok(inserted)
    }
}
