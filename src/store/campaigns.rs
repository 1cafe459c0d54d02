//! Campaign and daily-metric upserts.
//!
//! Campaigns are unique by (external_id, platform); metric rows by
//! (campaign_external_id, platform, date). Re-running a sync against
//! unchanged upstream data overwrites in place, so row counts and values
//! stay identical. Nothing here deletes.

use crate::error::SyncError;
use crate::providers::{Campaign, MetricRecord, Provider};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct CampaignStore {
    conn: Mutex<Connection>,
}

impl CampaignStore {
    /// Opens (or creates) the campaign and metric tables at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, SyncError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY,
                external_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                campaign_type TEXT,
                start_date TEXT,
                end_date TEXT,
                daily_budget REAL,
                lifetime_budget REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(external_id, platform)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS campaign_metrics (
                id INTEGER PRIMARY KEY,
                campaign_external_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                date TEXT NOT NULL,
                impressions INTEGER NOT NULL,
                clicks INTEGER NOT NULL,
                spend REAL NOT NULL,
                conversions REAL NOT NULL,
                ctr REAL NOT NULL,
                cpc REAL NOT NULL,
                cpm REAL NOT NULL,
                reach INTEGER NOT NULL,
                frequency REAL NOT NULL,
                cost_per_conversion REAL NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(campaign_external_id, platform, date)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_campaign_date
             ON campaign_metrics(campaign_external_id, platform, date)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Upserts one campaign keyed by (external_id, platform).
    pub fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO campaigns (
                external_id, platform, user_id, account_id, name, status,
                campaign_type, start_date, end_date, daily_budget,
                lifetime_budget, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            ON CONFLICT(external_id, platform) DO UPDATE SET
                user_id = excluded.user_id,
                account_id = excluded.account_id,
                name = excluded.name,
                status = excluded.status,
                campaign_type = excluded.campaign_type,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                daily_budget = excluded.daily_budget,
                lifetime_budget = excluded.lifetime_budget,
                updated_at = excluded.updated_at
            "#,
            params![
                campaign.external_id,
                campaign.platform.as_str(),
                campaign.user_id,
                campaign.account_id,
                campaign.name,
                campaign.status,
                campaign.campaign_type,
                campaign.start_date.map(|d| d.to_string()),
                campaign.end_date.map(|d| d.to_string()),
                campaign.daily_budget,
                campaign.lifetime_budget,
                now,
            ],
        )?;
        Ok(())
    }

    /// Upserts one daily metric row keyed by (campaign, platform, date).
    pub fn upsert_metric(&self, metric: &MetricRecord) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO campaign_metrics (
                campaign_external_id, platform, date, impressions, clicks,
                spend, conversions, ctr, cpc, cpm, reach, frequency,
                cost_per_conversion, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(campaign_external_id, platform, date) DO UPDATE SET
                impressions = excluded.impressions,
                clicks = excluded.clicks,
                spend = excluded.spend,
                conversions = excluded.conversions,
                ctr = excluded.ctr,
                cpc = excluded.cpc,
                cpm = excluded.cpm,
                reach = excluded.reach,
                frequency = excluded.frequency,
                cost_per_conversion = excluded.cost_per_conversion,
                updated_at = excluded.updated_at
            "#,
            params![
                metric.campaign_external_id,
                metric.platform.as_str(),
                metric.date.to_string(),
                metric.impressions,
                metric.clicks,
                metric.spend,
                metric.conversions,
                metric.ctr,
                metric.cpc,
                metric.cpm,
                metric.reach,
                metric.frequency,
                metric.cost_per_conversion(),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn campaign_count(&self) -> Result<i64, SyncError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM campaigns", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn metric_count(&self) -> Result<i64, SyncError> {
        let conn = self.conn.lock().unwrap();
        let count =
            conn.query_row("SELECT COUNT(*) FROM campaign_metrics", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Looks up the stored name/status of one campaign.
    pub fn get_campaign_summary(
        &self,
        external_id: &str,
        platform: Provider,
    ) -> Result<Option<(String, String)>, SyncError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT name, status FROM campaigns WHERE external_id = ?1 AND platform = ?2",
                params![external_id, platform.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Looks up (spend, impressions) for one stored metric day.
    pub fn get_metric_day(
        &self,
        external_id: &str,
        platform: Provider,
        date: NaiveDate,
    ) -> Result<Option<(f64, i64)>, SyncError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT spend, impressions FROM campaign_metrics
                WHERE campaign_external_id = ?1 AND platform = ?2 AND date = ?3
                "#,
                params![external_id, platform.as_str(), date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CampaignStore {
        CampaignStore::new(":memory:").unwrap()
    }

    fn campaign(external_id: &str) -> Campaign {
        Campaign {
            external_id: external_id.to_string(),
            platform: Provider::Meta,
            user_id: "u1".to_string(),
            account_id: "act_1".to_string(),
            name: "Spring Launch".to_string(),
            status: "ACTIVE".to_string(),
            campaign_type: Some("CONVERSIONS".to_string()),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            end_date: None,
            daily_budget: Some(50.0),
            lifetime_budget: None,
        }
    }

    fn metric(external_id: &str, date: NaiveDate, spend: f64) -> MetricRecord {
        MetricRecord {
            campaign_external_id: external_id.to_string(),
            platform: Provider::Meta,
            date,
            impressions: 1000,
            clicks: 50,
            spend,
            conversions: 5.0,
            ctr: 5.0,
            cpc: 0.5,
            cpm: 25.0,
            reach: 800,
            frequency: 1.25,
        }
    }

    #[test]
    fn test_campaign_upsert_no_duplicates() {
        let store = store();
        store.upsert_campaign(&campaign("c1")).unwrap();

        let mut renamed = campaign("c1");
        renamed.name = "Spring Launch v2".to_string();
        store.upsert_campaign(&renamed).unwrap();

        assert_eq!(store.campaign_count().unwrap(), 1);
        let (name, _) = store
            .get_campaign_summary("c1", Provider::Meta)
            .unwrap()
            .unwrap();
        assert_eq!(name, "Spring Launch v2");
    }

    #[test]
    fn test_same_external_id_different_platform_is_distinct() {
        let store = store();
        store.upsert_campaign(&campaign("c1")).unwrap();
        let mut google = campaign("c1");
        google.platform = Provider::GoogleAds;
        store.upsert_campaign(&google).unwrap();
        assert_eq!(store.campaign_count().unwrap(), 2);
    }

    #[test]
    fn test_metric_resync_overwrites_not_duplicates() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        store.upsert_metric(&metric("c1", day, 12.5)).unwrap();
        store.upsert_metric(&metric("c1", day, 14.0)).unwrap();

        assert_eq!(store.metric_count().unwrap(), 1);
        let (spend, impressions) = store
            .get_metric_day("c1", Provider::Meta, day)
            .unwrap()
            .unwrap();
        assert_eq!(spend, 14.0);
        assert_eq!(impressions, 1000);
    }

    #[test]
    fn test_cost_per_conversion_stored() {
        let store = store();
        let day = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        let m = metric("c2", day, 10.0);
        assert_eq!(m.cost_per_conversion(), 2.0);
        store.upsert_metric(&m).unwrap();
        assert_eq!(store.metric_count().unwrap(), 1);
    }
}
