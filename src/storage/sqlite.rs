use crate::models::click_analytics::{assemble_daily, format_date, DailyCounterRow, DailyTotalsRow};
use crate::models::{
    Click, ClickAnalytics, ClickEnrichment, ClickRollup, DailyKey, Dimension, Link, LinkRecord, NewClick,
    Uniqueness,
};
use crate::storage::trait_def::{CLICK_COLUMNS, LINK_COLUMNS};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{Executor, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                owner_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                expires_at INTEGER,
                password_hash TEXT,
                clicks_count INTEGER NOT NULL DEFAULT 0,
                unique_clicks_count INTEGER NOT NULL DEFAULT 0,
                last_clicked_at INTEGER,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner_id ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                referrer TEXT,
                clicked_at INTEGER NOT NULL,
                country TEXT,
                city TEXT,
                region TEXT,
                latitude REAL,
                longitude REAL,
                device_type TEXT,
                device_name TEXT,
                browser TEXT,
                browser_version TEXT,
                platform TEXT,
                platform_version TEXT,
                is_mobile BOOLEAN,
                is_tablet BOOLEAN,
                is_desktop BOOLEAN,
                is_bot BOOLEAN,
                referrer_source TEXT,
                utm_parameters TEXT,
                enriched_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_link_clicked_at ON clicks(link_id, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_link_ip ON clicks(link_id, ip_address, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                total_clicks INTEGER NOT NULL DEFAULT 0,
                unique_clicks INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (link_id, date)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_analytics_counters (
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                dimension TEXT NOT NULL,
                bucket TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (link_id, date, dimension, bucket)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_link(&self, link: &LinkRecord, created_at: i64) -> StorageResult<Link> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (short_code, original_url, owner_id, is_active, expires_at, password_hash, created_at)
            VALUES (?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(&link.short_code)
        .bind(&link.original_url)
        .bind(&link.owner_id)
        .bind(link.expires_at)
        .bind(&link.password_hash)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let query = format!("SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?");
        let created = sqlx::query_as::<_, Link>(&query)
            .bind(&link.short_code)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        Ok(created)
    }

    async fn short_code_exists(&self, short_code: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE short_code = ?")
            .bind(short_code)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count > 0)
    }

    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        let query =
            format!("SELECT {LINK_COLUMNS} FROM links WHERE short_code = ? AND deleted_at IS NULL");
        let link = sqlx::query_as::<_, Link>(&query)
            .bind(short_code)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(link)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let query = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?");
        let link = sqlx::query_as::<_, Link>(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(link)
    }

    async fn set_link_active(&self, short_code: &str, is_active: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE links
            SET is_active = ?
            WHERE short_code = ? AND deleted_at IS NULL
            "#,
        )
        .bind(is_active)
        .bind(short_code)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_link(&self, short_code: &str, deleted_at: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE links
            SET deleted_at = ?
            WHERE short_code = ? AND deleted_at IS NULL
            "#,
        )
        .bind(deleted_at)
        .bind(short_code)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_link_counters(&self, link_id: i64, unique: bool, clicked_at: i64) -> Result<()> {
        bump_link_counters(self.pool.as_ref(), link_id, unique, clicked_at).await
    }

    async fn insert_click(&self, click: &NewClick) -> Result<Click> {
        let result = sqlx::query(
            r#"
            INSERT INTO clicks (link_id, ip_address, user_agent, referrer, clicked_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(click.link_id)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referrer)
        .bind(click.clicked_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(super::raw_click(result.last_insert_rowid(), click))
    }

    async fn insert_click_if_accessible(&self, click: &NewClick) -> Result<Option<Click>> {
        let result = sqlx::query(
            r#"
            INSERT INTO clicks (link_id, ip_address, user_agent, referrer, clicked_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM links
                WHERE id = ? AND is_active = 1 AND deleted_at IS NULL
                  AND (expires_at IS NULL OR expires_at > ?)
            )
            "#,
        )
        .bind(click.link_id)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referrer)
        .bind(click.clicked_at)
        .bind(click.link_id)
        .bind(click.clicked_at)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(super::raw_click(result.last_insert_rowid(), click)))
    }

    async fn get_click(&self, id: i64) -> Result<Option<Click>> {
        let query = format!("SELECT {CLICK_COLUMNS} FROM clicks WHERE id = ?");
        let click = sqlx::query_as::<_, Click>(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(click)
    }

    async fn apply_enrichment(
        &self,
        click_id: i64,
        enrichment: &ClickEnrichment,
        enriched_at: i64,
    ) -> Result<bool> {
        enrich_click(self.pool.as_ref(), click_id, enrichment, enriched_at).await
    }

    async fn record_enriched_click(
        &self,
        click: &Click,
        enrichment: &ClickEnrichment,
        rollup: &ClickRollup,
        now: i64,
    ) -> Result<Option<Uniqueness>> {
        let mut tx = self.pool.begin().await?;

        // The guarded update goes first so the transaction takes the write
        // lock before any read
        if !enrich_click(&mut *tx, click.id, enrichment, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let sliding = !earlier_click_exists(
            &mut *tx,
            click.link_id,
            &click.ip_address,
            click.id,
            rollup.window_start,
            i64::MAX,
        )
        .await?;
        let (day_start, day_end) = rollup.day_bounds;
        let daily = !earlier_click_exists(
            &mut *tx,
            click.link_id,
            &click.ip_address,
            click.id,
            day_start,
            day_end,
        )
        .await?;

        bump_link_counters(&mut *tx, click.link_id, sliding, now).await?;
        insert_daily(&mut *tx, &rollup.key, now).await?;
        bump_daily_totals(&mut *tx, &rollup.key, daily, now).await?;
        for (dimension, bucket) in &rollup.buckets {
            bump_daily_counter(&mut *tx, &rollup.key, *dimension, bucket).await?;
        }

        tx.commit().await?;
        Ok(Some(Uniqueness { sliding, daily }))
    }

    async fn has_earlier_click(
        &self,
        link_id: i64,
        ip_address: &str,
        click_id: i64,
        from: i64,
        until: i64,
    ) -> Result<bool> {
        earlier_click_exists(self.pool.as_ref(), link_id, ip_address, click_id, from, until).await
    }

    async fn count_clicks_since(&self, link_id: i64, since: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM clicks WHERE link_id = ? AND clicked_at >= ?",
        )
        .bind(link_id)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn count_distinct_ips_since(&self, link_id: i64, since: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT ip_address) FROM clicks WHERE link_id = ? AND clicked_at >= ?",
        )
        .bind(link_id)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn recent_clicks(&self, link_id: i64, limit: i64) -> Result<Vec<Click>> {
        let query = format!(
            "SELECT {CLICK_COLUMNS} FROM clicks WHERE link_id = ? ORDER BY clicked_at DESC, id DESC LIMIT ?"
        );
        let clicks = sqlx::query_as::<_, Click>(&query)
            .bind(link_id)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(clicks)
    }

    async fn pending_click_times(&self, link_id: i64, from: i64, until: i64) -> Result<Vec<i64>> {
        let times = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT clicked_at FROM clicks
            WHERE link_id = ? AND enriched_at IS NULL
              AND clicked_at >= ? AND clicked_at < ?
            "#,
        )
        .bind(link_id)
        .bind(from)
        .bind(until)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(times)
    }

    async fn enriched_clicks_between(&self, link_id: i64, from: i64, until: i64) -> Result<Vec<Click>> {
        let query = format!(
            "SELECT {CLICK_COLUMNS} FROM clicks \
             WHERE link_id = ? AND enriched_at IS NOT NULL AND clicked_at >= ? AND clicked_at < ? \
             ORDER BY id"
        );
        let clicks = sqlx::query_as::<_, Click>(&query)
            .bind(link_id)
            .bind(from)
            .bind(until)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(clicks)
    }

    async fn ensure_daily(&self, key: &DailyKey, now: i64) -> Result<()> {
        insert_daily(self.pool.as_ref(), key, now).await
    }

    async fn increment_daily_totals(&self, key: &DailyKey, unique: bool, now: i64) -> Result<()> {
        bump_daily_totals(self.pool.as_ref(), key, unique, now).await
    }

    async fn increment_daily_counter(&self, key: &DailyKey, dimension: Dimension, bucket: &str) -> Result<()> {
        bump_daily_counter(self.pool.as_ref(), key, dimension, bucket).await
    }

    async fn daily_analytics(&self, link_id: i64, start: NaiveDate, end: NaiveDate) -> Result<Vec<ClickAnalytics>> {
        let start = format_date(start);
        let end = format_date(end);

        let totals = sqlx::query_as::<_, DailyTotalsRow>(
            r#"
            SELECT link_id, date, total_clicks, unique_clicks
            FROM click_analytics
            WHERE link_id = ? AND date >= ? AND date <= ?
            ORDER BY date
            "#,
        )
        .bind(link_id)
        .bind(&start)
        .bind(&end)
        .fetch_all(self.pool.as_ref())
        .await?;

        let counters = sqlx::query_as::<_, DailyCounterRow>(
            r#"
            SELECT date, dimension, bucket, clicks
            FROM click_analytics_counters
            WHERE link_id = ? AND date >= ? AND date <= ?
            "#,
        )
        .bind(link_id)
        .bind(&start)
        .bind(&end)
        .fetch_all(self.pool.as_ref())
        .await?;

        assemble_daily(totals, counters)
    }

    async fn delete_daily(&self, key: &DailyKey) -> Result<()> {
        sqlx::query("DELETE FROM click_analytics_counters WHERE link_id = ? AND date = ?")
            .bind(key.link_id)
            .bind(key.date_str())
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("DELETE FROM click_analytics WHERE link_id = ? AND date = ?")
            .bind(key.link_id)
            .bind(key.date_str())
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }
}

async fn enrich_click<'c, E>(
    executor: E,
    click_id: i64,
    enrichment: &ClickEnrichment,
    enriched_at: i64,
) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE clicks
        SET country = ?, city = ?, region = ?, latitude = ?, longitude = ?,
            device_type = ?, device_name = ?, browser = ?, browser_version = ?,
            platform = ?, platform_version = ?,
            is_mobile = ?, is_tablet = ?, is_desktop = ?, is_bot = ?,
            referrer_source = ?, utm_parameters = ?, enriched_at = ?
        WHERE id = ? AND enriched_at IS NULL
        "#,
    )
    .bind(&enrichment.country)
    .bind(&enrichment.city)
    .bind(&enrichment.region)
    .bind(enrichment.latitude)
    .bind(enrichment.longitude)
    .bind(&enrichment.device_type)
    .bind(&enrichment.device_name)
    .bind(&enrichment.browser)
    .bind(&enrichment.browser_version)
    .bind(&enrichment.platform)
    .bind(&enrichment.platform_version)
    .bind(enrichment.is_mobile)
    .bind(enrichment.is_tablet)
    .bind(enrichment.is_desktop)
    .bind(enrichment.is_bot)
    .bind(&enrichment.referrer_source)
    .bind(enrichment.utm_parameters.as_ref().map(Json))
    .bind(enriched_at)
    .bind(click_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn earlier_click_exists<'c, E>(
    executor: E,
    link_id: i64,
    ip_address: &str,
    click_id: i64,
    from: i64,
    until: i64,
) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM clicks
        WHERE link_id = ? AND ip_address = ? AND id < ?
          AND clicked_at >= ? AND clicked_at < ?
        "#,
    )
    .bind(link_id)
    .bind(ip_address)
    .bind(click_id)
    .bind(from)
    .bind(until)
    .fetch_one(executor)
    .await?;

    Ok(count > 0)
}

async fn bump_link_counters<'c, E>(
    executor: E,
    link_id: i64,
    unique: bool,
    clicked_at: i64,
) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE links
        SET clicks_count = clicks_count + 1,
            unique_clicks_count = unique_clicks_count + ?,
            last_clicked_at = ?
        WHERE id = ?
        "#,
    )
    .bind(i64::from(unique))
    .bind(clicked_at)
    .bind(link_id)
    .execute(executor)
    .await?;

    Ok(())
}

async fn insert_daily<'c, E>(executor: E, key: &DailyKey, now: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO click_analytics (link_id, date, total_clicks, unique_clicks, created_at, updated_at)
        VALUES (?, ?, 0, 0, ?, ?)
        ON CONFLICT (link_id, date) DO NOTHING
        "#,
    )
    .bind(key.link_id)
    .bind(key.date_str())
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

async fn bump_daily_totals<'c, E>(executor: E, key: &DailyKey, unique: bool, now: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE click_analytics
        SET total_clicks = total_clicks + 1,
            unique_clicks = unique_clicks + ?,
            updated_at = ?
        WHERE link_id = ? AND date = ?
        "#,
    )
    .bind(i64::from(unique))
    .bind(now)
    .bind(key.link_id)
    .bind(key.date_str())
    .execute(executor)
    .await?;

    Ok(())
}

async fn bump_daily_counter<'c, E>(
    executor: E,
    key: &DailyKey,
    dimension: Dimension,
    bucket: &str,
) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO click_analytics_counters (link_id, date, dimension, bucket, clicks)
        VALUES (?, ?, ?, ?, 1)
        ON CONFLICT (link_id, date, dimension, bucket) DO UPDATE SET
            clicks = click_analytics_counters.clicks + 1
        "#,
    )
    .bind(key.link_id)
    .bind(key.date_str())
    .bind(dimension.as_str())
    .bind(bucket)
    .execute(executor)
    .await?;

    Ok(())
}
