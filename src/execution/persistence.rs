use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use crate::market::{CreationRequest, Market};

pub struct MarketDatabase {
    conn: Connection,
}

impl MarketDatabase {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                check_rate REAL NOT NULL,
                last_checked TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS pending (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                priority REAL NOT NULL,
                cost INTEGER NOT NULL DEFAULT 0,
                request TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_priority ON pending(priority);
            "#,
        )?;

        Ok(Self { conn })
    }

    /// Insert a managed market, returning its row id
    pub fn insert_market(&self, market: &Market) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO markets (market, check_rate, last_checked) VALUES (?1, ?2, ?3)",
            params![
                serde_json::to_string(market)?,
                market.check_rate(),
                market.last_checked().map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Rewrite a market after a check cycle
    pub fn update_market(&self, id: i64, market: &Market) -> Result<()> {
        self.conn.execute(
            "UPDATE markets SET market = ?1, check_rate = ?2, last_checked = ?3 WHERE id = ?4",
            params![
                serde_json::to_string(market)?,
                market.check_rate(),
                market.last_checked().map(|t| t.to_rfc3339()),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn remove_market(&self, id: i64) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM markets WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn get_market(&self, id: i64) -> Result<Option<Market>> {
        let text: Option<String> = self
            .conn
            .query_row("SELECT market FROM markets WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        match text {
            Some(text) => {
                let market = serde_json::from_str(&text)
                    .with_context(|| format!("Corrupt market row {}", id))?;
                Ok(Some(market))
            }
            None => Ok(None),
        }
    }

    /// All managed markets in insertion order. Rows that no longer parse are
    /// reported and skipped.
    pub fn load_markets(&self) -> Result<Vec<(i64, Market)>> {
        let mut stmt = self.conn.prepare("SELECT id, market FROM markets ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut markets = Vec::new();
        for row in rows {
            let (id, text) = row?;
            match serde_json::from_str::<Market>(&text) {
                Ok(market) => markets.push((id, market)),
                Err(e) => warn!("Skipping unreadable market row {}: {}", id, e),
            }
        }
        Ok(markets)
    }

    pub fn count_markets(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM markets", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Last check time as stored, without parsing the market blob
    pub fn last_checked(&self, id: i64) -> Result<Option<DateTime<Utc>>> {
        let text: Option<String> = self.conn.query_row(
            "SELECT last_checked FROM markets WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(text
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    pub fn queue_request(&self, request: &CreationRequest, priority: f64, cost: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO pending (priority, cost, request) VALUES (?1, ?2, ?3)",
            params![priority, cost, serde_json::to_string(request)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Pending requests, highest priority first
    pub fn pending_requests(&self) -> Result<Vec<(i64, f64, i64, CreationRequest)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, priority, cost, request FROM pending ORDER BY priority DESC, id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut requests = Vec::new();
        for row in rows {
            let (id, priority, cost, text) = row?;
            match serde_json::from_str::<CreationRequest>(&text) {
                Ok(request) => requests.push((id, priority, cost, request)),
                Err(e) => warn!("Skipping unreadable pending row {}: {}", id, e),
            }
        }
        Ok(requests)
    }

    pub fn remove_pending(&self, id: i64) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM pending WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn count_pending(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM pending", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Report what the store holds at startup
pub fn startup_report(db: &MarketDatabase) -> Result<()> {
    let markets = db.load_markets()?;
    info!("Managing {} markets", markets.len());
    for (id, market) in &markets {
        info!(
            "Market {}: {} (check every {}h, last checked {})",
            id,
            market.market().question,
            market.check_rate(),
            market
                .last_checked()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
    }
    info!("Pending creation requests: {}", db.count_pending()?);
    Ok(())
}
