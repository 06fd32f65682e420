// ==========================================
// Residency Scheduler - Block repository
// ==========================================

use crate::domain::block::Block;
use crate::domain::types::TimeOfDay;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_date, get_date, get_enum};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct BlockRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BlockRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// Generate AM/PM blocks for every date in [start, end] (academic year).
    ///
    /// Existing (date, time_of_day) rows are kept untouched.
    ///
    /// # Returns
    /// Number of blocks created
    pub fn generate_calendar(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<usize> {
        if end < start {
            return Err(RepositoryError::ValidationError(format!(
                "calendar end {} before start {}",
                end, start
            )));
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut created = 0;
        for date in start.iter_days().take_while(|d| *d <= end) {
            for tod in [TimeOfDay::AM, TimeOfDay::PM] {
                created += tx.execute(
                    "INSERT OR IGNORE INTO block (block_id, block_date, time_of_day) VALUES (?, ?, ?)",
                    params![
                        format!("{}-{}", fmt_date(date), tod.to_db_str()),
                        fmt_date(date),
                        tod.to_db_str()
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    pub fn insert(&self, block: &Block) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO block (block_id, block_date, time_of_day) VALUES (?, ?, ?)",
            params![&block.block_id, fmt_date(block.date), block.time_of_day.to_db_str()],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, block_id: &str) -> RepositoryResult<Option<Block>> {
        let conn = self.get_conn()?;
        match conn.query_row(
            "SELECT block_id, block_date, time_of_day FROM block WHERE block_id = ?",
            params![block_id],
            Self::map_row,
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocks in [start, end], chronological (AM before PM).
    pub fn list_in_range(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Block>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT block_id, block_date, time_of_day FROM block
               WHERE block_date >= ? AND block_date <= ?
               ORDER BY block_date, time_of_day"#,
        )?;
        let blocks = stmt
            .query_map(params![fmt_date(start), fmt_date(end)], Self::map_row)?
            .collect::<Result<Vec<Block>, _>>()?;
        Ok(blocks)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Block> {
        Ok(Block {
            block_id: row.get(0)?,
            date: get_date(row, 1)?,
            time_of_day: get_enum(row, 2, TimeOfDay::from_str)?,
        })
    }
}
