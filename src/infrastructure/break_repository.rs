use crate::domain::models::{Break, BreakDuration, Day};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Ordered list of user breaks. New breaks are appended; updates keep their slot.
pub trait BreakRepository: Send + Sync {
    fn list(&self) -> Result<Vec<Break>, InfraError>;
    fn get(&self, id: &str) -> Result<Option<Break>, InfraError>;
    fn upsert(&self, item: &Break) -> Result<(), InfraError>;
    fn remove(&self, id: &str) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteBreakRepository {
    db_path: PathBuf,
}

impl SqliteBreakRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, name, days, time, duration_minutes, reminder, active FROM breaks";

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawBreak> {
    Ok(RawBreak {
        id: row.get(0)?,
        name: row.get(1)?,
        days: row.get(2)?,
        time: row.get(3)?,
        duration_minutes: row.get(4)?,
        reminder: row.get(5)?,
        active: row.get(6)?,
    })
}

struct RawBreak {
    id: String,
    name: String,
    days: String,
    time: String,
    duration_minutes: u32,
    reminder: Option<String>,
    active: bool,
}

impl RawBreak {
    fn into_break(self) -> Result<Break, InfraError> {
        let days: BTreeSet<Day> = serde_json::from_str(&self.days)?;
        let duration = BreakDuration::try_from(self.duration_minutes)
            .map_err(|error| InfraError::InvalidConfig(format!("break {}: {error}", self.id)))?;
        Ok(Break {
            id: self.id,
            name: self.name,
            days,
            time: self.time,
            duration,
            reminder: self.reminder,
            active: self.active,
        })
    }
}

impl BreakRepository for SqliteBreakRepository {
    fn list(&self) -> Result<Vec<Break>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!("{SELECT_COLUMNS} ORDER BY position ASC"))?;
        let rows = statement
            .query_map([], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawBreak::into_break).collect()
    }

    fn get(&self, id: &str) -> Result<Option<Break>, InfraError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], row_to_raw)
            .optional()?;
        raw.map(RawBreak::into_break).transpose()
    }

    fn upsert(&self, item: &Break) -> Result<(), InfraError> {
        item.validate().map_err(InfraError::InvalidConfig)?;
        let days = serde_json::to_string(&item.days)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO breaks (id, position, name, days, time, duration_minutes, reminder, active)
             VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM breaks), ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               days = excluded.days,
               time = excluded.time,
               duration_minutes = excluded.duration_minutes,
               reminder = excluded.reminder,
               active = excluded.active",
            params![
                item.id,
                item.name,
                days,
                item.time,
                item.duration.minutes(),
                item.reminder,
                item.active
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM breaks WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBreakRepository {
    breaks: Mutex<Vec<Break>>,
}

impl InMemoryBreakRepository {
    pub fn with_breaks(breaks: Vec<Break>) -> Self {
        Self {
            breaks: Mutex::new(breaks),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Break>>, InfraError> {
        self.breaks
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("break list lock poisoned: {error}")))
    }
}

impl BreakRepository for InMemoryBreakRepository {
    fn list(&self) -> Result<Vec<Break>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Break>, InfraError> {
        Ok(self.lock()?.iter().find(|item| item.id == id).cloned())
    }

    fn upsert(&self, item: &Break) -> Result<(), InfraError> {
        item.validate().map_err(InfraError::InvalidConfig)?;
        let mut breaks = self.lock()?;
        match breaks.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => breaks.push(item.clone()),
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, InfraError> {
        let mut breaks = self.lock()?;
        let before = breaks.len();
        breaks.retain(|item| item.id != id);
        Ok(breaks.len() != before)
    }
}
