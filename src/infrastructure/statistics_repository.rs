use crate::domain::models::Statistics;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait StatisticsRepository: Send + Sync {
    fn load(&self) -> Result<Statistics, InfraError>;
    fn save(&self, statistics: &Statistics) -> Result<(), InfraError>;

    fn update(&self, change: &dyn Fn(&mut Statistics)) -> Result<Statistics, InfraError> {
        let mut statistics = self.load()?;
        change(&mut statistics);
        self.save(&statistics)?;
        Ok(statistics)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStatisticsRepository {
    db_path: PathBuf,
}

impl SqliteStatisticsRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl StatisticsRepository for SqliteStatisticsRepository {
    fn load(&self) -> Result<Statistics, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let totals: Option<(i64, i64, i64)> = connection
            .query_row(
                "SELECT completed_breaks, skipped_breaks, total_active_seconds FROM statistics WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let mut statistics = Statistics::default();
        if let Some((completed, skipped, active_seconds)) = totals {
            statistics.completed_breaks = from_sql_count(completed);
            statistics.skipped_breaks = from_sql_count(skipped);
            statistics.total_active_seconds = from_sql_count(active_seconds);
        }

        let mut statement = connection.prepare(
            "SELECT name, completion_count, media_url, total_seconds FROM exercise_statistics",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (name, count, media_url, seconds) = row?;
            statistics
                .count_by_exercise
                .insert(name.clone(), from_sql_count(count));
            statistics.media_by_exercise.insert(name.clone(), media_url);
            statistics
                .seconds_by_exercise
                .insert(name, from_sql_count(seconds));
        }
        Ok(statistics)
    }

    fn save(&self, statistics: &Statistics) -> Result<(), InfraError> {
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "INSERT INTO statistics (id, completed_breaks, skipped_breaks, total_active_seconds)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
               completed_breaks = excluded.completed_breaks,
               skipped_breaks = excluded.skipped_breaks,
               total_active_seconds = excluded.total_active_seconds",
            params![
                to_sql_count(statistics.completed_breaks),
                to_sql_count(statistics.skipped_breaks),
                to_sql_count(statistics.total_active_seconds)
            ],
        )?;
        for (name, count) in &statistics.count_by_exercise {
            let media_url = statistics
                .media_by_exercise
                .get(name)
                .cloned()
                .unwrap_or_default();
            let seconds = statistics.seconds_by_exercise.get(name).copied().unwrap_or(0);
            transaction.execute(
                "INSERT INTO exercise_statistics (name, completion_count, media_url, total_seconds)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   completion_count = excluded.completion_count,
                   media_url = excluded.media_url,
                   total_seconds = excluded.total_seconds",
                params![name, to_sql_count(*count), media_url, to_sql_count(seconds)],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatisticsRepository {
    statistics: Mutex<Statistics>,
}

impl StatisticsRepository for InMemoryStatisticsRepository {
    fn load(&self) -> Result<Statistics, InfraError> {
        let statistics = self
            .statistics
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("statistics lock poisoned: {error}")))?;
        Ok(statistics.clone())
    }

    fn save(&self, statistics: &Statistics) -> Result<(), InfraError> {
        let mut guard = self
            .statistics
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("statistics lock poisoned: {error}")))?;
        *guard = statistics.clone();
        Ok(())
    }
}
