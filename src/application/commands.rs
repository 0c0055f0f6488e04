use crate::application::bootstrap::bootstrap_workspace;
use crate::application::notifications::{NotificationDispatcher, SyncReport};
use crate::application::session::{SessionCommand, SessionOutcome, SessionRunner, UiEvent};
use crate::domain::models::{format_mm_ss, Break, BreakDuration, Day, Exercise, ExerciseSummary};
use crate::domain::routes::break_path;
use crate::infrastructure::break_repository::{BreakRepository, SqliteBreakRepository};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification_host::{
    ActionOutcome, ActiveNotification, BackgroundHost, HostOptions, NotificationAction,
    NotificationData, NotificationHost, UserActionEvent, WindowClients,
};
use crate::infrastructure::statistics_repository::{
    SqliteStatisticsRepository, StatisticsRepository,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const TOP_EXERCISE_LIMIT: usize = 10;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    catalog: Vec<Exercise>,
    host: Arc<BackgroundHost>,
    breaks: Arc<dyn BreakRepository>,
    statistics: Arc<dyn StatisticsRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_host(workspace_root, |config| {
            Arc::new(BackgroundHost::new(HostOptions::new(config.base_url.clone())))
        })
    }

    /// Builds the state around a host created from the loaded app config.
    pub fn with_host<F>(workspace_root: PathBuf, make_host: F) -> Result<Self, InfraError>
    where
        F: FnOnce(&AppConfig) -> Arc<BackgroundHost>,
    {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = bootstrap.config;

        let host = make_host(&config);
        let shared: Arc<dyn NotificationHost> = host.clone();
        let dispatcher =
            NotificationDispatcher::new(shared, config.notification.clone(), config.timezone);

        Ok(Self {
            config_dir: bootstrap.config_dir,
            breaks: Arc::new(SqliteBreakRepository::new(&bootstrap.database_path)),
            statistics: Arc::new(SqliteStatisticsRepository::new(&bootstrap.database_path)),
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            catalog: bootstrap.catalog,
            host,
            dispatcher: Arc::new(dispatcher),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &[Exercise] {
        &self.catalog
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakInput {
    pub name: String,
    pub days: Vec<String>,
    pub time: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub reminder: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub completed_breaks: u64,
    pub skipped_breaks: u64,
    pub total_active_seconds: u64,
    pub total_active_time: String,
    pub top_exercises: Vec<ExerciseSummary>,
}

fn build_break(id: String, input: BreakInput, current_active: bool) -> Result<Break, InfraError> {
    let days = input
        .days
        .iter()
        .map(|raw| raw.parse::<Day>())
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(InfraError::InvalidConfig)?;
    let duration = BreakDuration::try_from(input.duration_minutes).map_err(InfraError::InvalidConfig)?;
    let reminder = input
        .reminder
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let item = Break {
        id,
        name: input.name.trim().to_string(),
        days,
        time: input.time.trim().to_string(),
        duration,
        reminder,
        active: input.active.unwrap_or(current_active),
    };
    item.validate().map_err(InfraError::InvalidConfig)?;
    Ok(item)
}

async fn resync_after(state: &AppState, command: &str) -> Result<SyncReport, InfraError> {
    let breaks = state.breaks.list()?;
    let report = state.dispatcher.resync(&breaks).await;
    state.log_info(
        command,
        &format!(
            "resynced notifications scheduled={} unscheduled={}",
            report.scheduled, report.unscheduled
        ),
    );
    Ok(report)
}

pub fn list_breaks_impl(state: &AppState) -> Result<Vec<Break>, InfraError> {
    state.breaks.list()
}

pub async fn create_break_impl(state: &AppState, input: BreakInput) -> Result<Break, InfraError> {
    let item = build_break(next_id("brk"), input, true)?;
    state.breaks.upsert(&item)?;
    state.log_info("create_break", &format!("created break_id={}", item.id));
    resync_after(state, "create_break").await?;
    Ok(item)
}

pub async fn update_break_impl(
    state: &AppState,
    break_id: String,
    input: BreakInput,
) -> Result<Break, InfraError> {
    let existing = state
        .breaks
        .get(&break_id)?
        .ok_or_else(|| InfraError::NotFound(format!("break {break_id}")))?;
    let item = build_break(existing.id, input, existing.active)?;
    state.breaks.upsert(&item)?;
    state.log_info("update_break", &format!("updated break_id={}", item.id));
    resync_after(state, "update_break").await?;
    Ok(item)
}

pub async fn set_break_active_impl(
    state: &AppState,
    break_id: String,
    active: bool,
) -> Result<Break, InfraError> {
    let mut item = state
        .breaks
        .get(&break_id)?
        .ok_or_else(|| InfraError::NotFound(format!("break {break_id}")))?;
    item.active = active;
    state.breaks.upsert(&item)?;
    state.log_info(
        "set_break_active",
        &format!("break_id={} active={active}", item.id),
    );
    resync_after(state, "set_break_active").await?;
    Ok(item)
}

pub async fn delete_break_impl(state: &AppState, break_id: String) -> Result<bool, InfraError> {
    let removed = state.breaks.remove(&break_id)?;
    if !removed {
        return Ok(false);
    }
    state.log_info("delete_break", &format!("deleted break_id={break_id}"));
    resync_after(state, "delete_break").await?;
    Ok(true)
}

pub async fn resync_notifications_impl(state: &AppState) -> Result<SyncReport, InfraError> {
    resync_after(state, "resync_notifications").await
}

pub fn get_statistics_impl(state: &AppState) -> Result<StatisticsResponse, InfraError> {
    let statistics = state.statistics.load()?;
    Ok(StatisticsResponse {
        completed_breaks: statistics.completed_breaks,
        skipped_breaks: statistics.skipped_breaks,
        total_active_seconds: statistics.total_active_seconds,
        total_active_time: format_mm_ss(statistics.total_active_seconds),
        top_exercises: statistics.top_exercises(TOP_EXERCISE_LIMIT),
    })
}

/// Notifications currently shown or waiting for their trigger.
pub async fn list_notifications_impl(state: &AppState) -> Result<Vec<ActiveNotification>, InfraError> {
    Ok(state.host.list_active(None).await?)
}

/// Delivers a click on the notification tagged `tag`. The deep link comes
/// from the notification payload, or from the break route when it is gone.
pub async fn notification_action_impl(
    state: &AppState,
    tag: String,
    action: Option<NotificationAction>,
    clients: &dyn WindowClients,
) -> Result<ActionOutcome, InfraError> {
    let data = state
        .host
        .list_active(Some(&tag))
        .await?
        .into_iter()
        .find_map(|notification| notification.data)
        .unwrap_or_else(|| NotificationData {
            url: break_path(&tag),
        });
    let event = UserActionEvent {
        tag: tag.clone(),
        action,
        data: Some(data),
    };
    let outcome = state.host.on_user_action(event, clients).await?;
    state.log_info(
        "notification_action",
        &format!("tag={tag} outcome={outcome:?}"),
    );
    Ok(outcome)
}

/// Runs a session for `break_id` until it completes, is skipped or the user
/// leaves. Progress and notices are pushed to `ui`.
pub async fn start_session_impl(
    state: &AppState,
    break_id: String,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    ui: mpsc::UnboundedSender<UiEvent>,
) -> SessionOutcome {
    let runner = SessionRunner::new(
        Arc::clone(&state.breaks),
        Arc::clone(&state.statistics),
        Arc::clone(&state.dispatcher),
        state.catalog.clone(),
        state.config.session.clone(),
        ui,
    );
    state.log_info("start_session", &format!("starting break_id={break_id}"));
    let outcome = runner
        .run(&break_id, StdRng::from_entropy(), commands)
        .await;
    state.log_info(
        "start_session",
        &format!("finished break_id={break_id} outcome={outcome:?}"),
    );
    outcome
}
