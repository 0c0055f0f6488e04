pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    create_break_impl, delete_break_impl, get_statistics_impl, list_breaks_impl,
    list_notifications_impl, notification_action_impl, resync_notifications_impl,
    set_break_active_impl, start_session_impl, update_break_impl, AppState, BreakInput,
    StatisticsResponse,
};
use application::session::{SessionCommand, UiEvent};
use async_trait::async_trait;
use domain::models::{Break, Exercise};
use domain::routes::{parse_route, Route};
use infrastructure::error::{InfraError, NotificationError};
use infrastructure::notification_host::{ActiveNotification, NotificationAction, WindowClients};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use url::Url;

const USAGE: &str = "usage:
  activaya [serve]
  activaya session <break-id | link>
  activaya open <link>
  activaya list | exercises | stats
  activaya add <name> <days> <HH:MM> <minutes> [reminder...]
  activaya update <break-id> <name> <days> <HH:MM> <minutes> [reminder...]
  activaya toggle <break-id> <on|off>
  activaya delete <break-id>
days are comma separated (monday,wednesday) or '-' for none";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Serve,
    Session(String),
    List,
    Exercises,
    Stats,
    Add(BreakInput),
    Update { break_id: String, input: BreakInput },
    Toggle { break_id: String, active: bool },
    Delete(String),
}

fn usage_error(message: impl std::fmt::Display) -> InfraError {
    InfraError::InvalidConfig(format!("{message}\n{USAGE}"))
}

fn required<I>(args: &mut I, name: &str) -> Result<String, InfraError>
where
    I: Iterator<Item = String>,
{
    args.next()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| usage_error(format!("missing <{name}>")))
}

fn parse_days(raw: &str) -> Vec<String> {
    if raw.trim() == "-" {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .map(str::to_string)
        .collect()
}

fn break_input<I>(args: &mut I) -> Result<BreakInput, InfraError>
where
    I: Iterator<Item = String>,
{
    let name = required(args, "name")?;
    let days = required(args, "days")?;
    let time = required(args, "HH:MM")?;
    let minutes = required(args, "minutes")?;
    let duration_minutes = minutes
        .trim()
        .parse::<u32>()
        .map_err(|_| usage_error(format!("invalid minutes '{minutes}'")))?;
    let reminder = args.collect::<Vec<_>>().join(" ");

    Ok(BreakInput {
        name,
        days: parse_days(&days),
        time,
        duration_minutes,
        reminder: Some(reminder).filter(|value| !value.trim().is_empty()),
        active: None,
    })
}

// Deep links from a notification work as well as bare ids.
fn session_target(target: String) -> String {
    match parse_route(&target) {
        Route::Break(id) => id,
        _ => target,
    }
}

fn open_route(link: &str) -> Result<Invocation, InfraError> {
    match parse_route(link) {
        Route::Home => Ok(Invocation::List),
        Route::Stats => Ok(Invocation::Stats),
        Route::Break(id) => Ok(Invocation::Session(id)),
        Route::Unknown(path) => Err(usage_error(format!("nothing to open at '{path}'"))),
    }
}

fn parse_args<I>(args: I) -> Result<Invocation, InfraError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let invocation = match args.next().as_deref() {
        None | Some("serve") => Invocation::Serve,
        Some("session") => Invocation::Session(session_target(required(&mut args, "break-id")?)),
        Some("open") => open_route(&required(&mut args, "link")?)?,
        Some("list") => Invocation::List,
        Some("exercises") => Invocation::Exercises,
        Some("stats") => Invocation::Stats,
        Some("add") => Invocation::Add(break_input(&mut args)?),
        Some("update") => {
            let break_id = required(&mut args, "break-id")?;
            Invocation::Update {
                break_id,
                input: break_input(&mut args)?,
            }
        }
        Some("toggle") => {
            let break_id = required(&mut args, "break-id")?;
            let active = match required(&mut args, "on|off")?.as_str() {
                "on" => true,
                "off" => false,
                other => return Err(usage_error(format!("expected on or off, got '{other}'"))),
            };
            Invocation::Toggle { break_id, active }
        }
        Some("delete") => Invocation::Delete(required(&mut args, "break-id")?),
        Some(other) => return Err(usage_error(format!("unknown command '{other}'"))),
    };
    Ok(invocation)
}

fn parse_session_input(line: &str) -> Option<SessionCommand> {
    match line.trim() {
        "p" => Some(SessionCommand::TogglePause),
        "s" => Some(SessionCommand::SkipExercise),
        "q" => Some(SessionCommand::SkipSession),
        "f" => Some(SessionCommand::Finish),
        "h" => Some(SessionCommand::ReturnHome),
        _ => None,
    }
}

fn render(event: &UiEvent) -> String {
    match event {
        UiEvent::Progress(snapshot) => match &snapshot.exercise {
            Some(exercise) => format!(
                "[{:?}] {} left | {} ({}/{}) {}s",
                snapshot.state,
                snapshot.clock,
                exercise.name,
                snapshot.index + 1,
                snapshot.len,
                snapshot.exercise_time_left
            ),
            None => format!("[{:?}]", snapshot.state),
        },
        UiEvent::Toast {
            title, description, ..
        } => format!("{title}: {description}"),
        UiEvent::Navigate { route } => format!("-> {route}"),
    }
}

fn render_break(item: &Break) -> String {
    let days = if item.days.is_empty() {
        "-".to_string()
    } else {
        item.days
            .iter()
            .map(|day| day.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "{}  {}  {}  {}  {} min  {}",
        item.id,
        item.name,
        days,
        item.time,
        item.duration.minutes(),
        if item.active { "active" } else { "paused" }
    )
}

fn render_exercise(exercise: &Exercise) -> String {
    format!("{} ({}s): {}", exercise.name, exercise.duration_seconds, exercise.description)
}

fn render_statistics(statistics: &StatisticsResponse) -> Vec<String> {
    let mut lines = vec![
        format!("completed breaks: {}", statistics.completed_breaks),
        format!("skipped breaks: {}", statistics.skipped_breaks),
        format!("active time: {}", statistics.total_active_time),
    ];
    lines.extend(statistics.top_exercises.iter().map(|summary| {
        format!(
            "  {} x{} ({:.0}%)",
            summary.name, summary.count, summary.percentage
        )
    }));
    lines
}

fn render_notification(notification: &ActiveNotification) -> String {
    match notification.fire_at {
        Some(fire_at) => format!("{} waiting until {}", notification.tag, fire_at.to_rfc3339()),
        None => format!("{} shown: {}", notification.tag, notification.title),
    }
}

/// Logs the failure to the command log before handing it back.
fn reported<T>(state: &AppState, command: &str, result: Result<T, InfraError>) -> Result<T, InfraError> {
    result.inspect_err(|error| {
        let _ = state.command_error(command, error);
    })
}

/// There is never an application window in the terminal, so viewing a
/// notification prints the link that opens its session.
struct TerminalClients;

#[async_trait]
impl WindowClients for TerminalClients {
    async fn match_all(&self) -> Vec<String> {
        Vec::new()
    }

    async fn navigate(&self, client_id: &str, url: &Url) -> Result<(), NotificationError> {
        println!("{client_id} -> {url}");
        Ok(())
    }

    async fn focus(&self, _client_id: &str) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<(), NotificationError> {
        println!("open {url} with: activaya open {url}");
        Ok(())
    }
}

async fn handle_serve_input(state: &AppState, clients: &TerminalClients, line: &str) {
    let mut words = line.split_whitespace();
    let (action, tag) = match (words.next(), words.next()) {
        (Some("pending"), None) => {
            match reported(state, "list_notifications", list_notifications_impl(state).await) {
                Ok(notifications) if notifications.is_empty() => println!("no notifications"),
                Ok(notifications) => notifications
                    .iter()
                    .for_each(|notification| println!("{}", render_notification(notification))),
                Err(_) => {}
            }
            return;
        }
        (Some("view"), Some(tag)) => (NotificationAction::View, tag),
        (Some("skip"), Some(tag)) => (NotificationAction::Skip, tag),
        _ => {
            warn!("unknown input '{}'; use view <break-id>, skip <break-id> or pending", line.trim());
            return;
        }
    };

    let result = notification_action_impl(state, tag.to_string(), Some(action), clients).await;
    if let Ok(outcome) = reported(state, "notification_action", result) {
        info!("notification {tag}: {outcome:?}");
    }
}

async fn serve(state: &AppState) -> Result<(), InfraError> {
    let breaks = reported(state, "list_breaks", list_breaks_impl(state))?;
    let report = reported(
        state,
        "resync_notifications",
        resync_notifications_impl(state).await,
    )?;
    info!(
        "workspace config={} database={}",
        state.config_dir().display(),
        state.database_path().display()
    );
    info!(
        "{} ready: {} breaks, {} reminders scheduled; type view/skip <break-id> or pending, Ctrl+C to stop",
        state.config().app_name,
        breaks.len(),
        report.scheduled
    );

    let clients = TerminalClients;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_serve_input(state, &clients, &line).await,
                Ok(None) => stdin_open = false,
                Err(error) => {
                    warn!("stdin closed: {error}");
                    stdin_open = false;
                }
            },
        }
    }
    info!("shutting down");
    Ok(())
}

async fn session(state: &AppState, break_id: String) -> Result<(), InfraError> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();

    println!("p = pause/resume, s = skip exercise, q = skip break, f = finish, h = home");
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(command) = parse_session_input(&line) else {
                warn!("unknown input '{}'", line.trim());
                continue;
            };
            if command_tx.send(command).is_err() {
                break;
            }
        }
    });

    let printer = async {
        while let Some(event) = ui_rx.recv().await {
            println!("{}", render(&event));
        }
    };
    let (outcome, ()) = tokio::join!(
        start_session_impl(state, break_id, command_rx, ui_tx),
        printer
    );
    input.abort();
    info!("session ended: {outcome:?}");
    Ok(())
}

async fn execute(state: &AppState, invocation: Invocation) -> Result<(), InfraError> {
    match invocation {
        Invocation::Serve => serve(state).await,
        Invocation::Session(break_id) => session(state, break_id).await,
        Invocation::List => {
            let breaks = reported(state, "list_breaks", list_breaks_impl(state))?;
            if breaks.is_empty() {
                println!("no breaks yet; create one with `activaya add`");
            }
            breaks.iter().for_each(|item| println!("{}", render_break(item)));
            Ok(())
        }
        Invocation::Exercises => {
            state
                .catalog()
                .iter()
                .for_each(|exercise| println!("{}", render_exercise(exercise)));
            Ok(())
        }
        Invocation::Stats => {
            let statistics = reported(state, "get_statistics", get_statistics_impl(state))?;
            render_statistics(&statistics)
                .iter()
                .for_each(|line| println!("{line}"));
            Ok(())
        }
        Invocation::Add(input) => {
            let created = reported(state, "create_break", create_break_impl(state, input).await)?;
            println!("created {}", render_break(&created));
            Ok(())
        }
        Invocation::Update { break_id, input } => {
            let updated = reported(
                state,
                "update_break",
                update_break_impl(state, break_id, input).await,
            )?;
            println!("updated {}", render_break(&updated));
            Ok(())
        }
        Invocation::Toggle { break_id, active } => {
            let toggled = reported(
                state,
                "set_break_active",
                set_break_active_impl(state, break_id, active).await,
            )?;
            println!("{}", render_break(&toggled));
            Ok(())
        }
        Invocation::Delete(break_id) => {
            let removed = reported(
                state,
                "delete_break",
                delete_break_impl(state, break_id.clone()).await,
            )?;
            if !removed {
                return reported(
                    state,
                    "delete_break",
                    Err(InfraError::NotFound(format!("break {break_id}"))),
                );
            }
            println!("deleted {break_id}");
            Ok(())
        }
    }
}

pub fn run() -> Result<(), InfraError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let invocation = parse_args(std::env::args().skip(1))?;
    let workspace_root = std::env::current_dir()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async move {
        let state = AppState::new(workspace_root)?;
        execute(&state, invocation).await
    });
    // stdin reads park a blocking thread; do not wait for it.
    runtime.shutdown_background();
    result
}
