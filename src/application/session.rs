use crate::application::notifications::NotificationDispatcher;
use crate::domain::models::{Break, Exercise, Statistics};
use crate::domain::plan::SessionPlan;
use crate::domain::routes::Route;
use crate::infrastructure::break_repository::BreakRepository;
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::error::SessionError;
use crate::infrastructure::statistics_repository::StatisticsRepository;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Loading,
    Running,
    Paused,
    Finished,
    Skipped,
    NotFound,
    NoExercises,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Skipped | Self::NotFound | Self::NoExercises
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
}

impl Notice {
    fn new(title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Countdown reached zero; the exercise earns statistics credit.
    ExerciseCompleted(Exercise),
    Advanced { index: usize },
    Replaced { index: usize, replacement: Exercise },
    Finished(Notice),
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub break_id: Option<String>,
    pub break_name: Option<String>,
    pub index: usize,
    pub len: usize,
    pub exercise: Option<Exercise>,
    pub exercise_time_left: u32,
    pub session_time_left: u32,
    pub exercise_progress: f64,
    pub session_progress: f64,
    pub clock: String,
}

impl SessionSnapshot {
    pub fn without_plan(state: SessionState) -> Self {
        Self {
            state,
            break_id: None,
            break_name: None,
            index: 0,
            len: 0,
            exercise: None,
            exercise_time_left: 0,
            session_time_left: 0,
            exercise_progress: 0.0,
            session_progress: 0.0,
            clock: format_clock(0),
        }
    }
}

/// `M:SS`, minutes unpadded.
pub fn format_clock(total_seconds: u32) -> String {
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Share of `total` already elapsed when `left` seconds remain.
fn percentage(left: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(total - left.min(total)) / f64::from(total) * 100.0
}

/// Countdown state machine for one run of a break. Time only advances
/// through `tick`, so the caller owns the clock.
pub struct SessionEngine<R> {
    break_item: Break,
    catalog: Vec<Exercise>,
    plan: SessionPlan,
    index: usize,
    time_left: u32,
    state: SessionState,
    rng: R,
}

impl<R: Rng> SessionEngine<R> {
    pub fn start(break_item: Break, catalog: Vec<Exercise>, mut rng: R) -> Self {
        let plan = SessionPlan::build(&catalog, break_item.duration.seconds(), &mut rng);
        let (state, time_left) = match plan.get(0) {
            Some(first) => (SessionState::Running, first.duration_seconds),
            None => (SessionState::NoExercises, 0),
        };
        Self {
            break_item,
            catalog,
            plan,
            index: 0,
            time_left,
            state,
            rng,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn break_item(&self) -> &Break {
        &self.break_item
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn current_exercise(&self) -> Option<&Exercise> {
        self.plan.get(self.index)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let duration = self
            .current_exercise()
            .map(|exercise| exercise.duration_seconds)
            .unwrap_or(0);
        let total = self.plan.total_seconds();
        let session_time_left = if self.plan.is_empty() {
            0
        } else {
            self.plan.seconds_after(self.index).saturating_add(self.time_left)
        };
        SessionSnapshot {
            state: self.state,
            break_id: Some(self.break_item.id.clone()),
            break_name: Some(self.break_item.name.clone()),
            index: self.index,
            len: self.plan.len(),
            exercise: self.current_exercise().cloned(),
            exercise_time_left: self.time_left,
            session_time_left,
            exercise_progress: percentage(self.time_left, duration),
            session_progress: percentage(session_time_left, total),
            clock: format_clock(session_time_left),
        }
    }

    pub fn tick(&mut self) -> Vec<SessionEvent> {
        if self.state != SessionState::Running {
            return Vec::new();
        }
        self.time_left = self.time_left.saturating_sub(1);
        if self.time_left > 0 {
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(done) = self.current_exercise().cloned() {
            events.push(SessionEvent::ExerciseCompleted(done));
        }
        events.extend(self.advance_or_finish(None));
        events
    }

    pub fn toggle_pause(&mut self) -> Result<SessionState, SessionError> {
        self.ensure_open()?;
        self.state = match self.state {
            SessionState::Running => SessionState::Paused,
            _ => SessionState::Running,
        };
        Ok(self.state)
    }

    pub fn skip_exercise(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        match self.plan.pick_replacement(&self.catalog, &mut self.rng) {
            Some(replacement) => {
                self.time_left = replacement.duration_seconds;
                self.plan.replace(self.index, replacement.clone());
                Ok(vec![SessionEvent::Replaced {
                    index: self.index,
                    replacement,
                }])
            }
            None => Ok(self.advance_or_finish(Some(Notice::new(
                "Pausa completada",
                "Has completado todos los ejercicios disponibles.",
            )))),
        }
    }

    pub fn skip_session(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        self.state = SessionState::Skipped;
        Ok(vec![SessionEvent::Skipped])
    }

    pub fn finish(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        self.state = SessionState::Finished;
        Ok(vec![SessionEvent::Finished(self.completion_notice())])
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::NoExercises => Err(SessionError::PlanEmpty(self.break_item.id.clone())),
            state if state.is_terminal() => Err(SessionError::AlreadyFinished),
            _ => Ok(()),
        }
    }

    fn advance_or_finish(&mut self, last_slot_notice: Option<Notice>) -> Vec<SessionEvent> {
        let next = self.index + 1;
        match self.plan.get(next) {
            Some(exercise) => {
                self.index = next;
                self.time_left = exercise.duration_seconds;
                vec![SessionEvent::Advanced { index: next }]
            }
            None => {
                self.state = SessionState::Finished;
                self.time_left = 0;
                let notice = last_slot_notice.unwrap_or_else(|| self.completion_notice());
                vec![SessionEvent::Finished(notice)]
            }
        }
    }

    fn completion_notice(&self) -> Notice {
        Notice::new(
            "¡Pausa completada!",
            format!(
                "¡Buen trabajo! Has completado tu pausa de {}.",
                self.break_item.name
            ),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    TogglePause,
    SkipExercise,
    SkipSession,
    Finish,
    ReturnHome,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Progress(SessionSnapshot),
    Toast {
        title: String,
        description: String,
        destructive: bool,
    },
    Navigate {
        route: String,
    },
}

impl UiEvent {
    fn toast(notice: Notice) -> Self {
        Self::Toast {
            title: notice.title,
            description: notice.description,
            destructive: false,
        }
    }

    fn home() -> Self {
        Self::Navigate {
            route: Route::Home.path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Skipped,
    NotFound,
    NoExercises,
    /// The user left, or the command channel closed while paused.
    Abandoned,
}

enum Step {
    Tick,
    Command(SessionCommand),
    CommandsClosed,
    Idle,
}

/// Drives a `SessionEngine` on a one-second tokio interval, applies its
/// events to statistics and keeps notifications in sync.
pub struct SessionRunner {
    breaks: Arc<dyn BreakRepository>,
    statistics: Arc<dyn StatisticsRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    catalog: Vec<Exercise>,
    settings: SessionConfig,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl SessionRunner {
    pub fn new(
        breaks: Arc<dyn BreakRepository>,
        statistics: Arc<dyn StatisticsRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        catalog: Vec<Exercise>,
        settings: SessionConfig,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            breaks,
            statistics,
            dispatcher,
            catalog,
            settings,
            ui,
        }
    }

    pub async fn run<R: Rng>(
        &self,
        break_id: &str,
        rng: R,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> SessionOutcome {
        self.emit(UiEvent::Progress(SessionSnapshot::without_plan(SessionState::Loading)));

        let break_item = match self.load_break(break_id).await {
            Ok(item) => item,
            Err(error) => {
                warn!("session for {break_id} not started: {error}");
                self.emit(UiEvent::Progress(SessionSnapshot::without_plan(SessionState::NotFound)));
                self.emit(UiEvent::Toast {
                    title: "Pausa no encontrada".to_string(),
                    description: "No se pudo encontrar la pausa activa. Volviendo al inicio.".to_string(),
                    destructive: true,
                });
                self.emit(UiEvent::home());
                return SessionOutcome::NotFound;
            }
        };

        let mut engine = SessionEngine::start(break_item, self.catalog.clone(), rng);
        self.emit(UiEvent::Progress(engine.snapshot()));
        if engine.state() == SessionState::NoExercises {
            info!("break {break_id} has no exercise that fits its duration");
            return self.wait_for_return(&mut commands).await;
        }
        info!(
            "session started for break {break_id} with {} exercises",
            engine.plan().len()
        );

        let mut ticker = time::interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            let running = engine.state() == SessionState::Running;
            let step = tokio::select! {
                _ = ticker.tick(), if running => Step::Tick,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => Step::Command(command),
                    None => Step::CommandsClosed,
                },
                else => Step::Idle,
            };

            let events = match step {
                Step::Tick => engine.tick(),
                Step::Command(SessionCommand::ReturnHome) => {
                    self.emit(UiEvent::home());
                    return SessionOutcome::Abandoned;
                }
                Step::Command(SessionCommand::TogglePause) => {
                    match engine.toggle_pause() {
                        Ok(SessionState::Running) => ticker.reset(),
                        Ok(_) => {}
                        Err(error) => debug!("pause ignored: {error}"),
                    }
                    self.emit(UiEvent::Progress(engine.snapshot()));
                    continue;
                }
                Step::Command(command) => {
                    let result = match command {
                        SessionCommand::SkipExercise => engine.skip_exercise(),
                        SessionCommand::SkipSession => engine.skip_session(),
                        SessionCommand::Finish => engine.finish(),
                        SessionCommand::TogglePause | SessionCommand::ReturnHome => Ok(Vec::new()),
                    };
                    result.unwrap_or_else(|error| {
                        debug!("{command:?} ignored: {error}");
                        Vec::new()
                    })
                }
                Step::CommandsClosed => {
                    commands_open = false;
                    continue;
                }
                Step::Idle => {
                    info!("session for {break_id} abandoned while paused");
                    return SessionOutcome::Abandoned;
                }
            };

            if let Some(outcome) = self.apply(&engine, events).await {
                return outcome;
            }
        }
    }

    async fn load_break(&self, break_id: &str) -> Result<Break, SessionError> {
        if let Some(item) = self.breaks.get(break_id)? {
            return Ok(item);
        }
        time::sleep(self.settings.not_found_grace()).await;
        self.breaks
            .get(break_id)?
            .ok_or_else(|| SessionError::ReferenceNotFound(break_id.to_string()))
    }

    async fn wait_for_return(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> SessionOutcome {
        while let Some(command) = commands.recv().await {
            if command == SessionCommand::ReturnHome {
                self.emit(UiEvent::home());
                break;
            }
            debug!("{command:?} ignored: session has no exercises");
        }
        SessionOutcome::NoExercises
    }

    async fn apply<R: Rng>(
        &self,
        engine: &SessionEngine<R>,
        events: Vec<SessionEvent>,
    ) -> Option<SessionOutcome> {
        if events.is_empty() {
            return None;
        }
        if let Err(error) = self.record(&events) {
            error!("failed to update statistics: {error}");
        }

        let mut outcome = None;
        for event in events {
            match event {
                SessionEvent::ExerciseCompleted(exercise) => {
                    debug!("exercise '{}' completed", exercise.name);
                }
                SessionEvent::Advanced { index } => debug!("advanced to exercise {index}"),
                SessionEvent::Replaced { replacement, .. } => {
                    self.emit(UiEvent::toast(Notice::new(
                        "Ejercicio Cambiado",
                        format!("Cambiado a: {}", replacement.name),
                    )));
                }
                SessionEvent::Finished(notice) => {
                    self.emit(UiEvent::Progress(engine.snapshot()));
                    self.emit(UiEvent::toast(notice));
                    self.resync().await;
                    time::sleep(self.settings.completion_delay()).await;
                    self.emit(UiEvent::home());
                    info!("session for break {} completed", engine.break_item().id);
                    outcome = Some(SessionOutcome::Completed);
                }
                SessionEvent::Skipped => {
                    self.resync().await;
                    self.emit(UiEvent::toast(Notice::new(
                        "Pausa saltada",
                        "La pausa se ha saltado. La próxima se notificará a su hora programada.",
                    )));
                    self.emit(UiEvent::home());
                    info!("session for break {} skipped", engine.break_item().id);
                    outcome = Some(SessionOutcome::Skipped);
                }
            }
        }

        if outcome.is_none() {
            self.emit(UiEvent::Progress(engine.snapshot()));
        }
        outcome
    }

    fn record(&self, events: &[SessionEvent]) -> Result<(), SessionError> {
        let touches_statistics = events.iter().any(|event| {
            matches!(
                event,
                SessionEvent::ExerciseCompleted(_) | SessionEvent::Finished(_) | SessionEvent::Skipped
            )
        });
        if !touches_statistics {
            return Ok(());
        }
        self.statistics.update(&|statistics: &mut Statistics| {
            for event in events {
                match event {
                    SessionEvent::ExerciseCompleted(exercise) => statistics.record_exercise(exercise),
                    SessionEvent::Finished(_) => statistics.record_completed_break(),
                    SessionEvent::Skipped => statistics.record_skipped_break(),
                    _ => {}
                }
            }
        })?;
        Ok(())
    }

    async fn resync(&self) {
        match self.breaks.list() {
            Ok(breaks) => {
                self.dispatcher.resync(&breaks).await;
            }
            Err(error) => error!("failed to load breaks for resync: {error}"),
        }
    }

    fn emit(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            debug!("ui receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BreakDuration, Day};
    use crate::infrastructure::break_repository::InMemoryBreakRepository;
    use crate::infrastructure::config::NotificationConfig;
    use crate::infrastructure::notification_host::{BackgroundHost, HostOptions};
    use crate::infrastructure::statistics_repository::InMemoryStatisticsRepository;
    use chrono::{DateTime, Utc};
    use chrono_tz::Tz;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use url::Url;

    fn exercise(name: &str, seconds: u32) -> Exercise {
        Exercise {
            name: name.to_string(),
            description: format!("{name} despacio"),
            duration_seconds: seconds,
            media_url: format!("/exercises/{name}.gif"),
        }
    }

    fn sample_break() -> Break {
        Break {
            id: "brk-1".to_string(),
            name: "Media mañana".to_string(),
            days: [Day::Monday, Day::Wednesday].into_iter().collect(),
            time: "09:00".to_string(),
            duration: BreakDuration::Five,
            reminder: None,
            active: true,
        }
    }

    fn small_catalog() -> Vec<Exercise> {
        vec![exercise("A", 60), exercise("B", 60), exercise("C", 60)]
    }

    fn engine(catalog: Vec<Exercise>) -> SessionEngine<StdRng> {
        SessionEngine::start(sample_break(), catalog, StdRng::seed_from_u64(7))
    }

    fn run_ticks(engine: &mut SessionEngine<StdRng>, ticks: u32) -> Vec<SessionEvent> {
        (0..ticks).flat_map(|_| engine.tick()).collect()
    }

    fn completed_names(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ExerciseCompleted(exercise) => Some(exercise.name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn countdown_credits_each_exercise_once_and_finishes() {
        let mut engine = engine(small_catalog());
        assert_eq!(engine.state(), SessionState::Running);
        assert_eq!(engine.plan().len(), 3);
        let planned = engine
            .plan()
            .exercises()
            .iter()
            .map(|exercise| exercise.name.clone())
            .collect::<Vec<_>>();

        let events = run_ticks(&mut engine, 180);

        assert_eq!(completed_names(&events), planned);
        assert_eq!(engine.state(), SessionState::Finished);
        let finished = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert!(run_ticks(&mut engine, 10).is_empty());
    }

    #[test]
    fn paused_engine_does_not_count_down() {
        let mut engine = engine(small_catalog());
        run_ticks(&mut engine, 5);
        assert_eq!(engine.toggle_pause().expect("pause"), SessionState::Paused);

        assert!(run_ticks(&mut engine, 30).is_empty());
        assert_eq!(engine.time_left(), 55);

        assert_eq!(engine.toggle_pause().expect("resume"), SessionState::Running);
        run_ticks(&mut engine, 1);
        assert_eq!(engine.time_left(), 54);
    }

    #[test]
    fn skip_exercise_swaps_in_unused_catalog_entry() {
        let mut catalog = small_catalog();
        catalog.push(exercise("D", 400));
        let mut engine = engine(catalog);
        let skipped = engine.current_exercise().cloned().expect("first exercise");

        let events = engine.skip_exercise().expect("skip");

        let replacement = exercise("D", 400);
        assert_eq!(
            events,
            vec![SessionEvent::Replaced {
                index: 0,
                replacement: replacement.clone()
            }]
        );
        assert_eq!(engine.current_exercise(), Some(&replacement));
        assert_eq!(engine.time_left(), 400);

        let events = run_ticks(&mut engine, 400);
        let names = completed_names(&events);
        assert_eq!(names, vec!["D".to_string()]);
        assert!(!names.contains(&skipped.name));
    }

    #[test]
    fn skip_without_replacement_advances_without_credit() {
        let mut engine = engine(small_catalog());
        let second = engine.plan().get(1).cloned().expect("second exercise");

        let events = engine.skip_exercise().expect("skip");

        assert_eq!(events, vec![SessionEvent::Advanced { index: 1 }]);
        assert_eq!(engine.current_exercise(), Some(&second));
        assert_eq!(engine.time_left(), 60);
    }

    #[test]
    fn skip_on_last_slot_without_replacement_finishes() {
        let mut engine = engine(small_catalog());
        engine.skip_exercise().expect("skip first");
        engine.skip_exercise().expect("skip second");

        let events = engine.skip_exercise().expect("skip last");

        assert_eq!(
            events,
            vec![SessionEvent::Finished(Notice::new(
                "Pausa completada",
                "Has completado todos los ejercicios disponibles."
            ))]
        );
        assert_eq!(engine.state(), SessionState::Finished);
        assert!(matches!(
            engine.skip_exercise(),
            Err(SessionError::AlreadyFinished)
        ));
    }

    #[test]
    fn skip_session_ends_without_exercise_credit() {
        let mut engine = engine(small_catalog());
        run_ticks(&mut engine, 30);

        assert_eq!(engine.skip_session().expect("skip session"), vec![SessionEvent::Skipped]);
        assert_eq!(engine.state(), SessionState::Skipped);
        assert!(run_ticks(&mut engine, 60).is_empty());
        assert!(matches!(engine.finish(), Err(SessionError::AlreadyFinished)));
    }

    #[test]
    fn forced_finish_uses_break_name() {
        let mut engine = engine(small_catalog());
        let events = engine.finish().expect("finish");
        assert_eq!(
            events,
            vec![SessionEvent::Finished(Notice::new(
                "¡Pausa completada!",
                "¡Buen trabajo! Has completado tu pausa de Media mañana."
            ))]
        );
    }

    #[test]
    fn break_without_fitting_exercise_has_no_exercises_state() {
        let mut engine = engine(vec![exercise("Largo", 400)]);
        assert_eq!(engine.state(), SessionState::NoExercises);
        assert!(engine.tick().is_empty());
        assert!(matches!(engine.skip_exercise(), Err(SessionError::PlanEmpty(_))));
        assert!(matches!(engine.toggle_pause(), Err(SessionError::PlanEmpty(_))));
        assert_eq!(engine.snapshot().session_time_left, 0);
    }

    #[test]
    fn snapshot_reports_progress_and_clock() {
        let mut engine = engine(small_catalog());
        run_ticks(&mut engine, 10);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.index, 0);
        assert_eq!(snapshot.len, 3);
        assert_eq!(snapshot.exercise_time_left, 50);
        assert_eq!(snapshot.session_time_left, 170);
        assert_eq!(snapshot.clock, "2:50");
        assert!((snapshot.exercise_progress - 10.0 / 60.0 * 100.0).abs() < 1e-9);
        assert!((snapshot.session_progress - 10.0 / 180.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_saturates_with_oversized_replacement() {
        let mut catalog = small_catalog();
        catalog.push(exercise("Enorme", u32::MAX));
        let mut engine = engine(catalog);
        assert_eq!(engine.plan().len(), 3);

        engine.skip_exercise().expect("session open");
        assert_eq!(engine.time_left(), u32::MAX);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.session_time_left, u32::MAX);
        assert!(snapshot.session_progress >= 0.0);
    }

    #[test]
    fn clock_format_pads_seconds_only() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(900), "15:00");
    }

    // Property: skipping keeps plan names unique and never credits the skipped slot.
    proptest! {
        #[test]
        fn skips_never_duplicate_or_credit(seed in any::<u64>(), skips in proptest::collection::vec(any::<bool>(), 1..12)) {
            let catalog = vec![
                exercise("A", 30), exercise("B", 45), exercise("C", 60),
                exercise("D", 60), exercise("E", 90), exercise("F", 30),
            ];
            let mut engine = SessionEngine::start(sample_break(), catalog, StdRng::seed_from_u64(seed));
            let mut credited = 0usize;
            let mut ticked_through = 0usize;

            for skip in skips {
                if engine.state().is_terminal() {
                    break;
                }
                if skip {
                    engine.skip_exercise().expect("skip while open");
                } else {
                    let remaining = engine.time_left();
                    let events = (0..remaining).flat_map(|_| engine.tick()).collect::<Vec<_>>();
                    credited += completed_names(&events).len();
                    ticked_through += 1;
                }
                let names = engine
                    .plan()
                    .exercises()
                    .iter()
                    .map(|exercise| exercise.name.as_str())
                    .collect::<HashSet<_>>();
                prop_assert_eq!(names.len(), engine.plan().len());
            }

            prop_assert_eq!(credited, ticked_through);
        }
    }

    struct Harness {
        runner: SessionRunner,
        host: Arc<BackgroundHost>,
        statistics: Arc<InMemoryStatisticsRepository>,
        ui: mpsc::UnboundedReceiver<UiEvent>,
    }

    fn harness(breaks: Vec<Break>) -> Harness {
        let now = DateTime::parse_from_rfc3339("2026-10-20T10:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let host = Arc::new(
            BackgroundHost::new(HostOptions::new(
                Url::parse("http://localhost:9002/").expect("base url"),
            ))
            .with_now_provider(Arc::new(move || now)),
        );
        let dispatcher = NotificationDispatcher::new(host.clone(), NotificationConfig::default(), Tz::UTC)
            .with_now_provider(Arc::new(move || now));
        let statistics = Arc::new(InMemoryStatisticsRepository::default());
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let runner = SessionRunner::new(
            Arc::new(InMemoryBreakRepository::with_breaks(breaks)),
            statistics.clone(),
            Arc::new(dispatcher),
            small_catalog(),
            SessionConfig::default(),
            ui_tx,
        );
        Harness {
            runner,
            host,
            statistics,
            ui: ui_rx,
        }
    }

    fn drain(ui: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = ui.try_recv() {
            events.push(event);
        }
        events
    }

    fn toasts(events: &[UiEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                UiEvent::Toast { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_updates_statistics_and_reschedules() {
        let mut harness = harness(vec![sample_break()]);
        let (_commands, rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let outcome = harness
            .runner
            .run("brk-1", StdRng::seed_from_u64(3), rx)
            .await;

        assert_eq!(outcome, SessionOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_secs(183));
        let statistics = harness.statistics.load().expect("load statistics");
        assert_eq!(statistics.completed_breaks, 1);
        assert_eq!(statistics.total_active_seconds, 180);
        assert!(statistics.count_by_exercise.values().all(|count| *count == 1));
        assert_eq!(harness.host.pending_tags(), vec!["brk-1".to_string()]);

        let events = drain(&mut harness.ui);
        assert_eq!(toasts(&events), vec!["¡Pausa completada!".to_string()]);
        assert_eq!(events.last(), Some(&UiEvent::home()));
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_session_counts_skip_only() {
        let mut harness = harness(vec![sample_break()]);
        let (commands, rx) = mpsc::unbounded_channel();
        commands.send(SessionCommand::SkipSession).expect("send skip");

        let outcome = harness
            .runner
            .run("brk-1", StdRng::seed_from_u64(3), rx)
            .await;

        assert_eq!(outcome, SessionOutcome::Skipped);
        let statistics = harness.statistics.load().expect("load statistics");
        assert_eq!(statistics.skipped_breaks, 1);
        assert_eq!(statistics.completed_breaks, 0);
        assert!(statistics.count_by_exercise.is_empty());
        assert_eq!(harness.host.pending_tags(), vec!["brk-1".to_string()]);

        let events = drain(&mut harness.ui);
        assert_eq!(toasts(&events), vec!["Pausa saltada".to_string()]);
        assert_eq!(events.last(), Some(&UiEvent::home()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_break_waits_for_grace_then_navigates_home() {
        let mut harness = harness(Vec::new());
        let (_commands, rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let outcome = harness
            .runner
            .run("missing", StdRng::seed_from_u64(3), rx)
            .await;

        assert_eq!(outcome, SessionOutcome::NotFound);
        assert!(started.elapsed() >= Duration::from_millis(1000));
        let events = drain(&mut harness.ui);
        assert!(events.iter().any(|event| matches!(
            event,
            UiEvent::Toast { title, destructive: true, .. } if title == "Pausa no encontrada"
        )));
        assert_eq!(events.last(), Some(&UiEvent::home()));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_the_clock_until_resumed() {
        let harness = harness(vec![sample_break()]);
        let (commands, rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let driver = async {
            time::sleep(Duration::from_millis(5_500)).await;
            commands.send(SessionCommand::TogglePause).expect("pause");
            time::sleep(Duration::from_secs(100)).await;
            commands.send(SessionCommand::TogglePause).expect("resume");
        };
        let (outcome, ()) = tokio::join!(
            harness.runner.run("brk-1", StdRng::seed_from_u64(3), rx),
            driver
        );

        assert_eq!(outcome, SessionOutcome::Completed);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(283), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(285), "elapsed {elapsed:?}");
        assert_eq!(
            harness.statistics.load().expect("load statistics").total_active_seconds,
            180
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_exercise_session_waits_for_return_home() {
        let mut harness = harness(vec![sample_break()]);
        harness.runner.catalog = vec![exercise("Largo", 400)];
        let (commands, rx) = mpsc::unbounded_channel();
        commands.send(SessionCommand::SkipExercise).expect("send skip");
        commands.send(SessionCommand::ReturnHome).expect("send home");

        let outcome = harness
            .runner
            .run("brk-1", StdRng::seed_from_u64(3), rx)
            .await;

        assert_eq!(outcome, SessionOutcome::NoExercises);
        let events = drain(&mut harness.ui);
        assert!(events.iter().any(|event| matches!(
            event,
            UiEvent::Progress(snapshot) if snapshot.state == SessionState::NoExercises
        )));
        assert_eq!(events.last(), Some(&UiEvent::home()));
        assert_eq!(harness.statistics.load().expect("load"), Statistics::default());
    }
}
