use crate::domain::models::Break;
use crate::domain::routes::break_path;
use crate::domain::schedule::next_fire_time;
use crate::infrastructure::config::NotificationConfig;
use crate::infrastructure::notification_host::{
    ActionButton, NotificationAction, NotificationData, NotificationHost, NotificationRequest,
    NowProvider, Permission,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Permission missing or host not ready.
    Skipped,
    NoOccurrence,
    Deferred { fire_at: DateTime<Utc> },
    Fallback { fire_at: DateTime<Utc> },
    /// The fire instant was not in the future, nothing was armed.
    Expired,
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Deferred { .. } | Self::Fallback { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub cancelled: usize,
    pub scheduled: usize,
    pub unscheduled: usize,
}

struct FallbackTimer {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// In-process delayed callbacks keyed by break id. Used when the host cannot
/// hold a deferred trigger itself.
#[derive(Default)]
struct FallbackTimers {
    entries: Mutex<HashMap<String, FallbackTimer>>,
    generation: AtomicU64,
}

impl FallbackTimers {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, FallbackTimer>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm<F>(&self, tag: &str, fire_at: DateTime<Utc>, spawn: F)
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries();
        if let Some(previous) = entries.remove(tag) {
            previous.handle.abort();
        }
        let handle = spawn(generation);
        entries.insert(
            tag.to_string(),
            FallbackTimer {
                generation,
                fire_at,
                handle,
            },
        );
    }

    fn cancel(&self, tag: &str) -> bool {
        match self.entries().remove(tag) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn clear(&self) -> usize {
        let drained = self.entries().drain().collect::<Vec<_>>();
        for (_, timer) in &drained {
            timer.handle.abort();
        }
        drained.len()
    }

    fn remove_if_current(&self, tag: &str, generation: u64) {
        let mut entries = self.entries();
        if entries
            .get(tag)
            .is_some_and(|timer| timer.generation == generation)
        {
            entries.remove(tag);
        }
    }

    fn snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut armed = self
            .entries()
            .iter()
            .map(|(tag, timer)| (tag.clone(), timer.fire_at))
            .collect::<Vec<_>>();
        armed.sort();
        armed
    }
}

/// Keeps exactly one pending reminder per active break. Host failures are
/// logged and degrade to "no notification"; nothing here returns an error.
pub struct NotificationDispatcher {
    host: Arc<dyn NotificationHost>,
    timers: Arc<FallbackTimers>,
    template: NotificationConfig,
    timezone: Tz,
    now_provider: NowProvider,
}

impl NotificationDispatcher {
    pub fn new(host: Arc<dyn NotificationHost>, template: NotificationConfig, timezone: Tz) -> Self {
        Self {
            host,
            timers: Arc::new(FallbackTimers::default()),
            template,
            timezone,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Fallback timers currently armed, as `(break id, fire instant)`.
    pub fn armed_fallbacks(&self) -> Vec<(String, DateTime<Utc>)> {
        self.timers.snapshot()
    }

    pub async fn schedule(&self, item: &Break) -> ScheduleOutcome {
        if self.host.permission() != Permission::Granted {
            debug!("notification permission missing; break {} not scheduled", item.id);
            return ScheduleOutcome::Skipped;
        }
        if let Err(error) = self.host.ready().await {
            debug!("break {} not scheduled: {error}", item.id);
            return ScheduleOutcome::Skipped;
        }

        self.cancel(&item.id).await;

        let now = (self.now_provider)();
        let Some(fire_at) = next_fire_time(item, self.timezone, now) else {
            debug!("break {} has no upcoming occurrence", item.id);
            return ScheduleOutcome::NoOccurrence;
        };
        let request = self.build_request(item, fire_at);

        if self.host.capabilities().deferred_triggers {
            match self
                .host
                .request_display(request.clone().with_trigger(fire_at))
                .await
            {
                Ok(()) => {
                    info!("scheduled break {} for {}", item.id, fire_at.to_rfc3339());
                    return ScheduleOutcome::Deferred { fire_at };
                }
                Err(error) => {
                    warn!("deferred trigger for break {} failed, using fallback timer: {error}", item.id);
                }
            }
        }

        self.arm_fallback(request, fire_at, now)
    }

    pub async fn cancel(&self, break_id: &str) {
        if self.timers.cancel(break_id) {
            debug!("cleared fallback timer for break {break_id}");
        }

        if let Err(error) = self.host.ready().await {
            debug!("skipped host cancellation for break {break_id}: {error}");
            return;
        }

        match self.host.list_active(Some(break_id)).await {
            Ok(active) if !active.is_empty() => {
                if let Err(error) = self.host.dismiss(break_id).await {
                    warn!("failed to close notification {break_id}: {error}");
                }
            }
            Ok(_) => {}
            Err(error) => warn!("failed to list notifications for {break_id}: {error}"),
        }

        if self.host.capabilities().deferred_triggers {
            if let Err(error) = self
                .host
                .request_display(NotificationRequest::expired(break_id))
                .await
            {
                debug!("could not overwrite trigger for {break_id}: {error}");
            }
        }
    }

    pub async fn resync(&self, breaks: &[Break]) -> SyncReport {
        let mut report = SyncReport::default();

        let tags = match self.host.list_active(None).await {
            Ok(active) => active
                .into_iter()
                .map(|notification| notification.tag)
                .collect::<BTreeSet<_>>(),
            Err(error) => {
                warn!("failed to enumerate notifications during resync: {error}");
                BTreeSet::new()
            }
        };
        for tag in &tags {
            self.cancel(tag).await;
            report.cancelled += 1;
        }
        let cleared = self.timers.clear();
        if cleared > 0 {
            debug!("cleared {cleared} fallback timers");
        }

        for item in breaks.iter().filter(|item| item.active) {
            if self.schedule(item).await.is_scheduled() {
                report.scheduled += 1;
            } else {
                report.unscheduled += 1;
            }
        }

        info!(
            "resync finished: cancelled={} scheduled={} unscheduled={}",
            report.cancelled, report.scheduled, report.unscheduled
        );
        report
    }

    fn build_request(&self, item: &Break, fire_at: DateTime<Utc>) -> NotificationRequest {
        NotificationRequest {
            tag: item.id.clone(),
            title: self.template.title.clone(),
            body: item.notification_body(),
            icon: Some(self.template.icon.clone()),
            badge: Some(self.template.badge.clone()),
            vibrate: self.template.vibrate.clone(),
            require_interaction: true,
            silent: false,
            timestamp: Some(fire_at),
            data: Some(NotificationData {
                url: break_path(&item.id),
            }),
            actions: vec![
                ActionButton {
                    action: NotificationAction::View,
                    title: self.template.view_action_title.clone(),
                },
                ActionButton {
                    action: NotificationAction::Skip,
                    title: self.template.skip_action_title.clone(),
                },
            ],
            show_trigger: None,
        }
    }

    fn arm_fallback(
        &self,
        request: NotificationRequest,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ScheduleOutcome {
        let delay = match (fire_at - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                debug!("fallback for break {} not armed, fire instant has passed", request.tag);
                return ScheduleOutcome::Expired;
            }
        };

        let tag = request.tag.clone();
        let host = Arc::clone(&self.host);
        let timers = Arc::clone(&self.timers);
        self.timers.arm(&tag, fire_at, move |generation| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                timers.remove_if_current(&request.tag, generation);
                match host.request_display(request.clone()).await {
                    Ok(()) => info!("fallback timer fired for break {}", request.tag),
                    Err(error) => warn!("fallback notification for {} failed: {error}", request.tag),
                }
            })
        });
        info!("armed fallback timer for break {tag} at {}", fire_at.to_rfc3339());
        ScheduleOutcome::Fallback { fire_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BreakDuration, Day};
    use crate::infrastructure::error::NotificationError;
    use crate::infrastructure::notification_host::{
        ActiveNotification, BackgroundHost, HostCapabilities, HostOptions,
    };
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;
    use url::Url;

    const NOW: &str = "2026-10-20T10:00:00Z";

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn options() -> HostOptions {
        HostOptions::new(Url::parse("http://localhost:9002/").expect("base url"))
    }

    fn fixed_now() -> NowProvider {
        let now = fixed_time(NOW);
        Arc::new(move || now)
    }

    fn host(options: HostOptions) -> Arc<BackgroundHost> {
        Arc::new(BackgroundHost::new(options).with_now_provider(fixed_now()))
    }

    fn dispatcher(host: Arc<dyn NotificationHost>) -> NotificationDispatcher {
        NotificationDispatcher::new(host, NotificationConfig::default(), Tz::UTC)
            .with_now_provider(fixed_now())
    }

    fn fallback_options() -> HostOptions {
        let mut options = options();
        options.deferred_triggers = false;
        options
    }

    fn sample_break(id: &str, days: &[Day], active: bool) -> Break {
        Break {
            id: id.to_string(),
            name: format!("Pausa {id}"),
            days: days.iter().copied().collect(),
            time: "09:00".to_string(),
            duration: BreakDuration::Five,
            reminder: None,
            active,
        }
    }

    fn tags(active: &[ActiveNotification]) -> Vec<String> {
        let mut tags = active.iter().map(|item| item.tag.clone()).collect::<Vec<_>>();
        tags.sort();
        tags
    }

    #[test]
    fn request_carries_deep_link_and_two_actions() {
        let dispatcher = dispatcher(host(options()));
        let mut item = sample_break("brk-1", &[Day::Monday], true);
        item.reminder = Some("Estira la espalda".to_string());

        let request = dispatcher.build_request(&item, fixed_time("2026-10-26T09:00:00Z"));
        assert_eq!(request.tag, "brk-1");
        assert_eq!(request.body, "Estira la espalda");
        assert_eq!(request.data.map(|data| data.url), Some("/break/brk-1".to_string()));
        let actions = request.actions.iter().map(|button| button.action).collect::<Vec<_>>();
        assert_eq!(actions, vec![NotificationAction::View, NotificationAction::Skip]);
        assert!(request.require_interaction);
        assert!(!request.silent);
        assert_eq!(request.vibrate, vec![200, 100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_uses_native_trigger_when_available() {
        let host = host(options());
        let dispatcher = dispatcher(host.clone());

        let outcome = dispatcher
            .schedule(&sample_break("brk-1", &[Day::Monday, Day::Wednesday], true))
            .await;

        let expected = fixed_time("2026-10-21T09:00:00Z");
        assert_eq!(outcome, ScheduleOutcome::Deferred { fire_at: expected });
        let pending = host.list_active(Some("brk-1")).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, Some(expected));
        assert_eq!(pending[0].body, "Es momento de 'Pausa brk-1'.");
        assert!(dispatcher.armed_fallbacks().is_empty());
    }

    #[tokio::test]
    async fn schedule_is_silent_without_permission_or_host() {
        let mut denied = options();
        denied.permission = Permission::Denied;
        let host_denied = host(denied);
        let outcome = dispatcher(host_denied.clone())
            .schedule(&sample_break("brk-1", &[Day::Monday], true))
            .await;
        assert_eq!(outcome, ScheduleOutcome::Skipped);
        assert!(host_denied.pending_tags().is_empty());

        let mut unavailable = options();
        unavailable.available = false;
        let outcome = dispatcher(host(unavailable))
            .schedule(&sample_break("brk-1", &[Day::Monday], true))
            .await;
        assert_eq!(outcome, ScheduleOutcome::Skipped);
    }

    #[tokio::test]
    async fn empty_day_set_has_no_occurrence() {
        let host = host(options());
        let outcome = dispatcher(host.clone())
            .schedule(&sample_break("brk-1", &[], true))
            .await;
        assert_eq!(outcome, ScheduleOutcome::NoOccurrence);
        assert!(host.pending_tags().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_trigger_falls_back_to_timer() {
        let mut rejecting = options();
        rejecting.reject_triggers = true;
        let host = host(rejecting);
        let dispatcher = dispatcher(host.clone());

        let outcome = dispatcher
            .schedule(&sample_break("brk-1", &[Day::Wednesday], true))
            .await;

        let expected = fixed_time("2026-10-21T09:00:00Z");
        assert_eq!(outcome, ScheduleOutcome::Fallback { fire_at: expected });
        assert_eq!(dispatcher.armed_fallbacks(), vec![("brk-1".to_string(), expected)]);
        assert!(host.pending_tags().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_timer_fires_once_and_leaves_registry() {
        let host = host(fallback_options());
        let dispatcher = dispatcher(host.clone());

        dispatcher
            .schedule(&sample_break("brk-1", &[Day::Wednesday], true))
            .await;
        assert_eq!(dispatcher.armed_fallbacks().len(), 1);

        tokio::time::sleep(StdDuration::from_secs(23 * 3600 + 1)).await;
        tokio::task::yield_now().await;

        let shown = host.displayed();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, "brk-1");
        assert_eq!(shown[0].show_trigger, None);
        assert!(dispatcher.armed_fallbacks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_twice_keeps_single_entry() {
        let host = host(fallback_options());
        let dispatcher = dispatcher(host.clone());
        let item = sample_break("brk-1", &[Day::Wednesday], true);

        dispatcher.schedule(&item).await;
        dispatcher.schedule(&item).await;
        assert_eq!(dispatcher.armed_fallbacks().len(), 1);

        tokio::time::sleep(StdDuration::from_secs(24 * 3600)).await;
        tokio::task::yield_now().await;
        assert_eq!(host.displayed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unknown_break_is_noop() {
        let granted_host = host(options());
        let granted = dispatcher(granted_host.clone());
        granted
            .schedule(&sample_break("brk-1", &[Day::Wednesday], true))
            .await;

        granted.cancel("missing").await;

        assert_eq!(granted_host.pending_tags(), vec!["brk-1".to_string()]);

        let mut unavailable = options();
        unavailable.available = false;
        let offline_host = host(unavailable);
        let offline = dispatcher(offline_host.clone());
        offline.cancel("missing").await;
        assert!(offline_host.pending_tags().is_empty());
        assert!(offline.armed_fallbacks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_invalidates_trigger_and_closes_visible() {
        let host = host(options());
        let dispatcher = dispatcher(host.clone());
        let item = sample_break("brk-1", &[Day::Wednesday], true);
        dispatcher.schedule(&item).await;

        dispatcher.cancel("brk-1").await;
        assert!(host.pending_tags().is_empty());

        host.request_display(dispatcher.build_request(&item, fixed_time(NOW)))
            .await
            .expect("show now");
        dispatcher.cancel("brk-1").await;
        assert!(host.list_active(None).await.expect("list").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resync_twice_yields_one_pending_per_active_break() {
        let host = host(options());
        let dispatcher = dispatcher(host.clone());
        let breaks = vec![
            sample_break("brk-1", &[Day::Monday, Day::Wednesday], true),
            sample_break("brk-2", &[Day::Friday], true),
            sample_break("brk-3", &[Day::Thursday], false),
        ];

        let first = dispatcher.resync(&breaks).await;
        let second = dispatcher.resync(&breaks).await;

        assert_eq!(first.scheduled, 2);
        assert_eq!(second.scheduled, 2);
        assert_eq!(second.cancelled, 2);
        assert_eq!(
            tags(&host.list_active(None).await.expect("list")),
            vec!["brk-1".to_string(), "brk-2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resync_is_idempotent_in_fallback_mode() {
        let host = host(fallback_options());
        let dispatcher = dispatcher(host.clone());
        let breaks = vec![
            sample_break("brk-1", &[Day::Wednesday], true),
            sample_break("brk-2", &[Day::Friday], true),
            sample_break("brk-3", &[Day::Thursday], false),
        ];

        dispatcher.resync(&breaks).await;
        dispatcher.resync(&breaks).await;

        let armed = dispatcher
            .armed_fallbacks()
            .into_iter()
            .map(|(tag, _)| tag)
            .collect::<Vec<_>>();
        assert_eq!(armed, vec!["brk-1".to_string(), "brk-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_closes_notifications_of_removed_breaks() {
        let host = host(options());
        let dispatcher = dispatcher(host.clone());
        let removed = sample_break("old", &[Day::Wednesday], true);
        host.request_display(dispatcher.build_request(&removed, fixed_time(NOW)))
            .await
            .expect("show");
        dispatcher.schedule(&removed).await;

        let report = dispatcher.resync(&[]).await;

        assert_eq!(report.cancelled, 1);
        assert_eq!(report.scheduled, 0);
        assert!(host.list_active(None).await.expect("list").is_empty());
    }

    struct UnlistableHost {
        inner: Arc<BackgroundHost>,
    }

    #[async_trait]
    impl NotificationHost for UnlistableHost {
        fn permission(&self) -> Permission {
            self.inner.permission()
        }

        fn capabilities(&self) -> HostCapabilities {
            self.inner.capabilities()
        }

        async fn ready(&self) -> Result<(), NotificationError> {
            self.inner.ready().await
        }

        async fn request_display(&self, request: NotificationRequest) -> Result<(), NotificationError> {
            self.inner.request_display(request).await
        }

        async fn list_active(&self, _tag: Option<&str>) -> Result<Vec<ActiveNotification>, NotificationError> {
            Err(NotificationError::Host("enumeration unsupported".to_string()))
        }

        async fn dismiss(&self, tag: &str) -> Result<(), NotificationError> {
            self.inner.dismiss(tag).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resync_continues_when_host_calls_fail() {
        let inner = host(options());
        let dispatcher = dispatcher(Arc::new(UnlistableHost {
            inner: inner.clone(),
        }));

        let report = dispatcher
            .resync(&[sample_break("brk-1", &[Day::Wednesday], true)])
            .await;

        assert_eq!(report.cancelled, 0);
        assert_eq!(report.scheduled, 1);
        assert_eq!(inner.pending_tags(), vec!["brk-1".to_string()]);
    }
}
