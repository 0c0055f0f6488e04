use crate::domain::routes::absolute_url;
use crate::infrastructure::error::NotificationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use url::Url;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    Denied,
    Default,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    View,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionButton {
    pub action: NotificationAction,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationData {
    pub url: String,
}

/// Message handed to the host. `show_trigger` asks for deferred display;
/// without it the notification is shown immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub tag: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default)]
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub silent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationData>,
    #[serde(default)]
    pub actions: Vec<ActionButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_trigger: Option<DateTime<Utc>>,
}

impl NotificationRequest {
    /// Silent placeholder whose trigger is already in the past; overwrites
    /// any deferred notification armed under the same tag.
    pub fn expired(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            title: "Cancelling notification".to_string(),
            body: String::new(),
            icon: None,
            badge: None,
            vibrate: Vec::new(),
            require_interaction: false,
            silent: true,
            timestamp: None,
            data: None,
            actions: Vec::new(),
            show_trigger: Some(DateTime::<Utc>::UNIX_EPOCH),
        }
    }

    pub fn with_trigger(mut self, fire_at: DateTime<Utc>) -> Self {
        self.show_trigger = Some(fire_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveNotification {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub data: Option<NotificationData>,
    /// `Some` while the notification is still waiting for its trigger.
    pub fire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    pub deferred_triggers: bool,
}

#[async_trait]
pub trait NotificationHost: Send + Sync {
    fn permission(&self) -> Permission;
    fn capabilities(&self) -> HostCapabilities;
    async fn ready(&self) -> Result<(), NotificationError>;
    async fn request_display(&self, request: NotificationRequest) -> Result<(), NotificationError>;
    async fn list_active(&self, tag: Option<&str>) -> Result<Vec<ActiveNotification>, NotificationError>;
    async fn dismiss(&self, tag: &str) -> Result<(), NotificationError>;
}

/// Interaction delivered when the user clicks a shown notification.
/// `action` is `None` for a click on the notification body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserActionEvent {
    pub tag: String,
    pub action: Option<NotificationAction>,
    pub data: Option<NotificationData>,
}

#[async_trait]
pub trait WindowClients: Send + Sync {
    async fn match_all(&self) -> Vec<String>;
    async fn navigate(&self, client_id: &str, url: &Url) -> Result<(), NotificationError>;
    async fn focus(&self, client_id: &str) -> Result<(), NotificationError>;
    async fn open_window(&self, url: &Url) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Skipped,
    Focused { client_id: String, url: Url },
    Opened { url: Url },
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub permission: Permission,
    pub available: bool,
    pub deferred_triggers: bool,
    pub reject_triggers: bool,
    pub base_url: Url,
}

impl HostOptions {
    pub fn new(base_url: Url) -> Self {
        Self {
            permission: Permission::Granted,
            available: true,
            deferred_triggers: true,
            reject_triggers: false,
            base_url,
        }
    }
}

struct PendingTrigger {
    generation: u64,
    request: NotificationRequest,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct HostShared {
    visible: Mutex<Vec<NotificationRequest>>,
    pending: Mutex<HashMap<String, PendingTrigger>>,
    history: Mutex<Vec<NotificationRequest>>,
    generation: AtomicU64,
}

impl HostShared {
    fn display(&self, mut request: NotificationRequest) -> Result<(), NotificationError> {
        request.show_trigger = None;
        info!(
            "showing notification tag={} title='{}' body='{}' url={}",
            request.tag,
            request.title,
            request.body,
            request.data.as_ref().map_or("/", |data| data.url.as_str())
        );
        {
            let mut visible = lock(&self.visible)?;
            visible.retain(|existing| existing.tag != request.tag);
            visible.push(request.clone());
        }
        lock(&self.history)?.push(request);
        Ok(())
    }

    fn fire_pending(&self, tag: &str, generation: u64) -> Result<(), NotificationError> {
        let request = {
            let mut pending = lock(&self.pending)?;
            match pending.get(tag) {
                Some(trigger) if trigger.generation == generation => {
                    pending.remove(tag).map(|trigger| trigger.request)
                }
                _ => None,
            }
        };
        match request {
            Some(request) => self.display(request),
            None => Ok(()),
        }
    }
}

/// In-process notification host. Deferred triggers are armed as tokio timers
/// that outlive the caller; without the capability callers must arm their own.
pub struct BackgroundHost {
    options: HostOptions,
    shared: Arc<HostShared>,
    now_provider: NowProvider,
}

impl BackgroundHost {
    pub fn new(options: HostOptions) -> Self {
        Self {
            options,
            shared: Arc::new(HostShared::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Every notification that reached the screen, oldest first.
    pub fn displayed(&self) -> Vec<NotificationRequest> {
        self.shared
            .history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn pending_tags(&self) -> Vec<String> {
        let mut tags = self
            .shared
            .pending
            .lock()
            .map(|pending| pending.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        tags.sort();
        tags
    }

    pub async fn on_user_action(
        &self,
        event: UserActionEvent,
        clients: &dyn WindowClients,
    ) -> Result<ActionOutcome, NotificationError> {
        self.dismiss(&event.tag).await?;

        if event.action == Some(NotificationAction::Skip) {
            info!("notification {} skipped by user", event.tag);
            return Ok(ActionOutcome::Skipped);
        }

        let path = event
            .data
            .as_ref()
            .map(|data| data.url.as_str())
            .unwrap_or("/");
        let url = absolute_url(&self.options.base_url, path)
            .map_err(|error| NotificationError::Host(format!("invalid notification url '{path}': {error}")))?;

        if let Some(client_id) = clients.match_all().await.into_iter().next() {
            clients.navigate(&client_id, &url).await?;
            clients.focus(&client_id).await?;
            return Ok(ActionOutcome::Focused { client_id, url });
        }

        clients.open_window(&url).await?;
        Ok(ActionOutcome::Opened { url })
    }

    fn arm_trigger(&self, request: NotificationRequest, fire_at: DateTime<Utc>) -> Result<(), NotificationError> {
        let tag = request.tag.clone();
        let mut pending = lock(&self.shared.pending)?;
        if let Some(previous) = pending.remove(&tag) {
            previous.handle.abort();
            debug!("replaced deferred notification for tag={tag}");
        }

        let delay = fire_at - (self.now_provider)();
        let Ok(delay) = delay.to_std() else {
            debug!("dropped expired trigger for tag={tag}");
            return Ok(());
        };
        if delay.is_zero() {
            debug!("dropped expired trigger for tag={tag}");
            return Ok(());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let task_tag = tag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = shared.fire_pending(&task_tag, generation) {
                warn!("failed to show deferred notification {task_tag}: {error}");
            }
        });

        pending.insert(
            tag,
            PendingTrigger {
                generation,
                request,
                fire_at,
                handle,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationHost for BackgroundHost {
    fn permission(&self) -> Permission {
        self.options.permission
    }

    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            deferred_triggers: self.options.deferred_triggers,
        }
    }

    async fn ready(&self) -> Result<(), NotificationError> {
        if self.options.available {
            Ok(())
        } else {
            Err(NotificationError::HostUnavailable)
        }
    }

    async fn request_display(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        self.ready().await?;
        if self.options.permission != Permission::Granted {
            return Err(NotificationError::PermissionUnavailable);
        }

        match request.show_trigger {
            Some(_) if !self.options.deferred_triggers => Err(NotificationError::SchedulingFailure(
                "deferred triggers are not supported".to_string(),
            )),
            Some(_) if self.options.reject_triggers => Err(NotificationError::SchedulingFailure(
                format!("trigger for tag={} was rejected", request.tag),
            )),
            Some(fire_at) => self.arm_trigger(request, fire_at),
            None => self.shared.display(request),
        }
    }

    async fn list_active(&self, tag: Option<&str>) -> Result<Vec<ActiveNotification>, NotificationError> {
        let matches = |candidate: &str| tag.is_none_or(|wanted| wanted == candidate);

        let mut active = lock(&self.shared.visible)?
            .iter()
            .filter(|request| matches(&request.tag))
            .map(|request| ActiveNotification {
                tag: request.tag.clone(),
                title: request.title.clone(),
                body: request.body.clone(),
                data: request.data.clone(),
                fire_at: None,
            })
            .collect::<Vec<_>>();

        let pending = lock(&self.shared.pending)?;
        let mut waiting = pending
            .values()
            .filter(|trigger| matches(&trigger.request.tag))
            .map(|trigger| ActiveNotification {
                tag: trigger.request.tag.clone(),
                title: trigger.request.title.clone(),
                body: trigger.request.body.clone(),
                data: trigger.request.data.clone(),
                fire_at: Some(trigger.fire_at),
            })
            .collect::<Vec<_>>();
        waiting.sort_by(|left, right| left.tag.cmp(&right.tag));
        active.extend(waiting);
        Ok(active)
    }

    async fn dismiss(&self, tag: &str) -> Result<(), NotificationError> {
        lock(&self.shared.visible)?.retain(|request| request.tag != tag);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, NotificationError> {
    mutex
        .lock()
        .map_err(|error| NotificationError::Host(format!("notification host lock poisoned: {error}")))
}
