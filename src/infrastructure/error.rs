use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification permission has not been granted")]
    PermissionUnavailable,
    #[error("background notification host is not available")]
    HostUnavailable,
    #[error("deferred trigger rejected: {0}")]
    SchedulingFailure(String),
    #[error("notification host error: {0}")]
    Host(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("break not found: {0}")]
    ReferenceNotFound(String),
    #[error("no exercise fits break {0}")]
    PlanEmpty(String),
    #[error("session already finished")]
    AlreadyFinished,
    #[error(transparent)]
    Storage(#[from] InfraError),
}
