use thiserror::Error;

/// Internal failures inside the Plugin Service. Never crosses the HTTP
/// boundary directly — handlers translate these into envelope fields or
/// status codes per the error propagation policy.
#[derive(Debug, Error)]
pub enum PluginServiceError {
    #[error("no such plugin: {0}")]
    NoSuchPlugin(String),

    #[error("no such session: {0}")]
    NoSuchSession(uuid::Uuid),

    #[error("unknown state: {0}")]
    UnknownState(String),

    #[error("unknown state transition")]
    UnknownStateTransition,

    #[error("invalid state for this operation")]
    InvalidState,

    #[error("failed to spawn plugin-runner: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("artifact packaging failed: {0}")]
    Packaging(#[source] std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal failures inside the Task Engine.
#[derive(Debug, Error)]
pub enum TaskEngineError {
    #[error("no such plan: {0}")]
    NoSuchPlan(String),

    #[error("no such scan: {0}")]
    NoSuchScan(uuid::Uuid),

    #[error("unknown state: {0}")]
    UnknownState(String),

    #[error("invalid state transition")]
    InvalidStateTransition,

    #[error("invalid configuration")]
    InvalidConfiguration,

    #[error("malformed token")]
    MalformedToken,

    #[error("plugin service request failed: {0}")]
    PluginService(#[from] reqwest::Error),

    #[error("scan store error: {0}")]
    Store(#[source] std::io::Error),
}
