use thiserror::Error;

/// Failures surfaced by [`MessageBus`](crate::events::MessageBus) publishes.
///
/// The bus never fails on its own: no subscribers or subscribers without the
/// capability for a message are not errors. Only handler failures end up here.
#[derive(Error, Debug)]
pub enum BusError {
    /// First failing handler under [`FailurePolicy::FailFast`](crate::events::FailurePolicy).
    /// Subscribers after it did not receive the message.
    #[error("Handler for {message_type} failed: {source}")]
    Handler {
        message_type: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Every failure collected under [`FailurePolicy::Isolate`](crate::events::FailurePolicy).
    /// All capable subscribers received the message.
    #[error("{} handler(s) for {message_type} failed", .failures.len())]
    Handlers {
        message_type: &'static str,
        failures: Vec<anyhow::Error>,
    },
}

impl BusError {
    pub fn message_type(&self) -> &'static str {
        match self {
            BusError::Handler { message_type, .. } | BusError::Handlers { message_type, .. } => {
                message_type
            }
        }
    }

    /// Number of handlers that failed during the publish.
    pub fn failure_count(&self) -> usize {
        match self {
            BusError::Handler { .. } => 1,
            BusError::Handlers { failures, .. } => failures.len(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ViewStateError {
    #[error("View state '{0}' has already been disposed")]
    AlreadyDisposed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Error, Debug)]
pub enum NavigationError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Navigation to '{page}' failed: {source}")]
    Navigator {
        page: String,
        #[source]
        source: anyhow::Error,
    },
}
