use thiserror::Error;

/// The stable, caller-distinguishable error taxonomy for the engine.
///
/// Each variant corresponds to one row of the error-kind table: callers
/// match on these to decide whether a failure is fatal to the whole run
/// or recorded as a per-operation result.
#[derive(Debug, Error)]
pub enum DrftError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("no provider can handle resource '{0}'")]
    ProviderNotFound(String),

    #[error("state error: {message}")]
    State {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("provider error for '{address}': {source}")]
    Provider {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DrftError {
    pub fn state(message: impl Into<String>) -> Self {
        DrftError::State {
            message: message.into(),
            source: None,
        }
    }

    pub fn state_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        DrftError::State {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn provider(address: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        DrftError::Provider {
            address: address.into(),
            source: source.into(),
        }
    }

    /// Whether this error must abort the whole run rather than being
    /// recorded as a single failed operation (see §7 propagation policy).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DrftError::ProviderNotFound(_) | DrftError::State { .. } | DrftError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DrftError>;
