use thiserror::Error;

/// Top-level error type for zapflow collaborators.
#[derive(Debug, Error)]
pub enum ZapError {
    /// Error from a model provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Error from the messaging transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Memory/storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Calendar backend error.
    #[error("calendar error: {0}")]
    Calendar(String),

    /// Mail delivery error.
    #[error("mail error: {0}")]
    Mail(String),

    /// Web fetch error.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
