use weft_api::error::Error as ApiError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("graph not found: {0}")]
    GraphNotFound(String),

    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("extension '{0}' is already registered")]
    ExtensionExists(String),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Api` variants, context is added to the inner error record.
    /// For other variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Api(e) => EngineError::Api(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
