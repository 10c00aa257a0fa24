use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("message must not be empty")]
    EmptyInput,

    #[error("session `{0}` not found")]
    SessionNotFound(String),

    #[error("session `{0}` is already answering a message")]
    SessionBusy(String),

    #[error("session limit of {0} reached")]
    TooManySessions(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ChatError {
    pub(crate) fn tool(
        name: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ChatError::ToolInvocation {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Stable label used in logs and in the `error` event sent to the browser.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::ToolNotFound(_) => "tool_not_found",
            ChatError::ToolInvocation { .. } => "tool_invocation",
            ChatError::Authentication(_) => "authentication",
            ChatError::LanguageModel(_) => "language_model",
            ChatError::EmptyInput => "empty_input",
            ChatError::SessionNotFound(_) => "session_not_found",
            ChatError::SessionBusy(_) => "session_busy",
            ChatError::TooManySessions(_) => "too_many_sessions",
            ChatError::Config(_) => "config",
            ChatError::Protocol(_) => "protocol",
            ChatError::Io(_) => "io",
            ChatError::Serde(_) => "serde",
        }
    }
}
