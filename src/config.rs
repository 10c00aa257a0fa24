use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::error::{ChatError, Result};
use crate::tools::{ArxivConfig, DuckDuckGoConfig, WikipediaConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions untouched for this long are discarded with their key.
    pub session_idle_secs: u64,
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8501,
            session_idle_secs: 1800,
            max_sessions: 1000,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|err| ChatError::Config(format!("invalid listen address: {err}")))
    }
}

/// Chat-completion endpoint settings. The API key is not part of the
/// configuration; each session supplies its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instant".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            stream: true,
            temperature: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub search: DuckDuckGoConfig,
    pub arxiv: ArxivConfig,
    pub wikipedia: WikipediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,search_chat=debug".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| ChatError::Config(format!("Failed to parse configuration: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Defaults (or the given file) with environment overrides applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_env_or_file(path),
            None => {
                let mut cfg = Self::default();
                cfg.apply_env()?;
                Ok(cfg)
            }
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("SEARCH_CHAT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SEARCH_CHAT_PORT") {
            self.server.port = parse_env("SEARCH_CHAT_PORT", &port)?;
        }
        if let Ok(model) = env::var("SEARCH_CHAT_MODEL") {
            self.model.model = model;
        }
        if let Ok(base_url) = env::var("SEARCH_CHAT_MODEL_BASE_URL") {
            self.model.base_url = base_url;
        }
        if let Ok(stream) = env::var("SEARCH_CHAT_STREAMING") {
            self.model.stream = parse_env("SEARCH_CHAT_STREAMING", &stream)?;
        }
        if let Ok(max) = env::var("SEARCH_CHAT_MAX_ITERATIONS") {
            let max: usize = parse_env("SEARCH_CHAT_MAX_ITERATIONS", &max)?;
            self.agent.max_iterations = max.max(1);
        }
        if let Ok(history) = env::var("SEARCH_CHAT_HISTORY") {
            self.agent.history = parse_env("SEARCH_CHAT_HISTORY", &history)?;
        }
        if let Ok(json) = env::var("SEARCH_CHAT_JSON_LOGS") {
            self.logging.json = parse_env("SEARCH_CHAT_JSON_LOGS", &json)?;
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| ChatError::Config(format!("{name}={raw:?} is invalid: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::HistoryMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.tools.arxiv.top_k_results, 1);
        assert_eq!(cfg.tools.arxiv.doc_content_chars_max, 200);
        assert_eq!(cfg.tools.wikipedia.top_k_results, 1);
        assert_eq!(cfg.tools.wikipedia.doc_content_chars_max, 200);
        assert_eq!(cfg.agent.max_iterations, 15);
        assert_eq!(cfg.agent.history, HistoryMode::Full);
    }

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nhost='0.0.0.0'\nport=9000\n[model]\nmodel='llama3-8b-8192'\nstream=false\n\
             [agent]\nhistory='last_turn'\n[tools.wikipedia]\nlang='de'"
        )
        .unwrap();

        env::set_var("SEARCH_CHAT_PORT", "9100");
        let cfg = AppConfig::from_env_or_file(file.path());
        env::remove_var("SEARCH_CHAT_PORT");
        let cfg = cfg.unwrap();

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.model.model, "llama3-8b-8192");
        assert!(!cfg.model.stream);
        assert_eq!(cfg.agent.history, HistoryMode::LastTurn);
        assert_eq!(cfg.tools.wikipedia.lang, "de");
        assert_eq!(cfg.tools.wikipedia.doc_content_chars_max, 200);
        assert_eq!(cfg.server.socket_addr().unwrap().port(), 9100);
    }

    #[test]
    fn bundled_sample_matches_defaults() {
        let cfg = AppConfig::from_toml(include_str!("../search-chat.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            AppConfig::from_toml("[server]\nport='eighty'"),
            Err(ChatError::Config(_))
        ));
        assert!(parse_env::<u16>("SEARCH_CHAT_PORT", "99999").is_err());
        assert!(parse_env::<HistoryMode>("SEARCH_CHAT_HISTORY", "everything").is_err());
    }
}
