//! A search-augmented chat assistant.
//!
//! The crate wires a Groq-hosted chat model to three read-only lookup tools
//! (web search, arXiv and Wikipedia) through a zero-shot ReAct loop:
//! - `Tool` and `ToolRegistry` describe and dispatch the lookups.
//! - `Agent` alternates between the model and the tools until it has a final answer.
//! - `ChatSession` keeps one browser's conversation and API key.
//! - `ChatServer` (feature `server`) serves the chat page and streams progress over SSE.

mod agent;
mod config;
mod conversation;
mod error;
mod hooks;
mod llm;
mod message;
#[cfg(feature = "server")]
mod server;
mod session;
mod telemetry;
mod tool;
pub mod tools;

pub use agent::{
    parse_output, Agent, AgentConfig, AgentDirective, AgentReply, HistoryMode, OutputParseError,
    ITERATION_LIMIT_ANSWER,
};
pub use config::{AppConfig, LoggingConfig, ModelConfig, ServerConfig, ToolsConfig};
pub use conversation::{Conversation, Speaker, Turn, GREETING};
pub use error::{ChatError, Result};
pub use hooks::{AgentEvent, AgentObserver, NoopObserver, TracingObserver};
pub use llm::{
    CompletionOptions, GroqClient, LanguageModel, ModelCompletion, StubModel, TokenUsage,
};
pub use message::{Message, Role};
#[cfg(feature = "server")]
pub use server::ChatServer;
pub use session::{ChatSession, Credential, GroqFactory, ModelFactory};
pub use telemetry::init_tracing;
pub use tool::{Tool, ToolDescription, ToolRegistry};
pub use tools::{
    search_toolkit, ArxivConfig, ArxivTool, DuckDuckGoConfig, DuckDuckGoSearchTool,
    SearchResult, WikipediaConfig, WikipediaTool,
};
