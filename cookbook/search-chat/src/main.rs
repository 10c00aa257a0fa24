use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use search_chat::{init_tracing, search_toolkit, AppConfig, ChatServer, GroqFactory, Result};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "search-chat", about = "Chat with an assistant that can search the web")]
struct CliArgs {
    /// TOML settings file; `SEARCH_CHAT_*` variables override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if args.json_logs {
        config.logging.json = true;
    }
    init_tracing(&config.logging)?;

    let tools = search_toolkit(
        config.tools.search.clone(),
        config.tools.arxiv.clone(),
        config.tools.wikipedia.clone(),
    )?;
    info!(
        tools = ?tools.names(),
        model = %config.model.model,
        streaming = config.model.stream,
        "search chat ready"
    );

    let addr = config.server.socket_addr()?;
    ChatServer::new(GroqFactory::new(config.model.clone()), tools, config.agent.clone())
        .with_temperature(config.model.temperature)
        .with_session_limits(
            Duration::from_secs(config.server.session_idle_secs),
            config.server.max_sessions,
        )
        .serve(addr)
        .await
}
