//! Lookup tools the search agent can call.
//!
//! - DuckDuckGo: open-web search snippets
//! - Arxiv: paper metadata and abstracts
//! - Wikipedia: article summaries
//!
//! Arxiv and Wikipedia cap both the number of results and the length of the
//! text handed back to the model.

pub mod arxiv;
pub mod duckduckgo;
pub mod wikipedia;

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

pub use arxiv::{ArxivConfig, ArxivTool};
pub use duckduckgo::{DuckDuckGoConfig, DuckDuckGoSearchTool, SearchResult};
pub use wikipedia::{WikipediaConfig, WikipediaTool};

use crate::error::{ChatError, Result};
use crate::tool::ToolRegistry;

/// Queries longer than this are clipped before being sent to arXiv or Wikipedia.
pub const MAX_QUERY_CHARS: usize = 300;

const USER_AGENT: &str = "search-chat/0.1 (https://github.com/search-chat/search-chat)";

/// Build the registry with the web, paper and encyclopedia tools, in that order.
pub fn search_toolkit(
    search: DuckDuckGoConfig,
    arxiv: ArxivConfig,
    wikipedia: WikipediaConfig,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(DuckDuckGoSearchTool::new(search)?);
    registry.register(ArxivTool::new(arxiv)?);
    registry.register(WikipediaTool::new(wikipedia)?);
    Ok(registry)
}

fn http_client(tool: &str, timeout_secs: u64, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .build()
        .map_err(|e| ChatError::tool(tool, e))
}

/// Simple HTML entity decoding
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn strip_tags(s: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
    tag.replace_all(s, "").into_owned()
}

/// Collapse runs of whitespace (including newlines) into single spaces.
fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
