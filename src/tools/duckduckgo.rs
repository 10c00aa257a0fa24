//! DuckDuckGo search tool.
//!
//! Provides open-web search via DuckDuckGo's HTML interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{html_decode, http_client, squash_whitespace, strip_tags};
use crate::error::{ChatError, Result};
use crate::tool::Tool;

const TOOL_NAME: &str = "Search";
const NO_RESULT: &str = "No good DuckDuckGo Search Result was found";

/// DuckDuckGo search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Configuration for the DuckDuckGo tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckDuckGoConfig {
    pub max_results: usize,
    pub timeout_secs: u64,
    pub region: String,
    pub base_url: String,
}

impl Default for DuckDuckGoConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            timeout_secs: 10,
            region: "wt-wt".to_string(),
            base_url: "https://html.duckduckgo.com/html/".to_string(),
        }
    }
}

pub struct DuckDuckGoSearchTool {
    client: reqwest::Client,
    config: DuckDuckGoConfig,
}

impl DuckDuckGoSearchTool {
    pub fn new(config: DuckDuckGoConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(
                TOOL_NAME,
                config.timeout_secs,
                "Mozilla/5.0 (compatible; SearchChat/0.1)",
            )?,
            config,
        })
    }

    /// Perform a DuckDuckGo search using the HTML interface
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = format!(
            "{}?q={}&kl={}",
            self.config.base_url,
            urlencoding::encode(query),
            urlencoding::encode(&self.config.region)
        );
        debug!(tool = TOOL_NAME, %url, "querying DuckDuckGo");

        let html = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ChatError::tool(TOOL_NAME, e))?
            .text()
            .await
            .map_err(|e| ChatError::tool(TOOL_NAME, e))?;

        Ok(parse_duckduckgo_html(&html, self.config.max_results))
    }
}

#[async_trait]
impl Tool for DuckDuckGoSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "A wrapper around DuckDuckGo Search. Useful for when you need to answer questions \
         about current events. Input should be a search query."
    }

    async fn run(&self, query: &str) -> Result<String> {
        let results = self.search(query.trim()).await?;
        if results.is_empty() {
            return Ok(NO_RESULT.to_string());
        }

        Ok(results
            .iter()
            .map(|result| {
                if result.body.is_empty() {
                    result.title.as_str()
                } else {
                    result.body.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Parse DuckDuckGo HTML response to extract search results.
///
/// Results look like `<a class="result__a" href="...">title</a>` followed by
/// `<a class="result__snippet" ...>body</a>`.
fn parse_duckduckgo_html(html: &str, max_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"result__a\"").skip(1) {
        if results.len() >= max_results {
            break;
        }

        let href = chunk
            .split("href=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .map(resolve_redirect)
            .unwrap_or_default();

        let title = element_text(chunk).unwrap_or_default();

        let body = chunk
            .split("class=\"result__snippet\"")
            .nth(1)
            .and_then(element_text)
            .unwrap_or_default();

        if !title.is_empty() || !body.is_empty() {
            results.push(SearchResult { title, href, body });
        }
    }

    results
}

/// Text between the end of the opening tag and the next `</a>`.
fn element_text(fragment: &str) -> Option<String> {
    let open_end = fragment.find('>')?;
    let rest = &fragment[open_end + 1..];
    let inner = rest.split("</a>").next()?;
    let text = squash_whitespace(&html_decode(&strip_tags(inner)));
    (!text.is_empty()).then_some(text)
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded target>`.
fn resolve_redirect(href: &str) -> String {
    let href = html_decode(href);
    if let Some(target) = href
        .split("uddg=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
    {
        if let Ok(decoded) = urlencoding::decode(target) {
            return decoded.into_owned();
        }
    }
    if let Some(stripped) = href.strip_prefix("//") {
        return format!("https://{stripped}");
    }
    href
}
