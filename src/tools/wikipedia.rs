//! Wikipedia tool.
//!
//! Searches Wikipedia for matching pages and returns their summaries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{http_client, MAX_QUERY_CHARS, USER_AGENT};
use crate::error::{ChatError, Result};
use crate::tool::{truncate_chars, Tool};

const TOOL_NAME: &str = "wikipedia";
const NO_RESULT: &str = "No good Wikipedia Search Result was found";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    pub top_k_results: usize,
    pub doc_content_chars_max: usize,
    pub lang: String,
    /// Overrides `https://{lang}.wikipedia.org`.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            top_k_results: 1,
            doc_content_chars_max: 200,
            lang: "en".to_string(),
            base_url: None,
            timeout_secs: 10,
        }
    }
}

impl WikipediaConfig {
    fn host(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.wikipedia.org", self.lang))
    }
}

pub struct WikipediaTool {
    client: reqwest::Client,
    config: WikipediaConfig,
}

impl WikipediaTool {
    pub fn new(config: WikipediaConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(TOOL_NAME, config.timeout_secs, USER_AGENT)?,
            config,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ChatError::tool(TOOL_NAME, e))?
            .json()
            .await
            .map_err(|e| ChatError::tool(TOOL_NAME, e))
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/w/api.php?action=query&list=search&srsearch={}&srlimit={}&format=json",
            self.config.host(),
            urlencoding::encode(query),
            self.config.top_k_results
        );
        debug!(tool = TOOL_NAME, %url, "searching Wikipedia");
        let json = self.get_json(&url).await?;

        Ok(json["query"]["search"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit["title"].as_str())
                    .take(self.config.top_k_results)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn page_summary(&self, title: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/api/rest_v1/page/summary/{}",
            self.config.host(),
            urlencoding::encode(&title.replace(' ', "_"))
        );
        let json = self.get_json(&url).await?;
        Ok(json["extract"]
            .as_str()
            .filter(|extract| !extract.trim().is_empty())
            .map(|extract| format!("Page: {title}\nSummary: {}", extract.trim())))
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "A wrapper around Wikipedia. Useful for when you need to answer general questions \
         about people, places, companies, facts, historical events, or other subjects. \
         Input should be a search query."
    }

    async fn run(&self, query: &str) -> Result<String> {
        let query = truncate_chars(query.trim(), MAX_QUERY_CHARS);
        let titles = self.search_titles(&query).await?;

        let mut summaries = Vec::new();
        for title in &titles {
            // A page that vanished or has no extract is skipped, like a search miss.
            match self.page_summary(title).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(err) => warn!(tool = TOOL_NAME, %title, error = %err, "skipping page"),
            }
        }

        if summaries.is_empty() {
            return Ok(NO_RESULT.to_string());
        }
        Ok(truncate_chars(
            &summaries.join("\n\n"),
            self.config.doc_content_chars_max,
        ))
    }
}
