//! Arxiv tool for searching academic papers.
//!
//! Queries the arXiv Atom API and renders the top entries as short plain text.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{html_decode, http_client, squash_whitespace, MAX_QUERY_CHARS, USER_AGENT};
use crate::error::{ChatError, Result};
use crate::tool::{truncate_chars, Tool};

const TOOL_NAME: &str = "arxiv";
const NO_RESULT: &str = "No good Arxiv Result was found";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    pub top_k_results: usize,
    pub doc_content_chars_max: usize,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            top_k_results: 1,
            doc_content_chars_max: 200,
            base_url: "http://export.arxiv.org/api/query".to_string(),
            timeout_secs: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arxiv Search Tool
// ─────────────────────────────────────────────────────────────────────────────

pub struct ArxivTool {
    client: reqwest::Client,
    config: ArxivConfig,
}

impl ArxivTool {
    pub fn new(config: ArxivConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(TOOL_NAME, config.timeout_secs, USER_AGENT)?,
            config,
        })
    }

    fn query_url(&self, query: &str) -> String {
        if is_arxiv_identifier(query) {
            let ids: Vec<&str> = query.split_whitespace().collect();
            format!(
                "{}?id_list={}&max_results={}",
                self.config.base_url,
                urlencoding::encode(&ids.join(",")),
                self.config.top_k_results
            )
        } else {
            format!(
                "{}?search_query={}&start=0&max_results={}",
                self.config.base_url,
                urlencoding::encode(&format!("all:{query}")),
                self.config.top_k_results
            )
        }
    }
}

#[async_trait]
impl Tool for ArxivTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "A wrapper around Arxiv.org. Useful for when you need to answer questions about Physics, \
         Mathematics, Computer Science, Quantitative Biology, Quantitative Finance, Statistics, \
         Electrical Engineering, and Economics from scientific articles on arxiv.org. \
         Input should be a search query."
    }

    async fn run(&self, query: &str) -> Result<String> {
        let query = truncate_chars(query.trim(), MAX_QUERY_CHARS);
        let url = self.query_url(&query);
        debug!(tool = TOOL_NAME, %url, "querying arXiv");

        let xml = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ChatError::tool(TOOL_NAME, e))?
            .text()
            .await
            .map_err(|e| ChatError::tool(TOOL_NAME, e))?;

        let papers = parse_feed(&xml, self.config.top_k_results);
        if papers.is_empty() {
            return Ok(NO_RESULT.to_string());
        }

        let text = papers
            .iter()
            .map(Paper::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(truncate_chars(&text, self.config.doc_content_chars_max))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Paper {
    published: String,
    title: String,
    authors: Vec<String>,
    summary: String,
}

impl Paper {
    fn render(&self) -> String {
        format!(
            "Published: {}\nTitle: {}\nAuthors: {}\nSummary: {}",
            self.published,
            self.title,
            self.authors.join(", "),
            self.summary
        )
    }
}

fn parse_feed(xml: &str, limit: usize) -> Vec<Paper> {
    let mut papers = Vec::new();

    for entry in xml.split("<entry>").skip(1) {
        if papers.len() >= limit {
            break;
        }
        let Some(end) = entry.find("</entry>") else {
            continue;
        };
        let entry_xml = &entry[..end];

        let Some(title) = extract_xml_content(entry_xml, "title") else {
            continue;
        };
        let summary = extract_xml_content(entry_xml, "summary").unwrap_or_default();
        let published = extract_xml_content(entry_xml, "updated")
            .or_else(|| extract_xml_content(entry_xml, "published"))
            .map(|stamp| stamp.trim().chars().take(10).collect())
            .unwrap_or_default();

        let authors = entry_xml
            .split("<author>")
            .skip(1)
            .filter_map(|block| extract_xml_content(block, "name"))
            .map(|name| html_decode(name.trim()))
            .collect();

        papers.push(Paper {
            published,
            title: html_decode(&squash_whitespace(&title)),
            authors,
            summary: html_decode(&squash_whitespace(&summary)),
        });
    }

    papers
}

fn extract_xml_content(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)?;
    let after_start = &xml[start..];
    let content_start = after_start.find('>')?;
    let content_after = &after_start[content_start + 1..];
    let end = content_after.find(&end_tag)?;
    Some(content_after[..end].to_string())
}

/// True when every whitespace-separated token looks like an arXiv id
/// (`2301.01234`, `2301.01234v2` or a legacy seven digit id).
fn is_arxiv_identifier(query: &str) -> bool {
    static ID: OnceLock<Regex> = OnceLock::new();
    let id = ID.get_or_init(|| {
        Regex::new(r"^(\d{2}(0[1-9]|1[0-2])\.\d{4,5}(v\d+)?|\d{7}.*)$")
            .expect("arxiv id pattern is valid")
    });
    let mut tokens = query.split_whitespace().peekable();
    tokens.peek().is_some() && tokens.all(|token| id.is_match(token))
}
