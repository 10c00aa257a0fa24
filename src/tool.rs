use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ChatError, Result};

/// A lookup source the agent can query with free text.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self, query: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
}

/// Tools by name. Registration order is kept so prompts list tools stably.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, query: &str) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ChatError::ToolNotFound(name.to_string()))?;
        tool.run(query).await
    }
}

/// Keep at most `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
