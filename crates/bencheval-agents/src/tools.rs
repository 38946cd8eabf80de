//! Tools exposed to the reasoning loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use bencheval_core::{render_results, SearchBackend, SessionExecutor};

/// A callable tool. Errors are rendered into the observation text rather
/// than raised, so one bad call never aborts the loop.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, input: &str) -> String;
}

/// Name-indexed set of tools handed to an agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn AgentTool>) {
        self.tools.push(tool);
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn AgentTool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(Box::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One line per tool, for the system prompt.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Web search over one of the configured backends.
pub struct WebSearchTool {
    backend: Box<dyn SearchBackend>,
    limit: usize,
}

impl WebSearchTool {
    pub fn new(backend: Box<dyn SearchBackend>, limit: usize) -> Self {
        Self { backend, limit }
    }
}

#[async_trait]
impl AgentTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results for a query."
    }

    async fn call(&self, input: &str) -> String {
        let items = self.backend.search(input, self.limit).await;
        debug!(backend = self.backend.name(), count = items.len(), "web search tool ran");
        render_results(input, &items)
    }
}

/// Run a shell command in a throwaway container session.
pub struct CodeExecTool {
    executor: Arc<SessionExecutor>,
    image: String,
    wait_for: Duration,
}

impl CodeExecTool {
    pub fn new(executor: Arc<SessionExecutor>, image: impl Into<String>, wait_for: Duration) -> Self {
        Self {
            executor,
            image: image.into(),
            wait_for,
        }
    }
}

#[async_trait]
impl AgentTool for CodeExecTool {
    fn name(&self) -> &str {
        "code_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command inside a container and return its output."
    }

    async fn call(&self, input: &str) -> String {
        // Fresh session per call: tool invocations are independent.
        let session_key = Uuid::new_v4().simple().to_string();
        match self
            .executor
            .execute(&session_key, &self.image, input, self.wait_for)
            .await
        {
            Ok(output) => output,
            Err(err) => format!("[code_exec error] {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bencheval_core::SearchItem;

    struct StubBackend;

    #[async_trait]
    impl SearchBackend for StubBackend {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn search(&self, query: &str, _limit: usize) -> Vec<SearchItem> {
            vec![SearchItem {
                title: format!("about {query}"),
                url: "https://example.com".to_string(),
                description: None,
            }]
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl AgentTool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "a tool"
        }

        async fn call(&self, _input: &str) -> String {
            String::new()
        }
    }

    #[test]
    fn registry_lookup_is_by_name() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(NamedTool("alpha")));
        registry.register(Box::new(NamedTool("beta")));

        assert!(registry.lookup("alpha").is_some());
        assert!(registry.lookup("gamma").is_none());
        assert!(registry.catalog().contains("- beta: a tool"));
    }

    #[tokio::test]
    async fn web_search_tool_renders_results() {
        let tool = WebSearchTool::new(Box::new(StubBackend), 5);
        let observation = tool.call("rust").await;
        assert!(observation.contains("about rust"));
        assert!(observation.contains("https://example.com"));
    }
}
