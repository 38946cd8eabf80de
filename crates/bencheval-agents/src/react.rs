//! ReAct-style loop over the `graph_flow` runtime.
//!
//! One graph per run: a reason task samples the model, a conditional edge
//! routes to either the act task (tool dispatch, then back to reason) or a
//! finish task once a final answer appears.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use graph_flow::{
    Context, ExecutionStatus, FlowRunner, GraphBuilder, InMemorySessionStorage, NextAction,
    Session, SessionStorage, Task, TaskResult,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use bencheval_core::{ChatMessage, Sampler, SamplerResponse};

use crate::tools::ToolRegistry;

const FINAL_ANSWER_MARKER: &str = "Final Answer:";
const MAX_SAMPLE_ATTEMPTS: usize = 3;
const DEFAULT_MAX_STEPS: usize = 8;

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub final_text: String,
    pub transcript: Vec<ChatMessage>,
    pub steps: usize,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub tool: String,
    pub input: String,
}

/// Tool-using agent: a sampler, a tool registry and a system prompt wired
/// into the graph executor.
pub struct ReactAgent {
    sampler: Arc<dyn Sampler>,
    system_prompt: String,
    registry: Arc<ToolRegistry>,
    max_steps: usize,
}

impl ReactAgent {
    pub fn new(
        sampler: Arc<dyn Sampler>,
        system_prompt: impl Into<String>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            sampler,
            system_prompt: system_prompt.into(),
            registry: Arc::new(registry),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Run the loop to completion and return the final answer plus the full
    /// transcript.
    pub async fn run(&self, messages: Vec<ChatMessage>) -> Result<AgentResponse> {
        let reason = Arc::new(ReasonTask {
            sampler: Arc::clone(&self.sampler),
            max_steps: self.max_steps,
        });
        let act = Arc::new(ActTask {
            registry: Arc::clone(&self.registry),
        });
        let finish = Arc::new(FinishTask);

        let graph = Arc::new(
            GraphBuilder::new("react_agent")
                .add_task(reason.clone())
                .add_task(act.clone())
                .add_task(finish.clone())
                .add_conditional_edge(
                    reason.id(),
                    |ctx| ctx.get_sync::<bool>("agent.finished").unwrap_or(false),
                    finish.id(),
                    act.id(),
                )
                .add_edge(act.id(), reason.id())
                .set_start_task(reason.id())
                .build(),
        );

        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(graph, storage.clone());

        let session_id = format!("react-{}", Uuid::new_v4());
        let session = Session::new_from_task(session_id.clone(), reason.id());

        let mut transcript = Vec::with_capacity(messages.len() + 1);
        transcript.push(ChatMessage::system(self.render_system_prompt()));
        transcript.extend(messages);

        session.context.set("agent.messages", &transcript).await;
        session.context.set("agent.steps", 0usize).await;

        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist agent session: {err}"))?;

        loop {
            let result = runner
                .run(&session_id)
                .await
                .map_err(|err| anyhow!("agent graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(anyhow!(message)),
            }
        }

        let session = storage
            .get(&session_id)
            .await
            .map_err(|err| anyhow!("failed to reload agent session: {err}"))?
            .ok_or_else(|| anyhow!("agent session missing after execution"))?;

        if let Some(error) = session.context.get::<String>("agent.error").await {
            return Err(anyhow!(error));
        }

        let final_text: String = session.context.get("agent.final").await.unwrap_or_default();
        let transcript: Vec<ChatMessage> =
            session.context.get("agent.messages").await.unwrap_or_default();
        let steps: usize = session.context.get("agent.steps").await.unwrap_or(0);

        Ok(AgentResponse {
            final_text,
            transcript,
            steps,
        })
    }

    fn render_system_prompt(&self) -> String {
        if self.registry.is_empty() {
            return self.system_prompt.clone();
        }

        format!(
            "{}\n\nYou can call these tools:\n{}\n\n\
             To call a tool, reply with exactly:\n\
             Action: <tool name>\n\
             Action Input: <tool input>\n\
             After each call you receive an Observation. When you have the \
             answer, reply with:\n\
             Final Answer: <answer>",
            self.system_prompt,
            self.registry.catalog()
        )
    }
}

/// Exposes the agent loop through the plain sampler interface, so eval
/// runners can swap a tool-using agent in for a bare model call.
pub struct AgentSampler {
    agent: ReactAgent,
}

impl AgentSampler {
    pub fn new(agent: ReactAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Sampler for AgentSampler {
    async fn sample(&self, messages: &[ChatMessage]) -> Result<SamplerResponse> {
        let response = self.agent.run(messages.to_vec()).await?;
        Ok(SamplerResponse {
            response_text: response.final_text,
            queried_messages: messages.to_vec(),
        })
    }
}

/// Bounded-retry wrapper around a sampler call. Retries live only here.
pub(crate) async fn sample_with_retry(
    sampler: &dyn Sampler,
    messages: &[ChatMessage],
) -> Result<SamplerResponse> {
    let mut last_error = None;
    for attempt in 1..=MAX_SAMPLE_ATTEMPTS {
        match sampler.sample(messages).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                warn!(attempt, error = %err, "sampler call failed");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("sampler call never attempted")))
}

/// Pull the text after the final-answer marker, or the whole text when the
/// model skipped the marker.
pub fn extract_final_answer(text: &str) -> String {
    match text.find(FINAL_ANSWER_MARKER) {
        Some(idx) => text[idx + FINAL_ANSWER_MARKER.len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn parse_action(text: &str) -> Option<PendingAction> {
    if text.contains(FINAL_ANSWER_MARKER) {
        return None;
    }

    let mut tool = None;
    let mut input = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Action Input:") {
            input = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("Action:") {
            tool = Some(rest.trim().to_string());
        }
    }

    match (tool, input) {
        (Some(tool), Some(input)) if !tool.is_empty() => Some(PendingAction { tool, input }),
        _ => None,
    }
}

struct ReasonTask {
    sampler: Arc<dyn Sampler>,
    max_steps: usize,
}

#[async_trait]
impl Task for ReasonTask {
    fn id(&self) -> &str {
        "reason"
    }

    #[instrument(name = "task.reason", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let mut messages: Vec<ChatMessage> =
            context.get("agent.messages").await.unwrap_or_default();
        let steps: usize = context.get("agent.steps").await.unwrap_or(0);

        match sample_with_retry(self.sampler.as_ref(), &messages).await {
            Ok(response) => {
                let text = response.response_text;
                messages.push(ChatMessage::assistant(text.clone()));
                context.set("agent.messages", &messages).await;
                let steps = steps + 1;
                context.set("agent.steps", steps).await;

                match parse_action(&text) {
                    Some(action) if steps < self.max_steps => {
                        info!(tool = %action.tool, steps, "model requested a tool call");
                        context.set("agent.action", &action).await;
                        context.set_sync("agent.finished", false);
                    }
                    Some(_) => {
                        warn!(steps, "step budget exhausted; forcing final answer");
                        context.set("agent.final", extract_final_answer(&text)).await;
                        context.set_sync("agent.finished", true);
                    }
                    None => {
                        context.set("agent.final", extract_final_answer(&text)).await;
                        context.set_sync("agent.finished", true);
                    }
                }
            }
            Err(err) => {
                context.set("agent.error", err.to_string()).await;
                context.set_sync("agent.finished", true);
            }
        }

        Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
    }
}

struct ActTask {
    registry: Arc<ToolRegistry>,
}

#[async_trait]
impl Task for ActTask {
    fn id(&self) -> &str {
        "act"
    }

    #[instrument(name = "task.act", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let action: Option<PendingAction> = context.get("agent.action").await;
        let mut messages: Vec<ChatMessage> =
            context.get("agent.messages").await.unwrap_or_default();

        let observation = match action {
            Some(action) => match self.registry.lookup(&action.tool) {
                Some(tool) => tool.call(&action.input).await,
                None => format!("unknown tool '{}'", action.tool),
            },
            None => "no tool call recorded".to_string(),
        };

        messages.push(ChatMessage::user(format!("Observation: {observation}")));
        context.set("agent.messages", &messages).await;

        Ok(TaskResult::new(None, NextAction::ContinueAndExecute))
    }
}

struct FinishTask;

#[async_trait]
impl Task for FinishTask {
    fn id(&self) -> &str {
        "finish"
    }

    #[instrument(name = "task.finish", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let final_text: String = context.get("agent.final").await.unwrap_or_default();
        Ok(TaskResult::new(Some(final_text), NextAction::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::AgentTool;
    use std::sync::Mutex;

    struct ScriptedSampler {
        responses: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedSampler {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl Sampler for ScriptedSampler {
        async fn sample(&self, messages: &[ChatMessage]) -> Result<SamplerResponse> {
            let next = self
                .responses
                .lock()
                .expect("lock")
                .pop()
                .ok_or_else(|| anyhow!("script exhausted"))?;
            match next {
                Ok(text) => Ok(SamplerResponse {
                    response_text: text,
                    queried_messages: messages.to_vec(),
                }),
                Err(err) => Err(anyhow!(err)),
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the input back."
        }

        async fn call(&self, input: &str) -> String {
            format!("echoed {input}")
        }
    }

    #[test]
    fn action_parsing_requires_both_lines() {
        let action = parse_action("Thought: search it\nAction: web_search\nAction Input: rust")
            .expect("action");
        assert_eq!(action.tool, "web_search");
        assert_eq!(action.input, "rust");

        assert!(parse_action("Action: web_search").is_none());
        assert!(parse_action("just prose").is_none());
        // A final answer wins even when action lines are present.
        assert!(parse_action("Action: x\nAction Input: y\nFinal Answer: z").is_none());
    }

    #[test]
    fn final_answer_extraction_falls_back_to_whole_text() {
        assert_eq!(extract_final_answer("Final Answer: 42"), "42");
        assert_eq!(
            extract_final_answer("Reasoning...\nFinal Answer: Paris\n"),
            "Paris"
        );
        assert_eq!(extract_final_answer("no marker here"), "no marker here");
    }

    #[tokio::test]
    async fn loop_dispatches_tool_then_finishes() {
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok("Action: echo\nAction Input: hello".to_string()),
            Ok("Final Answer: done".to_string()),
        ]));

        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool));

        let agent = ReactAgent::new(sampler, "You are a test agent.", registry);
        let response = agent
            .run(vec![ChatMessage::user("do the thing")])
            .await
            .expect("agent run");

        assert_eq!(response.final_text, "done");
        assert_eq!(response.steps, 2);
        assert!(response
            .transcript
            .iter()
            .any(|message| message.content.contains("Observation: echoed hello")));
    }

    #[tokio::test]
    async fn unknown_tools_surface_as_observations() {
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok("Action: missing\nAction Input: x".to_string()),
            Ok("Final Answer: gave up".to_string()),
        ]));

        let agent = ReactAgent::new(sampler, "Test.", ToolRegistry::default());
        let response = agent
            .run(vec![ChatMessage::user("q")])
            .await
            .expect("agent run");

        assert_eq!(response.final_text, "gave up");
        assert!(response
            .transcript
            .iter()
            .any(|message| message.content.contains("unknown tool 'missing'")));
    }

    #[tokio::test]
    async fn sampler_retries_are_bounded_at_three() {
        let sampler = ScriptedSampler::new(vec![
            Err("boom 1".to_string()),
            Err("boom 2".to_string()),
            Ok("Final Answer: recovered".to_string()),
        ]);

        let response = sample_with_retry(&sampler, &[ChatMessage::user("q")])
            .await
            .expect("third attempt succeeds");
        assert!(response.response_text.contains("recovered"));

        let sampler = ScriptedSampler::new(vec![
            Err("boom 1".to_string()),
            Err("boom 2".to_string()),
            Err("boom 3".to_string()),
            Ok("never reached".to_string()),
        ]);
        let err = sample_with_retry(&sampler, &[ChatMessage::user("q")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom 3"));
    }

    #[tokio::test]
    async fn agent_sampler_returns_the_final_answer() {
        let sampler = Arc::new(ScriptedSampler::new(vec![Ok(
            "Final Answer: wrapped".to_string()
        )]));

        let agent = ReactAgent::new(sampler, "Test.", ToolRegistry::default());
        let wrapped = AgentSampler::new(agent);

        let response = wrapped
            .sample(&[ChatMessage::user("q")])
            .await
            .expect("sample");
        assert_eq!(response.response_text, "wrapped");
        assert_eq!(response.queried_messages.len(), 1);
    }

    #[tokio::test]
    async fn step_budget_forces_termination() {
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok("Action: echo\nAction Input: one".to_string()),
            Ok("Action: echo\nAction Input: two".to_string()),
            Ok("Action: echo\nAction Input: three".to_string()),
        ]));

        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool));

        let agent = ReactAgent::new(sampler, "Test.", registry).with_max_steps(3);
        let response = agent
            .run(vec![ChatMessage::user("loop forever")])
            .await
            .expect("agent run");

        assert_eq!(response.steps, 3);
        assert!(response.final_text.contains("Action Input: three"));
    }
}
