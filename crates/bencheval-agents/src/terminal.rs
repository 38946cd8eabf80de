//! Terminal-bench agent: plan commands with the model, run them in a
//! container session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use bencheval_core::{ChatMessage, Sampler, SessionExecutor};

use crate::react::{extract_final_answer, ReactAgent};
use crate::tools::ToolRegistry;

pub const TERMINAL_SYSTEM_PROMPT: &str = "\
You are an agent that completes command-line tasks inside a Linux container. \
Work out the exact shell commands the task requires. When you are certain, \
reply with:\n\
Final Answer: [\"first command\", \"second command\"]\n\
The marker must be followed by a JSON array of shell command strings and \
nothing else. The commands run in order in one interactive shell.";

const DEFAULT_COMMAND_WAIT: Duration = Duration::from_secs(60);

/// Result of one terminal task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub model_output: String,
    pub commands: Vec<String>,
    pub terminal_output: String,
    pub steps: usize,
}

/// Plans commands through the agent loop and executes them through the
/// session executor.
pub struct TerminalBenchAgent {
    agent: ReactAgent,
    executor: Arc<SessionExecutor>,
    image: String,
    wait_for: Duration,
}

impl TerminalBenchAgent {
    pub fn new(
        sampler: Arc<dyn Sampler>,
        executor: Arc<SessionExecutor>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            agent: ReactAgent::new(sampler, TERMINAL_SYSTEM_PROMPT, ToolRegistry::default()),
            executor,
            image: image.into(),
            wait_for: DEFAULT_COMMAND_WAIT,
        }
    }

    pub fn with_wait_for(mut self, wait_for: Duration) -> Self {
        self.wait_for = wait_for;
        self
    }

    /// Run one task instruction against `session_key`, optionally writing a
    /// combined model/terminal log under `logging_dir`.
    pub async fn perform_task(
        &self,
        instruction: &str,
        session_key: &str,
        logging_dir: Option<&Path>,
    ) -> Result<TaskOutcome> {
        info!(%session_key, "running terminal task");

        let response = self
            .agent
            .run(vec![ChatMessage::user(instruction)])
            .await?;

        let model_output = response
            .transcript
            .iter()
            .rev()
            .find(|message| message.role == "assistant")
            .map(|message| message.content.clone())
            .unwrap_or_else(|| response.final_text.clone());

        let commands = parse_command_list(&response.final_text)?;

        let mut terminal_output = String::new();
        for command in &commands {
            debug!(%command, "executing planned command");
            let output = self
                .executor
                .execute(session_key, &self.image, command, self.wait_for)
                .await?;
            terminal_output.push_str(&output);
            terminal_output.push('\n');
        }

        if let Some(dir) = logging_dir {
            write_task_log(dir, &model_output, &terminal_output)?;
        }

        Ok(TaskOutcome {
            model_output,
            commands,
            terminal_output,
            steps: response.steps,
        })
    }
}

/// Parse the JSON command array out of a final answer. Surrounding prose is
/// tolerated; a missing or malformed array is an error.
pub fn parse_command_list(text: &str) -> Result<Vec<String>> {
    let payload = extract_final_answer(text);

    let json = match (payload.find('['), payload.rfind(']')) {
        (Some(start), Some(end)) if start < end => &payload[start..=end],
        _ => bail!("no command list found in model output: {payload}"),
    };

    let commands: Vec<String> = serde_json::from_str(json)
        .with_context(|| format!("command list is not a JSON string array: {json}"))?;
    Ok(commands)
}

fn write_task_log(dir: &Path, model_output: &str, terminal_output: &str) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create logging dir {}", dir.display()))?;
    let path = dir.join("agent_output.txt");
    std::fs::write(
        &path,
        format!("MODEL OUTPUT:\n{model_output}\n\nTERMINAL OUTPUT:\n{terminal_output}"),
    )
    .with_context(|| format!("failed to write task log {}", path.display()))?;
    Ok(())
}
