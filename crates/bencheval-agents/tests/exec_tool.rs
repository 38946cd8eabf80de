use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bencheval_agents::{AgentTool, CodeExecTool};
use bencheval_core::{SessionExecutor, SessionExecutorConfig};

fn executor_tests_enabled() -> bool {
    env::var("BENCHEVAL_DOCKER_TESTS")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn test_image() -> String {
    env::var("BENCHEVAL_TEST_IMAGE").unwrap_or_else(|_| "alpine".to_string())
}

#[tokio::test]
#[ignore]
async fn code_exec_tool_runs_in_a_fresh_session() -> Result<()> {
    if !executor_tests_enabled() || !docker_available() {
        eprintln!("BENCHEVAL_DOCKER_TESTS not enabled or docker missing; skipping");
        return Ok(());
    }

    let executor = SessionExecutor::start(SessionExecutorConfig {
        shell: "sh".to_string(),
        ..SessionExecutorConfig::default()
    })
    .await?;

    let tool = CodeExecTool::new(
        Arc::clone(&executor),
        test_image(),
        Duration::from_secs(15),
    );

    let first = tool.call("echo from-tool").await;
    assert!(first.contains("from-tool"), "unexpected output: {first}");

    // Each call provisions its own session.
    tool.call("echo second").await;
    assert_eq!(executor.session_count().await, 2);

    executor.shutdown().await;
    Ok(())
}
