//! Interactive Docker session executor.
//!
//! Multiplexes stateful command execution across named container sessions.
//! Each session owns one container and one tty-attached exec stream; a
//! background reaper evicts sessions older than the idle budget.
//!
//! The exec stream is a raw socket behind a pseudo-terminal: output arrives
//! in arbitrary chunks with no completion marker, so draining is bounded by
//! wall clock rather than a protocol-level signal. A slow command and an
//! idle one are indistinguishable mid-drain, which can truncate late output
//! or wait out the full budget. Known limitation.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, KillContainerOptions, LogOutput,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::BenchevalError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type OutputStream =
    Pin<Box<dyn Stream<Item = Result<LogOutput, bollard::errors::Error>> + Send>>;
type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Tunables for the session pool.
#[derive(Debug, Clone)]
pub struct SessionExecutorConfig {
    /// Command attached as the interactive stream of every new session.
    pub shell: String,
    /// Age at which the reaper closes a session.
    pub idle_budget: Duration,
    /// Fixed period of the reaper loop.
    pub reap_interval: Duration,
}

impl Default for SessionExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            idle_budget: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(3600),
        }
    }
}

/// Both halves of the attached exec stream. Owned by exactly one session
/// and dropped together at teardown.
struct SessionStream {
    input: InputSink,
    output: OutputStream,
}

struct Session {
    container_id: String,
    created_at: Instant,
    stream: Mutex<SessionStream>,
}

/// Pool of live interactive command-execution sessions.
///
/// Operations against different session keys may run concurrently.
/// Overlapping commands against the same key are not serialized beyond the
/// stream lock; callers must not interleave them.
pub struct SessionExecutor {
    docker: Docker,
    config: SessionExecutorConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionExecutor {
    /// Connect to the local Docker daemon and start the idle reaper.
    pub async fn start(config: SessionExecutorConfig) -> Result<Arc<Self>, BenchevalError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("connected to docker daemon");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let executor = Arc::new(Self {
            docker,
            config,
            sessions: Mutex::new(HashMap::new()),
            shutdown_tx,
            reaper: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::reap_loop(Arc::clone(&executor), shutdown_rx));
        *executor.reaper.lock().await = Some(handle);

        Ok(executor)
    }

    /// Create a new session keyed by `key`. Fails with a conflict if the key
    /// is already live; no container is started in that case.
    pub async fn create_session(
        &self,
        key: &str,
        image: &str,
        command: Option<&str>,
    ) -> Result<(), BenchevalError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(key) {
            return Err(BenchevalError::SessionExists(key.to_string()));
        }
        let command = command.unwrap_or(&self.config.shell).to_string();
        let session = self.provision(key, image, &command).await?;
        sessions.insert(key.to_string(), Arc::new(session));
        Ok(())
    }

    /// Execute `input_text` in the session keyed by `key`, provisioning the
    /// session against `image` if the key is unknown (uniform auto-create
    /// policy, also after an explicit close of the same key). Returns the
    /// drained output, trimmed.
    pub async fn execute(
        &self,
        key: &str,
        image: &str,
        input_text: &str,
        wait_for: Duration,
    ) -> Result<String, BenchevalError> {
        let session = {
            // The map lock spans lazy provisioning so a concurrent execute
            // for the same unknown key cannot start a second container.
            let mut sessions = self.sessions.lock().await;
            match sessions.get(key) {
                Some(session) => Arc::clone(session),
                None => {
                    let session = Arc::new(self.provision(key, image, &self.config.shell).await?);
                    sessions.insert(key.to_string(), Arc::clone(&session));
                    session
                }
            }
        };

        let mut stream = session.stream.lock().await;
        let payload = format!("{input_text}\n");
        stream.input.write_all(payload.as_bytes()).await?;
        stream.input.flush().await?;

        let raw = drain_output(&mut stream.output, wait_for).await;
        Ok(raw.trim().to_string())
    }

    /// Close the session keyed by `key`: kill the backing container and drop
    /// the stream handles. Fails with not-found for unknown keys.
    pub async fn close_session(&self, key: &str) -> Result<(), BenchevalError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(key)
                .ok_or_else(|| BenchevalError::SessionNotFound(key.to_string()))?
        };

        self.docker
            .kill_container(&session.container_id, None::<KillContainerOptions<String>>)
            .await?;
        info!(session = %key, container = %session.container_id, "session closed");
        Ok(())
    }

    /// Close every live session, order unspecified. Per-session failures are
    /// logged and do not stop the sweep.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for key in keys {
            if let Err(err) = self.close_session(&key).await {
                warn!(session = %key, error = %err, "failed to close session");
            }
        }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Close all sessions, stop the reaper and wait for it to finish.
    pub async fn shutdown(&self) {
        self.close_all().await;
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.reaper.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "reaper task did not shut down cleanly");
            }
        }
    }

    async fn provision(
        &self,
        key: &str,
        image: &str,
        command: &str,
    ) -> Result<Session, BenchevalError> {
        let name = format!("bencheval-{}", &Uuid::new_v4().to_string()[..8]);

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                ContainerConfig {
                    image: Some(image.to_string()),
                    tty: Some(true),
                    open_stdin: Some(true),
                    host_config: Some(HostConfig {
                        auto_remove: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;

        let exec = self
            .docker
            .create_exec(
                &container.id,
                CreateExecOptions {
                    cmd: Some(vec![command.to_string()]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let started = self.docker.start_exec(&exec.id, None).await?;
        let (output, input) = match started {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(BenchevalError::Other(anyhow::anyhow!(
                    "exec stream for session '{key}' started detached"
                )));
            }
        };

        info!(session = %key, container = %container.id, %image, "session created");

        Ok(Session {
            container_id: container.id,
            created_at: Instant::now(),
            stream: Mutex::new(SessionStream { input, output }),
        })
    }

    async fn reap_loop(executor: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            executor.reap_expired().await;
            tokio::select! {
                _ = time::sleep(executor.config.reap_interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        debug!("session reaper stopped");
    }

    async fn reap_expired(&self) {
        let expired: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, session)| session.created_at.elapsed() >= self.config.idle_budget)
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in expired {
            info!(session = %key, "reaping idle session");
            if let Err(err) = self.close_session(&key).await {
                warn!(session = %key, error = %err, "failed to reap session");
            }
        }
    }
}

/// Drain the output half until quiescence, end-of-stream or budget expiry.
///
/// Before the first chunk arrives the loop keeps polling at `POLL_INTERVAL`
/// for the remaining budget; once output has been seen, an empty poll window
/// ends the drain. A zero-length read means the stream closed. Stream errors
/// end the drain early; whatever accumulated is returned.
async fn drain_output(output: &mut OutputStream, wait_for: Duration) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let start = Instant::now();

    while start.elapsed() < wait_for {
        match time::timeout(POLL_INTERVAL, output.next()).await {
            Ok(Some(Ok(chunk))) => {
                let bytes = chunk.into_bytes();
                if bytes.is_empty() {
                    break;
                }
                collected.extend_from_slice(&bytes);
            }
            Ok(Some(Err(err))) => {
                warn!(error = %err, "read error while draining session output");
                break;
            }
            Ok(None) => break,
            Err(_elapsed) => {
                if !collected.is_empty() {
                    break;
                }
            }
        }
    }

    String::from_utf8_lossy(&collected).into_owned()
}
