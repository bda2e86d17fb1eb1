//! Fault-isolating supervisor for a single bundle job.
//!
//! The CSS engine occasionally hangs or brings down whatever runs it, so a
//! job can run in an isolated child (a tokio task or a separate process)
//! watched from outside:
//!
//! - a liveness check on a fixed interval restarts a child that died, up to
//!   `max_restarts` times;
//! - a child that has not answered within `kill_timeout` is terminated; more
//!   than `max_kills` terminations fail the job with
//!   [`Error::WorkerExhausted`].
//!
//! A result, success or reported failure, resolves the job exactly once and
//! drops both timers. Only crashes and hangs consume the retry budget.

use crate::bundle::{BundleJob, BundleOutput, bundle_one};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

/// Environment variable overriding where the worker binary is found.
pub const WORKER_PATH_ENV: &str = "SMART_CSS_WORKER_PATH";
const WORKER_BINARY: &str = "smart-css-worker";

/// Bounded restart/kill policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorPolicy {
    pub check_interval_ms: u64,
    pub kill_timeout_ms: u64,
    pub max_kills: u32,
    pub max_restarts: u32,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            check_interval_ms: 500,
            kill_timeout_ms: 2000,
            max_kills: 3,
            max_restarts: 10,
        }
    }
}

impl SupervisorPolicy {
    /// Upper bound on how long a job that never answers can keep the supervisor busy.
    pub fn worst_case(&self) -> Duration {
        let attempt = self.kill_timeout_ms + self.check_interval_ms;
        Duration::from_millis(attempt * (u64::from(self.max_kills) + 1))
    }
}

/// A running isolated child.
pub struct Child {
    outcome: oneshot::Receiver<Result<BundleOutput>>,
    kill: Option<Box<dyn FnOnce() + Send>>,
}

impl Child {
    /// `outcome` resolves with the job's result; dropping its sender signals a crash.
    pub fn new(
        outcome: oneshot::Receiver<Result<BundleOutput>>,
        kill: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            outcome,
            kill: Some(Box::new(kill)),
        }
    }

    fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            kill();
        }
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Something that can start a child for a job.
pub trait Isolate: Send + Sync {
    fn spawn(&self, job: &BundleJob) -> Result<Child>;
}

/// Run `job` in children spawned by `isolate` under `policy`.
pub async fn supervise(
    isolate: &dyn Isolate,
    job: &BundleJob,
    policy: &SupervisorPolicy,
) -> Result<BundleOutput> {
    let logger = job.options.logger;
    let check_every = Duration::from_millis(policy.check_interval_ms);
    let kill_after = Duration::from_millis(policy.kill_timeout_ms);

    let mut kills = 0;
    let mut restarts = 0;
    let mut child = Some(isolate.spawn(job)?);
    let mut deadline = Instant::now() + kill_after;
    let mut liveness = tokio::time::interval_at(Instant::now() + check_every, check_every);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            outcome = wait(&mut child) => match outcome {
                Some(result) => return result,
                None => {
                    logger.error(format_args!("worker for {} crashed", job.entry));
                    child = None;
                }
            },

            _ = tokio::time::sleep_until(deadline), if child.is_some() => {
                child = None;
                kills += 1;
                logger.error(format_args!(
                    "worker for {} unresponsive after {kill_after:?}, terminated ({kills}/{})",
                    job.entry, policy.max_kills
                ));
                if kills > policy.max_kills {
                    return Err(Error::WorkerExhausted { kills, restarts });
                }
            }

            _ = liveness.tick() => {
                if child.is_none() {
                    if restarts >= policy.max_restarts {
                        return Err(Error::WorkerExhausted { kills, restarts });
                    }
                    restarts += 1;
                    logger.info(format_args!("restarting worker for {} ({restarts})", job.entry));
                    child = Some(isolate.spawn(job)?);
                    deadline = Instant::now() + kill_after;
                }
            }
        }
    }
}

/// `Some` with the child's answer, `None` if it died without one.
async fn wait(child: &mut Option<Child>) -> Option<Result<BundleOutput>> {
    match child {
        Some(child) => (&mut child.outcome).await.ok(),
        None => std::future::pending().await,
    }
}

// ============================================================================
// Task isolate
// ============================================================================

/// Runs the job on a tokio task; aborting the task is the kill.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskIsolate;

impl Isolate for TaskIsolate {
    fn spawn(&self, job: &BundleJob) -> Result<Child> {
        let (tx, rx) = oneshot::channel();
        let job = job.clone();
        let handle = tokio::spawn(async move {
            let result = bundle_one(&job.entry, &job.options).await;
            let _ = tx.send(result);
        });
        Ok(Child::new(rx, move || handle.abort()))
    }
}

// ============================================================================
// Process isolate
// ============================================================================

/// Reply written by the worker process to stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReply {
    Done { output: BundleOutput },
    Failed { message: String },
}

impl WorkerReply {
    fn into_result(self) -> Result<BundleOutput> {
        match self {
            WorkerReply::Done { output } => Ok(output),
            WorkerReply::Failed { message } => Err(Error::Worker(message)),
        }
    }
}

/// Runs the job in a `smart-css-worker` process: job as JSON on stdin, [`WorkerReply`] on stdout.
#[derive(Debug, Clone)]
pub struct ProcessIsolate {
    program: PathBuf,
}

impl ProcessIsolate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find the worker binary.
    ///
    /// Looks at, in order:
    /// 1. `SMART_CSS_WORKER_PATH`
    /// 2. next to the current executable
    /// 3. one directory up (test binaries live in `target/<profile>/deps`)
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            return Some(PathBuf::from(path));
        }

        let name = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);
        let exe = std::env::current_exe().ok()?;
        exe.ancestors()
            .skip(1)
            .take(2)
            .map(|dir| dir.join(&name))
            .find(|candidate| candidate.is_file())
    }
}

impl Isolate for ProcessIsolate {
    fn spawn(&self, job: &BundleJob) -> Result<Child> {
        let payload = serde_json::to_vec(job).map_err(|e| Error::Worker(e.to_string()))?;

        let mut process = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Worker(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        let (tx, rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let stdin = process.stdin.take();
        let stdout = process.stdout.take();
        let label = job.entry.clone();

        tokio::spawn(async move {
            let exchange = async {
                let mut stdin = stdin?;
                stdin.write_all(&payload).await.ok()?;
                drop(stdin);

                let mut reply = Vec::new();
                stdout?.read_to_end(&mut reply).await.ok()?;

                let status = process.wait().await.ok()?;
                if !status.success() {
                    tracing::warn!("worker for {} exited with status: {}", label, status);
                    return None;
                }
                match serde_json::from_slice::<WorkerReply>(&reply) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        tracing::warn!("worker for {} sent an unreadable reply: {}", label, e);
                        None
                    }
                }
            };

            tokio::select! {
                reply = exchange => {
                    if let Some(reply) = reply {
                        let _ = tx.send(reply.into_result());
                    }
                }
                _ = kill_rx => {}
            }
        });

        Ok(Child::new(rx, move || {
            let _ = kill_tx.send(());
        }))
    }
}

/// Worker process side: read one job from stdin, run it, write the reply to stdout.
pub async fn serve_stdio() -> std::io::Result<()> {
    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;

    let reply = match serde_json::from_slice::<BundleJob>(&input) {
        Ok(job) => {
            crate::log::init_tracing(job.options.logger.level());
            match bundle_one(&job.entry, &job.options).await {
                Ok(output) => WorkerReply::Done { output },
                Err(e) => WorkerReply::Failed {
                    message: e.to_string(),
                },
            }
        }
        Err(e) => WorkerReply::Failed {
            message: format!("invalid job: {e}"),
        },
    };

    let encoded = serde_json::to_vec(&reply)?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&encoded).await?;
    stdout.flush().await
}
