//! Helper process invocation
//!
//! An invocation runs through `Staged -> Running -> Draining -> Exited` and
//! always ends with the staged files removed:
//! 1. The payload is staged into a fresh private directory
//! 2. The helper is spawned with the argument vector as-is (no shell)
//! 3. stdout is decoded while the helper runs, drained of any trailer up to
//!    the output limit, then closed
//! 4. Only then is the exit status collected
//!
//! Waiting before draining stdout can deadlock on a full pipe, so the order
//! of steps 3 and 4 is fixed. stderr is passed through to ours untouched.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::decoder::{decode_stream, InvocationResponse};
use crate::error::{BrokerError, Result};
use crate::payload::HelperPayload;
use crate::staging::stage;

/// Launch attempts when the freshly written helper is reported busy
const SPAWN_ATTEMPTS: u32 = 5;

/// One call into the helper
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Argument vector passed to the helper verbatim
    pub args: Vec<String>,
    /// File name for the staged helper, shown by platform consent prompts
    pub display_name: Option<String>,
    /// Deadline overriding the configured one
    pub timeout: Option<Duration>,
}

impl InvocationRequest {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    /// Availability probe (no arguments)
    pub fn probe() -> Self {
        Self::default()
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Boundary between the capability API and the privileged helper
#[async_trait]
pub trait HelperInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse>;
}

/// Runs the helper payload as a real child process
#[derive(Debug, Clone)]
pub struct StagedHelper {
    payload: HelperPayload,
    config: BrokerConfig,
}

impl StagedHelper {
    pub fn new(payload: HelperPayload, config: BrokerConfig) -> Self {
        Self { payload, config }
    }

    /// Helper backed by the payload embedded in this build
    pub fn embedded(config: BrokerConfig) -> Self {
        Self::new(HelperPayload::embedded(), config)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

#[async_trait]
impl HelperInvoker for StagedHelper {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResponse> {
        let file_name = request
            .display_name
            .as_deref()
            .unwrap_or(&self.config.executable_name);
        let staged = stage(&self.payload, file_name, self.config.staging_dir.as_deref())?;

        let run = run_helper(staged.path(), &request.args, self.config.max_output_bytes);
        let result = match request.timeout.or_else(|| self.config.timeout()) {
            // Dropping the run future kills the child (kill_on_drop)
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout = ?limit, "Helper timed out, terminating");
                    Err(BrokerError::Timeout(limit))
                }
            },
            None => run.await,
        };

        drop(staged);
        result
    }
}

/// Spawn the executable at `path`, decode its record, and collect its exit status
pub async fn run_helper(
    path: &Path,
    args: &[String],
    max_output_bytes: usize,
) -> Result<InvocationResponse> {
    let mut command = Command::new(path);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = spawn(&mut command, path).await?;
    debug!(pid = child.id().unwrap_or(0), args = args.len(), "Helper started");

    let mut stdout = child
        .stdout
        .take()
        .ok_or(BrokerError::StreamSetup { stream: "stdout" })?;

    // Draining: decode the record, discard a bounded trailer, then close stdout
    let decoded = decode_stream(&mut stdout, max_output_bytes).await;
    if decoded.is_ok() {
        let limit = u64::try_from(max_output_bytes).unwrap_or(u64::MAX);
        match tokio::io::copy(&mut (&mut stdout).take(limit), &mut tokio::io::sink()).await {
            Ok(0) => {}
            Ok(trailer) => debug!(trailer, "Discarded helper output after record"),
            Err(e) => debug!(error = %e, "Failed to drain helper output"),
        }
    }
    drop(stdout);

    let status = child.wait().await.map_err(BrokerError::Wait)?;
    debug!(status = %status, "Helper exited");

    if !status.success() {
        if let Err(e) = &decoded {
            debug!(error = %e, "Discarding helper output after abnormal exit");
        }
        return Err(BrokerError::Exit {
            code: status.code(),
            signal: exit_signal(&status),
        });
    }

    Ok(decoded?)
}

async fn spawn(command: &mut Command, path: &Path) -> Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "Staged helper busy, retrying launch");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(BrokerError::Launch {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

// A sibling thread forking while our write handle was still open keeps the
// file busy until that child execs.
#[cfg(unix)]
fn is_text_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &std::io::Error) -> bool {
    false
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
