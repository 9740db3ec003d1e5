//! Offload executor - runs scripts as time-boxed child processes.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{
    CompletionSignal, OffloadOperation, OffloadResult, ScriptType, SignalBus, SENTINEL_EXIT_CODE,
};
use crate::config::OffloadConfig;
use crate::sync::lock;

/// Execution-level failures. Script failures are results, not errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("no interpreter configured for script type '{0}'")]
    NoInterpreter(ScriptType),

    #[error("working directory {} does not exist", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("failed to capture {0} of child process")]
    Capture(&'static str),

    #[error("failed waiting for child process: {0}")]
    Wait(String),
}

/// Run one operation to completion or timeout.
///
/// On timeout the whole process group receives SIGTERM, then SIGKILL if it
/// is still alive after `kill_grace_ms`. The child is always reaped before
/// this returns.
pub async fn execute_offload_op(
    operation: &OffloadOperation,
    config: &OffloadConfig,
) -> Result<OffloadResult, OffloadError> {
    let interpreter = config
        .interpreters
        .resolve(operation.script_type)
        .ok_or(OffloadError::NoInterpreter(operation.script_type))?;

    if !operation.working_dir.is_dir() {
        return Err(OffloadError::MissingWorkingDir(operation.working_dir.clone()));
    }

    let timeout = Duration::from_millis(operation.timeout_ms.unwrap_or(config.default_timeout_ms));
    let grace = Duration::from_millis(config.kill_grace_ms);

    let mut command = Command::new(&interpreter.program);
    command
        .args(&interpreter.args)
        .arg(&operation.script)
        .current_dir(&operation.working_dir)
        .envs(&operation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    tracing::debug!(
        operation_id = %operation.id,
        program = %interpreter.program,
        script_type = %operation.script_type,
        timeout_ms = timeout.as_millis() as u64,
        "Spawning offload operation"
    );

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| OffloadError::Spawn {
        program: interpreter.program.clone(),
        message: e.to_string(),
    })?;
    // id() is gone once the child is reaped; the group outlives it.
    let pid = child.id();

    let stdout = child.stdout.take().ok_or(OffloadError::Capture("stdout"))?;
    let stderr = child.stderr.take().ok_or(OffloadError::Capture("stderr"))?;
    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut stdout_task = spawn_reader(stdout, Arc::clone(&stdout_buf), config.max_output_bytes);
    let mut stderr_task = spawn_reader(stderr, Arc::clone(&stderr_buf), config.max_output_bytes);

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (status, false),
        Err(_) => {
            tracing::debug!(operation_id = %operation.id, "Offload operation timed out");
            (terminate(&mut child, pid, grace, &operation.id).await, true)
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let status = status.map_err(|e| OffloadError::Wait(e.to_string()))?;

    // Background descendants can hold the pipes open after the leader exits.
    let drained = tokio::time::timeout(
        grace,
        futures::future::join(&mut stdout_task, &mut stderr_task),
    )
    .await;
    if drained.is_err() {
        tracing::warn!(
            operation_id = %operation.id,
            "Output pipes still open after exit, keeping partial output"
        );
        if let Some(pid) = pid {
            kill_group(pid);
        }
        stdout_task.abort();
        stderr_task.abort();
    }

    let exit_code = if timed_out {
        SENTINEL_EXIT_CODE
    } else {
        status.code().unwrap_or(SENTINEL_EXIT_CODE)
    };

    Ok(OffloadResult {
        operation_id: operation.id.clone(),
        exit_code,
        stdout: take_output(&stdout_buf),
        stderr: take_output(&stderr_buf),
        duration_ms,
        timed_out,
    })
}

fn spawn_reader<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // keep draining past the limit so the child never blocks on a full pipe
                    let mut buf = lock(&sink);
                    let room = limit.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take_output(buf: &Mutex<Vec<u8>>) -> String {
    let bytes = std::mem::take(&mut *lock(buf));
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGTERM the process group, then SIGKILL whatever is left of it once
/// `grace` has passed. The leader exiting early does not end the wait:
/// group members that ignore SIGTERM still get SIGKILL.
#[cfg(unix)]
async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
    operation_id: &str,
) -> std::io::Result<ExitStatus> {
    let Some(pid) = pid else {
        return child.wait().await;
    };

    let deadline = tokio::time::Instant::now() + grace;
    signal_group(pid, libc::SIGTERM);
    let leader = tokio::time::timeout_at(deadline, child.wait()).await;

    if leader.is_ok() {
        while group_alive(pid) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    }

    if leader.is_err() || group_alive(pid) {
        tracing::warn!(
            operation_id = %operation_id,
            pid,
            grace_ms = grace.as_millis() as u64,
            "Process group ignored SIGTERM, escalating to SIGKILL"
        );
        signal_group(pid, libc::SIGKILL);
    }

    match leader {
        Ok(status) => status,
        Err(_) => child.wait().await,
    }
}

#[cfg(not(unix))]
async fn terminate(
    child: &mut Child,
    _pid: Option<u32>,
    _grace: Duration,
    _operation_id: &str,
) -> std::io::Result<ExitStatus> {
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Kill descendants still holding the output pipes after the leader exited.
#[cfg(unix)]
fn kill_group(pid: u32) {
    if group_alive(pid) {
        signal_group(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 only checks for existence and permission.
    unsafe { libc::kill(-pid, 0) == 0 }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // The child leads its own process group, so -pid reaches its descendants too.
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        // SAFETY: as above.
        unsafe {
            libc::kill(pid, signal);
        }
    }
}

/// Runs offload operations and publishes their completion signals.
///
/// Cheap to clone; clones share the bus and the in-flight counter.
#[derive(Debug, Clone)]
pub struct OffloadExecutor {
    config: Arc<OffloadConfig>,
    bus: Option<Arc<SignalBus>>,
    in_flight: Arc<AtomicUsize>,
}

impl OffloadExecutor {
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            config: Arc::new(config),
            bus: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_bus(mut self, bus: Arc<SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Operations currently executing through this executor or its clones
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Execute an operation, classify the outcome and publish it.
    ///
    /// Never fails: spawn and wait failures become an `error` signal.
    pub async fn execute(&self, operation: &OffloadOperation) -> CompletionSignal {
        let _guard = InFlight::enter(&self.in_flight);
        let started = Instant::now();

        let signal = match execute_offload_op(operation, &self.config).await {
            Ok(result) => CompletionSignal::from_result(result),
            Err(err) => {
                tracing::warn!(
                    operation_id = %operation.id,
                    error = %err,
                    "Offload operation could not be executed"
                );
                CompletionSignal::execution_error(
                    &operation.id,
                    started.elapsed().as_millis() as u64,
                    err.to_string(),
                )
            }
        };

        tracing::info!(
            operation_id = %signal.operation_id,
            status = %signal.status,
            exit_code = signal.result.exit_code,
            duration_ms = signal.result.duration_ms,
            "Offload operation finished"
        );

        if let Some(bus) = &self.bus {
            bus.emit(&signal);
        }
        signal
    }

    /// Execute a batch concurrently. Signals come back in input order.
    pub async fn execute_all(&self, operations: &[OffloadOperation]) -> Vec<CompletionSignal> {
        futures::future::join_all(operations.iter().map(|op| self.execute(op))).await
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
