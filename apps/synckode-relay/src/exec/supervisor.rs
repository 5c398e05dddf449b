//! Per-connection process lifecycle.
//!
//! An [`ExecutionSlot`] holds at most one live run. Each spawn gets a fresh
//! [`RunId`]; the child is driven by its own task, which pumps stdout and
//! stderr, enforces the timeout and services kill requests, and reports back
//! through the connection's [`ExecEvent`] queue. The connection passes those
//! events to [`ExecutionSlot::accept`], which drops anything belonging to a
//! run that is no longer active. Superseding or killing a run therefore never
//! waits on the old child; it is reaped, and its run directory removed, by
//! its own driver.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::allowlist::{self, CommandRejected};
use super::scratch::ScratchDir;
use super::{CommandLine, ExecContext, ExecError, ExecEvent, RunId, RunRequest, TerminalFrame};
use crate::protocol::StreamKind;

pub const KILLED_STATUS: i32 = 130;
pub const INTERRUPT_NOTICE: &str = "\n^C\n";

const READ_CHUNK: usize = 4096;
/// How long stdio pumps may keep running after the child is reaped. A
/// grandchild that inherited the pipes can hold them open indefinitely.
const PUMP_DRAIN_GRACE: Duration = Duration::from_secs(2);

struct ActiveRun {
    id: RunId,
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
    // Dropping the sender is enough to kill the child.
    _kill: oneshot::Sender<()>,
    started_at: Instant,
}

pub struct ExecutionSlot {
    context: Arc<ExecContext>,
    events: mpsc::UnboundedSender<ExecEvent>,
    next_run: RunId,
    active: Option<ActiveRun>,
}

impl ExecutionSlot {
    pub fn new(context: Arc<ExecContext>) -> (Self, mpsc::UnboundedReceiver<ExecEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let slot = Self {
            context,
            events,
            next_run: 0,
            active: None,
        };
        (slot, receiver)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Start a run, superseding any active one. Returns frames to deliver
    /// right away; a run that actually spawns reports through the event
    /// queue instead and returns nothing here.
    pub async fn run(&mut self, request: RunRequest) -> Vec<TerminalFrame> {
        if let Some(previous) = self.active.take() {
            debug!(run = previous.id, "superseding active run");
        }

        let command = request
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty());

        let launch = if let Some(command) = command {
            match allowlist::admit(command) {
                Ok(line) => self.prepare_command(line).await,
                Err(rejected) => return self.reject(rejected),
            }
        } else if let Some(code) = request.code.as_deref().filter(|code| !code.is_empty()) {
            self.prepare_source(request.language.as_deref(), code).await
        } else {
            return vec![TerminalFrame::Exit { status: 0 }];
        };

        let (line, scratch) = match launch {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(err),
        };

        let working_dir = scratch
            .as_ref()
            .map(|scratch| scratch.path().to_path_buf())
            .unwrap_or_else(|| self.context.config.scratch_dir.clone());

        let mut command = Command::new(&line.program);
        command
            .args(&line.args)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                return self.fail(ExecError::Spawn {
                    program: line.program,
                    source,
                })
            }
        };

        self.next_run += 1;
        let run = self.next_run;
        info!(run, program = %line.program, pid = ?child.id(), "process started");
        self.context.process_started();

        let (stdin_tx, kill_tx) = spawn_driver(
            Arc::clone(&self.context),
            child,
            run,
            scratch,
            self.events.clone(),
        );
        self.active = Some(ActiveRun {
            id: run,
            stdin: stdin_tx,
            _kill: kill_tx,
            started_at: Instant::now(),
        });
        Vec::new()
    }

    /// Forward raw input to the active process. Dropped when idle.
    pub fn write_input(&self, data: &str) {
        let Some(stdin) = self.active.as_ref().and_then(|run| run.stdin.as_ref()) else {
            debug!("dropping terminal input, no writable process");
            return;
        };
        if stdin.send(data.as_bytes().to_vec()).is_err() {
            debug!("dropping terminal input, stdin closed");
        }
    }

    /// Terminate the active run. Returns nothing when idle.
    pub fn kill(&mut self) -> Vec<TerminalFrame> {
        let Some(run) = self.active.take() else {
            return Vec::new();
        };
        info!(
            run = run.id,
            elapsed_ms = run.started_at.elapsed().as_millis() as u64,
            "process killed by request"
        );
        vec![
            TerminalFrame::system(INTERRUPT_NOTICE),
            TerminalFrame::Exit {
                status: KILLED_STATUS,
            },
        ]
    }

    /// Map a completion event to a frame, or drop it when its run is stale.
    pub fn accept(&mut self, event: ExecEvent) -> Option<TerminalFrame> {
        let active = self.active.as_ref()?;
        if active.id != event.run() {
            debug!(run = event.run(), active = active.id, "dropping event from superseded run");
            return None;
        }
        match event {
            ExecEvent::Output { kind, data, .. } => Some(TerminalFrame::Output { kind, data }),
            ExecEvent::TimedOut { .. } => {
                Some(TerminalFrame::system(timeout_notice(self.context.config.timeout)))
            }
            ExecEvent::Exited { status, .. } => {
                self.active = None;
                Some(TerminalFrame::Exit { status })
            }
        }
    }

    /// Kill whatever is running without producing frames.
    pub fn shutdown(&mut self) {
        if let Some(run) = self.active.take() {
            debug!(run = run.id, "terminating process on shutdown");
        }
    }

    async fn prepare_command(
        &self,
        line: CommandLine,
    ) -> Result<(CommandLine, Option<ScratchDir>), ExecError> {
        let dir = &self.context.config.scratch_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ExecError::Scratch {
                path: dir.clone(),
                source,
            })?;
        Ok((line, None))
    }

    async fn prepare_source(
        &self,
        language: Option<&str>,
        code: &str,
    ) -> Result<(CommandLine, Option<ScratchDir>), ExecError> {
        let prepared = self.context.dispatcher.prepare(language, code);
        let scratch = ScratchDir::create(&self.context.config.scratch_dir).await?;
        let (path, line) = prepared.command_in(scratch.path());
        tokio::fs::write(&path, prepared.text.as_bytes())
            .await
            .map_err(|source| ExecError::Scratch {
                path: path.clone(),
                source,
            })?;
        debug!(language = prepared.recipe.language, file = %path.display(), "wrote source file");
        Ok((line, Some(scratch)))
    }

    fn reject(&self, rejected: CommandRejected) -> Vec<TerminalFrame> {
        warn!(reason = %rejected, "command rejected");
        counter!("synckode_commands_denied_total", 1);
        vec![
            TerminalFrame::stderr(rejected.terminal_message()),
            TerminalFrame::Exit { status: 1 },
        ]
    }

    fn fail(&self, err: ExecError) -> Vec<TerminalFrame> {
        warn!(error = %err, "failed to start run");
        counter!("synckode_executions_total", 1, "outcome" => "spawn_failed");
        vec![
            TerminalFrame::stderr(err.terminal_message()),
            TerminalFrame::Exit { status: 1 },
        ]
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_driver(
    context: Arc<ExecContext>,
    mut child: Child,
    run: RunId,
    scratch: Option<ScratchDir>,
    events: mpsc::UnboundedSender<ExecEvent>,
) -> (Option<mpsc::UnboundedSender<Vec<u8>>>, oneshot::Sender<()>) {
    let (kill_tx, kill_rx) = oneshot::channel();

    let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, run, StreamKind::Stdout, events.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, run, StreamKind::Stderr, events.clone())));
    }

    let (stdin_tx, stdin_task) = match child.stdin.take() {
        Some(stdin) => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(tokio::spawn(forward_stdin(stdin, rx))))
        }
        None => (None, None),
    };

    tokio::spawn(async move {
        let timeout = context.config.timeout;
        let (status, outcome) = tokio::select! {
            status = child.wait() => (status, "exited"),
            _ = kill_rx => {
                terminate(&mut child);
                (child.wait().await, "killed")
            }
            _ = time::sleep(timeout) => {
                info!(run, timeout_secs = timeout.as_secs(), "process timed out");
                let _ = events.send(ExecEvent::TimedOut { run });
                terminate(&mut child);
                (child.wait().await, "timed_out")
            }
        };

        let drained = time::timeout(PUMP_DRAIN_GRACE, async {
            for pump in pumps.iter_mut() {
                let _ = pump.await;
            }
        })
        .await;
        if drained.is_err() {
            debug!(run, "stdio still open after exit, abandoning pumps");
            for pump in &pumps {
                pump.abort();
            }
        }
        if let Some(task) = stdin_task {
            task.abort();
        }
        if let Some(scratch) = scratch {
            scratch.remove();
        }

        let status = match status {
            Ok(status) => exit_code(status),
            Err(err) => {
                warn!(run, error = %err, "failed to wait for process");
                1
            }
        };
        debug!(run, status, "process exited");
        counter!("synckode_executions_total", 1, "outcome" => outcome);
        context.process_finished();
        let _ = events.send(ExecEvent::Exited { run, status });
    });

    (stdin_tx, kill_tx)
}

/// `[Killed: 30s timeout]`, or milliseconds for limits that are not whole
/// seconds.
fn timeout_notice(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("\n[Killed: {}s timeout]\n", timeout.as_secs())
    } else {
        format!("\n[Killed: {}ms timeout]\n", timeout.as_millis())
    }
}

fn terminate(child: &mut Child) {
    kill_group(child);
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "process already gone");
    }
}

/// Kill the child's whole process group so compile-and-run wrappers do not
/// leave the compiled binary behind. The child leads its own group, see
/// `process_group(0)` at spawn.
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

async fn pump<R>(mut reader: R, run: RunId, kind: StreamKind, events: mpsc::UnboundedSender<ExecEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let data = decode_available(&mut pending);
                if data.is_empty() {
                    continue;
                }
                if events.send(ExecEvent::Output { run, kind, data }).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(run, ?kind, error = %err, "stdio read failed");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let data = String::from_utf8_lossy(&pending).into_owned();
        let _ = events.send(ExecEvent::Output { run, kind, data });
    }
}

/// Decode as much of `pending` as forms complete UTF-8, keeping a trailing
/// partial character for the next read. Invalid bytes are replaced.
fn decode_available(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_owned();
            pending.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let valid = err.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

async fn forward_stdin(mut stdin: ChildStdin, mut input: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = input.recv().await {
        if let Err(err) = stdin.write_all(&bytes).await {
            debug!(error = %err, "stdin closed");
            return;
        }
        if stdin.flush().await.is_err() {
            return;
        }
    }
}
