//! Process Runner: owns one downloader subprocess per running task.
//!
//! [`ProcessRunner::start`] spawns the configured program with a fixed
//! invocation, wires stdout/stderr into line readers and hands back a
//! [`RunHandle`]. The supervisor drives the handle: it receives
//! [`OutputEvent`]s, delivers [`Signal`]s and waits for exit.

mod cleanup;
mod invocation;
mod outcome;
mod read;
mod signal;
mod tail;

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DownloaderConfig;
use crate::error::RunError;
use crate::task_db::TaskRecord;

pub use cleanup::{remove_output, remove_partial_files};
pub use invocation::build_args;
pub use outcome::{evaluate_exit, exit_summary, Outcome};
pub use read::OutputEvent;
pub use signal::{suspend_supported, ProcessSignals, Signal};
pub use tail::append_limited;

/// Bytes of stderr kept for failure diagnostics.
pub const STDERR_TAIL_LIMIT: usize = 64 * 1024;
/// Bytes of non-progress stdout kept.
pub const STDOUT_TAIL_LIMIT: usize = 16 * 1024;

/// How long to keep draining output after the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawns downloader processes for tasks.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    downloader: DownloaderConfig,
}

impl ProcessRunner {
    pub fn new(downloader: DownloaderConfig) -> Self {
        Self { downloader }
    }

    pub fn program(&self) -> &str {
        &self.downloader.program
    }

    /// Spawn the downloader for `task`. Returns once the process exists.
    pub fn start(&self, task: &TaskRecord) -> Result<RunHandle, RunError> {
        let args = build_args(&self.downloader, task);
        tracing::debug!(
            task_id = task.id,
            program = %self.downloader.program,
            ?args,
            "spawning downloader"
        );

        let mut cmd = Command::new(&self.downloader.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: self.downloader.program.clone(),
            source,
        })?;

        let (tx, output) = mpsc::channel(64);
        let stdout = child
            .stdout
            .take()
            .map(|s| read::spawn_reader(s, "stdout", STDOUT_TAIL_LIMIT, tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|s| read::spawn_reader(s, "stderr", STDERR_TAIL_LIMIT, tx));

        Ok(RunHandle {
            signals: ProcessSignals::new(child.id()),
            child,
            output,
            stdout,
            stderr,
        })
    }
}

/// A live downloader process and its output.
pub struct RunHandle {
    pub child: Child,
    pub output: mpsc::Receiver<OutputEvent>,
    pub signals: ProcessSignals,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

/// Output tails collected after exit.
#[derive(Debug, Default, Clone)]
pub struct OutputTails {
    pub stdout: String,
    pub stderr: String,
}

impl RunHandle {
    /// Deliver a signal; on non-Unix platforms termination kills the child handle.
    pub fn signal(&mut self, signal: Signal) -> std::io::Result<()> {
        self.signals.send(signal)?;
        if !cfg!(unix) && matches!(signal, Signal::Terminate | Signal::Kill) {
            self.child.start_kill()?;
        }
        Ok(())
    }

    /// Force-kill the process group and the direct child.
    pub fn kill(&mut self) {
        if let Err(e) = self.signals.send(Signal::Kill) {
            tracing::debug!("kill process group: {}", e);
        }
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("kill child: {}", e);
        }
    }

    /// Call after the process exited: collect events still buffered in the
    /// channel, then the output tails. Bounded so a helper process holding a
    /// pipe open cannot stall the caller.
    pub async fn finish_output(mut self) -> (Vec<OutputEvent>, OutputTails) {
        let mut rest = Vec::new();
        let drain = async {
            while let Some(ev) = self.output.recv().await {
                rest.push(ev);
            }
        };
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::debug!("output still open after exit; giving up on remaining lines");
        }
        self.output.close();
        let tails = OutputTails {
            stdout: join_tail(self.stdout.take()).await,
            stderr: join_tail(self.stderr.take()).await,
        };
        (rest, tails)
    }
}

async fn join_tail(handle: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            tracing::debug!("output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
