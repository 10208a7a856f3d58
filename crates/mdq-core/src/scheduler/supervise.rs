//! Per-task supervisor: owns the downloader process for one slot.
//!
//! The supervisor forwards progress, applies pause/resume/cancel commands,
//! watches for stalls and, once the process is gone, reports the outcome.
//! It runs until the task reaches a terminal state or is detached.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::events::TaskEvent;
use super::stall::StallAction;
use super::state::Shared;
use crate::control::{ControlMsg, TaskCommand};
use crate::error::{CancelTimeoutError, QueueError, RunError};
use crate::progress::{Phase, ProgressSample};
use crate::runner::{evaluate_exit, remove_partial_files, Outcome, OutputEvent, RunHandle, Signal};
use crate::task_db::{TaskId, TaskRecord, TaskState};

type Ack = oneshot::Sender<Result<(), QueueError>>;

const RESTART_PAUSE_WARNING: &str =
    "process suspension unavailable; download stopped and continues from partial data on resume";

/// Where the task's process stands.
enum Proc {
    Running(RunHandle),
    Suspended(RunHandle),
    /// Paused without a process (restart mode); resume re-spawns.
    Stopped,
}

/// What woke the supervisor.
enum Step {
    Output(Option<OutputEvent>),
    Exited(std::io::Result<ExitStatus>),
    Command(ControlMsg),
    CommandsClosed,
    Stalled,
}

/// How the supervisor ends.
enum Exit {
    Finished(Outcome, Option<Ack>),
    Detached(Option<Ack>),
}

pub(crate) struct Supervisor {
    shared: Arc<Shared>,
    task: TaskRecord,
    commands: mpsc::Receiver<ControlMsg>,
    /// Every file the downloader announced, in order; the last one is the final output.
    destinations: Vec<PathBuf>,
    output_open: bool,
    postprocessing: bool,
    last_activity: Instant,
    last_persist: Option<Instant>,
}

impl Supervisor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        task: TaskRecord,
        commands: mpsc::Receiver<ControlMsg>,
    ) -> Self {
        Self {
            shared,
            task,
            commands,
            destinations: Vec::new(),
            output_open: true,
            postprocessing: false,
            last_activity: Instant::now(),
            last_persist: None,
        }
    }

    fn id(&self) -> TaskId {
        self.task.id
    }

    pub(crate) async fn run(mut self, handle: RunHandle) {
        let mut proc = Proc::Running(handle);
        let exit = loop {
            match self.next_step(&mut proc).await {
                Step::Output(Some(ev)) => self.on_output(ev).await,
                Step::Output(None) => self.output_open = false,
                Step::Stalled => self.on_stall().await,
                Step::Exited(status) => {
                    if let Proc::Running(h) | Proc::Suspended(h) =
                        std::mem::replace(&mut proc, Proc::Stopped)
                    {
                        break Exit::Finished(self.exited(h, status).await, None);
                    }
                }
                Step::CommandsClosed => {
                    if let Proc::Running(h) | Proc::Suspended(h) =
                        std::mem::replace(&mut proc, Proc::Stopped)
                    {
                        self.stop_process(h).await;
                    }
                    break Exit::Detached(None);
                }
                Step::Command(msg) => {
                    let (next, exit) = self.on_command(proc, msg).await;
                    proc = next;
                    if let Some(exit) = exit {
                        break exit;
                    }
                }
            }
        };

        let id = self.id();
        let ack = match exit {
            Exit::Finished(outcome, ack) => {
                self.shared.finish(id, outcome).await;
                ack
            }
            Exit::Detached(ack) => {
                self.shared.detach(id).await;
                ack
            }
        };
        if let Some(ack) = ack {
            let _ = ack.send(Ok(()));
        }
    }

    async fn next_step(&mut self, proc: &mut Proc) -> Step {
        let stall_armed = matches!(proc, Proc::Running(_)) && self.shared.stall_window.is_some();
        let stall_at = self
            .shared
            .stall_window
            .and_then(|w| self.last_activity.checked_add(w))
            .unwrap_or_else(Instant::now);

        let h = match proc {
            Proc::Running(h) | Proc::Suspended(h) => h,
            Proc::Stopped => {
                return match self.commands.recv().await {
                    Some(msg) => Step::Command(msg),
                    None => Step::CommandsClosed,
                };
            }
        };

        tokio::select! {
            ev = h.output.recv(), if self.output_open => Step::Output(ev),
            status = h.child.wait() => Step::Exited(status),
            msg = self.commands.recv() => match msg {
                Some(msg) => Step::Command(msg),
                None => Step::CommandsClosed,
            },
            _ = tokio::time::sleep_until(stall_at), if stall_armed => Step::Stalled,
        }
    }

    async fn on_output(&mut self, ev: OutputEvent) {
        match ev {
            OutputEvent::Destination(path) => {
                tracing::debug!(task_id = self.id(), path = %path.display(), "destination announced");
                self.last_activity = Instant::now();
                self.destinations.push(path);
            }
            OutputEvent::Progress(sample) => self.on_progress(sample).await,
        }
    }

    async fn on_progress(&mut self, sample: ProgressSample) {
        let id = self.id();
        self.last_activity = Instant::now();
        if sample.phase == Phase::Postprocessing {
            if !self.postprocessing {
                self.postprocessing = true;
                self.shared.announce(id, TaskEvent::Postprocessing).await;
            }
            return;
        }
        self.postprocessing = false;

        let Some((progress, rate, eta)) = self.shared.record_progress(id, sample).await else {
            return;
        };
        let now = Instant::now();
        let due = self
            .last_persist
            .map_or(true, |at| now.duration_since(at) >= self.shared.progress_interval);
        if due {
            self.last_persist = Some(now);
            if let Err(e) = self
                .shared
                .db
                .update_progress(id, progress, rate.as_deref(), eta.as_deref())
                .await
            {
                tracing::warn!(task_id = id, "progress not persisted: {:#}", e);
            }
        }
    }

    async fn on_stall(&mut self) {
        let id = self.id();
        let silent_for = self.last_activity.elapsed();
        self.last_activity = Instant::now();
        match self.shared.stall_policy.on_stall(id, silent_for) {
            StallAction::Ignore => {}
            StallAction::Warn(message) => {
                tracing::warn!(task_id = id, ?silent_for, "download stalled");
                self.shared.announce(id, TaskEvent::Warning { message }).await;
            }
        }
    }

    /// Apply one command. Returns the new process state and, if the
    /// supervisor is done, how it ends.
    async fn on_command(&mut self, proc: Proc, msg: ControlMsg) -> (Proc, Option<Exit>) {
        let ControlMsg { command, ack } = msg;
        tracing::debug!(task_id = self.id(), command = command.as_str(), "task command");
        match (command, proc) {
            (TaskCommand::Pause, Proc::Running(h)) => self.pause(h, ack).await,
            (TaskCommand::Resume, Proc::Suspended(h)) => self.resume_suspended(h, ack).await,
            (TaskCommand::Resume, Proc::Stopped) => self.respawn(ack).await,
            (TaskCommand::Pause, proc) | (TaskCommand::Resume, proc) => {
                let _ = ack.send(Ok(()));
                (proc, None)
            }
            (TaskCommand::Cancel, proc) => {
                if let Proc::Running(h) | Proc::Suspended(h) = proc {
                    self.stop_process(h).await;
                }
                let removed = remove_partial_files(&self.destinations).await;
                tracing::info!(task_id = self.id(), removed, "task cancelled");
                (Proc::Stopped, Some(Exit::Finished(Outcome::Cancelled, Some(ack))))
            }
            (TaskCommand::Detach, proc) => {
                if let Proc::Running(h) | Proc::Suspended(h) = proc {
                    self.stop_process(h).await;
                }
                (Proc::Stopped, Some(Exit::Detached(Some(ack))))
            }
        }
    }

    async fn pause(&mut self, mut h: RunHandle, ack: Ack) -> (Proc, Option<Exit>) {
        let id = self.id();
        if self.shared.suspends_on_pause() {
            match h.signal(Signal::Suspend) {
                Ok(()) => {
                    let recorded = self
                        .shared
                        .record_transition(id, TaskState::Paused, TaskEvent::Paused)
                        .await;
                    if recorded.is_err() {
                        if let Err(e) = h.signal(Signal::Resume) {
                            tracing::warn!(task_id = id, "could not continue process: {}", e);
                        }
                        let _ = ack.send(recorded);
                        return (Proc::Running(h), None);
                    }
                    let _ = ack.send(Ok(()));
                    return (Proc::Suspended(h), None);
                }
                Err(e) => {
                    tracing::warn!(task_id = id, "suspend failed, stopping process instead: {}", e);
                }
            }
        }

        // Restart mode: stop the process, keep partial files.
        self.stop_process(h).await;
        tracing::warn!(task_id = id, "{}", RESTART_PAUSE_WARNING);
        self.shared
            .announce(
                id,
                TaskEvent::Warning {
                    message: RESTART_PAUSE_WARNING.to_string(),
                },
            )
            .await;
        match self
            .shared
            .record_transition(id, TaskState::Paused, TaskEvent::Paused)
            .await
        {
            Ok(()) => {
                let _ = ack.send(Ok(()));
                (Proc::Stopped, None)
            }
            Err(e) => {
                let message = e.to_string();
                let _ = ack.send(Err(e));
                let outcome = Outcome::Failed(RunError::Store(message));
                (Proc::Stopped, Some(Exit::Finished(outcome, None)))
            }
        }
    }

    async fn resume_suspended(&mut self, mut h: RunHandle, ack: Ack) -> (Proc, Option<Exit>) {
        let id = self.id();
        let recorded = self
            .shared
            .record_transition(id, TaskState::Downloading, TaskEvent::Resumed)
            .await;
        if recorded.is_ok() {
            if let Err(e) = h.signal(Signal::Resume) {
                tracing::warn!(task_id = id, "could not continue process: {}", e);
            }
            self.last_activity = Instant::now();
            let _ = ack.send(Ok(()));
            return (Proc::Running(h), None);
        }
        let _ = ack.send(recorded);
        (Proc::Suspended(h), None)
    }

    async fn respawn(&mut self, ack: Ack) -> (Proc, Option<Exit>) {
        let id = self.id();
        let handle = match self.shared.runner.start(&self.task) {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(task_id = id, "could not restart downloader: {}", err);
                let _ = ack.send(Err(QueueError::Unavailable(format!(
                    "could not restart task {id}: {err}"
                ))));
                return (Proc::Stopped, Some(Exit::Finished(Outcome::Failed(err), None)));
            }
        };
        match self
            .shared
            .record_transition(id, TaskState::Downloading, TaskEvent::Resumed)
            .await
        {
            Ok(()) => {
                self.output_open = true;
                self.postprocessing = false;
                self.last_activity = Instant::now();
                tracing::info!(task_id = id, pid = ?handle.signals.pid(), "downloader restarted");
                let _ = ack.send(Ok(()));
                (Proc::Running(handle), None)
            }
            Err(e) => {
                self.stop_process(handle).await;
                let _ = ack.send(Err(e));
                (Proc::Stopped, None)
            }
        }
    }

    /// Terminate gracefully, escalate to a kill after the grace period, then
    /// collect the remaining output.
    async fn stop_process(&mut self, mut h: RunHandle) {
        let id = self.id();
        if let Err(e) = h.signal(Signal::Terminate) {
            tracing::warn!(task_id = id, "terminate failed: {}", e);
        }
        let grace = self.shared.cancel_grace;
        if tokio::time::timeout(grace, h.child.wait()).await.is_err() {
            tracing::warn!(task_id = id, "{}", CancelTimeoutError { grace });
            h.kill();
            if let Err(e) = h.child.wait().await {
                tracing::warn!(task_id = id, "wait after kill: {}", e);
            }
        }
        let (rest, _) = h.finish_output().await;
        self.absorb_destinations(rest);
    }

    async fn exited(&mut self, h: RunHandle, status: std::io::Result<ExitStatus>) -> Outcome {
        let id = self.id();
        let (rest, tails) = h.finish_output().await;
        self.absorb_destinations(rest);
        match status {
            Ok(status) => {
                tracing::debug!(task_id = id, ?status, "downloader exited");
                let expected = self.destinations.last().map(PathBuf::as_path);
                let outcome = evaluate_exit(status, expected, tails.stderr).await;
                if let Outcome::Failed(err) = &outcome {
                    tracing::warn!(task_id = id, stdout_tail = %tails.stdout, "download failed: {}", err);
                }
                outcome
            }
            Err(e) => Outcome::Failed(RunError::Wait(e)),
        }
    }

    /// Keep destinations from output read after exit; late progress is stale.
    fn absorb_destinations(&mut self, events: Vec<OutputEvent>) {
        for ev in events {
            if let OutputEvent::Destination(path) = ev {
                self.destinations.push(path);
            }
        }
    }
}
