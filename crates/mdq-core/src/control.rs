//! Task control: per-task command channels and the control-socket protocol.
//!
//! While the orchestrator runs, each live task is driven by a supervisor that
//! owns a command receiver. [`TaskControl`] is the sending half kept by the
//! scheduler; every command carries an ack so the caller learns when the
//! transition has been recorded. [`ControlRequest`] is the one-line text
//! protocol spoken over the control socket (e.g. `mdq pause 1` while `mdq run`
//! is active).

use std::fmt;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::error::QueueError;
use crate::task_db::TaskId;

/// Commands a supervisor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
    Pause,
    Resume,
    Cancel,
    /// Stop the process but leave the task recoverable (scheduler shutdown).
    Detach,
}

impl TaskCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCommand::Pause => "pause",
            TaskCommand::Resume => "resume",
            TaskCommand::Cancel => "cancel",
            TaskCommand::Detach => "detach",
        }
    }
}

/// A command plus the channel the supervisor answers on.
#[derive(Debug)]
pub struct ControlMsg {
    pub command: TaskCommand,
    pub ack: oneshot::Sender<Result<(), QueueError>>,
}

/// Sending half of a running task's command channel.
#[derive(Debug, Clone)]
pub struct TaskControl {
    task_id: TaskId,
    tx: mpsc::Sender<ControlMsg>,
}

impl TaskControl {
    /// Create a control pair for one task; the receiver goes to its supervisor.
    pub fn channel(task_id: TaskId) -> (Self, mpsc::Receiver<ControlMsg>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { task_id, tx }, rx)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Send a command and wait until the supervisor has applied it.
    ///
    /// Fails with `Unavailable` if the supervisor exited before answering
    /// (the task finished on its own in the meantime).
    pub async fn send(&self, command: TaskCommand) -> Result<(), QueueError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(ControlMsg { command, ack })
            .await
            .map_err(|_| supervisor_gone(self.task_id))?;
        done.await.map_err(|_| supervisor_gone(self.task_id))?
    }
}

fn supervisor_gone(id: TaskId) -> QueueError {
    QueueError::Unavailable(format!("task {id} is no longer running"))
}

/// One request line on the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Pause(TaskId),
    Resume(TaskId),
    Cancel(TaskId),
    Retry(TaskId),
    CancelAll,
    /// Pick up pending tasks inserted by another process.
    Refresh,
}

impl ControlRequest {
    /// Parse `"<verb> [id]"`. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| "empty request".to_string())?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("too many arguments for {verb}"));
        }
        let id = |arg: Option<&str>| -> Result<TaskId, String> {
            let raw = arg.ok_or_else(|| format!("{verb} needs a task id"))?;
            raw.parse::<TaskId>()
                .map_err(|_| format!("invalid task id: {raw}"))
        };
        let no_arg = |req: ControlRequest| match arg {
            None => Ok(req),
            Some(_) => Err(format!("{verb} takes no arguments")),
        };
        match verb {
            "pause" => id(arg).map(ControlRequest::Pause),
            "resume" => id(arg).map(ControlRequest::Resume),
            "cancel" => id(arg).map(ControlRequest::Cancel),
            "retry" => id(arg).map(ControlRequest::Retry),
            "cancel-all" => no_arg(ControlRequest::CancelAll),
            "refresh" => no_arg(ControlRequest::Refresh),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlRequest::Pause(id) => write!(f, "pause {id}"),
            ControlRequest::Resume(id) => write!(f, "resume {id}"),
            ControlRequest::Cancel(id) => write!(f, "cancel {id}"),
            ControlRequest::Retry(id) => write!(f, "retry {id}"),
            ControlRequest::CancelAll => f.write_str("cancel-all"),
            ControlRequest::Refresh => f.write_str("refresh"),
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("mdq")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_requests() {
        assert_eq!(ControlRequest::parse("pause 3"), Ok(ControlRequest::Pause(3)));
        assert_eq!(ControlRequest::parse("  cancel 12 \n"), Ok(ControlRequest::Cancel(12)));
        assert_eq!(ControlRequest::parse("retry 1"), Ok(ControlRequest::Retry(1)));
        assert_eq!(ControlRequest::parse("cancel-all"), Ok(ControlRequest::CancelAll));
        assert_eq!(ControlRequest::parse("refresh"), Ok(ControlRequest::Refresh));
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!(ControlRequest::parse("").is_err());
        assert!(ControlRequest::parse("pause").is_err());
        assert!(ControlRequest::parse("pause x").is_err());
        assert!(ControlRequest::parse("pause 1 2").is_err());
        assert!(ControlRequest::parse("refresh 1").is_err());
        assert!(ControlRequest::parse("explode 1").is_err());
    }

    #[test]
    fn display_matches_parse() {
        for req in [
            ControlRequest::Resume(7),
            ControlRequest::CancelAll,
            ControlRequest::Refresh,
        ] {
            assert_eq!(ControlRequest::parse(&req.to_string()), Ok(req));
        }
    }

    #[tokio::test]
    async fn send_reports_gone_supervisor() {
        let (control, rx) = TaskControl::channel(5);
        drop(rx);
        let err = control.send(TaskCommand::Pause).await.unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
    }

    #[tokio::test]
    async fn send_waits_for_ack() {
        let (control, mut rx) = TaskControl::channel(5);
        let supervisor = tokio::spawn(async move {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.command, TaskCommand::Cancel);
            let _ = msg.ack.send(Ok(()));
        });
        control.send(TaskCommand::Cancel).await.unwrap();
        supervisor.await.unwrap();
    }
}
