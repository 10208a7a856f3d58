//! `mdq run` – drive the queue until every task has finished.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use mdq_core::config::MdqConfig;
use mdq_core::control::ControlRequest;
use mdq_core::scheduler::{Orchestrator, TaskEvent, TaskUpdate};
use mdq_core::task_db::{TaskDb, TaskId};

use crate::cli::control_socket;

const PROGRESS_PRINT_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_queue(db: TaskDb, mut cfg: MdqConfig, jobs: Option<usize>, json: bool) -> Result<()> {
    let socket_path = control_socket::socket_path()?;
    if control_socket::send_request(&socket_path, ControlRequest::Refresh)
        .await
        .ok()
        .flatten()
        .is_some()
    {
        bail!("another `mdq run` is already active");
    }

    if db.list_active().await?.is_empty() {
        println!("No queued tasks.");
        return Ok(());
    }
    if let Some(n) = jobs {
        cfg.max_concurrent = n;
    }

    let orch = Orchestrator::start(db, &cfg).await?;
    let listener = match control_socket::spawn_control_listener(orch.clone(), &socket_path) {
        Ok(handle) => {
            tracing::debug!(path = %socket_path.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!("control socket unavailable: {:#}", e);
            None
        }
    };
    tracing::info!(limit = orch.limit().await, "queue running");

    let result = drive(&orch, json).await;

    orch.shutdown().await;
    if let Some(handle) = listener {
        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
    result
}

/// Print events until the queue drains or the user interrupts.
async fn drive(orch: &Orchestrator, json: bool) -> Result<()> {
    let mut events = orch.subscribe(None).await?;
    if orch.list_active().await.is_empty() {
        println!("Nothing left to download; see `mdq history`.");
        return Ok(());
    }

    let mut printer = EventPrinter::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::warn!("ctrl-c handler: {}", e);
                }
                println!("Interrupted; unfinished tasks stay queued for the next `mdq run`.");
                return Ok(());
            }
            update = events.recv() => {
                let Some(update) = update else {
                    return Ok(());
                };
                if json {
                    println!("{}", serde_json::to_string(&update)?);
                } else if let Some(line) = printer.line(&update, Instant::now()) {
                    println!("{line}");
                }
                if update.event.is_terminal() && orch.list_active().await.is_empty() {
                    return Ok(());
                }
            }
        }
    }
}

/// Renders events as text, throttling progress lines per task.
#[derive(Default)]
struct EventPrinter {
    last_progress: HashMap<TaskId, Instant>,
}

impl EventPrinter {
    fn line(&mut self, update: &TaskUpdate, now: Instant) -> Option<String> {
        let id = update.task_id;
        let text = match &update.event {
            TaskEvent::Snapshot { task } => format!("{}: {}", task.state, task.title),
            TaskEvent::Queued { task } => format!("queued: {}", task.title),
            TaskEvent::Started => "started".to_string(),
            TaskEvent::Progress { sample } => {
                if let Some(last) = self.last_progress.get(&id) {
                    if now.duration_since(*last) < PROGRESS_PRINT_INTERVAL {
                        return None;
                    }
                }
                self.last_progress.insert(id, now);
                let pct = sample
                    .percent
                    .map(|p| format!("{p:5.1}%"))
                    .unwrap_or_else(|| "    ?%".to_string());
                format!(
                    "{pct}  {}  ETA {}",
                    sample.rate.as_deref().unwrap_or("-"),
                    sample.eta.as_deref().unwrap_or("?")
                )
            }
            TaskEvent::Postprocessing => "post-processing".to_string(),
            TaskEvent::Paused => "paused".to_string(),
            TaskEvent::Resumed => "resumed".to_string(),
            TaskEvent::Warning { message } => format!("warning: {message}"),
            TaskEvent::Completed { path, size } => {
                format!("done: {} ({:.1} MiB)", path.display(), *size as f64 / 1_048_576.0)
            }
            TaskEvent::Failed { message } => format!("failed: {message}"),
            TaskEvent::Cancelled => "cancelled".to_string(),
        };
        if update.event.is_terminal() {
            self.last_progress.remove(&id);
        }
        Some(format!("[{id}] {text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdq_core::progress::{Phase, ProgressSample};
    use std::path::PathBuf;

    fn progress(id: TaskId, pct: f64) -> TaskUpdate {
        TaskUpdate {
            task_id: id,
            event: TaskEvent::Progress {
                sample: ProgressSample {
                    percent: Some(pct),
                    rate: Some("1.20MiB/s".to_string()),
                    eta: Some("00:10".to_string()),
                    phase: Phase::Downloading,
                },
            },
        }
    }

    #[test]
    fn progress_lines_are_throttled_per_task() {
        let mut printer = EventPrinter::default();
        let t0 = Instant::now();
        assert_eq!(
            printer.line(&progress(1, 12.5), t0).as_deref(),
            Some("[1]  12.5%  1.20MiB/s  ETA 00:10")
        );
        assert!(printer.line(&progress(1, 13.0), t0 + Duration::from_millis(100)).is_none());
        assert!(printer.line(&progress(2, 1.0), t0 + Duration::from_millis(100)).is_some());
        assert!(printer.line(&progress(1, 20.0), t0 + Duration::from_millis(600)).is_some());
    }

    #[test]
    fn terminal_events_are_always_printed() {
        let mut printer = EventPrinter::default();
        let done = TaskUpdate {
            task_id: 3,
            event: TaskEvent::Completed {
                path: PathBuf::from("/tmp/clip.mkv"),
                size: 2 * 1_048_576,
            },
        };
        assert_eq!(
            printer.line(&done, Instant::now()).as_deref(),
            Some("[3] done: /tmp/clip.mkv (2.0 MiB)")
        );
        let failed = TaskUpdate {
            task_id: 4,
            event: TaskEvent::Failed {
                message: "Unsupported URL".to_string(),
            },
        };
        assert_eq!(
            printer.line(&failed, Instant::now()).as_deref(),
            Some("[4] failed: Unsupported URL")
        );
    }
}
