//! Control socket: server (during `mdq run`) and client (for `mdq pause` and friends).
//! Protocol: one request line (see [`ControlRequest`]), one reply line:
//! `ok <message>` or `err <message>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use mdq_core::control::ControlRequest;
use mdq_core::scheduler::Orchestrator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` (replacing a stale socket) and serves requests against `orch`
/// until the returned task is aborted.
pub fn spawn_control_listener(
    orch: Orchestrator,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create socket dir: {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orch = orch.clone();
                    tokio::spawn(serve_connection(orch, stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(orch: Orchestrator, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match ControlRequest::parse(&line) {
            Ok(request) => {
                tracing::debug!(%request, "control request");
                execute(&orch, request).await
            }
            Err(e) => Err(e),
        };
        let reply = match reply {
            Ok(msg) => format!("ok {}\n", one_line(&msg)),
            Err(msg) => format!("err {}\n", one_line(&msg)),
        };
        if let Err(e) = write.write_all(reply.as_bytes()).await {
            tracing::debug!("control socket write: {}", e);
            break;
        }
    }
}

async fn execute(orch: &Orchestrator, request: ControlRequest) -> Result<String, String> {
    let result = match request {
        ControlRequest::Pause(id) => orch.pause(id).await.map(|()| format!("paused task {id}")),
        ControlRequest::Resume(id) => orch.resume(id).await.map(|()| format!("resumed task {id}")),
        ControlRequest::Cancel(id) => orch.cancel(id).await.map(|()| format!("cancelled task {id}")),
        ControlRequest::Retry(id) => orch.retry(id).await.map(|()| format!("task {id} queued again")),
        ControlRequest::CancelAll => {
            let report = orch.cancel_all().await;
            let mut msg = format!("cancelled {} task(s)", report.cancelled.len());
            for (id, err) in &report.failed {
                msg.push_str(&format!("; task {id}: {err}"));
            }
            return Ok(msg);
        }
        ControlRequest::Refresh => orch.refresh().await.map(|n| format!("picked up {n} new task(s)")),
    };
    result.map_err(|e| e.to_string())
}

fn one_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}

/// Sends `request` to a running `mdq run` and returns its reply message.
///
/// Returns `Ok(None)` when nothing is listening (no socket file, or a stale one).
/// An `err` reply becomes an error.
pub async fn send_request(socket_path: &Path, request: ControlRequest) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e).context("connect to control socket"),
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{request}\n").as_bytes())
        .await
        .context("send control request")?;

    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await
        .context("read control reply")?
        .ok_or_else(|| anyhow!("control socket closed without a reply"))?;
    parse_reply(&reply).map(Some)
}

fn parse_reply(reply: &str) -> Result<String> {
    if let Some(msg) = reply.strip_prefix("ok") {
        return Ok(msg.trim().to_string());
    }
    if let Some(msg) = reply.strip_prefix("err") {
        bail!("{}", msg.trim());
    }
    bail!("unexpected control reply: {reply}")
}

/// Socket path used by both sides.
pub fn socket_path() -> Result<PathBuf> {
    Ok(mdq_core::control::default_control_socket_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdq_core::config::MdqConfig;
    use mdq_core::task_db::TaskDb;

    #[test]
    fn replies_parse() {
        assert_eq!(parse_reply("ok paused task 1").unwrap(), "paused task 1");
        assert_eq!(parse_reply("ok").unwrap(), "");
        let err = parse_reply("err task 9 not found").unwrap_err();
        assert_eq!(err.to_string(), "task 9 not found");
        assert!(parse_reply("what").is_err());
    }

    #[tokio::test]
    async fn missing_socket_means_no_runner() {
        let dir = tempfile::tempdir().unwrap();
        let reply = send_request(&dir.path().join("none.sock"), ControlRequest::Refresh)
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn listener_answers_requests() {
        let dir = tempfile::tempdir().unwrap();
        let db = TaskDb::open_at(dir.path().join("tasks.db")).await.unwrap();
        let orch = Orchestrator::start(db, &MdqConfig::default()).await.unwrap();
        let sock = dir.path().join("control.sock");
        let server = spawn_control_listener(orch.clone(), &sock).unwrap();

        let reply = send_request(&sock, ControlRequest::Refresh).await.unwrap();
        assert_eq!(reply.as_deref(), Some("picked up 0 new task(s)"));

        let err = send_request(&sock, ControlRequest::Pause(42)).await.unwrap_err();
        assert_eq!(err.to_string(), "task 42 not found");

        let reply = send_request(&sock, ControlRequest::CancelAll).await.unwrap();
        assert_eq!(reply.as_deref(), Some("cancelled 0 task(s)"));

        server.abort();
        orch.shutdown().await;
    }
}
