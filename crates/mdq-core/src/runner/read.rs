//! Line readers for the child's stdout and stderr.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::tail::append_limited;
use crate::progress::{parse_destination_line, parse_progress_line, Phase, ProgressSample};

/// Something the supervisor must react to, extracted from one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Progress(ProgressSample),
    Destination(PathBuf),
}

/// Read `stream` line by line until EOF. Progress and destination lines are
/// forwarded; everything else goes into a bounded tail returned at the end.
///
/// Downloading samples use `try_send`: when the supervisor lags, the newest
/// sample waits in a one-slot buffer, replacing any older one, instead of
/// stalling the child on a full pipe. The buffered sample goes out before the
/// next ordered event and at EOF. Postprocessing markers and destinations are
/// never dropped.
pub(super) fn spawn_reader<R>(
    stream: R,
    stream_name: &'static str,
    tail_limit: usize,
    tx: mpsc::Sender<OutputEvent>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(256);
        let mut tail = String::new();
        let mut latest: Option<OutputEvent> = None;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(stream = stream_name, "output read failed: {}", e);
                    break;
                }
            }
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(|c| c == '\n' || c == '\r');

            if let Some(sample) = parse_progress_line(line) {
                if sample.phase == Phase::Postprocessing {
                    flush_latest(&tx, &mut latest).await;
                    let _ = tx.send(OutputEvent::Progress(sample)).await;
                    continue;
                }
                // A newer sample supersedes whatever is still buffered.
                latest = None;
                match tx.try_send(OutputEvent::Progress(sample)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(ev)) => latest = Some(ev),
                    Err(TrySendError::Closed(_)) => {
                        tracing::trace!(stream = stream_name, "progress receiver closed");
                    }
                }
                continue;
            }
            if let Some(path) = parse_destination_line(line) {
                flush_latest(&tx, &mut latest).await;
                let _ = tx.send(OutputEvent::Destination(path)).await;
            } else if let Some(ev) = latest.take() {
                if let Err(TrySendError::Full(ev)) = tx.try_send(ev) {
                    latest = Some(ev);
                }
            }
            append_limited(&mut tail, line, tail_limit);
        }
        flush_latest(&tx, &mut latest).await;
        tail
    })
}

async fn flush_latest(tx: &mpsc::Sender<OutputEvent>, latest: &mut Option<OutputEvent>) {
    if let Some(ev) = latest.take() {
        let _ = tx.send(ev).await;
    }
}
