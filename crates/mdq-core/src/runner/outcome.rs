//! Mapping a finished run to a task outcome.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use crate::error::RunError;

/// How one run ended.
#[derive(Debug)]
pub enum Outcome {
    Success { path: PathBuf, size: u64 },
    Failed(RunError),
    Cancelled,
}

/// Short failure message from a stderr tail: the last non-empty line with the
/// downloader's `ERROR: ` prefix removed.
pub fn exit_summary(code: Option<i32>, stderr_tail: &str) -> String {
    if stderr_tail.contains("Could not copy") && stderr_tail.contains("cookie") {
        return "cannot read browser cookies; close the browser completely or use another browser"
            .to_string();
    }
    let last = stderr_tail
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty());
    match last {
        Some(line) => line.strip_prefix("ERROR: ").unwrap_or(line).to_string(),
        None => match code {
            Some(code) => format!("downloader exited with status {code}"),
            None => "downloader was terminated by a signal".to_string(),
        },
    }
}

/// Decide the outcome of a process that exited on its own.
///
/// Non-zero exit is always a failure. A zero exit only counts as success when
/// the last announced destination exists and is non-empty.
pub async fn evaluate_exit(
    status: ExitStatus,
    destination: Option<&Path>,
    stderr_tail: String,
) -> Outcome {
    if !status.success() {
        let code = status.code();
        return Outcome::Failed(RunError::Exit {
            code,
            summary: exit_summary(code, &stderr_tail),
            stderr_tail,
        });
    }

    let Some(path) = destination else {
        return Outcome::Failed(RunError::OutputMissing { expected: None });
    };
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Outcome::Success {
            path: path.to_path_buf(),
            size: meta.len(),
        },
        _ => Outcome::Failed(RunError::OutputMissing {
            expected: Some(path.to_path_buf()),
        }),
    }
}
