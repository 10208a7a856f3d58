//! `mdq add <locator> --id <content-id>` – queue a download.

use std::path::PathBuf;

use anyhow::Result;
use mdq_core::config::MdqConfig;
use mdq_core::control::ControlRequest;
use mdq_core::error::QueueError;
use mdq_core::scheduler::validate_request;
use mdq_core::task_db::{NewTask, TaskDb, TaskOptions};

use crate::cli::control_socket;

/// Arguments of `mdq add`, gathered from the command line.
#[derive(Debug)]
pub struct AddArgs {
    pub locator: String,
    pub content_id: String,
    pub title: Option<String>,
    pub format: String,
    pub dir: Option<PathBuf>,
    pub auth: Option<String>,
    pub template: Option<String>,
    pub extra_args: Vec<String>,
}

/// Inserts the task as pending. A running `mdq run` is told to pick it up.
pub async fn run_add(db: &TaskDb, cfg: &MdqConfig, args: AddArgs) -> Result<()> {
    let request = validate_request(new_task(cfg, args)?)?;

    let check = db.check_duplicate(&request.content_id).await?;
    if let Some(existing) = check.in_queue {
        return Err(QueueError::DuplicateInQueue {
            content_id: request.content_id,
            existing,
        }
        .into());
    }
    if let Some(prev) = &check.history_match {
        let path = prev
            .output_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("Note: {} was downloaded before (task {}, {})", request.content_id, prev.id, path);
    }

    let id = db.insert_task(&request).await?;
    tracing::info!(task_id = id, content_id = %request.content_id, "task added");
    println!("Added task {id}: {}", request.title);

    let notified = match control_socket::socket_path() {
        Ok(path) => control_socket::send_request(&path, ControlRequest::Refresh).await,
        Err(e) => Err(e),
    };
    match notified {
        Ok(Some(_)) => println!("Handed to the running queue."),
        Ok(None) => println!("Run `mdq run` to start downloading."),
        Err(e) => tracing::warn!("could not notify running queue: {:#}", e),
    }
    Ok(())
}

fn new_task(cfg: &MdqConfig, args: AddArgs) -> Result<NewTask> {
    let cwd = std::env::current_dir()?;
    let dest_dir = args
        .dir
        .or_else(|| cfg.download_dir.clone())
        .map(|d| if d.is_relative() { cwd.join(d) } else { d })
        .unwrap_or(cwd);
    Ok(NewTask {
        locator: args.locator,
        content_id: args.content_id,
        title: args.title.unwrap_or_default(),
        format_selector: args.format,
        dest_dir,
        auth_hint: args.auth,
        options: TaskOptions {
            extra_args: args.extra_args,
            filename_template: args.template,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: Option<&str>) -> AddArgs {
        AddArgs {
            locator: "https://media.example/v/1".to_string(),
            content_id: "v1".to_string(),
            title: None,
            format: "best".to_string(),
            dir: dir.map(PathBuf::from),
            auth: Some("firefox".to_string()),
            template: None,
            extra_args: vec!["--limit-rate".to_string(), "1M".to_string()],
        }
    }

    #[test]
    fn explicit_dir_wins_over_config() {
        let cfg = MdqConfig {
            download_dir: Some(PathBuf::from("/srv/media")),
            ..MdqConfig::default()
        };
        let task = new_task(&cfg, args(Some("/tmp/x"))).unwrap();
        assert_eq!(task.dest_dir, PathBuf::from("/tmp/x"));
        assert_eq!(task.auth_hint.as_deref(), Some("firefox"));
        assert_eq!(task.options.extra_args, vec!["--limit-rate", "1M"]);

        let task = new_task(&cfg, args(None)).unwrap();
        assert_eq!(task.dest_dir, PathBuf::from("/srv/media"));
    }

    #[test]
    fn relative_dir_is_made_absolute() {
        let task = new_task(&MdqConfig::default(), args(Some("media"))).unwrap();
        assert!(task.dest_dir.is_absolute());
        assert!(task.dest_dir.ends_with("media"));
    }
}
