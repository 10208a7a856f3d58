//! CLI for the MDQ media download queue.

mod commands;
mod control_socket;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mdq_core::config;
use mdq_core::control::ControlRequest;
use mdq_core::task_db::TaskDb;

use commands::{
    run_add, run_check, run_clear, run_completions, run_control, run_history, run_man, run_queue,
    run_remove, run_status, AddArgs,
};

/// Top-level CLI for the MDQ download queue.
#[derive(Debug, Parser)]
#[command(name = "mdq")]
#[command(about = "MDQ: queued media downloads driven by yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a download.
    Add {
        /// Page or media URL handed to the downloader.
        locator: String,

        /// Stable content identifier used for duplicate detection.
        #[arg(long = "id", value_name = "CONTENT_ID")]
        content_id: String,

        /// Display title (defaults to the content id).
        #[arg(long)]
        title: Option<String>,

        /// Downloader format selector.
        #[arg(long, default_value = "bv*+ba/b")]
        format: String,

        /// Destination directory (defaults to the configured download_dir, then the current directory).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Browser to read cookies from for authenticated sources.
        #[arg(long, value_name = "BROWSER")]
        auth: Option<String>,

        /// Output filename template for this task only.
        #[arg(long, value_name = "TEMPLATE")]
        template: Option<String>,

        /// Extra downloader argument (repeatable).
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        extra_args: Vec<String>,
    },

    /// Run the queue until every task has finished.
    Run {
        /// Download up to N tasks concurrently (defaults to max_concurrent from the config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Print events as JSON lines instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show active tasks.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show finished tasks, newest first.
    History {
        /// Page number, starting at 0.
        #[arg(long, default_value = "0")]
        page: u32,

        /// Rows per page (1..=100).
        #[arg(long, default_value = "20")]
        page_size: u32,

        /// Only show tasks whose title contains this text.
        #[arg(long)]
        search: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Pause a downloading task (needs a running `mdq run`).
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Resume a paused task (needs a running `mdq run`).
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Cancel a task and remove its partial files.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Put a failed task back at the end of the queue.
    Retry {
        /// Task identifier.
        id: i64,
    },

    /// Cancel every active task.
    CancelAll,

    /// Delete a finished task from history.
    Remove {
        /// Task identifier.
        id: i64,

        /// Also delete the downloaded file.
        #[arg(long)]
        delete_files: bool,
    },

    /// Delete every finished task from history.
    Clear,

    /// Check whether a content id is queued or was downloaded before.
    Check {
        /// Content identifier.
        content_id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },

    /// Print the man page to stdout.
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Neither needs config or the database.
        match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Man => return run_man(),
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = TaskDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                locator,
                content_id,
                title,
                format,
                dir,
                auth,
                template,
                extra_args,
            } => {
                let args = AddArgs {
                    locator,
                    content_id,
                    title,
                    format,
                    dir,
                    auth,
                    template,
                    extra_args,
                };
                run_add(&db, &cfg, args).await?;
            }
            CliCommand::Run { jobs, json } => run_queue(db, cfg, jobs, json).await?,
            CliCommand::Status { json } => run_status(&db, json).await?,
            CliCommand::History {
                page,
                page_size,
                search,
                json,
            } => run_history(&db, page, page_size, search.as_deref(), json).await?,
            CliCommand::Pause { id } => run_control(&db, ControlRequest::Pause(id)).await?,
            CliCommand::Resume { id } => run_control(&db, ControlRequest::Resume(id)).await?,
            CliCommand::Cancel { id } => run_control(&db, ControlRequest::Cancel(id)).await?,
            CliCommand::Retry { id } => run_control(&db, ControlRequest::Retry(id)).await?,
            CliCommand::CancelAll => run_control(&db, ControlRequest::CancelAll).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&db, id, delete_files).await?,
            CliCommand::Clear => run_clear(&db).await?,
            CliCommand::Check { content_id, json } => run_check(&db, &content_id, json).await?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
