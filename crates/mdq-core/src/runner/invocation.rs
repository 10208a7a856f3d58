//! Downloader command line for one task.

use crate::config::DownloaderConfig;
use crate::progress::progress_template_args;
use crate::task_db::TaskRecord;

/// Arguments (without the program) for downloading `task`.
///
/// Order: format, output template, progress templates, fixed flags, cookies,
/// configured extra args, per-task extra args, and the locator last.
pub fn build_args(downloader: &DownloaderConfig, task: &TaskRecord) -> Vec<String> {
    let template = task
        .options
        .filename_template
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&downloader.filename_template);
    let output = task.dest_dir.join(template);

    let mut args = vec![
        "--format".to_string(),
        task.format_selector.clone(),
        "--output".to_string(),
        output.to_string_lossy().into_owned(),
    ];
    args.extend(progress_template_args());
    args.extend(
        ["--newline", "--no-playlist", "--no-overwrites", "--encoding", "UTF-8"]
            .into_iter()
            .map(String::from),
    );

    let browser = task
        .auth_hint
        .as_deref()
        .or(downloader.cookie_browser.as_deref())
        .map(str::trim)
        .filter(|b| !b.is_empty());
    if let Some(browser) = browser {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.to_string());
    }

    args.extend(downloader.extra_args.iter().cloned());
    args.extend(task.options.extra_args.iter().cloned());
    // Everything after `--` is positional, so a locator starting with `-` stays a locator.
    args.push("--".to_string());
    args.push(task.locator.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_db::{TaskOptions, TaskState};
    use std::path::PathBuf;

    fn record() -> TaskRecord {
        TaskRecord {
            id: 1,
            locator: "https://media.example/watch?v=abc".to_string(),
            content_id: "abc".to_string(),
            title: "abc".to_string(),
            format_selector: "bv*+ba/b".to_string(),
            dest_dir: PathBuf::from("/srv/media"),
            auth_hint: None,
            options: TaskOptions::default(),
            state: TaskState::Pending,
            progress: 0.0,
            rate: None,
            eta: None,
            output_path: None,
            file_size: None,
            error_message: None,
            error_detail: None,
            store_error: false,
            queue_seq: 1,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn default_invocation() {
        let args = build_args(&DownloaderConfig::default(), &record());
        assert_eq!(value_after(&args, "--format"), Some("bv*+ba/b"));
        assert_eq!(value_after(&args, "--output"), Some("/srv/media/%(title)s.%(ext)s"));
        assert_eq!(value_after(&args, "--encoding"), Some("UTF-8"));
        assert!(args.contains(&"--newline".to_string()));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--no-overwrites".to_string()));
        assert!(!args.contains(&"--cookies-from-browser".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "--progress-template").count(), 2);
        assert_eq!(args.last().map(String::as_str), Some("https://media.example/watch?v=abc"));
    }

    #[test]
    fn task_settings_override_config() {
        let downloader = DownloaderConfig {
            cookie_browser: Some("chrome".to_string()),
            extra_args: vec!["--limit-rate".to_string(), "2M".to_string()],
            ..DownloaderConfig::default()
        };
        let mut task = record();
        task.auth_hint = Some("firefox".to_string());
        task.options.filename_template = Some("%(id)s.%(ext)s".to_string());
        task.options.extra_args = vec!["--embed-subs".to_string()];

        let args = build_args(&downloader, &task);
        assert_eq!(value_after(&args, "--cookies-from-browser"), Some("firefox"));
        assert_eq!(value_after(&args, "--output"), Some("/srv/media/%(id)s.%(ext)s"));
        let rate = args.iter().position(|a| a == "--limit-rate").unwrap();
        let subs = args.iter().position(|a| a == "--embed-subs").unwrap();
        assert!(rate < subs, "config args come before task args");
    }

    #[test]
    fn config_cookie_browser_is_fallback() {
        let downloader = DownloaderConfig {
            cookie_browser: Some("chrome".to_string()),
            ..DownloaderConfig::default()
        };
        let args = build_args(&downloader, &record());
        assert_eq!(value_after(&args, "--cookies-from-browser"), Some("chrome"));
    }
}
