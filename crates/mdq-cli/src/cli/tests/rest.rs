//! Tests for status, history, control commands, remove, clear, check, completions, man.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_status() {
    match parse(&["mdq", "status", "--json"]) {
        CliCommand::Status { json } => assert!(json),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_history_defaults() {
    match parse(&["mdq", "history"]) {
        CliCommand::History {
            page,
            page_size,
            search,
            json,
        } => {
            assert_eq!(page, 0);
            assert_eq!(page_size, 20);
            assert!(search.is_none());
            assert!(!json);
        }
        _ => panic!("expected History"),
    }
}

#[test]
fn cli_parse_history_search() {
    match parse(&["mdq", "history", "--page", "2", "--page-size", "5", "--search", "live"]) {
        CliCommand::History {
            page,
            page_size,
            search,
            ..
        } => {
            assert_eq!(page, 2);
            assert_eq!(page_size, 5);
            assert_eq!(search.as_deref(), Some("live"));
        }
        _ => panic!("expected History"),
    }
}

#[test]
fn cli_parse_task_commands() {
    match parse(&["mdq", "pause", "42"]) {
        CliCommand::Pause { id } => assert_eq!(id, 42),
        _ => panic!("expected Pause"),
    }
    match parse(&["mdq", "resume", "1"]) {
        CliCommand::Resume { id } => assert_eq!(id, 1),
        _ => panic!("expected Resume"),
    }
    match parse(&["mdq", "cancel", "7"]) {
        CliCommand::Cancel { id } => assert_eq!(id, 7),
        _ => panic!("expected Cancel"),
    }
    match parse(&["mdq", "retry", "8"]) {
        CliCommand::Retry { id } => assert_eq!(id, 8),
        _ => panic!("expected Retry"),
    }
    assert!(matches!(parse(&["mdq", "cancel-all"]), CliCommand::CancelAll));
}

#[test]
fn cli_rejects_non_numeric_id() {
    assert!(Cli::try_parse_from(["mdq", "pause", "abc"]).is_err());
}

#[test]
fn cli_parse_remove() {
    match parse(&["mdq", "remove", "99"]) {
        CliCommand::Remove { id, delete_files } => {
            assert_eq!(id, 99);
            assert!(!delete_files);
        }
        _ => panic!("expected Remove"),
    }
    match parse(&["mdq", "remove", "1", "--delete-files"]) {
        CliCommand::Remove { id, delete_files } => {
            assert_eq!(id, 1);
            assert!(delete_files);
        }
        _ => panic!("expected Remove with --delete-files"),
    }
}

#[test]
fn cli_parse_clear_and_check() {
    assert!(matches!(parse(&["mdq", "clear"]), CliCommand::Clear));
    match parse(&["mdq", "check", "abc123"]) {
        CliCommand::Check { content_id, json } => {
            assert_eq!(content_id, "abc123");
            assert!(!json);
        }
        _ => panic!("expected Check"),
    }
}

#[test]
fn cli_parse_completions_and_man() {
    match parse(&["mdq", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, clap_complete::Shell::Bash),
        _ => panic!("expected Completions"),
    }
    assert!(matches!(parse(&["mdq", "man"]), CliCommand::Man));
}

#[test]
fn cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
