#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use crate::cli::{parse_cli_args, parse_config_path, CliAction, CliCommand, CliError};
use std::path::PathBuf;

fn given_cli_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn when_no_args_then_show_help() {
    let action = parse_cli_args(&given_cli_args(&[])).expect("parse");
    assert_eq!(action, CliAction::ShowHelp);
}

#[test]
fn when_version_flag_then_show_version() {
    let action = parse_cli_args(&given_cli_args(&["-v"])).expect("parse");
    assert_eq!(action, CliAction::ShowVersion);
}

#[test]
fn when_command_followed_by_help_then_show_help() {
    let action = parse_cli_args(&given_cli_args(&["enqueue", "--help"])).expect("parse");
    assert_eq!(action, CliAction::ShowHelp);
}

#[test]
fn when_enqueue_with_all_flags_then_enqueue_command() {
    let args = given_cli_args(&[
        "enqueue",
        "--agent-id",
        "agt_x",
        "--message",
        "What's my best seller?",
        "--priority",
        "5",
        "--source",
        "dashboard",
    ]);
    let action = parse_cli_args(&args).expect("parse");

    assert_eq!(
        action,
        CliAction::Command(CliCommand::Enqueue {
            agent_id: "agt_x".to_string(),
            message: "What's my best seller?".to_string(),
            priority: Some(5),
            source: Some("dashboard".to_string()),
        })
    );
}

#[test]
fn when_priority_is_negative_then_it_parses() {
    let args = given_cli_args(&["tick", "--agent-id", "agt_x", "--priority", "-2"]);
    match parse_cli_args(&args).expect("parse") {
        CliAction::Command(CliCommand::Tick { priority, .. }) => assert_eq!(priority, Some(-2)),
        other => panic!("Expected Tick command, got {other:?}"),
    }
}

#[test]
fn when_provision_then_workspace_is_a_path() {
    let args = given_cli_args(&[
        "provision",
        "--agent-id",
        "agt_x",
        "--workspace",
        "/srv/agents/agt_x",
    ]);
    match parse_cli_args(&args).expect("parse") {
        CliAction::Command(CliCommand::Provision {
            workspace, name, ..
        }) => {
            assert_eq!(workspace, PathBuf::from("/srv/agents/agt_x"));
            assert_eq!(name, None);
        }
        other => panic!("Expected Provision command, got {other:?}"),
    }
}

#[test]
fn when_global_config_precedes_command_then_both_are_read() {
    let args = given_cli_args(&["--config", "custom.toml", "worker"]);
    assert_eq!(
        parse_cli_args(&args).expect("parse"),
        CliAction::Command(CliCommand::Worker)
    );
    assert_eq!(
        parse_config_path(&args).expect("config"),
        Some(PathBuf::from("custom.toml"))
    );
}

#[test]
fn when_missing_required_arg_then_error_names_it() {
    let args = given_cli_args(&["enqueue", "--agent-id", "agt_x"]);
    assert_eq!(
        parse_cli_args(&args),
        Err(CliError::MissingRequiredArg {
            arg: "message".to_string()
        })
    );
}

#[test]
fn when_flag_has_no_value_then_error() {
    let args = given_cli_args(&["events", "--agent-id", "agt_x", "--limit"]);
    assert!(matches!(
        parse_cli_args(&args),
        Err(CliError::MissingRequiredArg { ref arg }) if arg == "limit"
    ));
}

#[test]
fn when_value_does_not_parse_then_invalid_value() {
    let args = given_cli_args(&["events", "--agent-id", "agt_x", "--before", "yesterday"]);
    assert!(matches!(
        parse_cli_args(&args),
        Err(CliError::InvalidArgValue { ref arg, .. }) if arg == "before"
    ));
}

#[test]
fn when_flag_belongs_to_another_command_then_unknown_flag() {
    let args = given_cli_args(&["pause", "--agent-id", "agt_x", "--message", "hi"]);
    assert_eq!(
        parse_cli_args(&args),
        Err(CliError::UnknownFlag {
            flag: "--message".to_string()
        })
    );
}

#[test]
fn when_command_is_misspelled_then_suggestion_is_offered() {
    let error = parse_cli_args(&given_cli_args(&["enqeue"])).expect_err("typo");
    assert_eq!(
        error,
        CliError::UnknownCommand {
            cmd: "enqeue".to_string(),
            suggestions: vec!["enqueue".to_string()],
        }
    );
    assert!(error.to_string().contains("did you mean enqueue?"));
}
