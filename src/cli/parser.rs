#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::action::CliAction;
use super::args::{ensure_no_unknown_flags, suggest_commands, VALID_COMMANDS};
use super::commands::{allowed_flags, CliCommand};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CliError {
    #[error("Missing required argument: {}", arg)]
    MissingRequiredArg { arg: String },
    #[error("Unknown command: {}{}", cmd, suggestion_suffix(suggestions))]
    UnknownCommand {
        cmd: String,
        suggestions: Vec<String>,
    },
    #[error("Unknown flag: {}", flag)]
    UnknownFlag { flag: String },
    #[error("Invalid argument value for {}: {}", arg, error)]
    InvalidArgValue { arg: String, error: String },
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean {}?)", suggestions.join(", "))
    }
}

/// Parses arguments after the program name.
///
/// # Errors
/// Returns a `CliError` for unknown commands or flags and for missing or
/// unparsable values.
pub fn parse_cli_args(args: &[String]) -> Result<CliAction, CliError> {
    if args
        .get(1)
        .is_some_and(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(CliAction::ShowHelp);
    }

    let Some(command) = args.iter().map(String::as_str).find(|arg| !is_global_flag_part(args, arg))
    else {
        return Ok(CliAction::ShowHelp);
    };
    let position = args.iter().position(|arg| arg == command).unwrap_or_default();
    let rest = &args[position..];

    match command {
        "-h" | "--help" => return Ok(CliAction::ShowHelp),
        "-v" | "--version" => return Ok(CliAction::ShowVersion),
        _ => {}
    }
    if command.starts_with('-') {
        return Err(CliError::UnknownFlag {
            flag: command.to_string(),
        });
    }
    if command != "?" && !VALID_COMMANDS.contains(&command) {
        return Err(CliError::UnknownCommand {
            cmd: command.to_string(),
            suggestions: suggest_commands(command),
        });
    }
    ensure_no_unknown_flags(rest, allowed_flags(command))?;

    let parsed = match command {
        "help" | "?" => CliCommand::Help,
        "migrate" => CliCommand::Migrate,
        "worker" => CliCommand::Worker,
        "reconcile" => CliCommand::Reconcile,
        "provision" => CliCommand::Provision {
            agent_id: parse_required_arg(rest, "agent_id")?,
            workspace: parse_required_arg(rest, "workspace")?,
            name: parse_optional_arg(rest, "name")?,
        },
        "pause" => CliCommand::Pause {
            agent_id: parse_required_arg(rest, "agent_id")?,
        },
        "resume" => CliCommand::Resume {
            agent_id: parse_required_arg(rest, "agent_id")?,
        },
        "enqueue" => CliCommand::Enqueue {
            agent_id: parse_required_arg(rest, "agent_id")?,
            message: parse_required_arg(rest, "message")?,
            priority: parse_optional_arg(rest, "priority")?,
            source: parse_optional_arg(rest, "source")?,
        },
        "tick" => CliCommand::Tick {
            agent_id: parse_required_arg(rest, "agent_id")?,
            reason: parse_optional_arg(rest, "reason")?,
            priority: parse_optional_arg(rest, "priority")?,
        },
        "event" => CliCommand::Event {
            agent_id: parse_required_arg(rest, "agent_id")?,
            event_type: parse_required_arg(rest, "event_type")?,
            data: parse_optional_arg(rest, "data")?,
            priority: parse_optional_arg(rest, "priority")?,
        },
        "status" => CliCommand::Status {
            agent_id: parse_required_arg(rest, "agent_id")?,
        },
        "events" => CliCommand::Events {
            agent_id: parse_required_arg(rest, "agent_id")?,
            limit: parse_optional_arg(rest, "limit")?,
            before: parse_optional_arg(rest, "before")?,
        },
        "watch" => CliCommand::Watch {
            agent_id: parse_required_arg(rest, "agent_id")?,
            interval_ms: parse_optional_arg(rest, "interval_ms")?,
        },
        other => {
            return Err(CliError::UnknownCommand {
                cmd: other.to_string(),
                suggestions: suggest_commands(other),
            })
        }
    };
    Ok(CliAction::Command(parsed))
}

/// Value of the global `--config` flag, wherever it appears.
///
/// # Errors
/// Returns `MissingRequiredArg` when the flag has no value.
pub fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>, CliError> {
    parse_optional_arg(args, "config")
}

fn is_global_flag_part(args: &[String], arg: &str) -> bool {
    if arg == "--config" {
        return true;
    }
    args.iter()
        .position(|candidate| candidate == "--config")
        .and_then(|i| args.get(i + 1))
        .is_some_and(|value| value == arg)
}

fn parse_required_arg<T>(args: &[String], name: &str) -> Result<T, CliError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_optional_arg(args, name)?.ok_or_else(|| CliError::MissingRequiredArg {
        arg: name.to_string(),
    })
}

fn parse_optional_arg<T>(args: &[String], name: &str) -> Result<Option<T>, CliError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let flag = format!("--{}", name.replace('_', "-"));
    let Some(position) = args.iter().position(|a| a.as_str() == flag) else {
        return Ok(None);
    };

    match args.get(position + 1) {
        None => Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        }),
        Some(value) if value.starts_with("--") => Err(CliError::MissingRequiredArg {
            arg: name.to_string(),
        }),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| CliError::InvalidArgValue {
                arg: name.to_string(),
                error: format!("{e}"),
            }),
    }
}
