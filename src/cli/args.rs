#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use super::parser::CliError;

pub const VALID_COMMANDS: &[&str] = &[
    "help",
    "migrate",
    "worker",
    "reconcile",
    "provision",
    "pause",
    "resume",
    "enqueue",
    "tick",
    "event",
    "status",
    "events",
    "watch",
];

/// Flags every command accepts.
pub const GLOBAL_FLAGS: &[&str] = &["--config"];

/// # Errors
/// Returns `CliError::UnknownFlag` for the first `--flag` outside `allowed_flags`.
pub fn ensure_no_unknown_flags(args: &[String], allowed_flags: &[&str]) -> Result<(), CliError> {
    let invalid = args
        .iter()
        .skip(1)
        .find(|arg| {
            arg.starts_with("--")
                && !matches!(arg.as_str(), "--help" | "-h")
                && !GLOBAL_FLAGS.contains(&arg.as_str())
                && !allowed_flags.iter().any(|allowed| allowed == &arg.as_str())
        })
        .cloned();

    invalid.map_or(Ok(()), |flag| Err(CliError::UnknownFlag { flag }))
}

#[must_use]
pub fn suggest_commands(typo: &str) -> Vec<String> {
    VALID_COMMANDS
        .iter()
        .map(|cmd| (cmd, strsim::levenshtein(typo, cmd)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(cmd, _)| vec![(*cmd).to_string()])
        .unwrap_or_default()
}
