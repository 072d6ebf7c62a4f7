#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod action;
mod args;
mod commands;
mod parser;

pub use action::CliAction;
pub use args::{ensure_no_unknown_flags, suggest_commands, VALID_COMMANDS};
pub use commands::{allowed_flags, CliCommand};
pub use parser::{parse_cli_args, parse_config_path, CliError};

pub const HELP: &str = "\
inbox - agent inbox queue and run orchestrator

USAGE:
    inbox [--config PATH] <COMMAND> [FLAGS]

COMMANDS:
    migrate                                     Apply the database schema
    worker                                      Reconcile, then process work items until SIGINT/SIGTERM
    reconcile                                   Fail runs left behind by a crashed worker
    provision --agent-id ID --workspace PATH [--name N]
                                                Create an active agent and its session
    pause --agent-id ID                         Stop dispatching to an agent and cancel its run
    resume --agent-id ID                        Make a paused agent active again
    enqueue --agent-id ID --message TEXT [--priority N] [--source S]
                                                Queue a merchant message
    tick --agent-id ID [--reason R] [--priority N]
                                                Queue a scheduled tick
    event --agent-id ID --event-type T [--data JSON] [--priority N]
                                                Queue a platform event
    status --agent-id ID                        Last 24h message stats, pending count, recent runs
    events --agent-id ID [--limit N] [--before EVENT_ID]
                                                List events, newest first
    watch --agent-id ID [--interval-ms N]       Follow new events

FLAGS:
    -h, --help       Print help
    -v, --version    Print version
";

#[cfg(test)]
mod tests;
