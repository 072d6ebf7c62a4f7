use inbox::cli::{parse_cli_args, parse_config_path, CliAction, CliError, HELP};
use inbox::commands::dispatch;
use inbox::error::code;
use inbox::output::{emit_error, error_envelope};
use inbox::WorkerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CLI_ERROR_EXIT: i32 = 2;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = run(&args).await;
    std::process::exit(code);
}

async fn run(args: &[String]) -> i32 {
    let action = match parse_cli_args(args) {
        Ok(action) => action,
        Err(error) => return cli_failure(&error),
    };

    let command = match action {
        CliAction::ShowHelp => {
            println!("{HELP}");
            return 0;
        }
        CliAction::ShowVersion => {
            println!("inbox {}", env!("CARGO_PKG_VERSION"));
            return 0;
        }
        CliAction::Command(command) => command,
    };

    let config_path = match parse_config_path(args) {
        Ok(path) => path,
        Err(error) => return cli_failure(&error),
    };
    let name = command.name();
    let config = match WorkerConfig::load(config_path.as_deref()).await {
        Ok(config) => config,
        Err(error) => {
            emit_error(name, &error);
            return error.exit_code();
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_shutdown_signals(shutdown.clone()));

    match dispatch(command, &config, &shutdown).await {
        Ok(()) => 0,
        Err(error) => {
            emit_error(name, &error);
            error.exit_code()
        }
    }
}

fn cli_failure(error: &CliError) -> i32 {
    eprintln!(
        "{}",
        error_envelope("cli", code::CLI_ERROR, &error.to_string())
    );
    CLI_ERROR_EXIT
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("INBOX_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn forward_shutdown_signals(shutdown: CancellationToken) {
    wait_for_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(error) => {
            warn!(error = %error, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
