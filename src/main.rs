#![forbid(unsafe_code)]

//! `scpi-stdio` — run a command script against an instrument program.
//!
//! Spawns the program, sends each script line, prints the responses it
//! produced (stderr lines prefixed with `! `), then closes the session and
//! prints the exit status. Logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use scpi_stdio::script::{run_script, script_commands};
use scpi_stdio::{AppError, ProcessSession, Result, SessionConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "scpi-stdio",
    about = "Drive a line-oriented instrument program over stdio",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML session configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Script of command lines; read from stdin when omitted.
    #[arg(long)]
    script: Option<PathBuf>,

    /// How long to wait for further output after each command.
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,

    /// Receive timeout override, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Write every sent command to this file.
    #[arg(long)]
    command_log: Option<PathBuf>,

    /// Line to send before closing the session.
    #[arg(long)]
    quit_command: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Program and arguments; overrides the configured program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = resolve_config(&args)?;
    // Read before the runtime starts; blocking reads stay off its workers.
    let script = read_script(args.script.as_deref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config, &script, Duration::from_millis(args.settle_ms)))
}

fn read_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("cannot read script {}: {err}", path.display()))),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|err| AppError::Io(format!("cannot read script from stdin: {err}")))?;
            Ok(text)
        }
    }
}

async fn run(config: SessionConfig, script: &str, settle: Duration) -> Result<()> {
    let quit_command = config.quit_command.clone();
    let mut session = ProcessSession::spawn(config)?;

    let outcome = run_script(&mut session, script_commands(script), settle).await;

    if let Some(quit) = quit_command {
        if let Err(err) = session.send(&quit).await {
            tracing::warn!(%err, "failed to send quit command");
        }
    }
    let status = session.close().await;

    let exchanges = outcome?;
    for exchange in &exchanges {
        for line in &exchange.responses {
            println!("{line}");
        }
        for line in &exchange.diagnostics {
            println!("! {line}");
        }
    }
    info!(commands = exchanges.len(), "script complete");

    match status {
        Some(status) => println!("exit: {status}"),
        None => println!("exit: unknown"),
    }
    Ok(())
}

/// Merge configuration sources: file, then `SCPI_STDIO_*` variables, then
/// command-line flags.
fn resolve_config(args: &Cli) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::new(String::new()),
    };
    config.apply_env()?;

    if let Some((program, rest)) = args.program.split_first() {
        config.program.clone_from(program);
        config.args = rest.to_vec();
    }
    if let Some(ms) = args.timeout_ms {
        config.recv_timeout_ms = ms;
    }
    if let Some(path) = &args.command_log {
        config.command_log = Some(path.clone());
    }
    if let Some(quit) = &args.quit_command {
        config.quit_command = Some(quit.clone());
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
