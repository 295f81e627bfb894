//! Purpose: `wikibus` CLI entry point.
//! Role: Binary crate root; parses args, loads config, runs the wiki until signalled.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_failure_code`.
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;
use wikibus::app;
use wikibus::config::WikiConfig;
use wikibus::core::error::{Error, ErrorKind, to_failure_code};

#[derive(Parser, Debug)]
#[command(
    name = "wikibus",
    version,
    about = "Markdown wiki over HTTP, backed by SQLite and wired through an in-process event bus",
    after_help = r#"EXAMPLES
  $ wikibus serve
  $ wikibus serve --db /var/lib/wiki.db --bind 127.0.0.1:9000 --instances 4
  $ wikibus serve --config wiki.json

  Pages:    curl localhost:8080/api/pages
  Bridge:   ws://localhost:8080/eventbus/websocket"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the wiki: prepare the database, then serve HTTP and the bridge.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(
        long,
        help = "JSON config file; flags override its values",
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,
    #[arg(long, help = "SQLite database path, or :memory:", value_hint = ValueHint::FilePath)]
    db: Option<String>,
    #[arg(long, help = "Socket address shared by every HTTP instance")]
    bind: Option<SocketAddr>,
    #[arg(long = "pool-size", help = "Maximum pooled database connections")]
    pool_size: Option<usize>,
    #[arg(long, help = "Number of HTTP server instances")]
    instances: Option<usize>,
    #[arg(long, help = "Bus address of the page service")]
    queue: Option<String>,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_failure_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                let message = err.to_string();
                let summary = message.lines().next().unwrap_or("invalid arguments");
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(summary.trim_start_matches("error: ").to_string())
                    .with_hint("Run `wikibus serve --help` for the accepted flags."));
            }
        },
    };

    match cli.command {
        Command::Serve(args) => {
            let config = resolve_config(args)?;
            init_tracing();
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(async {
                let handle = app::start(config).await?;
                handle.run_until(shutdown_signal()).await
            })?;
            Ok(0)
        }
    }
}

fn resolve_config(args: ServeArgs) -> Result<WikiConfig, Error> {
    let mut config = match args.config.as_deref() {
        Some(path) => WikiConfig::load(path)?,
        None => WikiConfig::default(),
    };
    if let Some(db) = args.db {
        config.db_url = db;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(pool_size) = args.pool_size {
        config.max_pool_size = pool_size;
    }
    if let Some(instances) = args.instances {
        config.http_instances = instances;
    }
    if let Some(queue) = args.queue {
        config.wikidb_queue = queue;
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    tracing::info!("shutdown requested");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::NotReady => "not ready".to_string(),
        ErrorKind::Store => "database error".to_string(),
        ErrorKind::Denied => "access denied".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = std::error::Error::source(err);
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(address) = err.address() {
        inner.insert("address".to_string(), json!(address));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}
