use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use vacation_engine::cli::{self, Command};
use vacation_engine::config::Config;
use vacation_engine::error::Error;
use vacation_engine::pipeline::{Engine, Outcome};
use vacation_engine::reply::{DnsMxLookup, Mailer};
use vacation_engine::store;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _guard = init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, or to `VACATION_LOG_FILE` when set. Stdout is reserved
/// for dry-run output.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("VACATION_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match std::env::var("VACATION_LOG_FILE").ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            let path = Path::new(&path);
            let dir = path.parent().unwrap_or(Path::new("."));
            let file = path.file_name().unwrap_or(path.as_os_str());
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .init();

    guard
}

async fn run() -> Result<(), Error> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("vacation");

    let invocation = match cli::parse(args.get(1..).unwrap_or_default()) {
        Ok(Command::Run(invocation)) => invocation,
        Ok(Command::Help) => {
            println!("{}", cli::usage(program));
            return Ok(());
        }
        Err(e) => {
            eprintln!("{}", cli::usage(program));
            return Err(e.into());
        }
    };

    let config = Config::from_env()?;
    let engine = Engine::new(&config)?;

    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await?;
    let now = chrono::Utc::now();

    let prepared = match engine.prepare(&raw, &invocation) {
        Ok(prepared) => prepared,
        Err(suppression) => {
            debug!(reason = %suppression, "No reply");
            return Ok(());
        }
    };

    let store = store::open(&config.database).await?;
    debug!(backend = store.backend_name(), "Directory store ready");
    let mailer = Mailer::new(&config, Arc::new(DnsMxLookup));

    match engine
        .respond(store.as_ref(), &mailer, &prepared, invocation.dry_run, now)
        .await?
    {
        Outcome::DryRun { message, .. } => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&message)?;
            stdout.flush()?;
        }
        Outcome::Sent { owner, to } => {
            info!(owner = %owner, to = %to, message_id = %prepared.message_id, "Vacation reply delivered");
        }
        Outcome::Suppressed(suppression) => {
            debug!(reason = %suppression, "No reply");
        }
        Outcome::DeliveryFailed { owner, reason } => {
            debug!(owner = %owner, reason = %reason, "Reply not delivered");
        }
    }

    Ok(())
}
