use anyhow::Result;
use mailbatch::composer::Composer;
use mailbatch::config::DeliveryConfig;
use mailbatch::context::{RunContext, TokioPacer};
use mailbatch::dispatcher::{DispatchSettings, Dispatcher};
use mailbatch::outcome_log::FileOutcomeLog;
use mailbatch::recipients;
use mailbatch::template::MessageTemplate;
use mailbatch::transport::SmtpTransport;
use mailbatch::types::RunSummary;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_RECIPIENTS_PATH: &str = "recipients.csv";

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run aborted before dispatch");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// Everything before `Dispatcher::run` is fatal: a bad config, recipient
/// list or template aborts the run with no summary.
async fn run() -> Result<RunSummary> {
    let config_path = env_path("CONFIG_PATH", DEFAULT_CONFIG_PATH);
    let recipients_path = env_path("RECIPIENTS_PATH", DEFAULT_RECIPIENTS_PATH);

    let config = DeliveryConfig::load(&config_path)?;
    let recipients = recipients::load(&recipients_path)?;
    let template = MessageTemplate::load(&config.html_template)?;
    let settings = DispatchSettings::from_config(&config)?;

    info!(
        recipients = recipients.len(),
        batch_size = config.batch_size,
        relay = %config.smtp_server,
        port = config.smtp_port,
        "Configuration loaded"
    );

    let transport = SmtpTransport::from_config(&config)?;
    let composer = Composer::new(
        template,
        config.sender_email.clone(),
        config.subject.clone(),
        config.embedded_images.clone(),
        config.attachments_dir.clone(),
    );
    let dispatcher = Dispatcher::new(composer, transport, settings);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone(), shutdown_signal()));

    let log = FileOutcomeLog::new(&config.success_log, &config.failure_log);
    let ctx = RunContext::with_cancellation(log, TokioPacer, cancel);

    Ok(dispatcher.run(&ctx, &recipients).await)
}

async fn cancel_on_shutdown(cancel: CancellationToken, signal: impl Future<Output = ()>) {
    signal.await;
    warn!("Shutdown requested; no further batches will start");
    cancel.cancel();
}

/// Resolves once `listener` reports a delivered signal. A listener that could
/// not be installed never resolves, so it cannot cancel the run.
async fn signal_or_pending(listener: impl Future<Output = std::io::Result<()>>, name: &str) {
    if let Err(e) = listener.await {
        warn!(signal = name, error = %e, "Cannot listen for signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    };

    tokio::select! {
        _ = signal_or_pending(tokio::signal::ctrl_c(), "ctrl-c") => {}
        _ = signal_or_pending(terminate, "sigterm") => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    signal_or_pending(tokio::signal::ctrl_c(), "ctrl-c").await;
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Sent {} of {} emails in {} batch(es).",
        summary.sent,
        summary.total(),
        summary.batches
    );
    if !summary.failures.is_empty() {
        println!("Failed ({}):", summary.failures.len());
        for (address, error) in &summary.failures {
            println!("  {}: {}", address, error);
        }
    }
    if !summary.not_attempted.is_empty() {
        println!(
            "Not attempted after cancellation: {}",
            summary.not_attempted.len()
        );
    }
    if summary.log_failures > 0 {
        println!(
            "Warning: {} outcome(s) could not be written to the log files.",
            summary.log_failures
        );
    }
}
