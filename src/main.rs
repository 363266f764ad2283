use anyhow::Context;
use clap::Parser;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use sitepulse::config::{AssessorConfig, CliArgs, Command, ProviderChoice, NAVIGATION_TIMEOUT_SECS};
use sitepulse::events::encode_line;
use sitepulse::log_capture::{LogLevel, LogSource};
use sitepulse::pipeline::request::TestConfigOverrides;
use sitepulse::provider::{AnyProvider, BridgeProvider, HttpProvider};
use sitepulse::server;
use sitepulse::stages::StageKind;
use sitepulse::state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let command = args.command.clone().unwrap_or(Command::Serve);
    let config = AssessorConfig::from_args(&args);

    // `run` prints NDJSON on stdout, so its diagnostics go to stderr.
    let to_stderr = matches!(command, Command::Run { .. });
    let _guard = init_tracing(config.log_dir.as_deref(), to_stderr)?;

    info!("Starting sitepulse v{}", env!("CARGO_PKG_VERSION"));
    info!("Provider: {:?}, probe mode: {:?}", config.provider, config.probe_mode);

    let provider = Arc::new(build_provider(&config)?);

    match command {
        Command::Serve => serve(config, provider).await,
        Command::Run {
            url,
            concurrent,
            duration,
            stages,
        } => {
            let stages: BTreeSet<StageKind> = stages
                .iter()
                .map(|s| s.parse::<StageKind>())
                .collect::<Result<_, _>>()?;
            let overrides = TestConfigOverrides {
                concurrent,
                duration,
                stages: (!stages.is_empty()).then_some(stages),
                ..Default::default()
            };
            run_once(config, provider, &url, overrides).await
        }
    }
}

fn init_tracing(log_dir: Option<&Path>, to_stderr: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sitepulse=info,tower_http=info".into());

    let console = if to_stderr {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "sitepulse.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

fn build_provider(config: &AssessorConfig) -> anyhow::Result<AnyProvider> {
    match config.provider {
        ProviderChoice::Http => Ok(AnyProvider::Http(HttpProvider::new()?)),
        ProviderChoice::Bridge => {
            let base = config
                .bridge_url
                .clone()
                .context("--bridge-url is required with --provider bridge")?;
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(NAVIGATION_TIMEOUT_SECS + 5))
                .build()
                .context("building bridge HTTP client")?;
            Ok(AnyProvider::Bridge(BridgeProvider::new(base, client)))
        }
    }
}

async fn serve(config: AssessorConfig, provider: Arc<AnyProvider>) -> anyhow::Result<()> {
    let port = config.port;
    let state: SharedState = Arc::new(AppState::new(config, provider));

    state
        .logs
        .emit(
            LogSource::Server,
            LogLevel::Info,
            format!("Assessment service starting on port {}", port),
        )
        .await;

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("Assessment service shutting down");
    Ok(())
}

async fn run_once(
    config: AssessorConfig,
    provider: Arc<AnyProvider>,
    url: &str,
    overrides: TestConfigOverrides,
) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;

    let state = AppState::new(config, provider);
    let test_config = state.settings.read().await.resolve(&overrides);

    let mut events = state.pipeline.run(url, test_config)?;
    let mut stdout = tokio::io::stdout();
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, sitepulse::events::Event::Failure { .. });
        stdout.write_all(&encode_line(&event)).await?;
        stdout.flush().await?;
    }

    if failed {
        anyhow::bail!("assessment of {} failed", url);
    }
    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
    let stopped = state.cancel_all().await;
    state
        .logs
        .emit(
            LogSource::Server,
            LogLevel::Info,
            format!("Shutdown signal received, stopping {} runs", stopped),
        )
        .await;
}
