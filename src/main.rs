// ABOUTME: Main entry point: CLI, logging, config, plugin registry and the bot supervisor loop
// ABOUTME: Each bot run logs in, wires Matrix and MQTT into the event loop and runs until shutdown or failure

use anyhow::{Context, Result};
use clap::Parser;
use horscht::{
    config::Config,
    matrix_client,
    platform::{MatrixChatService, MqttTransport},
    plugins,
};
use horscht_core::{
    queues, Bot, BotIdentity, BrokerAddress, BrokerBridge, BrokerSettings, ChatService, EventLoop,
    EventLoopSettings, Registry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "horscht", version, about = "Matrix bot bridging rooms and MQTT")]
struct Cli {
    /// Path to config.toml (default: HORSCHT_CONFIG_PATH, ./config.toml, XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,

    /// Also write daily rolling log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! horscht crashed with the following error:        ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting horscht");

    dotenvy::dotenv().ok();
    let config = Config::load_from(cli.config.as_deref())?;

    tracing::info!(
        home_server = %config.matrix.home_server,
        user_id = %config.matrix.user_id,
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        plugins = config.plugins.len(),
        "Configuration loaded"
    );

    // Registration errors are configuration errors: fatal.
    let registry = Arc::new(
        plugins::build_registry(&config.plugins).context("Failed to register plugins")?,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    loop {
        match run_bot(&config, Arc::clone(&registry), shutdown.clone()).await {
            Ok(()) => break,
            Err(e) => {
                if shutdown.is_cancelled() {
                    break;
                }
                let delay = config.bot.restart_delay();
                tracing::warn!(error = ?e, restart_in = ?delay, "Bot stopped, restarting");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::info!("horscht stopped");
    Ok(())
}

/// One bot lifetime: log in, wire everything up and run the event loop.
async fn run_bot(config: &Config, registry: Arc<Registry>, shutdown: CancellationToken) -> Result<()> {
    let client =
        matrix_client::create_client(&config.matrix.home_server, Path::new(&config.matrix.store_path))
            .await?;
    matrix_client::login(&client, &config.matrix).await?;

    let chat: Arc<dyn ChatService> = Arc::new(MatrixChatService::new(client)?);
    chat.listen_once().await.context("First sync failed")?;

    let (sinks, receivers) = queues(config.bot.queue_capacity);

    let transport = Arc::new(MqttTransport::new(
        config.mqtt.client_id.clone(),
        config.mqtt.keep_alive(),
    ));
    let mut broker_settings =
        BrokerSettings::new(BrokerAddress::new(config.mqtt.host.clone(), config.mqtt.port));
    broker_settings.connect_timeout = config.mqtt.connect_timeout();
    broker_settings.health_check_interval = config.mqtt.health_check_interval();
    let broker = Arc::new(BrokerBridge::new(
        transport,
        Arc::clone(&registry),
        broker_settings,
        sinks.events.clone(),
    ));

    let identity = BotIdentity::new(config.matrix.user_id.clone(), config.matrix.display_name.clone());
    let bot = Bot::new(chat, broker, identity);
    if let Err(e) = bot.ensure_display_name().await {
        tracing::warn!(error = %e, "Could not update display name");
    }

    let settings = EventLoopSettings {
        tick: config.bot.tick(),
        help_trigger: config.bot.help_trigger.clone(),
        mention_reply: config.bot.mention_reply(),
        cron_wrap: config.bot.cron_wrap,
    };
    EventLoop::new(bot, registry, settings, receivers)
        .run(sinks, shutdown)
        .await
}

fn init_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = if cli.debug {
        "debug,matrix_sdk=info,matrix_sdk_base=info,matrix_sdk_crypto=warn,rumqttc=info"
    } else {
        // Default to info, but suppress backup and crypto warnings
        "info,matrix_sdk_crypto::backups=error,matrix_sdk_crypto::session_manager::sessions=error"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "horscht.log");
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
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C, shutting down");
    }

    shutdown.cancel();
}
