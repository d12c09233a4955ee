use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voice_pos::audio::{AudioDeviceFactory, AudioSink, AudioSource};
use voice_pos::sales::LoggingOrderSink;
use voice_pos::{create_router, AppState, Config, ControllerEvent, LiveConnector, SessionController};

/// Voice sales assistant for a point-of-sale console
#[derive(Parser)]
#[command(name = "voice-pos", version, about)]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-pos")]
    config: String,

    /// Read microphone audio from a WAV file instead of the default device
    #[arg(long, global = true)]
    input_wav: Option<PathBuf>,

    /// Render reply audio into a WAV file instead of the default device
    #[arg(long, global = true)]
    output_wav: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Run one voice session until Ctrl-C
    Talk,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,voice_pos=debug")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice POS v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Engine model: {}", cfg.engine.model);

    let controller = Arc::new(build_controller(&cfg, &cli)?);

    match cli.command {
        Command::Serve => serve(&cfg, controller).await,
        Command::Talk => talk(controller).await,
    }
}

fn build_controller(cfg: &Config, cli: &Cli) -> Result<SessionController> {
    let source = match &cli.input_wav {
        Some(path) => AudioSource::File(path.clone()),
        None => AudioSource::Microphone,
    };
    let sink = match &cli.output_wav {
        Some(path) => AudioSink::File(path.clone()),
        None => AudioSink::Speaker,
    };

    if cfg!(not(feature = "device-audio"))
        && (matches!(source, AudioSource::Microphone) || matches!(sink, AudioSink::Speaker))
    {
        bail!("Built without `device-audio`; pass both --input-wav and --output-wav");
    }

    let api_key = cfg.engine.api_key();
    if api_key.is_none() {
        info!(
            "{} is not set, connecting without an API key",
            cfg.engine.api_key_env
        );
    }

    let connector = LiveConnector::new(cfg.engine.url.clone(), api_key);
    let devices = AudioDeviceFactory::new(source, sink, cfg.device_config());

    Ok(SessionController::new(
        cfg.session_config(),
        cfg.profile(),
        Arc::new(connector),
        Arc::new(devices),
        Arc::new(cfg.catalog()),
        Arc::new(LoggingOrderSink),
        cfg.orders.number_base,
    ))
}

async fn serve(cfg: &Config, controller: Arc<SessionController>) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    let app = create_router(AppState::new(Arc::clone(&controller)));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stopped = controller.stop_all().await;
    info!("Stopped {} session(s), shutting down", stopped.len());
    Ok(())
}

async fn talk(controller: Arc<SessionController>) -> Result<()> {
    let mut events = controller.subscribe();
    let handle = controller.start_session(None).await?;
    info!("Session {} open, press Ctrl-C to stop", handle.id());

    let mut state = handle.watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() || state.borrow().is_terminal() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::Transcript { segment, .. }) => {
                    info!("[{:?}] {}", segment.speaker, segment.text);
                }
                Ok(ControllerEvent::OrderCreated { order, .. }) => {
                    info!("Order #{} created, total ${:.2}", order.order_number, order.total);
                }
                Ok(ControllerEvent::StateChanged { error: Some(e), .. }) => {
                    error!("Session failed: {}", e);
                }
                Ok(_) => {}
                Err(e) => error!("Missed controller events: {}", e),
            },
        }
    }

    if let Some(stats) = controller.stop_session(handle.id()).await {
        info!(
            "Session ended in state {}: {:.1}s, {} frames sent, {} buffers played",
            stats.state, stats.duration_secs, stats.frames_sent, stats.buffers_scheduled
        );
    }
    Ok(())
}
