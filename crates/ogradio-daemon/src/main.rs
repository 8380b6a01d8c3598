mod http;
mod logs;
mod mpv;
mod pcm;
mod player;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use futures_util::StreamExt;
use ogradio_core::graph::software::SoftwareFactory;
use ogradio_core::graph::AnalyserSettings;
use ogradio_core::notify::NoticeBoard;
use ogradio_core::session::{CoreSettings, SessionClient, SessionCore};
use ogradio_core::visualizer::VisualFrame;
use ogradio_proto::catalog::Catalog;
use ogradio_proto::config::Config;
use ogradio_proto::descriptor::PlaybackDescriptor;
use ogradio_proto::platform;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::logs::LogRing;
use crate::mpv::MpvDriver;
use crate::player::MpvMedia;

/// Sample rate of the PCM decoded for analysis.
const ANALYSIS_SAMPLE_RATE: u32 = 44100;
const MPV_CHECK_SECS: u64 = 5;
const LOG_RING_LINES: usize = 200;

#[derive(Parser, Debug)]
#[command(name = "ogradio", version, about = "OG Radio playback daemon")]
struct Args {
    /// Config file (default: <config_dir>/ogradio/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not start the HTTP control API
    #[arg(long)]
    no_http: bool,
    /// Catalog file, overriding [catalog] catalog_toml
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // logging depends on the config, so a bad config is reported once logging is up
    let loaded = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let (config, config_error) = match loaded {
        Ok(c) => (c, None),
        Err(e) => (Config::default(), Some(e)),
    };

    std::fs::create_dir_all(platform::data_dir())?;
    let log_path = config.daemon.log_file.clone();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let log_ring = LogRing::new(LOG_RING_LINES);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(log_ring.layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,ogradio_core=debug,ogradio_daemon=debug")
            }),
        )
        .init();

    eprintln!("ogradio: logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);
    if let Some(e) = config_error {
        warn!("Config invalid, using defaults: {:#}", e);
    }

    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| config.catalog.catalog_toml.clone());
    let catalog = Arc::new(Catalog::discover(&catalog_path));

    let settings = CoreSettings {
        welcome: PlaybackDescriptor::welcome(config.resolve_media(&config.session.welcome_uri)),
        default_volume: config.session.default_volume,
        analyser: AnalyserSettings {
            fft_size: config.visualizer.fft_size,
            smoothing: config.visualizer.smoothing,
        },
    };
    let factory = Arc::new(SoftwareFactory::new(ANALYSIS_SAMPLE_RATE));
    let (client, core_task) = SessionCore::spawn(settings, factory);

    let (mpv_stop_tx, mpv_stop_rx) = oneshot::channel();
    let supervisor = tokio::spawn(supervise_mpv(
        MpvDriver::new(config.session.default_volume),
        client.clone(),
        mpv_stop_rx,
    ));

    let frames = spawn_frame_feed(&client, config.visualizer.bands, config.visualizer.fps);
    let notices = spawn_notice_collector(&client);

    if config.http.enabled && !args.no_http {
        let state = http::HttpState {
            client: client.clone(),
            catalog: Arc::clone(&catalog),
            config: Arc::new(config.clone()),
            frames,
            notices,
            logs: log_ring.clone(),
        };
        http::start_server(config.http.bind_address.clone(), config.http.port, state);
    } else {
        info!("HTTP API disabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if client.shutdown().await.is_err() {
        warn!("session core already stopped");
    }
    let _ = core_task.await;
    let _ = mpv_stop_tx.send(());
    let _ = supervisor.await;
    Ok(())
}

/// Keep an mpv process alive and registered with the session.  A dead
/// process is detached first so the session queues its intent, then a fresh
/// one is spawned and registered.
async fn supervise_mpv(
    mut driver: MpvDriver,
    client: SessionClient,
    mut stop: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(MPV_CHECK_SECS));
    let mut attached = false;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = interval.tick() => {
                if driver.process_alive() {
                    continue;
                }
                if attached {
                    warn!("mpv died, detaching media handle");
                    attached = false;
                    if client.register_handle(None).await.is_err() {
                        break;
                    }
                }
                match MpvMedia::connect(&mut driver, ANALYSIS_SAMPLE_RATE).await {
                    Ok(media) => {
                        if client.register_handle(Some(Box::new(media))).await.is_err() {
                            break;
                        }
                        attached = true;
                    }
                    Err(e) => warn!("mpv unavailable, retrying in {}s: {:#}", MPV_CHECK_SECS, e),
                }
            }
        }
    }
    driver.kill().await;
    info!("mpv supervisor stopped");
}

/// Run the visualizer at `fps` and keep the latest frame for the HTTP API.
fn spawn_frame_feed(client: &SessionClient, bands: usize, fps: u32) -> watch::Receiver<VisualFrame> {
    let (tx, rx) = watch::channel(VisualFrame::Clear);
    let visualizer = client.visualizer(bands);
    tokio::spawn(async move {
        let mut frames = std::pin::pin!(visualizer.into_stream(fps));
        while let Some(frame) = frames.next().await {
            tx.send_replace(frame);
        }
    });
    rx
}

fn spawn_notice_collector(client: &SessionClient) -> Arc<Mutex<NoticeBoard>> {
    let board = Arc::new(Mutex::new(NoticeBoard::default()));
    let sink = Arc::clone(&board);
    let mut rx = client.notices();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice) => {
                    info!("notice [{:?}] {}: {}", notice.severity, notice.title, notice.detail);
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .post(notice);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("notice collector lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    board
}
