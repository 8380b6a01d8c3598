use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use ogradio_core::equalizer::{BAND_FREQUENCIES_HZ, MAX_GAIN_DB};
use ogradio_core::notify::NoticeBoard;
use ogradio_core::session::SessionClient;
use ogradio_core::visualizer::VisualFrame;
use ogradio_proto::catalog::Catalog;
use ogradio_proto::config::Config;
use ogradio_proto::descriptor::PlaybackDescriptor;
use ogradio_proto::protocol::{Command, Notice, SessionSnapshot};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::logs::LogRing;

#[derive(Clone)]
pub struct HttpState {
    pub client: SessionClient,
    pub catalog: Arc<Catalog>,
    pub config: Arc<Config>,
    pub frames: watch::Receiver<VisualFrame>,
    pub notices: Arc<Mutex<NoticeBoard>>,
    pub logs: LogRing,
}

#[derive(Serialize)]
struct EqBand {
    frequency_hz: f32,
    gain_db: f32,
}

#[derive(Serialize)]
struct EqStatus {
    max_gain_db: f32,
    bands: Vec<EqBand>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/catalog", get(get_catalog))
        .route("/api/play/:id", post(play))
        .route("/api/toggle", post(toggle))
        .route("/api/pause", post(pause_all))
        .route("/api/stop", post(stop))
        .route("/api/volume/:pct", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/seek/:pct", post(seek))
        .route("/api/welcome", post(play_welcome))
        .route("/api/resume", post(resume_last))
        .route("/api/alarm/:hhmm", post(set_alarm))
        .route("/api/alarm", axum::routing::delete(cancel_alarm))
        .route("/api/spectrum", get(get_spectrum))
        .route("/api/notices", get(get_notices))
        .route("/api/logs", get(get_logs))
        .route("/api/eq", get(get_eq))
        .route("/api/eq/reset", post(reset_eq))
        .route("/api/eq/:band/:db", post(set_eq_gain))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    let label = format!("{:?}", cmd);
    if state.client.command(cmd).await.is_err() {
        error!("Failed to send command {}", label);
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.client.snapshot().as_ref().clone())
}

async fn get_catalog(State(state): State<HttpState>) -> Json<Vec<PlaybackDescriptor>> {
    Json(state.catalog.descriptors())
}

async fn play(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Play {}", id);
    let Some(mut item) = state.catalog.find(&id) else {
        info!("HTTP API: unknown catalog id {}", id);
        return StatusCode::NOT_FOUND;
    };
    item.source_uri = state.config.resolve_media(&item.source_uri);
    dispatch(&state, Command::Play { item }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle play/pause");
    dispatch(&state, Command::TogglePlayPause).await
}

async fn pause_all(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Pause");
    dispatch(&state, Command::PauseAll).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", volume);
    dispatch(&state, Command::Volume { value }).await
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle mute");
    dispatch(&state, Command::ToggleMute).await
}

async fn seek(State(state): State<HttpState>, Path(pct): Path<f64>) -> StatusCode {
    if !pct.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: Seek to {}%", pct);
    let fraction = (pct / 100.0).clamp(0.0, 1.0);
    dispatch(&state, Command::Seek { fraction }).await
}

async fn play_welcome(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Play welcome");
    dispatch(&state, Command::PlayWelcome).await
}

async fn resume_last(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Resume last");
    dispatch(&state, Command::ResumeLast).await
}

async fn set_alarm(State(state): State<HttpState>, Path(time): Path<String>) -> StatusCode {
    info!("HTTP API: Set alarm for {}", time);
    dispatch(&state, Command::SetAlarm { time }).await
}

async fn cancel_alarm(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Cancel alarm");
    dispatch(&state, Command::CancelAlarm).await
}

async fn get_spectrum(State(state): State<HttpState>) -> Json<VisualFrame> {
    Json(state.frames.borrow().clone())
}

async fn get_notices(State(state): State<HttpState>) -> Json<Vec<Notice>> {
    let mut board = state.notices.lock().unwrap_or_else(PoisonError::into_inner);
    Json(board.visible())
}

async fn get_logs(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.logs.lines())
}

async fn get_eq(State(state): State<HttpState>) -> Json<EqStatus> {
    let gains = state.client.equalizer_gains();
    let bands = BAND_FREQUENCIES_HZ
        .iter()
        .zip(gains.iter())
        .map(|(&frequency_hz, &gain_db)| EqBand {
            frequency_hz,
            gain_db,
        })
        .collect();
    Json(EqStatus {
        max_gain_db: MAX_GAIN_DB,
        bands,
    })
}

async fn set_eq_gain(
    State(state): State<HttpState>,
    Path((band, gain_db)): Path<(usize, f32)>,
) -> StatusCode {
    if band >= BAND_FREQUENCIES_HZ.len() || !gain_db.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: EQ band {} to {} dB", band, gain_db);
    dispatch(&state, Command::EqGain { band, gain_db }).await
}

async fn reset_eq(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: EQ reset");
    dispatch(&state, Command::EqReset).await
}
