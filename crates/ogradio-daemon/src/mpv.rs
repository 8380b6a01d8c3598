/// mpv IPC driver with separated reader/writer tasks.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → event_tx channel
/// ```
///
/// `MpvHandle` is cheaply cloneable and only speaks the wire protocol.
/// `crate::player::MpvMedia` builds the session's media handle on top of it.
///
/// Platform notes:
/// - Unix:    Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use ogradio_proto::platform;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;
pub const OBS_DURATION: u64 = 3;

const IPC_TIMEOUT_SECS: u64 = 5;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, newline included
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

/// Why mpv finished a file, from the `reason` of an `end-file` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Stop,
    Error(String),
    Other(String),
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "playback-restart".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        if self.event_name()? != "end-file" {
            return None;
        }
        let reason = self.raw.get("reason").and_then(|r| r.as_str()).unwrap_or("");
        Some(match reason {
            "eof" => EndReason::Eof,
            "stop" | "quit" => EndReason::Stop,
            "error" => EndReason::Error(
                self.raw
                    .get("file_error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
            other => EndReason::Other(other.to_string()),
        })
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(
            tokio::time::Duration::from_secs(IPC_TIMEOUT_SECS),
            reply_rx,
        )
        .await
        .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
        .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Load a file without starting it; playback begins on `set_pause(false)`.
    pub async fn load_paused(&self, url: &str) -> anyhow::Result<()> {
        self.set_pause(true).await?;
        debug!("mpv: loadfile url={}", url);
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Register observe_property for the playback properties.  Must be called
    /// after every fresh connection.
    pub async fn observe_all_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    pub socket_name: String,
    process: Option<tokio::process::Child>,
    pub initial_volume: f32,
}

impl MpvDriver {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            initial_volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                match status.code() {
                    Some(code) => warn!("mpv process exited with code: {}", code),
                    None => warn!("mpv process terminated by signal"),
                }
                false
            }
            Some(Err(e)) => {
                warn!("mpv process_alive check failed: {}", e);
                false
            }
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn volume_arg(&self) -> String {
        format!(
            "--volume={}",
            (self.initial_volume * 100.0).clamp(0.0, 100.0).round() as i64
        )
    }

    // ── spawn ─────────────────────────────────────────────────────────────────

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning new process");
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let stderr_path = platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;
        info!("mpv: logging stderr to {:?}", stderr_path);

        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--keep-open=no")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(self.volume_arg())
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--keep-open=no")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(self.volume_arg())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

/// Wire a connected stream to fresh reader/writer tasks.
pub fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  The writer inserts, the reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        debug!("mpv reader: event receiver gone");
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "read error").await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
