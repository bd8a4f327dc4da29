/// mpv JSON-IPC backend, one child process per media session.
///
/// ```text
///   MpvBackend::open(url)
///         │  spawn mpv --idle --input-ipc-server=…
///         │  connect, observe pause + time-pos, loadfile
///         │
///         ├── writer_task   ← PendingRequest via mpsc, serialised → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── has request_id → matching oneshot
///                                └── otherwise      → event channel
///
///   MpvBackend::next_event() turns raw mpv events into BackendEvents.
/// ```
///
/// Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use remote_proto::config::MpvConfig;
use remote_proto::platform;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendEvent};

// ── errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MpvError {
    #[error("mpv binary not found beside the executable or on PATH")]
    BinaryNotFound,
    #[error("mpv IPC endpoint {0} did not appear")]
    NoEndpoint(String),
    #[error("no mpv session")]
    NoSession,
    #[error("mpv IPC connection closed")]
    Closed,
    #[error("mpv IPC timeout for req={0}")]
    Timeout(u64),
    #[error("mpv error: {0}")]
    Rejected(String),
}

// ── request ids and observed properties ───────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_PAUSE: u64 = 1;
pub const OBS_TIME_POS: u64 = 2;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const QUIT_TIMEOUT: Duration = Duration::from_millis(500);
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_INTERVAL: Duration = Duration::from_millis(100);

type Reply = oneshot::Sender<Result<Value, MpvError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: Reply,
}

/// An unsolicited message from mpv (no `request_id`).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// `Some((obs_id, data))` for a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// e.g. "file-loaded", "seek", "end-file".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> Result<Value, MpvError> {
        self.send_with_timeout(command, REPLY_TIMEOUT).await
    }

    async fn send_with_timeout(
        &self,
        command: Value,
        timeout: Duration,
    ) -> Result<Value, MpvError> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = json!({ "command": command, "request_id": req_id }).to_string();
        payload.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| MpvError::Closed)?;

        tokio::time::timeout(timeout, reply_rx)
            .await
            .map_err(|_| MpvError::Timeout(req_id))?
            .map_err(|_| MpvError::Closed)?
    }

    pub async fn get_property(&self, name: &str) -> Result<Value, MpvError> {
        let resp = self.send(json!(["get_property", name])).await?;
        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    pub async fn set_property(&self, name: &str, value: Value) -> Result<(), MpvError> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_PAUSE, "pause"), (OBS_TIME_POS, "time-pos")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── backend ───────────────────────────────────────────────────────────────────

struct Session {
    process: tokio::process::Child,
    handle: MpvHandle,
    events: mpsc::Receiver<MpvEvent>,
    url: String,
    /// A `seek` event was seen and its `playback-restart` is still due.
    seeking: bool,
}

pub struct MpvBackend {
    options: MpvConfig,
    socket_name: String,
    session: Option<Session>,
}

impl MpvBackend {
    pub fn new(options: MpvConfig) -> Self {
        Self {
            options,
            socket_name: platform::mpv_socket_name(),
            session: None,
        }
    }

    /// Preset options for a display session.
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--idle=yes".to_string(),
            "--force-window=yes".to_string(),
            "--quiet".to_string(),
            format!("--fs={}", yes_no(self.options.fullscreen)),
            format!("--hwdec={}", self.options.hwdec),
            "--input-default-bindings=yes".to_string(),
            "--input-vo-keyboard=yes".to_string(),
            format!("--osc={}", yes_no(self.options.osc)),
            platform::mpv_socket_arg(&self.socket_name),
        ];
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    fn handle(&self) -> Result<&MpvHandle, MpvError> {
        self.session
            .as_ref()
            .map(|s| &s.handle)
            .ok_or(MpvError::NoSession)
    }

    async fn spawn_session(&mut self, url: &str) -> anyhow::Result<Session> {
        let binary = platform::find_mpv_binary().ok_or(MpvError::BinaryNotFound)?;
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.socket_name);

        info!("mpv: spawning {:?}", binary);
        let mut process = tokio::process::Command::new(binary)
            .args(self.args())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (event_tx, events) = mpsc::channel::<MpvEvent>(256);
        let handle = match connect(&self.socket_name, event_tx).await {
            Ok(h) => h,
            Err(e) => {
                let _ = process.kill().await;
                return Err(e.into());
            }
        };
        handle.observe_properties().await;

        Ok(Session {
            process,
            handle,
            events,
            url: url.to_string(),
            seeking: false,
        })
    }

    async fn translate(&mut self, event: MpvEvent) -> Option<BackendEvent> {
        let session = self.session.as_mut()?;

        if let Some((id, data)) = event.as_property_change() {
            return match (id, data) {
                (OBS_PAUSE, Value::Bool(true)) => Some(BackendEvent::Paused),
                (OBS_PAUSE, Value::Bool(false)) => Some(BackendEvent::Unpaused),
                // Held back mid-seek so the seek distance is measured from
                // where playback was.
                (OBS_TIME_POS, _) if session.seeking => None,
                (OBS_TIME_POS, v) => v.as_f64().map(BackendEvent::TimePos),
                _ => None,
            };
        }

        match event.event_name()? {
            "file-loaded" => {
                let name = match session.handle.get_property("media-title").await {
                    Ok(Value::String(title)) if !title.is_empty() => title,
                    _ => session.url.clone(),
                };
                let duration = session
                    .handle
                    .get_property("duration")
                    .await
                    .ok()
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                Some(BackendEvent::FileLoaded { name, duration })
            }
            "seek" => {
                session.seeking = true;
                None
            }
            "playback-restart" if session.seeking => {
                session.seeking = false;
                let position = session.handle.get_property("time-pos").await.ok()?.as_f64()?;
                Some(BackendEvent::Seeked { position })
            }
            "end-file" => {
                let reason = event.raw["reason"].as_str().unwrap_or("unknown");
                // ytdl and playlists hand over to the real file with a redirect.
                if reason == "redirect" {
                    return None;
                }
                Some(BackendEvent::EndFile {
                    reason: reason.to_string(),
                })
            }
            "shutdown" => Some(BackendEvent::Shutdown),
            _ => None,
        }
    }
}

impl Backend for MpvBackend {
    async fn open(&mut self, url: &str) -> anyhow::Result<()> {
        self.teardown().await;
        let session = self.spawn_session(url).await?;
        let loaded = session.handle.send(json!(["loadfile", url])).await;
        self.session = Some(session);
        if let Err(e) = loaded {
            self.teardown().await;
            return Err(e.into());
        }
        info!("mpv: loading {}", url);
        Ok(())
    }

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
        self.handle()?
            .set_property("pause", Value::Bool(paused))
            .await?;
        Ok(())
    }

    async fn get_pause(&mut self) -> anyhow::Result<bool> {
        let value = self.handle()?.get_property("pause").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn seek(&mut self, position: f64) -> anyhow::Result<()> {
        self.handle()?
            .set_property("time-pos", json!(position))
            .await?;
        Ok(())
    }

    async fn next_event(&mut self, timeout: Duration) -> Option<BackendEvent> {
        let session = self.session.as_mut()?;
        let event = match tokio::time::timeout(timeout, session.events.recv()).await {
            Err(_) => return None,
            Ok(None) => return Some(BackendEvent::Shutdown),
            Ok(Some(event)) => event,
        };
        self.translate(event).await
    }

    async fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _ = session
            .handle
            .send_with_timeout(json!(["quit"]), QUIT_TIMEOUT)
            .await;
        if session.process.try_wait().ok().flatten().is_none() {
            let _ = session.process.kill().await;
        }
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.socket_name);
        info!("mpv: session closed");
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

// ── connection ────────────────────────────────────────────────────────────────

#[cfg(unix)]
async fn connect(
    socket_name: &str,
    event_tx: mpsc::Sender<MpvEvent>,
) -> Result<MpvHandle, MpvError> {
    use tokio::net::UnixStream;

    for _ in 0..CONNECT_ATTEMPTS {
        tokio::time::sleep(CONNECT_INTERVAL).await;
        if let Ok(stream) = UnixStream::connect(socket_name).await {
            info!("mpv: connected to IPC socket");
            let (read_half, write_half) = stream.into_split();
            return Ok(start_io_tasks(read_half, write_half, event_tx));
        }
    }
    Err(MpvError::NoEndpoint(socket_name.to_string()))
}

#[cfg(windows)]
async fn connect(
    socket_name: &str,
    event_tx: mpsc::Sender<MpvEvent>,
) -> Result<MpvHandle, MpvError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe_path = format!(r"\\.\pipe\{}", socket_name);
    for _ in 0..CONNECT_ATTEMPTS {
        tokio::time::sleep(CONNECT_INTERVAL).await;
        if let Ok(client) = ClientOptions::new().open(&pipe_path) {
            info!("mpv: connected to named pipe");
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(start_io_tasks(read_half, write_half, event_tx));
        }
    }
    Err(MpvError::NoEndpoint(pipe_path))
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(MpvError::Closed));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
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
                    let Some(tx) = pending.lock().await.remove(&req_id) else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                        continue;
                    };
                    let result = match val["error"].as_str() {
                        Some("success") => Ok(val),
                        other => Err(MpvError::Rejected(
                            other.unwrap_or("unknown error").to_string(),
                        )),
                    };
                    let _ = tx.send(result);
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                break;
            }
        }
    }
    fail_all(&pending).await;
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Registered first so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(MpvError::Closed));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncBufReadExt};

    #[test]
    fn test_property_change_parsing() {
        let ev = MpvEvent {
            raw: json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": true}),
        };
        assert_eq!(ev.event_name(), Some("property-change"));
        let (id, data) = ev.as_property_change().unwrap();
        assert_eq!(id, OBS_PAUSE);
        assert_eq!(data, &Value::Bool(true));

        let ev = MpvEvent {
            raw: json!({"event": "end-file", "reason": "eof"}),
        };
        assert!(ev.as_property_change().is_none());
    }

    #[test]
    fn test_preset_args() {
        let backend = MpvBackend::new(MpvConfig {
            fullscreen: false,
            hwdec: "vaapi".to_string(),
            osc: true,
            extra_args: vec!["--volume=40".to_string()],
        });
        let args = backend.args();
        assert!(args.contains(&"--fs=no".to_string()));
        assert!(args.contains(&"--hwdec=vaapi".to_string()));
        assert!(args.contains(&"--osc=yes".to_string()));
        assert!(args.contains(&"--input-default-bindings=yes".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--volume=40"));
    }

    #[tokio::test]
    async fn test_requests_and_events_are_routed() {
        let (client, server) = duplex(4096);
        let (read_half, write_half) = split(client);
        let (event_tx, mut events) = mpsc::channel(8);
        let handle = start_io_tasks(read_half, write_half, event_tx);

        // Fake mpv: answer the request and push one event first.
        let (server_read, mut server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = format!(
                    "{{\"event\":\"seek\"}}\n{{\"request_id\":{},\"error\":\"success\",\"data\":true}}\n",
                    id
                );
                server_write.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let data = handle.get_property("pause").await.unwrap();
        assert_eq!(data, Value::Bool(true));
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.event_name(), Some("seek"));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let (client, server) = duplex(4096);
        let (read_half, write_half) = split(client);
        let (event_tx, _events) = mpsc::channel(8);
        let handle = start_io_tasks(read_half, write_half, event_tx);

        let (server_read, mut server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let reply = format!(
                    "{{\"request_id\":{},\"error\":\"property unavailable\"}}\n",
                    id
                );
                server_write.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let err = handle.get_property("time-pos").await.unwrap_err();
        assert!(matches!(err, MpvError::Rejected(ref msg) if msg == "property unavailable"));
    }

    #[tokio::test]
    async fn test_closed_connection_fails_requests() {
        let (client, server) = duplex(4096);
        let (read_half, write_half) = split(client);
        let (event_tx, _events) = mpsc::channel(8);
        let handle = start_io_tasks(read_half, write_half, event_tx);
        drop(server);

        let err = handle.send(json!(["stop"])).await.unwrap_err();
        assert!(matches!(err, MpvError::Closed));
    }

    #[tokio::test]
    async fn test_no_session_reports_nothing() {
        let mut backend = MpvBackend::new(MpvConfig::default());
        assert!(backend.next_event(Duration::from_millis(1)).await.is_none());
        assert!(backend.get_pause().await.is_err());
        backend.teardown().await;
    }
}
