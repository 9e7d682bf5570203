//! HTTP surface of the Pi-side daemon.
//!
//! A deliberately small HTTP/1.1 server over `std::net::TcpListener`: one
//! accept loop with a shutdown flag, one thread per connection. Streaming
//! connections are long-lived multipart responses, so connections are never
//! handled inline on the accept thread.
//!
//! Routes:
//! - `GET /video_feed/{camera_id}`: `multipart/x-mixed-replace` JPEG stream.
//! - `GET /snapshot/{camera_id}`: one high-res JPEG, also persisted locally.
//! - `GET /health`: liveness probe.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{STILL_JPEG_QUALITY, STREAM_JPEG_QUALITY};
use crate::gate::SnapshotGate;
use crate::mux::CameraId;
use crate::storage::SnapshotStore;

const MAX_REQUEST_BYTES: usize = 8192;
/// Inter-frame sleep for the streaming loop (bounds the frame rate).
const FRAME_INTERVAL: Duration = Duration::from_millis(50);
/// Maximum single wait while a snapshot holds the rig.
const PAUSE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub snapshot_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5001".to_string(),
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

/// Running server. Dropping the handle does not stop the server; call
/// `stop` for an orderly shutdown.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("server accept thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    gate: Arc<SnapshotGate>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, gate: Arc<SnapshotGate>) -> Self {
        Self { cfg, gate }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let store = SnapshotStore::new(self.cfg.snapshot_dir.clone());
        let gate = self.gate;
        let join = std::thread::spawn(move || {
            run_server(listener, gate, store, shutdown_thread);
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    gate: Arc<SnapshotGate>,
    store: SnapshotStore,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("connection from {peer}");
                let gate = Arc::clone(&gate);
                let store = store.clone();
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &gate, &store, &shutdown) {
                        log::warn!("request from {peer} failed: {err:#}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("accept failed: {err}");
                break;
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    gate: &SnapshotGate,
    store: &SnapshotStore,
    shutdown: &AtomicBool,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_response(
            &mut stream,
            405,
            "text/plain",
            b"only GET is supported",
        );
    }

    if request.path == "/health" {
        return write_response(
            &mut stream,
            200,
            "application/json",
            br#"{"status": "OK"}"#,
        );
    }

    if let Some(rest) = request.path.strip_prefix("/video_feed/") {
        return match CameraId::parse(rest) {
            Ok(id) => stream_video(&mut stream, gate, id, shutdown),
            Err(err) => write_response(&mut stream, 400, "text/plain", err.to_string().as_bytes()),
        };
    }

    if let Some(rest) = request.path.strip_prefix("/snapshot/") {
        return match CameraId::parse(rest) {
            Ok(id) => handle_snapshot(&mut stream, gate, store, id),
            Err(err) => write_response(&mut stream, 400, "text/plain", err.to_string().as_bytes()),
        };
    }

    write_response(&mut stream, 404, "text/plain", b"not found")
}

/// Continuous MJPEG stream. Runs until the client disconnects or the server
/// shuts down; capture failures are logged and skipped, never fatal to the
/// stream.
fn stream_video(
    stream: &mut TcpStream,
    gate: &SnapshotGate,
    id: CameraId,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
          Cache-Control: no-store\r\n\r\n",
    )?;

    while !shutdown.load(Ordering::SeqCst) {
        match gate.streaming_frame(id) {
            Ok(Some(frame)) => {
                let jpeg = match frame.encode_jpeg(STREAM_JPEG_QUALITY) {
                    Ok(jpeg) => jpeg,
                    Err(err) => {
                        log::warn!("dropping unencodable frame from camera {id}: {err:#}");
                        continue;
                    }
                };
                if write_part(stream, &jpeg).is_err() {
                    log::debug!("video client for camera {id} disconnected");
                    break;
                }
                std::thread::sleep(FRAME_INTERVAL);
            }
            Ok(None) => {
                // Snapshot in progress: hold off without tearing anything
                // down, resume promptly once the flag clears.
                gate.wait_while_paused(PAUSE_WAIT)?;
            }
            Err(err) => {
                log::warn!("streaming capture from camera {id} failed: {err:#}");
                std::thread::sleep(FRAME_INTERVAL);
            }
        }
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

fn handle_snapshot(
    stream: &mut TcpStream,
    gate: &SnapshotGate,
    store: &SnapshotStore,
    id: CameraId,
) -> Result<()> {
    let result = gate
        .snapshot(id)
        .and_then(|frame| frame.encode_jpeg(STILL_JPEG_QUALITY))
        .and_then(|jpeg| {
            store.save(id, &jpeg)?;
            Ok(jpeg)
        });
    match result {
        Ok(jpeg) => write_response(stream, 200, "image/jpeg", &jpeg),
        Err(err) => {
            log::error!("snapshot for camera {id} failed: {err:#}");
            write_response(
                stream,
                500,
                "text/plain",
                format!("snapshot failed: {err:#}").as_bytes(),
            )
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
