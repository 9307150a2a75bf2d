use crate::control::ControlAck;
use crate::relay::Relay;
use crate::stream::{multipart_content_type, write_part};
use anyhow::{anyhow, Result};
use serde_json::json;
use url::form_urlencoded;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const FEED_PREFIX: &str = "/video_feed_";
/// How often an idle feed re-checks for server shutdown and viewer hangup.
const FEED_POLL: Duration = Duration::from_millis(250);
const ACCEPT_IDLE: Duration = Duration::from_millis(50);
/// Pause after a failed accept (fd exhaustion, aborted handshake).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5050".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open feeds end at their next poll.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    relay: Arc<Relay>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, relay: Arc<Relay>) -> Self {
        Self { cfg, relay }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let relay = self.relay;
        let join = std::thread::Builder::new()
            .name("relay-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, relay, shutdown_thread) {
                    log::error!("relay api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Source of incoming connections for the accept loop.
trait Acceptor {
    fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Acceptor for TcpListener {
    fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept()
    }
}

fn run_api<A: Acceptor>(listener: A, relay: Arc<Relay>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept_connection() {
            Ok((stream, peer)) => {
                let relay = relay.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("relay-conn-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &relay, &shutdown) {
                            log::debug!("request from {} ended: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn connection thread for {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_IDLE);
                continue;
            }
            Err(err) => {
                // Accept failures are per-connection; the listener stays usable.
                log::warn!("accept failed: {}", err);
                std::thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, relay: &Relay, shutdown: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.raw_path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(&mut stream, 200, "text/html; charset=utf-8", index_page(relay).as_bytes()),
        ("GET", "/health") => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        ("GET", "/status") => {
            let label = &relay.stream_settings().status_label;
            let body = relay.status().snapshot().to_status_json(label);
            write_json_response(&mut stream, 200, &body)
        }
        ("GET", "/pipelines") => {
            let snapshot = relay.status().snapshot();
            write_json_response(&mut stream, 200, &serde_json::to_value(snapshot)?)
        }
        ("POST", "/control") => handle_control(&mut stream, relay, &request),
        ("GET", path) if path.starts_with(FEED_PREFIX) => {
            handle_feed(&mut stream, relay, &path[FEED_PREFIX.len()..], shutdown)
        }
        (_, "/" | "/health" | "/status" | "/pipelines" | "/control") => write_json_response(
            &mut stream,
            405,
            &json!({"error": "method_not_allowed"}),
        ),
        (_, path) if path.starts_with(FEED_PREFIX) => write_json_response(
            &mut stream,
            405,
            &json!({"error": "method_not_allowed"}),
        ),
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn handle_control(stream: &mut TcpStream, relay: &Relay, request: &HttpRequest) -> Result<()> {
    let query = request.query();
    let cam = match query.get("cam").map(|raw| raw.trim().parse::<usize>()) {
        Some(Ok(cam)) => cam,
        Some(Err(_)) | None => {
            return write_json_response(
                stream,
                400,
                &json!({"error": "cam must be a camera index"}),
            );
        }
    };
    let Some(action) = query.get("action") else {
        return write_json_response(stream, 400, &json!({"error": "missing action"}));
    };
    match relay.control().apply(cam, action) {
        Ok(ControlAck {
            cam,
            running,
            state,
        }) => write_json_response(
            stream,
            200,
            &json!({"status": "ok", "cam": cam, "running": running, "state": state}),
        ),
        Err(err) => {
            log::info!("control rejected: {}", err);
            write_json_response(stream, 400, &json!({"error": err.to_string()}))
        }
    }
}

fn handle_feed(
    stream: &mut TcpStream,
    relay: &Relay,
    raw_index: &str,
    shutdown: &AtomicBool,
) -> Result<()> {
    let subscription = match raw_index.parse::<usize>().ok().and_then(|i| relay.subscribe(i)) {
        Some(subscription) => subscription,
        None => {
            return write_json_response(stream, 404, &json!({"error": "unknown_camera"}));
        }
    };
    let boundary = relay.stream_settings().boundary.clone();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache, no-store\r\nConnection: close\r\n\r\n",
        multipart_content_type(&boundary)
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()?;
    log::info!("viewer attached to camera {}", subscription.index());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match subscription.next_frame_timeout(FEED_POLL) {
            Ok(Some(frame)) => {
                if let Err(err) = write_part(stream, &boundary, &frame) {
                    log::info!(
                        "viewer left camera {}: {}",
                        subscription.index(),
                        err
                    );
                    return Ok(());
                }
            }
            Ok(None) => {
                // Paused cameras publish nothing, so a hangup would otherwise
                // go unnoticed until the next write.
                if viewer_hung_up(stream) {
                    log::info!("viewer left camera {} while idle", subscription.index());
                    return Ok(());
                }
            }
            Err(closed) => {
                log::info!("ending feed: {}", closed);
                break;
            }
        }
    }
    Ok(())
}

/// Nonblocking peek at the feed socket. EOF or a hard error means the viewer is gone.
fn viewer_hung_up(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let hung_up = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) => !matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    };
    hung_up || stream.set_nonblocking(false).is_err()
}

fn index_page(relay: &Relay) -> String {
    let feeds: String = relay
        .indices()
        .iter()
        .map(|i| {
            format!(
                "<figure><img src=\"/video_feed_{i}\" alt=\"camera {i}\"><figcaption>camera {i}: <span id=\"count-{i}\">-</span> \
                 <button onclick=\"control({i},'start')\">start</button><button onclick=\"control({i},'stop')\">stop</button></figcaption></figure>\n",
                i = i
            )
        })
        .collect();
    let label = &relay.stream_settings().status_label;
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>multicam relay</title></head>
<body>
<h1>multicam relay</h1>
{feeds}<script>
function control(cam, action) {{
  fetch('/control?cam=' + cam + '&action=' + action, {{method: 'POST'}});
}}
setInterval(function () {{
  fetch('/status').then(function (r) {{ return r.json(); }}).then(function (s) {{
    Object.keys(s).forEach(function (k) {{
      var m = k.match(/^{label}_detected_(\d+)$/);
      if (m) {{ var el = document.getElementById('count-' + m[1]); if (el) el.textContent = s[k]; }}
    }});
  }});
}}, 1000);
</script>
</body>
</html>
"#,
        feeds = feeds,
        label = label
    )
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
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        raw_path: raw_path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
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
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
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
    raw_path: String,
}

impl HttpRequest {
    /// Decoded query parameters (`%XX` and `+`); the last occurrence of a key wins.
    fn query(&self) -> HashMap<String, String> {
        match self.raw_path.split_once('?') {
            Some((_, query)) => form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(raw_path: &str) -> HttpRequest {
        HttpRequest {
            method: "POST".to_string(),
            path: raw_path.split('?').next().unwrap().to_string(),
            raw_path: raw_path.to_string(),
        }
    }

    #[test]
    fn query_splits_pairs() {
        let query = request("/control?cam=1&action=stop").query();
        assert_eq!(query.get("cam").map(String::as_str), Some("1"));
        assert_eq!(query.get("action").map(String::as_str), Some("stop"));
    }

    #[test]
    fn query_handles_bare_keys_and_missing_query() {
        let query = request("/control?cam=0&action").query();
        assert_eq!(query.get("action").map(String::as_str), Some(""));
        assert!(request("/control").query().is_empty());
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let query = request("/control?cam=%30&action=st%6Fp").query();
        assert_eq!(query.get("cam").map(String::as_str), Some("0"));
        assert_eq!(query.get("action").map(String::as_str), Some("stop"));

        let query = request("/control?action=+start+&cam=1&cam=%32").query();
        assert_eq!(query.get("action").map(String::as_str), Some(" start "));
        assert_eq!(query.get("cam").map(String::as_str), Some("2"));
    }

    /// Fails the first `failures` accepts with hard errors, then defers to a real listener.
    struct FlakyAcceptor {
        listener: TcpListener,
        failures: std::sync::atomic::AtomicUsize,
    }

    impl Acceptor for FlakyAcceptor {
        fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if remaining % 2 == 0 {
                    io::Error::from_raw_os_error(24)
                } else {
                    io::Error::from(io::ErrorKind::ConnectionAborted)
                });
            }
            self.listener.accept()
        }
    }

    fn health_relay() -> Arc<Relay> {
        use crate::config::RelayConfig;
        use crate::detect::BackendRegistry;
        use crate::ingest::{FrameSource, SourceOpener, SyntheticConfig, SyntheticSource};

        let mut config = RelayConfig::default();
        config.capture.indices = vec![0];
        config.detection.backend = "stub".to_string();
        let opener: Arc<dyn SourceOpener> = Arc::new(|index: usize| {
            let config = SyntheticConfig {
                width: 32,
                height: 24,
                target_fps: 20,
                subjects: 0,
                fail_after: None,
            };
            SyntheticSource::open(index, config)
                .map(|source| Box::new(source) as Box<dyn FrameSource>)
        });
        Arc::new(Relay::start(&config, opener, &BackendRegistry::with_builtin()).unwrap())
    }

    #[test]
    fn accept_errors_do_not_stop_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();
        let acceptor = FlakyAcceptor {
            listener,
            failures: std::sync::atomic::AtomicUsize::new(4),
        };

        let relay = health_relay();
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = {
            let relay = relay.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || run_api(acceptor, relay, shutdown))
        };

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.ends_with(r#"{"status":"ok"}"#));

        shutdown.store(true, Ordering::SeqCst);
        assert!(server.join().unwrap().is_ok());
        relay.shutdown();
    }
}
