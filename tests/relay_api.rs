mod common;

use anyhow::Result;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use multicam_relay::api::{ApiConfig, ApiHandle, ApiServer};
use multicam_relay::detect::BackendRegistry;
use multicam_relay::{PipelineState, Relay};

use common::{into_opener, synthetic, test_config, wait_for, TestOpener};

struct TestApi {
    relay: Arc<Relay>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    /// Camera 0 shows two subjects, camera 1 shows none.
    fn new() -> Result<Self> {
        let mut opener = TestOpener::new();
        opener.synthetic(0, synthetic(2));
        opener.synthetic(1, synthetic(0));
        let config = test_config(&[0, 1], "marker");
        let relay = Arc::new(Relay::start(
            &config,
            into_opener(opener),
            &BackendRegistry::with_builtin(),
        )?);
        let api_handle = ApiServer::new(
            ApiConfig {
                addr: config.listen_addr.clone(),
            },
            relay.clone(),
        )
        .spawn()?;
        Ok(Self {
            relay,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle.as_ref().map(|h| h.addr).unwrap()
    }

    fn wait_for_frames(&self) {
        let relay = &self.relay;
        assert!(wait_for(|| relay
            .indices()
            .iter()
            .all(|&i| relay.pipeline(i).unwrap().frames_produced() > 0)));
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
        self.relay.shutdown();
    }
}

fn request(addr: SocketAddr, method: &str, path: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
        method, path
    )?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn json_body(body: &str) -> Value {
    serde_json::from_str(body).expect("json body")
}

#[test]
fn status_reports_each_camera_count() -> Result<()> {
    let api = TestApi::new()?;
    api.wait_for_frames();

    let (headers, body) = request(api.addr(), "GET", "/status")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Content-Type: application/json"));
    assert_eq!(
        json_body(&body),
        json!({"status": "Running", "faces_detected_0": 2, "faces_detected_1": 0})
    );
    Ok(())
}

#[test]
fn feed_streams_multipart_jpeg_parts() -> Result<()> {
    let api = TestApi::new()?;
    let mut stream = TcpStream::connect(api.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /video_feed_0 HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while count_parts(&received) < 3 {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "feed ended early");
        received.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=frame\r\n"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: "));

    let first_part = find(&received, b"--frame\r\n").unwrap();
    let payload_start = first_part + find(&received[first_part..], b"\r\n\r\n").unwrap() + 4;
    assert_eq!(&received[payload_start..payload_start + 2], &[0xFF, 0xD8]);

    drop(stream);
    let pipeline = api.relay.pipeline(0).unwrap();
    // The server notices the disconnect on its next write.
    assert!(wait_for(|| pipeline.subscriber_count() == 0));
    assert_eq!(pipeline.state(), PipelineState::Streaming);
    Ok(())
}

#[test]
fn unknown_feed_is_not_found() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = request(api.addr(), "GET", "/video_feed_9")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = request(api.addr(), "GET", "/video_feed_x")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    Ok(())
}

#[test]
fn control_stop_and_start_round_trip() -> Result<()> {
    let api = TestApi::new()?;
    let pipeline = api.relay.pipeline(1).unwrap();

    let (headers, body) = request(api.addr(), "POST", "/control?cam=1&action=stop")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let ack = json_body(&body);
    assert_eq!(ack["status"], "ok");
    assert_eq!(ack["cam"], 1);
    assert_eq!(ack["running"], false);
    assert!(wait_for(|| pipeline.state() == PipelineState::Paused));

    let (headers, _) = request(api.addr(), "POST", "/control?cam=1&action=stop")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(pipeline.state(), PipelineState::Paused);

    let (headers, body) = request(api.addr(), "POST", "/control?cam=1&action=start")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(json_body(&body)["running"], true);
    assert!(wait_for(|| pipeline.state() == PipelineState::Streaming));
    Ok(())
}

#[test]
fn control_rejects_bad_requests_without_state_change() -> Result<()> {
    let api = TestApi::new()?;
    for path in [
        "/control?cam=7&action=stop",
        "/control?cam=0&action=pause",
        "/control?cam=0",
        "/control?action=stop",
        "/control?cam=first&action=stop",
    ] {
        let (headers, body) = request(api.addr(), "POST", path)?;
        assert!(headers.starts_with("HTTP/1.1 400"), "{} -> {}", path, headers);
        assert!(json_body(&body)["error"].is_string());
    }
    let (_, body) = request(api.addr(), "POST", "/control?cam=7&action=stop")?;
    assert!(json_body(&body)["error"]
        .as_str()
        .unwrap()
        .contains("unknown camera index 7"));

    for index in api.relay.indices() {
        assert!(api.relay.pipeline(index).unwrap().is_running());
    }
    Ok(())
}

#[test]
fn auxiliary_routes() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = request(api.addr(), "GET", "/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(json_body(&body), json!({"status": "ok"}));

    api.wait_for_frames();
    let (_, body) = request(api.addr(), "GET", "/pipelines")?;
    let cameras = json_body(&body)["cameras"].as_array().cloned().unwrap();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0]["index"], 0);
    assert_eq!(cameras[0]["state"], "streaming");

    let (headers, body) = request(api.addr(), "GET", "/")?;
    assert!(headers.contains("text/html"));
    assert!(body.contains("/video_feed_0"));
    assert!(body.contains("/video_feed_1"));

    let (headers, _) = request(api.addr(), "GET", "/control?cam=0&action=stop")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    let (headers, _) = request(api.addr(), "DELETE", "/status")?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    let (headers, _) = request(api.addr(), "GET", "/events")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count_parts(data: &[u8]) -> usize {
    data.windows(9).filter(|w| w == b"--frame\r\n").count()
}

#[test]
fn paused_feed_notices_viewer_hangup() -> Result<()> {
    let api = TestApi::new()?;
    let pipeline = api.relay.pipeline(1).unwrap();
    let (headers, _) = request(api.addr(), "POST", "/control?cam=1&action=stop")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(wait_for(|| pipeline.state() == PipelineState::Paused));

    let mut stream = TcpStream::connect(api.addr())?;
    stream.write_all(b"GET /video_feed_1 HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(wait_for(|| pipeline.subscriber_count() == 1));

    // No frames are written while paused; the idle poll has to spot the hangup.
    drop(stream);
    assert!(wait_for(|| pipeline.subscriber_count() == 0));
    assert_eq!(pipeline.state(), PipelineState::Paused);
    Ok(())
}

#[test]
fn control_accepts_percent_encoded_query() -> Result<()> {
    let api = TestApi::new()?;
    let pipeline = api.relay.pipeline(1).unwrap();

    let (headers, body) = request(api.addr(), "POST", "/control?cam=%31&action=st%6Fp")?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert_eq!(json_body(&body)["cam"], 1);
    assert!(wait_for(|| pipeline.state() == PipelineState::Paused));

    let (headers, _) = request(api.addr(), "POST", "/control?cam=1&action=+start+")?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert!(wait_for(|| pipeline.state() == PipelineState::Streaming));
    Ok(())
}
