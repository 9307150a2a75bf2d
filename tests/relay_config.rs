use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use multicam_relay::config::{CaptureBackend, RelayConfig};
use multicam_relay::EncodeFormat;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_LISTEN_ADDR",
        "RELAY_SOURCES",
        "RELAY_CAPTURE_BACKEND",
        "RELAY_DETECTOR",
        "RELAY_TARGET_CLASS",
        "RELAY_MIN_CONFIDENCE",
        "RELAY_ENCODE_FORMAT",
        "RELAY_JPEG_QUALITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "listen_addr": "127.0.0.1:9000",
        "capture": {
            "backend": "synthetic",
            "indices": [2, 5],
            "width": 320,
            "height": 240,
            "target_fps": 5,
            "synthetic_subjects": 3
        },
        "detection": {
            "backend": "stub",
            "target_class": "person",
            "min_confidence": 0.25,
            "min_width": 10,
            "min_height": 12
        },
        "encode": { "format": "png", "quality": 50 },
        "stream": { "boundary": "cam-part", "subscriber_buffer": 8, "status_label": "people" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_SOURCES", "0, 1, 7");
    std::env::set_var("RELAY_MIN_CONFIDENCE", "0.6");
    std::env::set_var("RELAY_ENCODE_FORMAT", "JPG");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.capture.backend, CaptureBackend::Synthetic);
    assert_eq!(cfg.capture.indices, vec![0, 1, 7]);
    assert_eq!((cfg.capture.width, cfg.capture.height), (320, 240));
    assert_eq!(cfg.capture.target_fps, 5);
    assert_eq!(cfg.capture.synthetic_subjects, 3);
    assert_eq!(cfg.detection.backend, "stub");
    assert_eq!(cfg.detection.target_class, "person");
    assert!((cfg.detection.min_confidence - 0.6).abs() < f32::EPSILON);
    assert_eq!((cfg.detection.min_width, cfg.detection.min_height), (10, 12));
    // env wins over the file's "png"
    assert_eq!(cfg.encode.format, EncodeFormat::Jpeg);
    assert_eq!(cfg.encode.quality, 50);
    assert_eq!(cfg.stream.boundary, "cam-part");
    assert_eq!(cfg.stream.subscriber_buffer, 8);
    assert_eq!(cfg.stream.status_label, "people");

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
listen_addr = "0.0.0.0:6060"

[capture]
indices = [3]
device_template = "/dev/cam{index}"

[detection]
target_class = "face"
class_labels = ["face", "person"]
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = RelayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.listen_addr, "0.0.0.0:6060");
    assert_eq!(cfg.capture.indices, vec![3]);
    assert_eq!(cfg.capture.device_template, "/dev/cam{index}");
    assert_eq!(cfg.detection.class_labels, vec!["face", "person"]);
    assert_eq!(cfg.detection.backend, "marker");

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = RelayConfig::load().expect("load defaults");
    assert_eq!(cfg, RelayConfig::default());
    assert_eq!(cfg.listen_addr, "0.0.0.0:5050");
    assert_eq!(cfg.capture.indices, vec![0, 1]);
    assert_eq!(cfg.encode.format, EncodeFormat::Jpeg);
    assert_eq!(cfg.stream.status_label, "faces");
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    for (key, value) in [
        ("RELAY_JPEG_QUALITY", "0"),
        ("RELAY_JPEG_QUALITY", "high"),
        ("RELAY_MIN_CONFIDENCE", "1.5"),
        ("RELAY_SOURCES", "0,zero"),
        ("RELAY_SOURCES", "1,1"),
        ("RELAY_CAPTURE_BACKEND", "gstreamer"),
        ("RELAY_ENCODE_FORMAT", "webp"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            RelayConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn malformed_boundary_in_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"stream": {"boundary": "two words"}}"#)
        .expect("write config");
    let err = RelayConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("boundary"));
}

#[test]
fn missing_config_file_names_the_path() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.json");
    let err = RelayConfig::load_from(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
