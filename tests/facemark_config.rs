use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use facemark::config::DetectorBackendKind;
use facemark::FacemarkConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACEMARK_CONFIG",
        "FACEMARK_SOURCE_URL",
        "FACEMARK_DETECTOR_BACKEND",
        "FACEMARK_MODEL_PATH",
        "FACEMARK_MATCH_THRESHOLD",
        "FACEMARK_MEMORY_MS",
        "FACEMARK_FACES_PATH",
        "FACEMARK_EMBEDDINGS_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "url": "/dev/video2",
            "width": 1280,
            "height": 720,
            "target_fps": 24,
            "mirrored": false
        },
        "tracker": {
            "memory_ms": 1200,
            "drift_px": 200
        },
        "matcher": { "threshold": 0.5 },
        "overlay": { "mobile": true, "display_width": 640, "display_height": 360 },
        "faces_path": "/var/lib/facemark/faces.json",
        "faces_poll_ms": 500
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FACEMARK_CONFIG", file.path());
    std::env::set_var("FACEMARK_MEMORY_MS", "900");
    std::env::set_var("FACEMARK_EMBEDDINGS_PATH", "/var/lib/facemark/embeddings.json");

    let cfg = FacemarkConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "/dev/video2");
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    assert_eq!(cfg.source.target_fps, 24);
    assert!(!cfg.source.mirrored);
    assert_eq!(cfg.tracker.memory_ms, 900);
    assert_eq!(cfg.tracker.drift_px, 200.0);
    assert_eq!(cfg.tracker.gate_px, 80.0);
    assert_eq!(cfg.tracker.match_threshold, 0.5);
    assert_eq!(cfg.faces_poll, Duration::from_millis(500));
    assert_eq!(
        cfg.embeddings_path.as_ref().unwrap().to_str(),
        Some("/var/lib/facemark/embeddings.json")
    );
    assert_eq!(cfg.overlay_geometry().scale(), (0.5, 0.5));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
faces_path = "faces.json"
embeddings_refresh_secs = 60

[source]
url = "stub://lobby"
target_fps = 15

[detector]
backend = "stub"
min_confidence = 0.7

[tracker]
reverify_delay_ms = 250
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = FacemarkConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.source.url, "stub://lobby");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
    assert_eq!(cfg.detector.backend, DetectorBackendKind::Stub);
    assert_eq!(cfg.detector.min_confidence, 0.7);
    assert_eq!(cfg.tracker.reverify_delay_ms, 250);
    assert_eq!(cfg.embeddings_refresh, Duration::from_secs(60));
    assert!(cfg.faces_path.is_some());

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FacemarkConfig::load().expect("load defaults");
    assert_eq!(cfg.source.url, "stub://webcam");
    assert!(cfg.source.mirrored);
    assert_eq!(cfg.tracker.memory_ms, 800);
    assert_eq!(cfg.tracker.match_threshold, 0.46);
    assert!(cfg.faces_path.is_none());
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACEMARK_MATCH_THRESHOLD", "1.5");
    assert!(FacemarkConfig::load().is_err());
    std::env::set_var("FACEMARK_MATCH_THRESHOLD", "high");
    assert!(FacemarkConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEMARK_MEMORY_MS", "0");
    assert!(FacemarkConfig::load().is_err());
    clear_env();

    std::env::set_var("FACEMARK_DETECTOR_BACKEND", "tract");
    let err = FacemarkConfig::load().unwrap_err();
    assert!(err.to_string().contains("model_path"));
    std::env::set_var("FACEMARK_MODEL_PATH", "/models/face.onnx");
    assert!(FacemarkConfig::load().is_ok());
    clear_env();

    std::env::set_var("FACEMARK_DETECTOR_BACKEND", "opencv");
    assert!(FacemarkConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "source": { "width": 0 } }"#).expect("write");
    assert!(FacemarkConfig::load_from(Some(file.path())).is_err());

    assert!(FacemarkConfig::load_from(Some(std::path::Path::new("/nonexistent/facemark.json"))).is_err());
    clear_env();
}
