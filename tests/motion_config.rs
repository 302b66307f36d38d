use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use peer_motion::config::MotionConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTION_CONFIG",
        "MOTION_FRAME_WIDTH",
        "MOTION_FRAME_HEIGHT",
        "MOTION_MIN_AREA",
        "MOTION_THRESHOLD",
        "MOTION_DILATE_KERNEL",
        "MOTION_TRANSCODER",
        "MOTION_KEEPALIVE_SECS",
        "MOTION_SNAPSHOT_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "frame": { "width": 640, "height": 480 },
        "detect": { "min_area": 1500, "threshold": 40, "dilate_kernel": 5 },
        "background": { "history": 200 },
        "transcoder": { "program": "/usr/local/bin/ffmpeg" },
        "ingest": { "keepalive_secs": 5, "fourcc": "VP90" },
        "display": { "snapshot_dir": "/var/lib/motiond/snapshots" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MOTION_CONFIG", file.path());
    std::env::set_var("MOTION_MIN_AREA", "2500");
    std::env::set_var("MOTION_KEEPALIVE_SECS", "1");

    let cfg = MotionConfig::load().expect("load config");
    assert_eq!(cfg.frame.width, 640);
    assert_eq!(cfg.frame.height, 480);
    assert_eq!(cfg.detect.min_area, 2500.0);
    assert_eq!(cfg.detect.threshold, 40);
    assert_eq!(cfg.detect.dilate_kernel, 5);
    assert_eq!(cfg.background.history, 200);
    assert_eq!(cfg.transcoder.program, "/usr/local/bin/ffmpeg");
    assert!(cfg.transcoder.args.is_none());
    assert_eq!(cfg.ingest.keepalive, Duration::from_secs(1));
    assert_eq!(&cfg.ingest.fourcc, b"VP90");
    assert_eq!(
        cfg.display.snapshot_dir.as_deref(),
        Some(std::path::Path::new("/var/lib/motiond/snapshots"))
    );

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MotionConfig::load().expect("load defaults");
    assert_eq!((cfg.frame.width, cfg.frame.height), (860, 720));
    assert_eq!(cfg.detect.min_area, 3000.0);
    assert_eq!(cfg.detect.threshold, 25);
    assert_eq!(cfg.detect.dilate_kernel, 3);
    assert_eq!(cfg.transcoder.program, "ffmpeg");
    assert_eq!(cfg.ingest.keepalive, Duration::from_secs(3));
    assert!(cfg.display.snapshot_dir.is_none());
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_THRESHOLD", "not-a-number");
    assert!(MotionConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTION_DILATE_KERNEL", "4");
    assert!(MotionConfig::load().is_err());
    clear_env();

    std::env::set_var("MOTION_FRAME_WIDTH", "0");
    assert!(MotionConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("MOTION_CONFIG", file.path());
    assert!(MotionConfig::load().is_err());

    std::env::set_var("MOTION_CONFIG", "/nonexistent/motion.json");
    assert!(MotionConfig::load().is_err());
    clear_env();
}
