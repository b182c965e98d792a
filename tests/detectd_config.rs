use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use frame_detect::config::DetectdConfig;
use frame_detect::{FramePolicy, PixelFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETECT_CONFIG",
        "DETECT_SOURCE_URL",
        "DETECT_SCALE_FACTOR",
        "DETECT_MIN_NEIGHBORS",
        "DETECT_MIN_SIZE",
        "DETECT_QUEUE_CAPACITY",
        "DETECT_FRAME_POLICY",
        "DETECT_CLASSIFIERS",
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
        "source": {
            "url": "stub://lobby",
            "width": 640,
            "height": 480,
            "format": "gray8",
            "fps": 15
        },
        "detection": {
            "scale_factor": 1.2,
            "min_neighbors": 4,
            "min_size": [40, 40]
        },
        "classifiers": [
            { "name": "face", "source": "stub://face" },
            { "name": "hand", "source": "stub://hand" }
        ],
        "worker": {
            "capacity": 16,
            "frame_policy": "every",
            "detect_interval_ticks": 3
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DETECT_CONFIG", file.path());
    std::env::set_var("DETECT_MIN_NEIGHBORS", "2");
    std::env::set_var("DETECT_MIN_SIZE", "24x24");
    std::env::set_var("DETECT_FRAME_POLICY", "latest");

    let cfg = DetectdConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "stub://lobby");
    assert_eq!(cfg.source.width, 640);
    assert_eq!(cfg.source.height, 480);
    assert_eq!(cfg.source.format, PixelFormat::Gray8);
    assert_eq!(cfg.source.fps, 15);
    assert_eq!(cfg.detection.scale_factor, 1.2);
    assert_eq!(cfg.detection.min_neighbors, 2);
    assert_eq!(cfg.detection.min_size, (24, 24));
    let names: Vec<&str> = cfg.classifiers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["face", "hand"]);
    assert_eq!(cfg.worker.capacity, Some(16));
    assert_eq!(cfg.worker.frame_policy, FramePolicy::Latest);
    assert_eq!(cfg.worker.detect_interval_ticks, 3);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[source]
url = "stub://garage"
format = "rgba8"

[detection]
scale_factor = 1.05

[[classifiers]]
name = "Plate"
source = "stub://plate"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = DetectdConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.source.url, "stub://garage");
    assert_eq!(cfg.source.format, PixelFormat::Rgba8);
    assert_eq!(cfg.detection.scale_factor, 1.05);
    assert_eq!(cfg.classifiers[0].name, "plate");
    assert_eq!(cfg.worker.capacity, None);

    clear_env();
}

#[test]
fn env_classifiers_replace_file_classifiers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_CLASSIFIERS", "eyes=stub://eyes, mouth=stub://mouth");
    std::env::set_var("DETECT_QUEUE_CAPACITY", "unbounded");
    let cfg = DetectdConfig::load().expect("load config");
    let names: Vec<&str> = cfg.classifiers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["eyes", "mouth"]);
    assert_eq!(cfg.worker.capacity, None);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_SCALE_FACTOR", "1.0");
    assert!(DetectdConfig::load().is_err());
    clear_env();

    std::env::set_var("DETECT_MIN_SIZE", "big");
    assert!(DetectdConfig::load().is_err());
    clear_env();

    std::env::set_var("DETECT_FRAME_POLICY", "sometimes");
    assert!(DetectdConfig::load().is_err());
    clear_env();

    std::env::set_var("DETECT_CLASSIFIERS", "bad name=stub://x");
    assert!(DetectdConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_CONFIG", "/nonexistent/detectd.json");
    let err = DetectdConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
