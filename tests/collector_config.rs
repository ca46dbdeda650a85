use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use trafficwatch::config::CollectorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRAFFICWATCH_CONFIG",
        "TRAFFICWATCH_DB_PATH",
        "TRAFFICWATCH_CAMERA_FILE",
        "TRAFFICWATCH_RESULTS_DIR",
        "TRAFFICWATCH_INTERVAL_MINS",
        "TRAFFICWATCH_MAX_WORKERS",
        "TRAFFICWATCH_FETCH_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CollectorConfig::load().expect("load defaults");

    assert_eq!(cfg.db_path, "traffic_data.db");
    assert_eq!(cfg.interval, Duration::from_secs(15 * 60));
    assert_eq!(cfg.batch.max_workers, 8);
    assert_eq!(cfg.batch.failure_threshold, 0.10);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.retry.initial_delay, Duration::from_secs(1));
    assert_eq!(cfg.retry.backoff_factor, 2.0);
    assert_eq!(cfg.retry.pacing_delay, Duration::from_secs(1));
    assert_eq!(cfg.detector.backend, "stub");
    // The cooldown after a failed tick is strictly longer than the interval.
    assert!(cfg.error_cooldown() > cfg.interval);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "prod_traffic.db",
        "camera_file": "cameras/nyc.json",
        "results_dir": "audit_results",
        "interval_mins": 30,
        "batch": {
            "max_workers": 4,
            "failure_threshold": 0.25
        },
        "fetch": {
            "url_template": "http://cams.example/{id}.jpg?t={ts}",
            "timeout_secs": 20
        },
        "retry": {
            "max_attempts": 5,
            "initial_delay_secs": 0.5,
            "backoff_factor": 3.0,
            "pacing_delay_secs": 2.0
        },
        "detector": {
            "backend": "stub",
            "input_width": 416,
            "input_height": 416,
            "confidence_threshold": 0.4
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TRAFFICWATCH_CONFIG", file.path());
    std::env::set_var("TRAFFICWATCH_MAX_WORKERS", "2");
    std::env::set_var("TRAFFICWATCH_DB_PATH", "override.db");

    let cfg = CollectorConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.camera_file.to_str().unwrap(), "cameras/nyc.json");
    assert_eq!(cfg.results_dir.to_str().unwrap(), "audit_results");
    assert_eq!(cfg.interval, Duration::from_secs(30 * 60));
    assert_eq!(cfg.batch.max_workers, 2);
    assert_eq!(cfg.batch.failure_threshold, 0.25);
    assert_eq!(cfg.fetch.url_template, "http://cams.example/{id}.jpg?t={ts}");
    assert_eq!(cfg.fetch.timeout, Duration::from_secs(20));
    assert_eq!(cfg.retry.max_attempts, 5);
    assert_eq!(cfg.retry.initial_delay, Duration::from_secs_f64(0.5));
    assert_eq!(cfg.retry.backoff_factor, 3.0);
    assert_eq!(cfg.retry.pacing_delay, Duration::from_secs(2));
    assert_eq!(cfg.detector.input_width, 416);
    assert_eq!(cfg.detector.confidence_threshold, 0.4);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "batch": { "failure_threshold": 1.5 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("TRAFFICWATCH_CONFIG", file.path());

    let err = CollectorConfig::load().unwrap_err();
    assert!(format!("{err:#}").contains("failure_threshold"));

    clear_env();
}

#[test]
fn tract_backend_requires_model_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "detector": { "backend": "tract" } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("TRAFFICWATCH_CONFIG", file.path());

    let err = CollectorConfig::load().unwrap_err();
    assert!(format!("{err:#}").contains("model_path"));

    clear_env();
}
