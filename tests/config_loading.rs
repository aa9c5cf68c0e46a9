use std::time::Duration;

use action_flow::FailureStrategy;
use flowreplay_cli::{load_config, Config};

#[tokio::test]
async fn yaml_file_drives_replay_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowreplay.yaml");
    std::fs::write(
        &path,
        r#"
browser:
  ws_url: ws://127.0.0.1:9222/devtools/browser/test
replay:
  pacing_ms: 0
  readiness_timeout_ms: 2500
  discovery_attempts: 4
  row_wait_ms: 800
  bbox_threshold: 0.5
  strict_ambiguity: true
  on_step_failure: continue
recovery:
  enabled: true
  base_url: http://recovery.local
  api_key: secret
  timeout_ms: 1500
logging:
  dir: logs
  json: true
"#,
    )
    .unwrap();

    let loaded = load_config(Some(&path)).await.unwrap();
    assert_eq!(loaded.path.as_deref(), Some(path.as_path()));

    let config = loaded.config;
    assert_eq!(config.replay.on_step_failure, FailureStrategy::Continue);
    assert!(config.logging.json);

    let settings = config.replay_settings();
    assert_eq!(settings.pacing, Duration::ZERO);
    assert_eq!(settings.readiness_timeout, Duration::from_millis(2500));
    assert_eq!(settings.discovery_attempts, 4);
    assert_eq!(settings.row_wait, Duration::from_millis(800));
    assert_eq!(settings.bbox_threshold, 0.5);
    assert!(settings.strict_ambiguity);

    let recovery = config.recovery.client_config().expect("recovery enabled");
    assert_eq!(recovery.api_key.as_deref(), Some("secret"));
    assert_eq!(recovery.timeout, Duration::from_millis(1500));
}

#[tokio::test]
async fn malformed_yaml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "replay: [not, a, map]\n").unwrap();

    let err = match load_config(Some(&path)).await {
        Ok(_) => panic!("malformed config accepted"),
        Err(err) => err,
    };
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn defaults_match_engine_defaults() {
    let config = Config::default();
    let settings = config.replay_settings();
    assert_eq!(settings, action_primitives::ReplaySettings::default());
    assert!(config.recovery.client_config().is_none());
    assert!(config.browser.ws_url.is_none());
}
