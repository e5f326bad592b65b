//! Configuration Integration Tests

use std::collections::HashMap;
use std::fs;

use dockside::models::settings::ChatStoreBackend;
use dockside::storage::ConfigService;
use dockside::{AppConfig, AppError};

#[test]
fn test_open_reads_file_and_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dockside.json");
    fs::write(
        &path,
        r#"{
            "server": { "bind_address": "0.0.0.0:9000" },
            "analytics": { "base_url": "https://api.us-east.tinybird.co" },
            "chat_store": { "backend": "memory" }
        }"#,
    )
    .unwrap();

    let service = ConfigService::open(&path).unwrap();
    let config = service.get_config();
    assert_eq!(config.server.bind_address, "0.0.0.0:9000");
    assert_eq!(config.analytics.base_url, "https://api.us-east.tinybird.co");
    assert_eq!(config.chat_store.backend, ChatStoreBackend::Memory);
    assert_eq!(config.tracing.flush_attempts, 3);
    assert_eq!(service.path(), path.as_path());
}

#[test]
fn test_open_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dockside.json");
    fs::write(&path, r#"{ "tracing": { "enabled": true } }"#).unwrap();

    let err = ConfigService::open(&path).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn test_malformed_json_is_a_serialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dockside.json");
    fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        ConfigService::open(&path),
        Err(AppError::Serialization(_))
    ));
}

#[test]
fn test_env_overlay_fills_secrets_only() {
    let env: HashMap<&str, &str> = [
        ("TINYBIRD_TOKEN", "tb-secret"),
        ("E2B_API_KEY", "e2b-secret"),
        ("UPSTASH_REDIS_REST_URL", "https://redis.example"),
        ("AWS_SECRET_ACCESS_KEY", "   "),
    ]
    .into();

    let mut config = AppConfig::default();
    config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.analytics.token.as_deref(), Some("tb-secret"));
    assert_eq!(config.sandbox.api_key.as_deref(), Some("e2b-secret"));
    assert_eq!(config.chat_store.url.as_deref(), Some("https://redis.example"));
    assert!(config.blob.secret_access_key.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("dockside.json");
    ConfigService::write_defaults(&path).unwrap();

    let service = ConfigService::open(&path).unwrap();
    assert_eq!(service.get_config().server.bind_address, "127.0.0.1:8787");
}
