//! Config module tests

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("FB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${FB_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("FB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("FB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${FB_TEST_VAR_UNSET:-fallback}\"");
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("FB_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${FB_TEST_VAR_SET:-fallback}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("FB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("FB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${FB_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.mqtt.address, "127.0.0.1:1883");
    assert_eq!(config.delivery.timeout, Duration::from_secs(7));
    assert_eq!(config.delivery.max_retries, 2);
    assert_eq!(config.delivery.retry_delay, Duration::from_secs(5));
    assert_eq!(config.delivery.idle_timeout, Duration::from_secs(5));
    assert_eq!(config.routing.match_mode, MatchMode::Prefix);
    assert!(!config.delivery.dry_run);
    assert!(config.route.is_empty());
}

#[test]
fn test_parse_full_config() {
    let toml = r##"
[log]
level = "debug"

[mqtt]
address = "broker.local:1884"
protocol_version = 5
client_id = "bridge-1"
username = "svc"
password = "secret"
keepalive = 30
qos = 1
reconnect_interval = "500ms"
notify_topic = "firebase/new"
error_topic = "error/firebase"

[store]
app_name = "plant-telemetry"
credential = '{"database_secret": "abc"}'

[delivery]
timeout = "3s"
max_retries = 4
retry_delay = "250ms"
backoff = "exponential"
max_retry_delay = "2s"
dry_run = true

[routing]
match_mode = "segment"

[[route]]
topic = "sensors/+/temp"
path = "/readings/#"

[[route]]
pattern = "alerts/#"
destination = "/alerts"
"##;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(
        config.mqtt.parse_address(),
        ("broker.local".to_string(), 1884)
    );
    assert_eq!(config.mqtt.protocol(), Some(crate::protocol::ProtocolVersion::V5));
    assert_eq!(config.mqtt.reconnect_interval, Duration::from_millis(500));
    assert_eq!(config.mqtt.notify_topic.as_deref(), Some("firebase/new"));
    assert_eq!(
        config.store.resolve_base_url().as_deref(),
        Some("https://plant-telemetry.firebaseio.com")
    );
    assert_eq!(config.delivery.timeout, Duration::from_secs(3));
    assert_eq!(config.delivery.max_retries, 4);
    assert_eq!(config.delivery.backoff, BackoffKind::Exponential);
    assert!(config.delivery.dry_run);
    assert_eq!(config.routing.match_mode, MatchMode::Segment);
    assert_eq!(
        config.route,
        vec![
            RouteConfig {
                topic: "sensors/+/temp".to_string(),
                path: "/readings/#".to_string(),
            },
            RouteConfig {
                topic: "alerts/#".to_string(),
                path: "/alerts".to_string(),
            },
        ]
    );
}

#[test]
fn test_invalid_qos() {
    let err = Config::parse("[mqtt]\nqos = 2\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_invalid_protocol_version() {
    let err = Config::parse("[mqtt]\nprotocol_version = 3\n").unwrap_err();
    assert!(err.to_string().contains("protocol_version"));
}

#[test]
fn test_wildcard_notify_topic_rejected() {
    let err = Config::parse("[mqtt]\nnotify_topic = \"firebase/#\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_zero_timeout_rejected() {
    let err = Config::parse("[delivery]\ntimeout = \"0s\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_bad_duration_is_parse_error() {
    let err = Config::parse("[delivery]\ntimeout = \"soon\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_route_from_str() {
    let route: RouteConfig = "sensors/#:/readings/#".parse().unwrap();
    assert_eq!(route.topic, "sensors/#");
    assert_eq!(route.path, "/readings/#");

    // Only the first colon splits
    let route: RouteConfig = "a/b:/x:y".parse().unwrap();
    assert_eq!(route.path, "/x:y");

    assert!("no-separator".parse::<RouteConfig>().is_err());
    assert!(":/path".parse::<RouteConfig>().is_err());
    assert!("topic:".parse::<RouteConfig>().is_err());
}

#[test]
fn test_validate_startup_requirements() {
    let mut config = Config::default();
    let err = config.validate_startup().unwrap_err();
    assert!(err.to_string().contains("route"));

    config.route.push("a/#:/a".parse().unwrap());
    let err = config.validate_startup().unwrap_err();
    assert!(err.to_string().contains("app_name"));

    config.store.app_name = Some("demo".to_string());
    let err = config.validate_startup().unwrap_err();
    assert!(err.to_string().contains("credential"));

    // Dry run does not need a credential
    config.delivery.dry_run = true;
    assert!(config.validate_startup().is_ok());

    config.delivery.dry_run = false;
    config.store.credential = Some("token".to_string());
    assert!(config.validate_startup().is_ok());

    config.store.base_url = Some("ftp://db.example.com".to_string());
    let err = config.validate_startup().unwrap_err();
    assert!(err.to_string().contains("not an http(s) URL"));
}

#[test]
fn test_load_config_with_env_substitution() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::env::set_var("FB_TEST_APP", "from-env");
    write!(
        file,
        r##"
[store]
app_name = "${{FB_TEST_APP}}"

[delivery]
max_retries = ${{FB_TEST_RETRIES:-3}}

[[route]]
topic = "s/#"
path = "/s"
"##
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.store.app_name.as_deref(), Some("from-env"));
    assert_eq!(config.delivery.max_retries, 3);
    assert_eq!(config.delivery.timeout, Duration::from_secs(7));
    assert_eq!(config.route.len(), 1);

    std::env::remove_var("FB_TEST_APP");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.delivery.max_retries, 2);
    assert_eq!(config.mqtt.keepalive, 60);
}
