// ABOUTME: Tests for configuration loading and validation
// ABOUTME: Verifies file lookup, env var overrides, plugin sections and fatal validation errors

use horscht::config::Config;
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to clear all config-related env vars
fn clear_config_env_vars() {
    for var in [
        "HORSCHT_CONFIG_PATH",
        "MATRIX_HOME_SERVER",
        "MATRIX_USER_ID",
        "MATRIX_PASSWORD",
        "MATRIX_ACCESS_TOKEN",
        "MATRIX_DEVICE_NAME",
        "MQTT_HOST",
        "MQTT_PORT",
    ] {
        std::env::remove_var(var);
    }
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

const BASE: &str = r##"
[matrix]
home_server = "https://test.matrix.org"
user_id = "@horscht:test.matrix.org"
password = "secret123"
store_path = "./test-store"

[mqtt]
host = "mqtt.test"
port = 1884

[plugins.speak]
allowed_rooms = ["#ops:test.matrix.org"]

[plugins.reminders]
secs = 30
file = "reminders-test.json"
"##;

#[test]
#[serial]
fn test_config_loads_from_env_path() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE);
    std::env::set_var("HORSCHT_CONFIG_PATH", &path);

    let config = Config::load().unwrap();

    assert_eq!(config.matrix.home_server, "https://test.matrix.org");
    assert_eq!(config.matrix.user_id, "@horscht:test.matrix.org");
    assert_eq!(config.matrix.password.as_deref(), Some("secret123"));
    assert_eq!(config.matrix.store_path, "./test-store");
    assert_eq!(config.mqtt.host, "mqtt.test");
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.plugins.len(), 2);
    assert_eq!(config.plugins["reminders"]["secs"].as_integer(), Some(30));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_explicit_path_wins_over_env_path() {
    clear_config_env_vars();
    let env_dir = tempfile::tempdir().unwrap();
    let env_path = write_config(&env_dir, &BASE.replace("mqtt.test", "from-env"));
    std::env::set_var("HORSCHT_CONFIG_PATH", &env_path);

    let cli_dir = tempfile::tempdir().unwrap();
    let cli_path = write_config(&cli_dir, &BASE.replace("mqtt.test", "from-cli"));

    let config = Config::load_from(Some(cli_path.as_path())).unwrap();
    assert_eq!(config.mqtt.host, "from-cli");

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_env_var_overrides() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE);

    std::env::set_var("MATRIX_HOME_SERVER", "https://override.matrix.org");
    std::env::set_var("MATRIX_ACCESS_TOKEN", "syt_override");
    std::env::set_var("MATRIX_DEVICE_NAME", "horscht-test");
    std::env::set_var("MQTT_HOST", "broker.override");
    std::env::set_var("MQTT_PORT", "8883");

    let config = Config::load_from(Some(path.as_path())).unwrap();

    assert_eq!(config.matrix.home_server, "https://override.matrix.org");
    assert_eq!(config.matrix.access_token.as_deref(), Some("syt_override"));
    assert_eq!(config.matrix.device_name, "horscht-test");
    assert_eq!(config.mqtt.host, "broker.override");
    assert_eq!(config.mqtt.port, 8883);

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_invalid_mqtt_port_override_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE);
    std::env::set_var("MQTT_PORT", "not-a-port");

    let err = Config::load_from(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("MQTT_PORT"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_missing_credentials_fail_validation() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, &BASE.replace("password = \"secret123\"\n", ""));

    let err = Config::load_from(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("password"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_malformed_toml_reports_the_file() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[matrix\nhome_server = ");

    let err = Config::load_from(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));

    clear_config_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();

    let err = Config::load_from(Some(dir.path().join("nope.toml").as_path())).unwrap_err();
    assert!(err.to_string().contains("Failed to read"));
}

#[test]
#[serial]
fn test_loaded_plugin_sections_build_a_registry() {
    clear_config_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE);

    let config = Config::load_from(Some(path.as_path())).unwrap();
    let registry = horscht::plugins::build_registry(&config.plugins).unwrap();

    assert!(registry.command("!talk").is_some());
    assert!(registry.command("!reminder").is_some());
    assert_eq!(registry.crons().len(), 1);
    assert!(!registry
        .access()
        .allowed("!talk", "@x:test.matrix.org", "#general:test.matrix.org"));
}

#[test]
fn test_example_config_is_valid() {
    let config = Config::parse(include_str!("../config.example.toml")).unwrap();
    config.validate().unwrap();

    let registry = horscht::plugins::build_registry(&config.plugins).unwrap();
    assert_eq!(registry.plugin_names().len(), 7);
    assert!(registry.command("!startvote").is_some());
    assert_eq!(registry.crons().len(), 2);
    assert_eq!(
        registry.topic_names(),
        vec!["space/nachkaufen", "space/reminder"]
    );
}
