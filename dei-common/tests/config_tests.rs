//! Configuration resolution and environment overrides
//!
//! Tests that touch `DEI_*` environment variables are marked `#[serial]`.

use dei_common::config::{
    resolve_config_path, TomlConfig, API_KEY_ENV_VAR, CONFIG_ENV_VAR, CRON_SECRET_ENV_VAR,
    DATABASE_ENV_VAR, FROM_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_path_beats_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "dei-mailer-test");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(None, "dei-mailer-test");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let config = TomlConfig::load_or_default(Some(&missing)).unwrap();
    assert_eq!(config.rate_limit.max_requests, 100);
}

#[test]
fn test_unparseable_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(TomlConfig::load_or_default(Some(&path)).is_err());
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        database_path = "/var/lib/dei/mailer.db"

        [rate_limit]
        max_requests = 10
        window_secs = 1
        "#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.rate_limit.max_requests, 10);
    assert_eq!(config.database_path("dei-mailer"), PathBuf::from("/var/lib/dei/mailer.db"));
}

#[test]
#[serial]
fn test_env_overrides() {
    env::set_var(API_KEY_ENV_VAR, "re_from_env");
    env::set_var(DATABASE_ENV_VAR, "/tmp/env.db");
    env::set_var(FROM_ENV_VAR, "Ops <ops@example.com>");
    env::set_var(CRON_SECRET_ENV_VAR, "s3cret");

    let mut config = TomlConfig::default();
    config.apply_env_overrides();

    assert_eq!(config.resend.api_key.as_deref(), Some("re_from_env"));
    assert_eq!(config.database_path, Some(PathBuf::from("/tmp/env.db")));
    assert_eq!(config.resend.from, "Ops <ops@example.com>");
    assert_eq!(config.scheduler.cron_secret.as_deref(), Some("s3cret"));

    env::remove_var(API_KEY_ENV_VAR);
    env::remove_var(DATABASE_ENV_VAR);
    env::remove_var(FROM_ENV_VAR);
    env::remove_var(CRON_SECRET_ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_values_ignored() {
    env::set_var(API_KEY_ENV_VAR, "   ");

    let mut config = TomlConfig::default();
    config.apply_env_overrides();
    assert_eq!(config.resend.api_key, None);

    env::remove_var(API_KEY_ENV_VAR);
}
