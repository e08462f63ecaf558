use std::fs;

use assert_matches::assert_matches;

use cometx::config::{Config, ConfigLoader, DEFAULT_SERVER};
use cometx::error::CometxError;

#[test]
fn load_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cometx.json");
    fs::write(
        &path,
        r#"{
            "api_key": "secret",
            "workspace": "team",
            "url_override": "https://comet.internal/clientlib/"
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::load_file(path.to_str()).unwrap();
    let resolved = ConfigLoader::resolve_config(config, |_| None);
    assert_eq!(resolved.require_api_key().unwrap(), "secret");
    assert_eq!(resolved.workspace_or(None).unwrap(), "team");
    assert_eq!(resolved.workspace_or(Some("other")).unwrap(), "other");
    assert_eq!(resolved.server_url, "https://comet.internal");
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::load_file(path.to_str()),
        Err(CometxError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cometx.json");
    fs::write(&path, "{ api_key = 1 }").unwrap();
    assert_matches!(
        ConfigLoader::load_file(path.to_str()),
        Err(CometxError::ConfigParse(_))
    );
}

#[test]
fn blank_env_values_fall_back_to_file() {
    let config = Config {
        api_key: Some("from-file".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, |name| match name {
        "COMET_API_KEY" => Some("  ".to_string()),
        "COMET_WORKSPACE" => Some("env-ws".to_string()),
        _ => None,
    });
    assert_eq!(resolved.api_key.as_deref(), Some("from-file"));
    assert_eq!(resolved.workspace.as_deref(), Some("env-ws"));
    assert_eq!(resolved.server_url, DEFAULT_SERVER);
}

#[test]
fn missing_key_and_workspace_are_reported() {
    let resolved = ConfigLoader::resolve_config(Config::default(), |_| None);
    assert_matches!(resolved.require_api_key(), Err(CometxError::MissingApiKey));
    assert_matches!(resolved.workspace_or(None), Err(CometxError::MissingWorkspace));
}
