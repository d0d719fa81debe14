use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_dir(label: &str) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("agent_chat_{label}_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_when_no_file_or_env() {
    let dir = temp_dir("defaults");
    let settings = load_settings_from(&dir.join(SETTINGS_FILE), env_from(&[])).expect("load");
    assert_eq!(settings, Settings::default());

    let options = settings.client_options();
    assert_eq!(options.server_url, "http://localhost:3000");
    assert_eq!(options.ws_path, "/ws");
    assert_eq!(options.response_timeout, None);
    assert_eq!(options.reconnect, ReconnectPolicy::default());

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn file_values_then_env_overrides() {
    let dir = temp_dir("layered");
    let path = dir.join(SETTINGS_FILE);
    fs::write(
        &path,
        r#"
server_url = "http://agents.internal:8080"
response_timeout_secs = 45
reconnect_max_retries = 3
"#,
    )
    .expect("write settings");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("CHAT_SERVER_URL", "http://ignored:1"),
            ("APP__SERVER_URL", "https://chat.example.com"),
            ("APP__RECONNECT_INITIAL_MS", "250"),
        ]),
    )
    .expect("load");

    assert_eq!(settings.server_url, "https://chat.example.com");
    assert_eq!(settings.response_timeout_secs, Some(45));
    assert_eq!(settings.reconnect_max_retries, Some(3));
    assert_eq!(settings.reconnect_initial_ms, 250);

    let options = settings.client_options();
    assert_eq!(options.response_timeout, Some(Duration::from_secs(45)));
    assert_eq!(options.reconnect.initial_delay, Duration::from_millis(250));
    assert_eq!(options.reconnect.max_retries, Some(3));

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn unparseable_numeric_env_is_ignored() {
    let dir = temp_dir("bad_env");
    let settings = load_settings_from(
        &dir.join(SETTINGS_FILE),
        env_from(&[("APP__RECONNECT_MAX_MS", "soon")]),
    )
    .expect("load");
    assert_eq!(settings.reconnect_max_ms, 10_000);

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn malformed_settings_file_is_an_error() {
    let dir = temp_dir("bad_file");
    let path = dir.join(SETTINGS_FILE);
    fs::write(&path, "server_port = 3000\n").expect("write settings");

    let err = load_settings_from(&path, env_from(&[])).expect_err("unknown key");
    assert!(err.to_string().contains("invalid settings file"));

    fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn zero_timeout_disables_response_deadline() {
    let settings = Settings {
        response_timeout_secs: Some(0),
        ..Settings::default()
    };
    assert_eq!(settings.client_options().response_timeout, None);
}

#[test]
fn image_origin_defaults_to_server_url() {
    let settings = Settings::default();
    assert_eq!(
        settings.image_origin_url().expect("origin").as_str(),
        "http://localhost:3000/"
    );

    let settings = Settings {
        image_origin: Some("https://cdn.example.com".into()),
        ..Settings::default()
    };
    assert_eq!(
        settings.image_origin_url().expect("origin").as_str(),
        "https://cdn.example.com/"
    );
}
