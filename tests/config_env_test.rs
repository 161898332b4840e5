use std::env;
use tabsync::Settings;
use tempfile::TempDir;

// Each test owns distinct variables; tests in this binary share one environment.

#[test]
fn test_env_override_nested_field() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");

    unsafe {
        // Double underscore separates nesting, single underscores stay in the field name
        env::set_var("TABSYNC_WATCH__DEBOUNCE_MS", "275");
    }

    let settings = Settings::load_from(&config_path).unwrap();
    assert_eq!(settings.watch.debounce_ms, 275);

    unsafe {
        env::remove_var("TABSYNC_WATCH__DEBOUNCE_MS");
    }
}

#[test]
fn test_env_override_across_sections() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");

    unsafe {
        env::set_var("TABSYNC_CLIENT__URL", "ws://10.0.0.5:9100/ws");
        env::set_var("TABSYNC_SERVER__MAX_CONNECTIONS", "3");
    }

    let settings = Settings::load_from(&config_path).unwrap();
    assert_eq!(settings.client.url, "ws://10.0.0.5:9100/ws");
    assert_eq!(settings.server.max_connections, 3);

    unsafe {
        env::remove_var("TABSYNC_CLIENT__URL");
        env::remove_var("TABSYNC_SERVER__MAX_CONNECTIONS");
    }
}

#[test]
fn test_env_wins_over_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[client]
rejection_cooldown_ms = 1000
fetch_timeout_ms = 750
"#,
    )
    .unwrap();

    unsafe {
        env::set_var("TABSYNC_CLIENT__REJECTION_COOLDOWN_MS", "45000");
    }

    let settings = Settings::load_from(&config_path).unwrap();
    assert_eq!(settings.client.rejection_cooldown_ms, 45000);
    // Keys without an override still come from the file
    assert_eq!(settings.client.fetch_timeout_ms, 750);

    unsafe {
        env::remove_var("TABSYNC_CLIENT__REJECTION_COOLDOWN_MS");
    }
}
