use super::*;
use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings =
        load_settings_with(&dir.path().join("panel.toml"), no_env).expect("defaults");

    assert_eq!(settings, Settings::default());
    assert_eq!(settings.store, StoreKind::Memory);
    assert_eq!(settings.schema().device_count, 3);
    assert_eq!(settings.fields.presence, "ChuyenDong");
}

#[test]
fn file_values_replace_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("panel.toml");
    fs::write(
        &path,
        r#"
store = "firebase"
database_url = "https://demo-rtdb.firebaseio.com"
identity = "instructor-b2"
role = "user"
home_room = "B2"
device_count = 2

[fields]
presence = "PhatHienNguoi"
"#,
    )
    .expect("write config");

    let settings = load_settings_with(&path, no_env).expect("settings");
    assert_eq!(settings.store, StoreKind::Firebase);
    assert_eq!(
        settings.database_url.as_deref(),
        Some("https://demo-rtdb.firebaseio.com")
    );
    assert_eq!(settings.role, Role::User);
    assert_eq!(settings.home_room.as_deref(), Some("B2"));
    assert_eq!(settings.fields.presence, "PhatHienNguoi");
    assert_eq!(settings.fields.temperature, "NhietDo");
    assert_eq!(settings.log_level, "info");

    let schema = settings.schema();
    assert_eq!(schema.device_count, 2);
    assert_eq!(schema.indices().count(), 2);
}

#[test]
fn environment_overrides_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("panel.toml");
    fs::write(&path, "store = \"firebase\"\ndevice_count = 2\n").expect("write config");

    let env = env_from(&[
        ("PANEL__STORE", "memory"),
        ("PANEL__DEVICE_COUNT", "4"),
        ("PANEL__ROLE", "User"),
        ("PANEL__HOME_ROOM", "A1"),
        ("PANEL__LOG_LEVEL", "debug"),
        ("PANEL__FIELDS__AUTO_MODE", "CheDoTuDong"),
        ("OTHER__STORE", "firebase"),
    ]);
    let settings = load_settings_with(&path, env).expect("settings");

    assert_eq!(settings.store, StoreKind::Memory);
    assert_eq!(settings.device_count, 4);
    assert_eq!(settings.role, Role::User);
    assert_eq!(settings.home_room.as_deref(), Some("A1"));
    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.fields.auto_mode, "CheDoTuDong");
}

#[test]
fn invalid_values_are_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("panel.toml");

    assert!(load_settings_with(&path, env_from(&[("PANEL__STORE", "sqlite")])).is_err());
    assert!(load_settings_with(&path, env_from(&[("PANEL__ROLE", "guest")])).is_err());
    assert!(load_settings_with(&path, env_from(&[("PANEL__DEVICE_COUNT", "many")])).is_err());
    assert!(load_settings_with(&path, env_from(&[("PANEL__DEVICE_COUNT", "0")])).is_err());

    fs::write(&path, "store = [1, 2]\n").expect("write config");
    assert!(load_settings_with(&path, no_env).is_err());
}

#[tokio::test]
async fn user_without_room_is_resolved_from_profile() {
    let store = remote_store::MemoryStore::with_tree(serde_json::json!({
        "users": { "instructor-c3": { "email": "c3@school.edu", "role": "user", "roomId": "C3" } }
    }));
    let settings = Settings {
        identity: "instructor-c3".into(),
        role: Role::User,
        ..Settings::default()
    };

    let session = settings.session(&store).await.expect("session");
    assert_eq!(session.home_room, Some(RoomId::parse("C3").expect("room")));

    let stranger = Settings {
        identity: "nobody".into(),
        role: Role::User,
        ..Settings::default()
    };
    assert!(stranger.session(&store).await.is_err());

    let admin = Settings::default().session(&store).await.expect("admin");
    assert!(admin.is_admin());
}
