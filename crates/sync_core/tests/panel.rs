mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{eventually, renderers, settle, wait_for_subscribers, RecordingRenderer};
use remote_store::MemoryStore;
use serde_json::json;
use shared::{
    domain::{Role, RoomId, RoomSchema, StorePath},
    error::DomainError,
    protocol::PanelSettings,
};
use sync_core::{
    load_session, OverviewView, Panel, Session, SessionProvider, StaticSession, SyncError,
    UserSummary,
};

const ROOM_SUBSCRIPTIONS: usize = 21;
const OVERVIEW_SUBSCRIPTIONS: usize = 2;

fn campus() -> serde_json::Value {
    json!({
        "Rooms": {
            "A1": {"NhietDo": 24, "DoAm": 55, "ChuyenDong": "motion", "AutoMode": false},
            "B2": {"NhietDo": 28, "DoAm": 65, "ChuyenDong": 0, "AutoMode": true}
        },
        "users": {
            "instructor-a1": {"email": "a1@smartclass.local", "roomId": "a1", "role": "user"},
            "root": {"email": "root@smartclass.local", "role": "admin"}
        }
    })
}

fn panel(store: &Arc<MemoryStore>, renderer: &Arc<RecordingRenderer>) -> Panel {
    Panel::new(store.clone(), RoomSchema::default(), renderers(renderer))
}

#[tokio::test]
async fn user_session_opens_home_room_and_end_tears_down() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let panel = panel(&store, &renderer);

    panel
        .start(Session::user("instructor-a1", RoomId::parse("A1")?))
        .await?;
    wait_for_subscribers(&store, ROOM_SUBSCRIPTIONS).await;
    let view = panel.room_view().await.expect("room view");
    assert_eq!(view.room_id().as_str(), "A1");
    assert!(panel.overview().await.is_none());

    panel.end().await;
    wait_for_subscribers(&store, 0).await;
    assert!(panel.room_view().await.is_none());
    assert!(panel.session().await.is_none());
    Ok(())
}

#[tokio::test]
async fn switching_rooms_does_not_accumulate_listeners() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let panel = panel(&store, &renderer);

    panel.start(Session::admin("root")).await?;
    wait_for_subscribers(&store, OVERVIEW_SUBSCRIPTIONS).await;

    for room in ["A1", "B2", "A1", "B2"] {
        let view = panel.open_room(RoomId::parse(room)?).await?;
        assert_eq!(view.room_id().as_str(), room);
        wait_for_subscribers(&store, OVERVIEW_SUBSCRIPTIONS + ROOM_SUBSCRIPTIONS).await;
    }
    Ok(())
}

#[tokio::test]
async fn users_cannot_open_other_rooms() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let panel = panel(&store, &renderer);

    panel
        .start(Session::user("instructor-a1", RoomId::parse("A1")?))
        .await?;
    let err = panel
        .open_room(RoomId::parse("B2")?)
        .await
        .expect_err("foreign room");
    assert!(matches!(err, SyncError::Forbidden));
    assert_eq!(
        panel.room_view().await.expect("home room").room_id().as_str(),
        "A1"
    );
    Ok(())
}

#[tokio::test]
async fn user_without_home_room_is_rejected() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let panel = panel(&store, &renderer);

    let session = Session {
        identity: "drifter".into(),
        role: Role::User,
        home_room: None,
    };
    let err = panel.start(session).await.expect_err("no room bound");
    assert!(matches!(err, SyncError::NoHomeRoom { .. }));
    assert!(panel.session().await.is_none());
    assert_eq!(store.subscriber_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn follow_tracks_sign_in_and_sign_out() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let panel = Arc::new(panel(&store, &renderer));
    let provider = StaticSession::default();

    let follower = tokio::spawn({
        let panel = panel.clone();
        let sessions = provider.sessions();
        async move { panel.follow(sessions).await }
    });

    provider.sign_in(Session::user("instructor-a1", RoomId::parse("A1")?));
    wait_for_subscribers(&store, ROOM_SUBSCRIPTIONS).await;

    provider.sign_in(Session::admin("root"));
    wait_for_subscribers(&store, OVERVIEW_SUBSCRIPTIONS).await;
    assert!(panel.overview().await.is_some());
    assert!(panel.room_view().await.is_none());

    provider.sign_out();
    wait_for_subscribers(&store, 0).await;

    drop(provider);
    follower.await?;
    assert!(panel.session().await.is_none());
    Ok(())
}

#[tokio::test]
async fn sessions_load_from_user_profiles() -> Result<()> {
    let store = MemoryStore::with_tree(campus());

    let user = load_session(&store, "instructor-a1").await?;
    assert_eq!(user.role, Role::User);
    assert_eq!(user.home_room, Some(RoomId::parse("A1")?));

    let admin = load_session(&store, "root").await?;
    assert!(admin.is_admin());
    assert!(admin.home_room.is_none());

    let err = load_session(&store, "nobody").await.expect_err("missing profile");
    assert!(matches!(err, SyncError::UnknownUser { .. }));
    Ok(())
}

#[tokio::test]
async fn overview_summarizes_rooms_and_manages_them() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let overview = OverviewView::new(
        store.clone(),
        RoomSchema::default(),
        Role::Admin,
        renderer.clone(),
    );
    overview.attach().await;

    eventually(|| renderer.last_rooms().is_some()).await;
    let (rooms, stats) = renderer.last_rooms().expect("rooms rendered");
    assert_eq!(rooms.len(), 2);
    assert_eq!(stats.total_rooms, 2);
    assert_eq!(stats.active_rooms, 1);
    assert_eq!(stats.average_temperature, Some(26.0));
    assert_eq!(stats.average_humidity, Some(60.0));

    let created = overview.create_room("  c3 ").await?;
    assert_eq!(created.as_str(), "C3");
    let tree = store.snapshot().await;
    assert_eq!(tree["Rooms"]["C3"]["NhietDo"], json!(25.0));
    assert_eq!(tree["Rooms"]["C3"]["AutoMode"], json!(true));
    assert_eq!(tree["Rooms"]["C3"]["TocDoQuat3"], json!(50));
    eventually(|| {
        renderer
            .last_rooms()
            .is_some_and(|(rooms, _)| rooms.len() == 3)
    })
    .await;

    overview.delete_room("b2").await?;
    eventually(|| {
        renderer
            .last_rooms()
            .is_some_and(|(_, stats)| stats.total_rooms == 2)
    })
    .await;
    assert!(store.snapshot().await["Rooms"].get("B2").is_none());

    assert!(matches!(
        overview.create_room("   ").await,
        Err(SyncError::Domain(_))
    ));
    Ok(())
}

#[tokio::test]
async fn room_management_requires_admin() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let overview = OverviewView::new(
        store.clone(),
        RoomSchema::default(),
        Role::User,
        renderer.clone(),
    );

    assert!(matches!(
        overview.create_room("D4").await,
        Err(SyncError::Forbidden)
    ));
    assert!(matches!(
        overview.delete_room("A1").await,
        Err(SyncError::Forbidden)
    ));
    assert!(matches!(overview.list_users().await, Err(SyncError::Forbidden)));
    assert!(matches!(
        overview.add_user("b2@smartclass.local", "B2").await,
        Err(SyncError::Forbidden)
    ));
    assert!(matches!(
        overview.delete_user("instructor-a1").await,
        Err(SyncError::Forbidden)
    ));
    assert!(matches!(
        overview.save_panel_settings(&PanelSettings::default()).await,
        Err(SyncError::Forbidden)
    ));
    assert!(store.write_log().await.is_empty());

    let settings = overview.panel_settings().await?;
    assert_eq!(settings, PanelSettings::default());

    settle().await;
    assert_eq!(
        renderer.count(|event| matches!(event, common::RenderEvent::Notice(..))),
        6
    );
    Ok(())
}

#[tokio::test]
async fn admins_list_add_and_delete_users() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let overview = OverviewView::new(
        store.clone(),
        RoomSchema::default(),
        Role::Admin,
        renderer.clone(),
    );

    let users = overview.list_users().await?;
    assert_eq!(
        users,
        vec![UserSummary {
            uid: "instructor-a1".into(),
            email: "a1@smartclass.local".into(),
            room_id: Some("a1".into()),
        }]
    );

    let key = overview.add_user("  b2@smartclass.local ", "b2").await?;
    let tree = store.snapshot().await;
    let pending = &tree["pendingUsers"][key.as_str()];
    assert_eq!(pending["email"], json!("b2@smartclass.local"));
    assert_eq!(pending["roomId"], json!("B2"));
    assert!(pending["createdAt"].as_i64().is_some_and(|at| at > 0));

    assert!(matches!(
        overview.add_user("not-an-email", "B2").await,
        Err(SyncError::Domain(DomainError::InvalidEmail(_)))
    ));
    assert!(matches!(
        overview.add_user("z9@smartclass.local", "Z9").await,
        Err(SyncError::UnknownRoom { .. })
    ));
    assert_eq!(store.write_log().await.len(), 1);

    overview.delete_user("instructor-a1").await?;
    let tree = store.snapshot().await;
    assert!(tree["users"].get("instructor-a1").is_none());
    assert!(tree["users"].get("root").is_some());
    assert!(overview.list_users().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn panel_settings_load_defaults_and_save() -> Result<()> {
    let store = Arc::new(MemoryStore::with_tree(campus()));
    let renderer = RecordingRenderer::new();
    let overview = OverviewView::new(
        store.clone(),
        RoomSchema::default(),
        Role::Admin,
        renderer.clone(),
    );

    let mut settings = overview.panel_settings().await?;
    assert_eq!(settings.temp_threshold, 35);
    assert_eq!(settings.humidity_threshold, 80);
    assert!(settings.auto_off);
    assert!(!settings.notifications.presence);

    settings.temp_threshold = 30;
    settings.notifications.presence = true;
    overview.save_panel_settings(&settings).await?;

    let tree = store.snapshot().await;
    assert_eq!(tree["Settings"]["tempThreshold"], json!(30));
    assert_eq!(tree["Settings"]["humidityThreshold"], json!(80));
    assert_eq!(tree["Settings"]["autoOff"], json!(true));
    assert_eq!(tree["Settings"]["notifications"]["presence"], json!(true));
    assert_eq!(overview.panel_settings().await?, settings);

    store
        .push(&StorePath::parse("Settings")?, json!("corrupt"))
        .await;
    assert_eq!(overview.panel_settings().await?, PanelSettings::default());
    settle().await;
    assert_eq!(
        renderer.count(|event| matches!(event, common::RenderEvent::Notice(..))),
        2
    );
    Ok(())
}
