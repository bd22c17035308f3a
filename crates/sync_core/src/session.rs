use std::sync::Arc;

use remote_store::RemoteStore;
use shared::{
    domain::{Role, RoomId, RoomSchema, StorePath, USERS_ROOT},
    protocol::UserProfile,
};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::{
    codec::DecodeError,
    error::SyncError,
    overview::OverviewView,
    render::{OverviewRenderer, RoomRenderer},
    room::RoomView,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub role: Role,
    /// Room a non-admin user is bound to.
    pub home_room: Option<RoomId>,
}

impl Session {
    pub fn admin(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role: Role::Admin,
            home_room: None,
        }
    }

    pub fn user(identity: impl Into<String>, home_room: RoomId) -> Self {
        Self {
            identity: identity.into(),
            role: Role::User,
            home_room: Some(home_room),
        }
    }

    pub fn from_profile(identity: impl Into<String>, profile: &UserProfile) -> Result<Self, SyncError> {
        let home_room = profile
            .room_id
            .as_deref()
            .filter(|room| !room.trim().is_empty())
            .map(RoomId::parse)
            .transpose()?;
        Ok(Self {
            identity: identity.into(),
            role: profile.role,
            home_room,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Source of the signed-in session. `None` means signed out.
pub trait SessionProvider: Send + Sync {
    fn sessions(&self) -> watch::Receiver<Option<Session>>;
}

/// Session provider driven by explicit calls.
pub struct StaticSession {
    tx: watch::Sender<Option<Session>>,
}

impl Default for StaticSession {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StaticSession {
    pub fn new(initial: Option<Session>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn sign_in(&self, session: Session) {
        self.tx.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(None);
    }
}

impl SessionProvider for StaticSession {
    fn sessions(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

/// Reads the `users/{uid}` profile and turns it into a session.
pub async fn load_session(store: &dyn RemoteStore, uid: &str) -> Result<Session, SyncError> {
    let path = StorePath::parse(USERS_ROOT)?.child(uid)?;
    let raw = store
        .get(&path)
        .await
        .map_err(|source| SyncError::Read {
            path: path.clone(),
            source,
        })?
        .ok_or_else(|| SyncError::UnknownUser {
            identity: uid.to_string(),
        })?;

    let profile: UserProfile =
        serde_json::from_value(raw.clone()).map_err(|_| SyncError::Decode {
            path,
            source: DecodeError {
                expected: "user profile",
                raw,
            },
        })?;
    Session::from_profile(uid, &profile)
}

#[derive(Clone)]
pub struct PanelRenderers {
    pub room: Arc<dyn RoomRenderer>,
    pub overview: Arc<dyn OverviewRenderer>,
}

#[derive(Default)]
struct PanelState {
    session: Option<Session>,
    room: Option<Arc<RoomView>>,
    overview: Option<Arc<OverviewView>>,
}

impl PanelState {
    async fn teardown(&mut self) {
        if let Some(room) = self.room.take() {
            room.detach().await;
        }
        if let Some(overview) = self.overview.take() {
            overview.detach().await;
        }
    }
}

/// Activates views for the signed-in session and tears them down when the
/// session ends. Views exist only while a session is present.
pub struct Panel {
    store: Arc<dyn RemoteStore>,
    schema: RoomSchema,
    renderers: PanelRenderers,
    state: Mutex<PanelState>,
}

impl Panel {
    pub fn new(store: Arc<dyn RemoteStore>, schema: RoomSchema, renderers: PanelRenderers) -> Self {
        Self {
            store,
            schema,
            renderers,
            state: Mutex::new(PanelState::default()),
        }
    }

    /// Admins land on the overview, users on their home room.
    pub async fn start(&self, session: Session) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        state.teardown().await;
        state.session = None;

        match session.role {
            Role::Admin => {
                let overview = Arc::new(OverviewView::new(
                    Arc::clone(&self.store),
                    self.schema.clone(),
                    session.role,
                    Arc::clone(&self.renderers.overview),
                ));
                overview.attach().await;
                state.overview = Some(overview);
            }
            Role::User => {
                let room = session.home_room.clone().ok_or_else(|| SyncError::NoHomeRoom {
                    identity: session.identity.clone(),
                })?;
                state.room = Some(self.attach_room(room).await?);
            }
        }

        info!(identity = %session.identity, role = ?session.role, "session started");
        state.session = Some(session);
        Ok(())
    }

    pub async fn end(&self) {
        let mut state = self.state.lock().await;
        state.teardown().await;
        if let Some(session) = state.session.take() {
            info!(identity = %session.identity, "session ended");
        }
    }

    /// Switches the room panel, detaching the previous room first. Users may
    /// only open their home room.
    pub async fn open_room(&self, room_id: RoomId) -> Result<Arc<RoomView>, SyncError> {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_ref() else {
            return Err(SyncError::Forbidden);
        };
        if !session.is_admin() && session.home_room.as_ref() != Some(&room_id) {
            warn!(identity = %session.identity, room = %room_id, "room outside session binding");
            return Err(SyncError::Forbidden);
        }

        if let Some(previous) = state.room.take() {
            previous.detach().await;
        }
        let view = self.attach_room(room_id).await?;
        state.room = Some(Arc::clone(&view));
        Ok(view)
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub async fn room_view(&self) -> Option<Arc<RoomView>> {
        self.state.lock().await.room.clone()
    }

    pub async fn overview(&self) -> Option<Arc<OverviewView>> {
        self.state.lock().await.overview.clone()
    }

    /// Runs views for every session the provider publishes until it goes
    /// away, then tears down.
    pub async fn follow(&self, mut sessions: watch::Receiver<Option<Session>>) {
        loop {
            let current = sessions.borrow_and_update().clone();
            match current {
                Some(session) => {
                    if let Err(err) = self.start(session).await {
                        error!(%err, "failed to start session");
                    }
                }
                None => self.end().await,
            }

            if sessions.changed().await.is_err() {
                break;
            }
        }
        self.end().await;
    }

    async fn attach_room(&self, room_id: RoomId) -> Result<Arc<RoomView>, SyncError> {
        let view = Arc::new(RoomView::new(
            Arc::clone(&self.store),
            self.schema.clone(),
            room_id,
            Arc::clone(&self.renderers.room),
        )?);
        view.attach().await;
        Ok(view)
    }
}
