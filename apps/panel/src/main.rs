use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use firebase_rest::{FirebaseConfig, FirebaseStore};
use remote_store::{MemoryStore, RemoteStore};
use serde_json::{json, Value};
use shared::{
    domain::{DeviceIndex, DeviceKind, Field, RoomId, RoomSchema, Sensor},
    protocol::PanelSettings,
};
use sync_core::{overview::default_room, OverviewView, Panel, PanelRenderers, RoomView};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;
mod settings;

use render::TerminalRenderer;
use settings::{load_settings, Settings, StoreKind};

const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "panel.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Streams room or overview updates until interrupted.
    Watch {
        #[arg(long)]
        room: Option<String>,
        /// Stop after this many seconds.
        #[arg(long)]
        seconds: Option<u64>,
    },
    Toggle {
        #[arg(long)]
        room: String,
        kind: DeviceKind,
        index: u8,
        state: Switch,
    },
    FanSpeed {
        #[arg(long)]
        room: String,
        index: u8,
        percent: u8,
    },
    All {
        #[arg(long)]
        room: String,
        state: Switch,
    },
    Auto {
        #[arg(long)]
        room: String,
        state: Switch,
    },
    AddRoom {
        id: String,
    },
    DeleteRoom {
        id: String,
    },
    /// Prints the shared alert settings.
    ShowSettings,
    /// Updates the shared alert settings. Omitted flags keep their stored value.
    SaveSettings {
        #[arg(long)]
        temp_threshold: Option<i64>,
        #[arg(long)]
        humidity_threshold: Option<i64>,
        #[arg(long)]
        auto_off: Option<Switch>,
        #[arg(long)]
        notify_temp: Option<Switch>,
        #[arg(long)]
        notify_humidity: Option<Switch>,
        #[arg(long)]
        notify_presence: Option<Switch>,
    },
    Users,
    AddUser {
        email: String,
        room: String,
    },
    DeleteUser {
        uid: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .with_context(|| format!("invalid log_level {:?}", settings.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let schema = settings.schema();
    let store = connect(&settings, &schema)?;
    let session = settings.session(store.as_ref()).await?;
    info!(identity = %session.identity, role = ?session.role, "signed in");

    let renderer = Arc::new(TerminalRenderer::new(
        session
            .home_room
            .as_ref()
            .map(RoomId::to_string)
            .unwrap_or_else(|| "panel".to_string()),
    ));
    let panel = Panel::new(
        Arc::clone(&store),
        schema.clone(),
        PanelRenderers {
            room: renderer.clone(),
            overview: renderer.clone(),
        },
    );

    match cli.command {
        Command::Watch { room, seconds } => {
            panel.start(session).await?;
            if let Some(room) = room {
                panel.open_room(RoomId::parse(&room)?).await?;
            }
            match seconds {
                Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                None => tokio::signal::ctrl_c().await?,
            }
            panel.end().await;
        }
        Command::Toggle {
            room,
            kind,
            index,
            state,
        } => {
            let view = open_synced(&panel, session, &room).await?;
            view.set_device(kind, DeviceIndex(index), state.is_on())
                .await?;
            println!("{} {kind} {index} -> {}", view.room_id(), on_off(state.is_on()));
            panel.end().await;
        }
        Command::FanSpeed {
            room,
            index,
            percent,
        } => {
            let view = open_synced(&panel, session, &room).await?;
            view.set_fan_speed(DeviceIndex(index), percent).await?;
            println!("{} fan {index} speed -> {}%", view.room_id(), percent.min(100));
            panel.end().await;
        }
        Command::All { room, state } => {
            let view = open_synced(&panel, session, &room).await?;
            view.turn_all(state.is_on()).await?;
            println!("{} all devices -> {}", view.room_id(), on_off(state.is_on()));
            panel.end().await;
        }
        Command::Auto { room, state } => {
            let view = open_synced(&panel, session, &room).await?;
            view.set_automatic(state.is_on()).await?;
            println!("{} automatic mode -> {}", view.room_id(), on_off(state.is_on()));
            panel.end().await;
        }
        Command::AddRoom { id } => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            let room_id = overview.create_room(&id).await?;
            println!("created room {room_id}");
        }
        Command::DeleteRoom { id } => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            overview.delete_room(&id).await?;
            println!("deleted room {}", RoomId::parse(&id)?);
        }
        Command::ShowSettings => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            print_settings(&overview.panel_settings().await?);
        }
        Command::SaveSettings {
            temp_threshold,
            humidity_threshold,
            auto_off,
            notify_temp,
            notify_humidity,
            notify_presence,
        } => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            let mut stored = overview.panel_settings().await?;
            if let Some(value) = temp_threshold {
                stored.temp_threshold = value;
            }
            if let Some(value) = humidity_threshold {
                stored.humidity_threshold = value;
            }
            if let Some(value) = auto_off {
                stored.auto_off = value.is_on();
            }
            if let Some(value) = notify_temp {
                stored.notifications.temp = value.is_on();
            }
            if let Some(value) = notify_humidity {
                stored.notifications.humidity = value.is_on();
            }
            if let Some(value) = notify_presence {
                stored.notifications.presence = value.is_on();
            }
            overview.save_panel_settings(&stored).await?;
            print_settings(&stored);
        }
        Command::Users => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            for user in overview.list_users().await? {
                println!(
                    "{:<24} {:<32} {}",
                    user.uid,
                    user.email,
                    user.room_id.as_deref().unwrap_or("-")
                );
            }
        }
        Command::AddUser { email, room } => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            let key = overview.add_user(&email, &room).await?;
            println!("queued {} as pending user {key}", email.trim());
        }
        Command::DeleteUser { uid } => {
            let overview = OverviewView::new(store, schema, session.role, renderer);
            overview.delete_user(&uid).await?;
            println!("deleted user {}", uid.trim());
        }
    }

    Ok(())
}

fn connect(settings: &Settings, schema: &RoomSchema) -> Result<Arc<dyn RemoteStore>> {
    match settings.store {
        StoreKind::Memory => {
            info!("using in-process store with demo room A1");
            Ok(Arc::new(MemoryStore::with_tree(demo_tree(schema))))
        }
        StoreKind::Firebase => {
            let database_url = settings
                .database_url
                .clone()
                .context("database_url is required for the firebase store")?;
            let store = FirebaseStore::new(FirebaseConfig {
                database_url,
                auth_token: settings.auth_token.clone(),
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Room A1 in manual mode with someone present, so every command is allowed.
fn demo_tree(schema: &RoomSchema) -> Value {
    let mut room = default_room(schema);
    if let Value::Object(fields) = &mut room {
        fields.insert(schema.field_name(&Field::AutoMode), json!(false));
        fields.insert(
            schema.field_name(&Field::Sensor(Sensor::Presence)),
            json!("motion"),
        );
    }
    json!({ "Rooms": { "A1": room } })
}

async fn open_synced(
    panel: &Panel,
    session: sync_core::Session,
    room: &str,
) -> Result<Arc<RoomView>> {
    panel.start(session).await?;
    let view = panel.open_room(RoomId::parse(room)?).await?;

    let deadline = tokio::time::Instant::now() + SYNC_TIMEOUT;
    while !view.is_synced() {
        if tokio::time::Instant::now() >= deadline {
            bail!("room {} did not sync within {SYNC_TIMEOUT:?}", view.room_id());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(view)
}

fn print_settings(settings: &PanelSettings) {
    println!("temperature threshold  {}", settings.temp_threshold);
    println!("humidity threshold     {}", settings.humidity_threshold);
    println!("auto off               {}", on_off(settings.auto_off));
    println!(
        "notifications          temp {}, humidity {}, presence {}",
        on_off(settings.notifications.temp),
        on_off(settings.notifications.humidity),
        on_off(settings.notifications.presence)
    );
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
