//! Client-side synchronization between a realtime key-value store and the
//! panels that display and command classroom devices.

pub mod codec;
pub mod error;
pub mod overview;
pub mod render;
pub mod room;
pub mod session;
pub mod synchronizer;

pub use codec::{DecodeError, FieldCodec, SyncValue};
pub use error::{LockReason, SyncError};
pub use overview::{OverviewView, UserSummary};
pub use render::{Mode, Occupancy, OverviewRenderer, OverviewStats, RoomRenderer, RoomSummary};
pub use room::{DeviceSnapshot, RoomSnapshot, RoomView};
pub use session::{load_session, Panel, PanelRenderers, Session, SessionProvider, StaticSession};
pub use synchronizer::{PendingWrite, SubscriptionHandle, Synchronizer};
