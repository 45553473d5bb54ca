//! Client-side state sync for a remote Trollibox jukebox.
//!
//! Each entity (a player, the filter database, the stream database) is a
//! [`NetModel`] that mirrors server state locally: push events from an
//! [`EventStream`] trigger reloads, local edits are pushed back through the
//! [`HttpGateway`], and the owner drives everything by calling `poll`.

pub mod config;
pub mod error;
pub mod filter_db;
pub mod gateway;
pub mod model;
pub mod player;
pub mod protocol;
pub mod sse;
pub mod stream_db;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::ApiError;
pub use filter_db::{FilterDb, FilterField};
pub use gateway::{CancelToken, Completion, Gateway, HttpGateway};
pub use model::{EntityState, ModelEvent, NetModel, NetModelBuilder, Origin};
pub use player::{Player, PlayerField, PlayerState};
pub use protocol::{EventKind, InsertAt, Method, Request, SearchResult, ServerEvent, Ticket};
pub use stream_db::{StreamDb, StreamField};
pub use sync::{Reloader, Updater};
pub use transport::{ConnectionState, EventStream, PushChannel, TransportEvent};
