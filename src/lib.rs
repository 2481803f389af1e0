pub mod config;
pub mod error;
pub mod gateway;
pub mod helpers;
pub mod models;
pub mod playlists;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod service;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod voice;
pub mod votes;

pub use error::{PlayerError, Result};
pub use registry::SessionRegistry;
pub use service::{CommandRequest, MusicService};
pub use session::{GuildSession, PlaybackStatus};
pub use supervisor::{IdleDisconnect, IdleReason, IdleSupervisor};
