//! Seams to the collaborators that do the slow work: the voice connection,
//! media lookup, and the gateway's view of who sits in a voice channel.

use serenity::async_trait;

use crate::error::Result;
use crate::models::{ChannelId, GuildId, Track, TrackId, TrackInfo};

/// Voice backend for one process.
///
/// Calls are made while a session lock is held, so implementations must hand
/// the work off and return immediately. Failures that happen later are
/// reported back through the implementation's own event path.
pub trait VoiceTransport: Send + Sync {
    fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()>;
    fn disconnect(&self, guild: GuildId) -> Result<()>;
    fn play(&self, guild: GuildId, track: &Track) -> Result<()>;
    fn stop(&self, guild: GuildId) -> Result<()>;
    fn pause(&self, guild: GuildId) -> Result<()>;
    fn resume(&self, guild: GuildId) -> Result<()>;
    fn set_volume(&self, guild: GuildId, percent: u8) -> Result<()>;
}

/// Turns a user query into playable tracks.
///
/// Playlists resolve to several entries, everything else to exactly one.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackInfo>>;
}

/// Non-bot listener count in the bot's voice channel, `None` when unknown.
pub trait OccupancyProbe: Send + Sync {
    fn occupancy(&self, guild: GuildId) -> Option<usize>;
}

/// What the voice backend reports back about a track it was asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { guild: GuildId, track: TrackId },
    Finished { guild: GuildId, track: TrackId },
    Failed { guild: GuildId, track: TrackId, reason: String },
    /// Joining `channel` did not succeed; the session still believes it did.
    ConnectFailed { guild: GuildId, channel: ChannelId, reason: String },
}
