//! Reads voice occupancy out of the serenity cache.

use std::sync::Arc;

use serenity::cache::Cache;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId as SerenityChannelId, GuildId as SerenityGuildId, UserId as SerenityUserId};

use crate::models::GuildId;
use crate::transport::OccupancyProbe;

/// Non-bot members sharing the bot's voice channel, `None` when the bot is
/// not in voice.
pub fn listeners(guild: &Guild, bot_id: SerenityUserId) -> Option<usize> {
    let bot_channel = guild.voice_states.get(&bot_id)?.channel_id?;

    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(bot_channel))
        .filter(|state| state.user_id != bot_id)
        .filter(|state| !state.member.as_ref().map_or(false, |member| member.user.bot))
        .count();

    Some(count)
}

/// Voice channel the user currently sits in.
pub fn user_voice_channel(guild: &Guild, user_id: SerenityUserId) -> Option<SerenityChannelId> {
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

pub struct CacheOccupancy {
    cache: Arc<Cache>,
}

impl CacheOccupancy {
    pub fn new(cache: Arc<Cache>) -> Self {
        CacheOccupancy { cache }
    }
}

impl OccupancyProbe for CacheOccupancy {
    fn occupancy(&self, guild: GuildId) -> Option<usize> {
        let guild = self.cache.guild(SerenityGuildId(guild))?;
        listeners(&guild, self.cache.current_user_id())
    }
}
