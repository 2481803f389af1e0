#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use disco_bot::config::{RateLimitPolicy, RateQuota};
use disco_bot::error::{PlayerError, Result};
use disco_bot::models::{ChannelId, GuildId, Track, TrackInfo};
use disco_bot::transport::{MediaResolver, OccupancyProbe, VoiceTransport};
use disco_bot::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(GuildId, ChannelId),
    Disconnect(GuildId),
    Play(GuildId, String),
    Stop(GuildId),
    Pause(GuildId),
    Resume(GuildId),
    Volume(GuildId, u8),
}

/// Transport double that records every call and can refuse to hang up.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failing_disconnects: Mutex<HashSet<GuildId>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn fail_disconnect_for(&self, guild: GuildId) {
        self.failing_disconnects.lock().insert(guild);
    }
}

impl VoiceTransport for RecordingTransport {
    fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.calls.lock().push(Call::Connect(guild, channel));
        Ok(())
    }

    fn disconnect(&self, guild: GuildId) -> Result<()> {
        self.calls.lock().push(Call::Disconnect(guild));

        if self.failing_disconnects.lock().contains(&guild) {
            return Err(PlayerError::Transport("gateway unavailable".to_string()));
        }
        Ok(())
    }

    fn play(&self, guild: GuildId, track: &Track) -> Result<()> {
        self.calls.lock().push(Call::Play(guild, track.title.clone()));
        Ok(())
    }

    fn stop(&self, guild: GuildId) -> Result<()> {
        self.calls.lock().push(Call::Stop(guild));
        Ok(())
    }

    fn pause(&self, guild: GuildId) -> Result<()> {
        self.calls.lock().push(Call::Pause(guild));
        Ok(())
    }

    fn resume(&self, guild: GuildId) -> Result<()> {
        self.calls.lock().push(Call::Resume(guild));
        Ok(())
    }

    fn set_volume(&self, guild: GuildId, percent: u8) -> Result<()> {
        self.calls.lock().push(Call::Volume(guild, percent));
        Ok(())
    }
}

/// Occupancy per guild, set by the test. Guilds without an entry are unknown.
#[derive(Default)]
pub struct MapProbe {
    occupancy: Mutex<HashMap<GuildId, usize>>,
    evict_on_probe: Mutex<HashSet<GuildId>>,
    registry: OnceLock<Arc<SessionRegistry>>,
}

impl MapProbe {
    pub fn set(&self, guild: GuildId, occupancy: usize) {
        self.occupancy.lock().insert(guild, occupancy);
    }

    /// Evicts `guild` from `registry` the moment the sweep asks about it,
    /// standing in for a leave command racing the sweep.
    pub fn evict_when_probed(&self, registry: Arc<SessionRegistry>, guild: GuildId) {
        let _ = self.registry.set(registry);
        self.evict_on_probe.lock().insert(guild);
    }
}

impl OccupancyProbe for MapProbe {
    fn occupancy(&self, guild: GuildId) -> Option<usize> {
        if self.evict_on_probe.lock().remove(&guild) {
            if let Some(registry) = self.registry.get() {
                registry.evict(guild);
            }
        }

        self.occupancy.lock().get(&guild).copied()
    }
}

/// Resolves "list:a,b,c" to three tracks and any other query to one.
pub struct FakeResolver;

#[serenity::async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackInfo>> {
        if query == "nothing" {
            return Ok(Vec::new());
        }
        if query == "broken" {
            return Err(PlayerError::Extraction("unsupported site".to_string()));
        }

        let titles: Vec<&str> = match query.strip_prefix("list:") {
            Some(list) => list.split(',').collect(),
            None => vec![query],
        };

        Ok(titles.into_iter().map(info).collect())
    }
}

pub fn info(title: &str) -> TrackInfo {
    TrackInfo {
        title: title.to_string(),
        url: format!("https://example.com/{title}"),
        duration: Some(Duration::from_secs(180)),
    }
}

pub fn generous_limits() -> RateLimitPolicy {
    let quota = RateQuota {
        max_calls: 10_000,
        window: Duration::from_secs(1),
    };

    RateLimitPolicy {
        regular: quota,
        privileged: quota,
    }
}
