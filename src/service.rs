//! Guard-then-transition entry points for the chat command layer.
//!
//! Each call checks the channel restriction and the caller's rate budget,
//! then performs exactly one transition on the guild's session.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::lock_api::ArcMutexGuard;
use tracing::{debug, info, warn};

use crate::config::RateLimitPolicy;
use crate::error::{PlayerError, Result};
use crate::helpers::channel_matches;
use crate::models::{ChannelId, GuildId, Track, TrackInfo, UserId};
use crate::rate_limit::{CommandClass, RateLimiter};
use crate::registry::{SessionGuard, SessionRegistry};
use crate::session::{EnqueueOutcome, GuildSession, SessionSnapshot, SkipOutcome};
use crate::transport::{MediaResolver, PlaybackEvent};

/// Who is asking, from where, and what the bot's voice channel looks like.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub guild: GuildId,
    pub subject: UserId,
    pub class: CommandClass,
    pub is_admin: bool,
    /// Non-bot members in the bot's voice channel.
    pub occupancy: usize,
    /// Name of the text channel the command came from, when known.
    pub text_channel: Option<String>,
}

impl CommandRequest {
    pub fn regular(guild: GuildId, subject: UserId) -> Self {
        CommandRequest {
            guild,
            subject,
            class: CommandClass::Regular,
            is_admin: false,
            occupancy: 0,
            text_channel: None,
        }
    }

    pub fn privileged(guild: GuildId, subject: UserId, is_admin: bool) -> Self {
        CommandRequest {
            class: CommandClass::Privileged,
            is_admin,
            ..CommandRequest::regular(guild, subject)
        }
    }

    pub fn with_occupancy(mut self, occupancy: usize) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn in_channel(mut self, name: impl Into<String>) -> Self {
        self.text_channel = Some(name.into());
        self
    }
}

/// Result of a play request.
#[derive(Debug, Clone)]
pub struct PlayReport {
    pub outcomes: Vec<EnqueueOutcome>,
    pub first_title: String,
}

pub struct MusicService {
    registry: Arc<SessionRegistry>,
    limiter: RateLimiter,
    resolver: Arc<dyn MediaResolver>,
}

impl MusicService {
    pub fn new(registry: Arc<SessionRegistry>, resolver: Arc<dyn MediaResolver>, limits: RateLimitPolicy) -> Self {
        MusicService {
            registry,
            limiter: RateLimiter::new(limits),
            resolver,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn admit(&self, request: &CommandRequest, session: &GuildSession) -> Result<()> {
        if request.class == CommandClass::Regular {
            if let Some(name) = &request.text_channel {
                let allowed = session.allowed_channel_name();
                if !channel_matches(name, allowed) {
                    return Err(PlayerError::WrongChannel {
                        allowed: allowed.to_string(),
                    });
                }
            }
        }

        self.limiter.check(request.subject, request.class, Instant::now())
    }

    /// Admits the request and runs `transition` under the guild's lock.
    fn transact<R>(
        &self,
        request: &CommandRequest,
        transition: impl FnOnce(&mut GuildSession) -> Result<R>,
    ) -> Result<R> {
        let mut session = self.registry.lock(request.guild);
        self.admit(request, &session)?;
        transition(&mut session)
    }

    pub fn join(&self, request: &CommandRequest, channel: ChannelId) -> Result<()> {
        self.transact(request, |session| session.connect(channel))
    }

    pub fn switch(&self, request: &CommandRequest, channel: ChannelId) -> Result<()> {
        self.transact(request, |session| session.switch(channel))
    }

    /// Disconnects, retires and unmaps the locked session.
    fn tear_down(&self, mut session: SessionGuard) {
        let guild = session.guild_id();
        if let Err(why) = session.disconnect() {
            warn!("Guild {guild} teardown: {why}");
        }
        session.retire();

        let handle = ArcMutexGuard::mutex(&session).clone();
        drop(session);
        self.registry.forget(guild, &handle);
    }

    /// Disconnects and evicts the guild's session.
    pub fn leave(&self, request: &CommandRequest) -> Result<()> {
        let session = self.registry.lock(request.guild);
        self.admit(request, &session)?;

        let was_connected = session.is_voice_connected();
        self.tear_down(session);

        if was_connected {
            Ok(())
        } else {
            Err(PlayerError::NotConnected)
        }
    }

    /// Resolves `query` and enqueues the results, joining `channel` first
    /// when the bot is not in voice yet.
    pub async fn play(&self, request: &CommandRequest, channel: ChannelId, query: &str) -> Result<PlayReport> {
        self.transact(request, |session| match session.voice_channel() {
            Some(current) if current != channel => Err(PlayerError::AlreadyConnected { channel: current }),
            _ => Ok(()),
        })?;

        info!("Guild {} resolving {query}", request.guild);
        let infos = self.resolver.resolve(query).await?;
        if infos.is_empty() {
            return Err(PlayerError::NotFound(query.to_string()));
        }

        let first_title = infos[0].title.clone();
        let mut session = self.registry.lock(request.guild);
        session.connect(channel)?;

        let outcomes = enqueue_all(&mut session, infos, request.subject)?;

        Ok(PlayReport { outcomes, first_title })
    }

    pub fn pause(&self, request: &CommandRequest) -> Result<()> {
        self.transact(request, |session| session.pause())
    }

    pub fn resume(&self, request: &CommandRequest) -> Result<()> {
        self.transact(request, |session| session.resume())
    }

    pub fn stop(&self, request: &CommandRequest) -> Result<()> {
        self.transact(request, |session| session.stop())
    }

    pub fn skip(&self, request: &CommandRequest) -> Result<SkipOutcome> {
        self.transact(request, |session| {
            session.skip(request.subject, request.is_admin, request.occupancy)
        })
    }

    pub fn remove(&self, request: &CommandRequest, position: usize) -> Result<Track> {
        self.transact(request, |session| session.remove(position))
    }

    pub fn clear(&self, request: &CommandRequest) -> Result<usize> {
        self.transact(request, |session| Ok(session.clear()))
    }

    /// Sets the volume, or reports it when `percent` is `None`.
    pub fn volume(&self, request: &CommandRequest, percent: Option<i64>) -> Result<u8> {
        self.transact(request, |session| match percent {
            Some(percent) => session.set_volume(percent),
            None if session.is_voice_connected() => Ok(session.volume()),
            None => Err(PlayerError::NotConnected),
        })
    }

    pub fn set_channel(&self, request: &CommandRequest, name: &str) -> Result<String> {
        self.transact(request, |session| {
            session
                .set_allowed_channel(name, request.is_admin)
                .map(str::to_string)
        })
    }

    pub fn queue(&self, request: &CommandRequest) -> Result<SessionSnapshot> {
        self.transact(request, |session| Ok(session.snapshot()))
    }

    /// Applies a report from the voice backend to the guild it concerns.
    pub fn on_playback_event(&self, event: PlaybackEvent) {
        let guild = match &event {
            PlaybackEvent::Started { guild, .. }
            | PlaybackEvent::Finished { guild, .. }
            | PlaybackEvent::Failed { guild, .. }
            | PlaybackEvent::ConnectFailed { guild, .. } => *guild,
        };

        let Some(mut session) = self.registry.lock_existing(guild) else {
            return;
        };

        let result = match event {
            PlaybackEvent::ConnectFailed { channel, reason, .. } => {
                if session.voice_channel() == Some(channel) {
                    warn!("Guild {guild} could not join voice channel {channel}: {reason}");
                    self.tear_down(session);
                }
                return;
            }
            PlaybackEvent::Started { track, .. } => {
                session.track_started(track);
                Ok(true)
            }
            PlaybackEvent::Finished { track, .. } => session.finish_track(track),
            PlaybackEvent::Failed { track, reason, .. } => {
                warn!("Guild {guild} could not play {track}: {reason}");
                session.track_failed(track)
            }
        };

        if let Err(why) = result {
            warn!("Guild {guild} playback event ignored: {why}");
        }
    }

    /// Listener count changed in the bot's voice channel.
    pub fn observe_occupancy(&self, guild: GuildId, occupancy: usize) {
        if let Some(mut session) = self.registry.lock_existing(guild) {
            session.observe_occupancy(occupancy, Instant::now());
        }
    }

    /// The gateway reports the bot out of `channel`. Our own hang-ups are
    /// acknowledged and ignored; anything else means someone removed the bot.
    pub fn on_bot_left_voice(&self, guild: GuildId, channel: Option<ChannelId>) {
        if self.registry.acknowledge_departure(guild) {
            debug!("Guild {guild} confirmed our own voice departure");
            return;
        }

        let Some(session) = self.registry.lock_existing(guild) else {
            return;
        };

        let connected_there = match (session.voice_channel(), channel) {
            (Some(current), Some(left)) => current == left,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if connected_there {
            self.tear_down(session);
            info!("Guild {guild} voice connection dropped, session evicted");
        }
    }

    pub fn on_bot_joined_voice(&self, guild: GuildId) {
        self.registry.clear_departures(guild);
    }

    pub fn purge_rate_limits(&self) {
        self.limiter.purge(Instant::now());
    }
}

fn enqueue_all(session: &mut GuildSession, infos: Vec<TrackInfo>, requester: UserId) -> Result<Vec<EnqueueOutcome>> {
    infos
        .into_iter()
        .map(|info| session.enqueue(Track::new(info, requester)))
        .collect()
}
