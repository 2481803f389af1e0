//! Playback state of a single guild and every transition that mutates it.
//!
//! A `GuildSession` is always accessed through the registry's per-guild mutex,
//! so each method here runs as one uninterrupted critical section. Nothing in
//! this file awaits; voice work is handed to the transport and returns at once.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{IdlePolicy, DEFAULT_VOLUME, MAX_PLAY_RETRIES};
use crate::error::{PlayerError, Result};
use crate::models::{ChannelId, GuildId, Track, TrackId, UserId};
use crate::queue::PlaybackQueue;
use crate::supervisor::IdleReason;
use crate::transport::VoiceTransport;
use crate::votes::{VoteSkipTracker, VoteTally};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Disconnected,
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PlaybackStatus::Disconnected => "disconnected",
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The track went straight to the player.
    Started(Track),
    /// The track waits at this 1-based position.
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped { next: Option<Track> },
    Voted(VoteTally),
}

/// Read-only copy of a session for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub status: PlaybackStatus,
    pub current: Option<Track>,
    pub queue: Vec<(usize, Track)>,
    pub volume: u8,
    pub voice_channel: Option<ChannelId>,
    pub allowed_channel_name: String,
    pub skip_votes: usize,
}

pub struct GuildSession {
    guild_id: GuildId,
    queue: PlaybackQueue,
    current: Option<Track>,
    status: PlaybackStatus,
    volume: u8,
    last_activity: Instant,
    voice_channel: Option<ChannelId>,
    allowed_channel_name: String,
    votes: VoteSkipTracker,
    alone_since: Option<Instant>,
    play_failures: u32,
    retired: bool,
    transport: Arc<dyn VoiceTransport>,
}

impl GuildSession {
    pub fn new(guild_id: GuildId, allowed_channel_name: &str, transport: Arc<dyn VoiceTransport>) -> Self {
        GuildSession {
            guild_id,
            queue: PlaybackQueue::new(),
            current: None,
            status: PlaybackStatus::Disconnected,
            volume: DEFAULT_VOLUME,
            last_activity: Instant::now(),
            voice_channel: None,
            allowed_channel_name: normalize_channel_name(allowed_channel_name),
            votes: VoteSkipTracker::new(),
            alone_since: None,
            play_failures: 0,
            retired: false,
            transport,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.voice_channel
    }

    pub fn is_voice_connected(&self) -> bool {
        self.voice_channel.is_some()
    }

    pub fn allowed_channel_name(&self) -> &str {
        &self.allowed_channel_name
    }

    pub fn skip_votes(&self) -> usize {
        self.votes.count()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Marks the session as evicted; later lookups through the registry
    /// replace it with a fresh one.
    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_voice_connected() {
            Ok(())
        } else {
            Err(PlayerError::NotConnected)
        }
    }

    pub fn connect(&mut self, channel: ChannelId) -> Result<()> {
        match self.voice_channel {
            Some(current) if current == channel => {
                self.touch();
                Ok(())
            }
            Some(current) => Err(PlayerError::AlreadyConnected { channel: current }),
            None => {
                self.transport.connect(self.guild_id, channel)?;
                self.voice_channel = Some(channel);
                self.status = PlaybackStatus::Idle;
                self.alone_since = None;
                self.touch();

                info!("Guild {} connected to voice channel {channel}", self.guild_id);
                Ok(())
            }
        }
    }

    /// Moves to `channel`, connecting first when needed.
    pub fn switch(&mut self, channel: ChannelId) -> Result<()> {
        match self.voice_channel {
            None => self.connect(channel),
            Some(current) if current == channel => {
                self.touch();
                Ok(())
            }
            Some(current) => {
                self.transport.connect(self.guild_id, channel)?;
                self.voice_channel = Some(channel);
                self.alone_since = None;
                self.touch();

                info!("Guild {} moved from voice channel {current} to {channel}", self.guild_id);
                Ok(())
            }
        }
    }

    pub fn enqueue(&mut self, track: Track) -> Result<EnqueueOutcome> {
        self.ensure_connected()?;

        debug!("Guild {} enqueued {} - {}", self.guild_id, track.id, track.title);
        self.queue.push(track);
        self.touch();

        if self.status == PlaybackStatus::Idle {
            self.play_failures = 0;
            if let Some(track) = self.play_next()? {
                return Ok(EnqueueOutcome::Started(track));
            }
        }

        Ok(EnqueueOutcome::Queued {
            position: self.queue.len(),
        })
    }

    /// Installs the queue head as the current track, or goes idle when the
    /// queue is exhausted. Returns the new current track.
    pub fn play_next(&mut self) -> Result<Option<Track>> {
        self.ensure_connected()?;

        let previous = self.current.take();
        self.votes.clear();
        self.touch();

        match self.queue.pop_front() {
            Some(track) => {
                info!("Guild {} playing {} - {}", self.guild_id, track.title, track.url);

                if let Err(why) = self.transport.play(self.guild_id, &track) {
                    warn!("Guild {} could not hand {} to the transport: {why}", self.guild_id, track.id);
                }

                self.current = Some(track.clone());
                self.status = PlaybackStatus::Playing;
                Ok(Some(track))
            }
            None => {
                info!("Guild {} queue is empty", self.guild_id);

                if previous.is_some() {
                    if let Err(why) = self.transport.stop(self.guild_id) {
                        warn!("Guild {} stop failed: {why}", self.guild_id);
                    }
                }

                self.status = PlaybackStatus::Idle;
                Ok(None)
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Playing {
            return Err(PlayerError::InvalidState {
                operation: "pause",
                status: self.status,
            });
        }

        self.transport.pause(self.guild_id)?;
        self.status = PlaybackStatus::Paused;
        self.touch();

        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Paused {
            return Err(PlayerError::InvalidState {
                operation: "resume",
                status: self.status,
            });
        }

        self.transport.resume(self.guild_id)?;
        self.status = PlaybackStatus::Playing;
        self.touch();

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.ensure_connected()?;

        self.queue.clear();
        self.votes.clear();
        if self.current.take().is_some() {
            if let Err(why) = self.transport.stop(self.guild_id) {
                warn!("Guild {} stop failed: {why}", self.guild_id);
            }
        }
        self.status = PlaybackStatus::Idle;
        self.touch();

        Ok(())
    }

    /// Skips right away for admins and lone listeners, otherwise counts a vote
    /// and skips once a majority of `occupancy` agrees.
    pub fn skip(&mut self, initiator: UserId, is_admin: bool, occupancy: usize) -> Result<SkipOutcome> {
        match self.status {
            PlaybackStatus::Disconnected => return Err(PlayerError::NotConnected),
            PlaybackStatus::Idle => return Err(PlayerError::QueueEmpty),
            PlaybackStatus::Playing | PlaybackStatus::Paused => {}
        }

        if is_admin || occupancy <= 1 {
            let next = self.play_next()?;
            return Ok(SkipOutcome::Skipped { next });
        }

        let tally = self.votes.vote(initiator, occupancy);
        self.touch();

        debug!(
            "Guild {} skip vote from {initiator}: {}/{}",
            self.guild_id, tally.votes, tally.required
        );

        if tally.passed() {
            let next = self.play_next()?;
            Ok(SkipOutcome::Skipped { next })
        } else {
            Ok(SkipOutcome::Voted(tally))
        }
    }

    pub fn remove(&mut self, position: usize) -> Result<Track> {
        let removed = self.queue.remove(position)?;
        self.touch();

        Ok(removed)
    }

    /// Drops every pending track, keeping the current one. Returns how many
    /// were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.touch();

        dropped
    }

    pub fn set_volume(&mut self, percent: i64) -> Result<u8> {
        let volume = u8::try_from(percent)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(PlayerError::InvalidVolume(percent))?;
        self.ensure_connected()?;

        self.transport.set_volume(self.guild_id, volume)?;
        self.volume = volume;
        self.touch();

        Ok(volume)
    }

    pub fn set_allowed_channel(&mut self, name: &str, is_admin: bool) -> Result<&str> {
        if !is_admin {
            return Err(PlayerError::PermissionDenied("change the music channel"));
        }

        self.allowed_channel_name = normalize_channel_name(name);
        self.touch();

        Ok(&self.allowed_channel_name)
    }

    /// Tears the session down to `Disconnected`. Calling it again is a no-op.
    ///
    /// Local state is always cleared; an error only reports that the
    /// transport refused to hang up.
    pub fn disconnect(&mut self) -> Result<()> {
        let was_connected = self.voice_channel.take().is_some();

        self.queue.clear();
        self.current = None;
        self.votes.clear();
        self.status = PlaybackStatus::Disconnected;
        self.alone_since = None;
        self.play_failures = 0;
        self.touch();

        if was_connected {
            info!("Guild {} disconnected", self.guild_id);
            self.transport.disconnect(self.guild_id)?;
        }

        Ok(())
    }

    /// The transport finished `id`. Ignored unless `id` is still current.
    pub fn finish_track(&mut self, id: TrackId) -> Result<bool> {
        if self.current.as_ref().map(|t| t.id) != Some(id) {
            debug!("Guild {} ignoring stale end of {id}", self.guild_id);
            return Ok(false);
        }

        self.play_failures = 0;
        self.play_next()?;

        Ok(true)
    }

    pub fn track_started(&mut self, id: TrackId) {
        if self.current.as_ref().map(|t| t.id) == Some(id) {
            self.play_failures = 0;
        }
    }

    /// The transport could not start `id`. Moves on to the next track, giving
    /// up and clearing the queue after too many failures in a row.
    pub fn track_failed(&mut self, id: TrackId) -> Result<bool> {
        if self.current.as_ref().map(|t| t.id) != Some(id) {
            return Ok(false);
        }

        self.play_failures += 1;

        if self.play_failures < MAX_PLAY_RETRIES {
            info!(
                "Guild {} retrying play_next ({}/{MAX_PLAY_RETRIES})",
                self.guild_id, self.play_failures
            );
            self.play_next()?;
        } else {
            warn!("Guild {} reached {MAX_PLAY_RETRIES} failed tracks, clearing queue", self.guild_id);
            self.queue.clear();
            self.play_next()?;
            self.play_failures = 0;
        }

        Ok(true)
    }

    /// Records the current listener count for the alone timer.
    pub fn observe_occupancy(&mut self, occupancy: usize, now: Instant) {
        if occupancy > 0 {
            self.alone_since = None;
        } else if self.alone_since.is_none() {
            self.alone_since = Some(now);
        }
    }

    /// Why the session should be torn down at `now`, if at all.
    pub fn idle_reason(&self, now: Instant, policy: &IdlePolicy) -> Option<IdleReason> {
        if self.status == PlaybackStatus::Playing {
            return None;
        }

        let alone_for = self.alone_since.map(|since| now.saturating_duration_since(since));
        if self.is_voice_connected() && alone_for.map_or(false, |d| d >= policy.alone_timeout) {
            return Some(IdleReason::Alone);
        }

        if now.saturating_duration_since(self.last_activity) >= policy.inactivity_timeout {
            return Some(IdleReason::Inactive);
        }

        None
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            status: self.status,
            current: self.current.clone(),
            queue: self.queue.positions(),
            volume: self.volume,
            voice_channel: self.voice_channel,
            allowed_channel_name: self.allowed_channel_name.clone(),
            skip_votes: self.votes.count(),
        }
    }
}

fn normalize_channel_name(name: &str) -> String {
    name.trim().to_lowercase()
}
