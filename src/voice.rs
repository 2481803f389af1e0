//! Songbird-backed voice transport and yt-dlp media resolver.
//!
//! Every guild gets one worker task that owns its songbird call and applies
//! voice commands strictly in the order the session issued them.

use std::sync::Arc;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::model::id::{ChannelId as SerenityChannelId, GuildId as SerenityGuildId};
use songbird::input::ytdl_search;
use songbird::tracks::{TrackHandle, TrackResult};
use songbird::{ytdl, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use crate::config::DEFAULT_VOLUME;
use crate::error::{PlayerError, Result};
use crate::models::{ChannelId, GuildId, Track, TrackId, TrackInfo};
use crate::playlists::{is_playlist_url, tracks_from_playlist_url};
use crate::transport::{MediaResolver, PlaybackEvent, VoiceTransport};

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

#[derive(Debug)]
enum VoiceCommand {
    Join(ChannelId),
    Leave,
    Play(Track),
    Stop,
    Pause,
    Resume,
    Volume(u8),
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    workers: DashMap<GuildId, UnboundedSender<VoiceCommand>>,
    events: UnboundedSender<PlaybackEvent>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, events: UnboundedSender<PlaybackEvent>) -> Self {
        SongbirdTransport {
            manager,
            workers: DashMap::new(),
            events,
        }
    }

    fn send(&self, guild: GuildId, command: VoiceCommand) -> Result<()> {
        let worker = self
            .workers
            .entry(guild)
            .or_insert_with(|| self.spawn_worker(guild))
            .clone();

        worker
            .send(command)
            .map_err(|_| PlayerError::Transport(format!("voice worker for guild {guild} has stopped")))
    }

    fn spawn_worker(&self, guild: GuildId) -> UnboundedSender<VoiceCommand> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = VoiceWorker {
            guild,
            manager: self.manager.clone(),
            events: self.events.clone(),
            current: None,
            volume: DEFAULT_VOLUME,
        };

        tokio::spawn(worker.run(receiver).instrument(info_span!("voice_worker", guild)));

        sender
    }
}

impl VoiceTransport for SongbirdTransport {
    fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.send(guild, VoiceCommand::Join(channel))
    }

    fn disconnect(&self, guild: GuildId) -> Result<()> {
        self.send(guild, VoiceCommand::Leave)
    }

    fn play(&self, guild: GuildId, track: &Track) -> Result<()> {
        self.send(guild, VoiceCommand::Play(track.clone()))
    }

    fn stop(&self, guild: GuildId) -> Result<()> {
        self.send(guild, VoiceCommand::Stop)
    }

    fn pause(&self, guild: GuildId) -> Result<()> {
        self.send(guild, VoiceCommand::Pause)
    }

    fn resume(&self, guild: GuildId) -> Result<()> {
        self.send(guild, VoiceCommand::Resume)
    }

    fn set_volume(&self, guild: GuildId, percent: u8) -> Result<()> {
        self.send(guild, VoiceCommand::Volume(percent))
    }
}

struct VoiceWorker {
    guild: GuildId,
    manager: Arc<Songbird>,
    events: UnboundedSender<PlaybackEvent>,
    current: Option<TrackHandle>,
    volume: u8,
}

impl VoiceWorker {
    async fn run(mut self, mut commands: UnboundedReceiver<VoiceCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                VoiceCommand::Join(channel) => self.join(channel).await,
                VoiceCommand::Leave => self.leave().await,
                VoiceCommand::Play(track) => self.play(track).await,
                VoiceCommand::Stop => self.stop_current(),
                VoiceCommand::Pause => self.with_current("pause", |handle| handle.pause()),
                VoiceCommand::Resume => self.with_current("resume", |handle| handle.play()),
                VoiceCommand::Volume(percent) => {
                    self.volume = percent;
                    self.with_current("set volume", |handle| handle.set_volume(volume_scale(percent)));
                }
            }
        }

        info!("Voice worker for guild {} finished", self.guild);
    }

    fn guild_id(&self) -> SerenityGuildId {
        SerenityGuildId(self.guild)
    }

    async fn join(&mut self, channel: ChannelId) {
        let (call, result) = self.manager.join(self.guild_id(), SerenityChannelId(channel)).await;

        if let Err(why) = result {
            warn!("Joining voice channel {channel} failed: {why:?}");
            self.report(PlaybackEvent::ConnectFailed {
                guild: self.guild,
                channel,
                reason: why.to_string(),
            });
            return;
        }

        let mut handler = call.lock().await;

        if handler.is_deaf() {
            info!("Already deafened");
        } else if let Err(why) = handler.deafen(true).await {
            info!("Deafen failed due to {why:?}");
        }
    }

    async fn leave(&mut self) {
        self.stop_current();

        if self.manager.get(self.guild_id()).is_some() {
            if let Err(why) = self.manager.remove(self.guild_id()).await {
                warn!("Leaving voice failed: {why:?}");
            }
        }
    }

    async fn play(&mut self, track: Track) {
        self.stop_current();

        let source = match ytdl(&track.url).await {
            Ok(source) => source,
            Err(why) => {
                self.report(PlaybackEvent::Failed {
                    guild: self.guild,
                    track: track.id,
                    reason: why.to_string(),
                });
                return;
            }
        };

        let handler_lock = match self.manager.get(self.guild_id()) {
            Some(handler_lock) => handler_lock,
            None => {
                self.report(PlaybackEvent::Failed {
                    guild: self.guild,
                    track: track.id,
                    reason: "Not in a voice channel to play in".to_string(),
                });
                return;
            }
        };

        let track_handle = {
            let mut handler = handler_lock.lock().await;
            handler.stop(); // Just in case something was playing before
            handler.play_source(source)
        };

        if let Err(why) = track_handle.set_volume(volume_scale(self.volume)) {
            warn!("Setting volume for {} failed: {why:?}", track.id);
        }

        let notifier = TrackEndNotifier {
            guild: self.guild,
            track: track.id,
            events: self.events.clone(),
        };

        if let Err(why) = track_handle.add_event(Event::Track(TrackEvent::End), notifier) {
            warn!("Adding end event for {} failed: {why:?}", track.id);
        }

        info!("Streaming {} - {}", track.title, track.url);
        self.current = Some(track_handle);
        self.report(PlaybackEvent::Started {
            guild: self.guild,
            track: track.id,
        });
    }

    fn stop_current(&mut self) {
        if let Some(handle) = self.current.take() {
            if let Err(why) = handle.stop() {
                info!("Stopping track failed: {why:?}");
            }
        }
    }

    fn with_current(&self, action: &str, apply: impl FnOnce(&TrackHandle) -> TrackResult<()>) {
        match &self.current {
            Some(handle) => {
                if let Err(why) = apply(handle) {
                    warn!("Could not {action}: {why:?}");
                }
            }
            None => info!("Nothing to {action}"),
        }
    }

    fn report(&self, event: PlaybackEvent) {
        if self.events.send(event).is_err() {
            warn!("Playback event listener is gone");
        }
    }
}

fn volume_scale(percent: u8) -> f32 {
    f32::from(percent.min(100)) / 100.0
}

struct TrackEndNotifier {
    guild: GuildId,
    track: TrackId,
    events: UnboundedSender<PlaybackEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!("End notifier triggered for {} in guild {}", self.track, self.guild);

        if self
            .events
            .send(PlaybackEvent::Finished {
                guild: self.guild,
                track: self.track,
            })
            .is_err()
        {
            warn!("Playback event listener is gone, end of {} dropped", self.track);
        }

        None
    }
}

/// Resolves URLs, playlists and free-text searches through yt-dlp.
pub struct YtDlpResolver;

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackInfo>> {
        if is_playlist_url(query) {
            info!("Detected playlist in {query}");

            let url = query.to_string();
            return tokio::task::spawn_blocking(move || tracks_from_playlist_url(&url))
                .await
                .map_err(|why| PlayerError::Extraction(why.to_string()))?;
        }

        let input = if query.starts_with("http") {
            ytdl(query).await
        } else {
            ytdl_search(query).await
        }
        .map_err(|why| PlayerError::Extraction(format!("{query}: {why}")))?;

        let url = input
            .metadata
            .source_url
            .clone()
            .ok_or_else(|| PlayerError::NotFound(query.to_string()))?;
        let title = input
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string());
        let duration = input.metadata.duration;

        Ok(vec![TrackInfo { title, url, duration }])
    }
}
