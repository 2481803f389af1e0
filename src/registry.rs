use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{ChannelId, GuildId, Track};
use crate::session::GuildSession;
use crate::transport::VoiceTransport;

pub type SessionHandle = Arc<Mutex<GuildSession>>;
pub type SessionGuard = ArcMutexGuard<RawMutex, GuildSession>;

/// Every live guild session of the process.
///
/// Guilds are independent: each session has its own mutex and the map itself
/// is sharded, so work on one guild never waits on another.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    transport: Arc<DepartureLog>,
    default_channel: String,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn VoiceTransport>, default_channel: &str) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            transport: Arc::new(DepartureLog {
                inner: transport,
                pending: DashMap::new(),
            }),
            default_channel: default_channel.to_string(),
        }
    }

    /// Consumes one hang-up this process asked for. The gateway reports our
    /// own leaves back some time later; those must not tear down a session
    /// created in the meantime.
    pub fn acknowledge_departure(&self, guild: GuildId) -> bool {
        match self.transport.pending.get_mut(&guild) {
            Some(mut pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        }
    }

    /// The bot showed up in a voice channel again, so every earlier leave has
    /// already been reported.
    pub fn clear_departures(&self, guild: GuildId) {
        self.transport.pending.remove(&guild);
    }

    /// Returns the guild's session, creating it on first use. Concurrent first
    /// calls for the same guild all receive the same session.
    pub fn get_or_create(&self, guild: GuildId) -> SessionHandle {
        self.sessions
            .entry(guild)
            .or_insert_with(|| {
                info!("Creating session for guild {guild}");
                Arc::new(Mutex::new(GuildSession::new(
                    guild,
                    &self.default_channel,
                    self.transport.clone(),
                )))
            })
            .clone()
    }

    pub fn get(&self, guild: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild).map(|entry| entry.value().clone())
    }

    /// Locks the guild's live session, creating one if needed. A session
    /// evicted between lookup and lock is replaced rather than handed out.
    pub fn lock(&self, guild: GuildId) -> SessionGuard {
        loop {
            let handle = self.get_or_create(guild);
            let session = handle.lock_arc();

            if !session.is_retired() {
                return session;
            }

            drop(session);
            self.forget(guild, &handle);
        }
    }

    /// Locks the guild's session only if one exists and is still live.
    pub fn lock_existing(&self, guild: GuildId) -> Option<SessionGuard> {
        let session = self.get(guild)?.lock_arc();
        (!session.is_retired()).then_some(session)
    }

    /// Runs one transition on the guild's session.
    pub fn with_session<R>(&self, guild: GuildId, transition: impl FnOnce(&mut GuildSession) -> R) -> R {
        let mut session = self.lock(guild);
        transition(&mut session)
    }

    /// Removes the guild's session, disconnecting it. Returns `None` when
    /// there was nothing to evict, which makes repeated calls harmless.
    pub fn evict(&self, guild: GuildId) -> Option<SessionHandle> {
        let (_, handle) = self.sessions.remove(&guild)?;

        {
            let mut session = handle.lock();
            if let Err(why) = session.disconnect() {
                warn!("Guild {guild} disconnect during eviction failed: {why}");
            }
            session.retire();
        }

        info!("Evicted session for guild {guild}");
        Some(handle)
    }

    /// Drops the map entry for `guild` if it still points at `handle`.
    pub(crate) fn forget(&self, guild: GuildId, handle: &SessionHandle) -> bool {
        self.sessions
            .remove_if(&guild, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Point-in-time copy of all entries. Callers lock each one on its own.
    pub fn entries(&self) -> Vec<(GuildId, SessionHandle)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnects and drops every session, used on shutdown.
    pub fn clear(&self) {
        for (guild, _) in self.entries() {
            self.evict(guild);
        }
    }
}

/// Counts hang-ups per guild on their way to the voice backend.
struct DepartureLog {
    inner: Arc<dyn VoiceTransport>,
    pending: DashMap<GuildId, u32>,
}

impl VoiceTransport for DepartureLog {
    fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.inner.connect(guild, channel)
    }

    fn disconnect(&self, guild: GuildId) -> Result<()> {
        *self.pending.entry(guild).or_insert(0) += 1;

        let result = self.inner.disconnect(guild);
        if result.is_err() {
            if let Some(mut pending) = self.pending.get_mut(&guild) {
                *pending = pending.saturating_sub(1);
            }
        }
        result
    }

    fn play(&self, guild: GuildId, track: &Track) -> Result<()> {
        self.inner.play(guild, track)
    }

    fn stop(&self, guild: GuildId) -> Result<()> {
        self.inner.stop(guild)
    }

    fn pause(&self, guild: GuildId) -> Result<()> {
        self.inner.pause(guild)
    }

    fn resume(&self, guild: GuildId) -> Result<()> {
        self.inner.resume(guild)
    }

    fn set_volume(&self, guild: GuildId, percent: u8) -> Result<()> {
        self.inner.set_volume(guild, percent)
    }
}
